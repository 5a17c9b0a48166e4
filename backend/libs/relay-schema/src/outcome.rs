use serde::Serialize;

/// Terminal broker result for one published message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub message_id: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn delivered(message_id: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            message_id: message_id.into(),
            partition: Some(partition),
            offset: Some(offset),
            error: None,
        }
    }

    pub fn failed(message_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            partition: None,
            offset: None,
            error: Some(error.into()),
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}
