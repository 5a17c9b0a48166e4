use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Acknowledgment failed: {0}")]
pub struct AckError(pub String);

/// Commits the broker offset of one delivery. Acknowledging offset N also
/// commits every earlier offset of the same partition.
pub trait AckHandle: Send + Sync {
    fn acknowledge(&self) -> Result<(), AckError>;
}
