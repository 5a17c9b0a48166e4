use thiserror::Error;

pub type CredentialResult<T> = Result<T, CredentialError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Access denied assuming role: {0}")]
    AccessDenied(String),

    #[error("Invalid cross-account configuration: {0}")]
    InvalidConfiguration(String),

    #[error("STS error: {0}")]
    Sts(String),

    #[error("STS response did not contain credentials")]
    MissingCredentials,
}
