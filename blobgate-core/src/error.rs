use thiserror::Error;

/// Gateway-wide error type.
///
/// Variants carry owned strings rather than source errors so the enum stays
/// `Clone`: a rejected promise hands its reason to every attached child.
#[derive(Debug, Clone, Error)]
pub enum GateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("unauthorized access to object: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("network failure reaching {host}: {message}")]
    Network { host: String, message: String },

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("gateway closed")]
    Closed,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GateError>;

impl From<std::io::Error> for GateError {
    fn from(error: std::io::Error) -> Self {
        GateError::Storage(error.to_string())
    }
}

impl From<rusqlite::Error> for GateError {
    fn from(error: rusqlite::Error) -> Self {
        GateError::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(error: serde_json::Error) -> Self {
        GateError::Internal(error.to_string())
    }
}
