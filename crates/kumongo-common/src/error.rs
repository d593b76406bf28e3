use thiserror::Error;

#[derive(Error, Debug)]
pub enum MongoError {
    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation exceeded time limit: {0}")]
    OperationTimeout(String),

    #[error("Kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: String, actual: String },

    #[error("Missing key: {0}")]
    MissingKey(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),
}

impl From<std::io::Error> for MongoError {
    fn from(e: std::io::Error) -> Self {
        MongoError::Communication(e.to_string())
    }
}

pub type MongoResult<T> = Result<T, MongoError>;
