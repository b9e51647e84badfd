use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Dataset has no usable key field '{0}'")]
    MissingKey(String),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Invalid datastore settings: {0}")]
    InvalidSettings(String),

    #[error("Backend rejected the request: {0}")]
    Rejected(String),

    #[error("Session is no longer valid")]
    SessionExpired,

    #[error("Remote service returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("Remote channel closed")]
    Disconnected,

    #[error("Unexpected reply from backend: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
