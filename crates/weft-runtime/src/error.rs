use std::sync::Arc;

use thiserror::Error;
use weft_store::StoreError;

use crate::resource::ResourceKind;

/// Failure of one resource load.
///
/// Cloneable because the same outcome is handed to the first requester and to
/// every caller waitlisted on that resource.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("Failed to fetch {key}: {reason}")]
    Fetch { key: String, reason: String },

    #[error("{key} answered with HTTP {status}")]
    Status { key: String, status: u16 },

    #[error("Cannot decode {key} as {kind}: {reason}")]
    Decode {
        key: String,
        kind: ResourceKind,
        reason: String,
    },

    #[error("Script {key} failed: {reason}")]
    Script { key: String, reason: String },

    #[error("{kind} resources cannot be fetched from {key}")]
    Unsupported { key: String, kind: ResourceKind },

    #[error("Load of {key} was abandoned before it completed")]
    Abandoned { key: String },
}

impl LoadError {
    /// The resource does not exist, as opposed to being unreachable.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Datastore error: {0}")]
    Store(#[from] StoreError),

    #[error("Datastore could not be opened: {0}")]
    StoreOpen(Arc<StoreError>),

    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    #[error("Invalid component definition: {0}")]
    InvalidDefinition(String),

    #[error("Malformed {tag} dependency: {reason}")]
    MalformedDependency { tag: String, reason: String },

    #[error("Malformed configuration for {component}: {reason}")]
    MalformedConfig { component: String, reason: String },

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Initializer of {index} failed: {reason}")]
    Initialize { index: String, reason: String },

    #[error("Work on {0} was abandoned before it completed")]
    Abandoned(String),

    #[error("Runtime was reset while {0} was pending")]
    Reset(String),

    #[error("Runtime has shut down")]
    ShutDown,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
