use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const DEFAULT_KEY_FIELD: &str = "key";
const DEFAULT_COLLECTION: &str = "default";

/// Credentials passed through to a backend untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Descriptor selecting one backend combination for a datastore.
///
/// Two descriptors that are structurally equal name the same data source;
/// [`DatastoreSettings::source_id`] is the identity the runtime keys its
/// datastore table on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreSettings {
    /// Embedded table name, and the collection name sent to a remote service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Remote service endpoint. `http(s)://` for request/response,
    /// `tcp://host:port` together with `persistent` for the socket channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    /// Keep one duplex connection open instead of one request per call.
    #[serde(default)]
    pub persistent: bool,
    /// Name of the unique key field of every dataset.
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

fn default_key_field() -> String {
    DEFAULT_KEY_FIELD.into()
}

impl Default for DatastoreSettings {
    fn default() -> Self {
        Self {
            table: None,
            service_url: None,
            persistent: false,
            key_field: default_key_field(),
            credentials: None,
        }
    }
}

/// The backend a datastore talks to behind its local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Embedded { table: String },
    Remote { url: String, persistent: bool },
}

impl DatastoreSettings {
    /// Local-only settings.
    pub fn local() -> Self {
        Self::default()
    }

    /// Local cache in front of an embedded table.
    pub fn embedded(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::default()
        }
    }

    /// Local cache in front of a remote collection.
    pub fn remote(url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            table: Some(collection.into()),
            service_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Backend precedence: remote service, then embedded table, then local only.
    pub fn backend_kind(&self) -> BackendKind {
        if let Some(url) = &self.service_url {
            return BackendKind::Remote {
                url: url.clone(),
                persistent: self.persistent,
            };
        }
        if let Some(table) = &self.table {
            return BackendKind::Embedded {
                table: table.clone(),
            };
        }
        BackendKind::Local
    }

    /// Collection name sent with every remote request.
    pub fn collection(&self) -> &str {
        self.table.as_deref().unwrap_or(DEFAULT_COLLECTION)
    }

    /// Stable identity of the data source this descriptor names.
    ///
    /// `serde_json::Value` keeps object keys sorted, so serializing through it
    /// gives a canonical form regardless of how the descriptor was written.
    pub fn source_id(&self) -> String {
        let canonical = serde_json::to_value(self)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Caller session attached to datastore operations.
///
/// A backend that answers with an authentication sentinel invalidates the
/// session; later operations carrying it fail with
/// [`StoreError::SessionExpired`](crate::StoreError::SessionExpired).
#[derive(Debug)]
pub struct Session {
    credentials: Credentials,
    valid: AtomicBool,
}

impl Session {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            valid: AtomicBool::new(true),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        if self.valid.swap(false, Ordering::AcqRel) {
            tracing::warn!("Session invalidated by backend");
        }
    }
}
