use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::dataset::Dataset;
use crate::embedded::EmbeddedDatabase;
use crate::error::StoreError;
use crate::remote::{HttpTransport, RemoteBackend, SocketTransport, Transport};
use crate::settings::{BackendKind, DatastoreSettings, Session};

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Second tier behind a datastore's local cache.
///
/// Only direct key lookups cross this boundary; predicate queries are served
/// by the local cache alone.
///
/// Uses Pin<Box<dyn Future>> for dyn-compatibility.
pub trait Backend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    fn get<'a>(
        &'a self,
        key: &'a str,
        session: Option<&'a Session>,
    ) -> BackendFuture<'a, Option<Dataset>>;

    /// Store the full dataset under `key`. Returns the backend's copy when it
    /// answers with one; that copy becomes the new local truth.
    fn put<'a>(
        &'a self,
        key: &'a str,
        dataset: &'a Dataset,
        session: Option<&'a Session>,
    ) -> BackendFuture<'a, Option<Dataset>>;

    /// Remove one dataset, or every dataset when `key` is `None`.
    fn delete<'a>(
        &'a self,
        key: Option<&'a str>,
        session: Option<&'a Session>,
    ) -> BackendFuture<'a, ()>;

    fn count<'a>(&'a self, session: Option<&'a Session>) -> BackendFuture<'a, usize>;
}

/// Builds the backend a settings descriptor selects.
///
/// Owns the one physical embedded database (opened on first use) and the
/// HTTP client shared by every request/response remote backend.
pub struct BackendFactory {
    database_dir: PathBuf,
    database: OnceCell<Arc<EmbeddedDatabase>>,
    http: reqwest::Client,
}

impl BackendFactory {
    pub fn new(database_dir: PathBuf) -> Self {
        Self {
            database_dir,
            database: OnceCell::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Default database location: ~/.weft/db/
    pub fn default_database_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".weft")
            .join("db")
    }

    pub async fn database(&self) -> Result<Arc<EmbeddedDatabase>, StoreError> {
        self.database
            .get_or_try_init(|| EmbeddedDatabase::open(self.database_dir.clone()))
            .await
            .cloned()
    }

    /// Connect the backend for `settings`. Local-only settings have none.
    pub async fn connect(
        &self,
        settings: &DatastoreSettings,
    ) -> Result<Option<Arc<dyn Backend>>, StoreError> {
        match settings.backend_kind() {
            BackendKind::Local => Ok(None),
            BackendKind::Embedded { table } => {
                let table = self.database().await?.table(&table).await?;
                Ok(Some(Arc::new(table)))
            }
            BackendKind::Remote { url, persistent } => {
                let transport: Arc<dyn Transport> = if persistent {
                    let addr = url.strip_prefix("tcp://").ok_or_else(|| {
                        StoreError::InvalidSettings(format!(
                            "persistent channel needs a tcp:// address, got {url}"
                        ))
                    })?;
                    Arc::new(SocketTransport::connect(addr).await?)
                } else {
                    if !(url.starts_with("http://") || url.starts_with("https://")) {
                        return Err(StoreError::InvalidSettings(format!(
                            "service url must be http(s), got {url}"
                        )));
                    }
                    Arc::new(HttpTransport::new(self.http.clone(), url))
                };
                Ok(Some(Arc::new(RemoteBackend::new(
                    transport,
                    settings.collection().to_string(),
                    settings.credentials.clone(),
                ))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_settings_have_no_backend() {
        let tmp = TempDir::new().unwrap();
        let factory = BackendFactory::new(tmp.path().to_path_buf());
        let backend = factory.connect(&DatastoreSettings::local()).await.unwrap();
        assert!(backend.is_none());
    }

    #[tokio::test]
    async fn embedded_settings_open_a_table() {
        let tmp = TempDir::new().unwrap();
        let factory = BackendFactory::new(tmp.path().to_path_buf());
        let backend = factory
            .connect(&DatastoreSettings::embedded("notes"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(backend.name(), "embedded");
    }

    #[tokio::test]
    async fn persistent_channel_requires_tcp_scheme() {
        let tmp = TempDir::new().unwrap();
        let factory = BackendFactory::new(tmp.path().to_path_buf());
        let mut settings = DatastoreSettings::remote("http://localhost:1/data", "notes");
        settings.persistent = true;

        let err = factory.connect(&settings).await.err().unwrap();
        assert!(matches!(err, StoreError::InvalidSettings(_)));
    }

    #[tokio::test]
    async fn database_is_opened_once() {
        let tmp = TempDir::new().unwrap();
        let factory = BackendFactory::new(tmp.path().to_path_buf());
        let a = factory.database().await.unwrap();
        let b = factory.database().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
