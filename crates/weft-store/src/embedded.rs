use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::backend::{Backend, BackendFuture};
use crate::dataset::Dataset;
use crate::error::StoreError;
use crate::settings::Session;

const MANIFEST_FILE: &str = "manifest.json";
const TABLES_DIR: &str = "tables";

type Rows = BTreeMap<String, Dataset>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    version: u64,
    tables: Vec<String>,
}

/// Embedded client database: one directory, one JSON file per table.
///
/// Layout under `dir`:
/// ```text
/// {dir}/
///   manifest.json        - schema version counter + known tables
///   tables/{name}.json   - rows of one table, keyed by dataset key
/// ```
///
/// Requesting a table that does not exist yet bumps the persisted schema
/// version. Every read or write of a table runs as one transaction under a
/// database-wide lock.
pub struct EmbeddedDatabase {
    dir: PathBuf,
    manifest: Mutex<Manifest>,
    transaction: Mutex<()>,
}

impl EmbeddedDatabase {
    pub async fn open(dir: PathBuf) -> Result<Arc<Self>, StoreError> {
        tokio::fs::create_dir_all(dir.join(TABLES_DIR)).await?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest = if manifest_path.exists() {
            let content = tokio::fs::read_to_string(&manifest_path).await?;
            serde_json::from_str(&content)?
        } else {
            Manifest::default()
        };

        tracing::info!(
            path = %dir.display(),
            version = manifest.version,
            tables = manifest.tables.len(),
            "Embedded database opened"
        );

        Ok(Arc::new(Self {
            dir,
            manifest: Mutex::new(manifest),
            transaction: Mutex::new(()),
        }))
    }

    /// Current schema version.
    pub async fn version(&self) -> u64 {
        self.manifest.lock().await.version
    }

    pub async fn tables(&self) -> Vec<String> {
        self.manifest.lock().await.tables.clone()
    }

    /// Open a table, creating it (and bumping the schema version) if needed.
    pub async fn table(self: &Arc<Self>, name: &str) -> Result<EmbeddedTable, StoreError> {
        validate_table_name(name)?;

        let mut manifest = self.manifest.lock().await;
        let path = self.table_path(name);

        if !manifest.tables.iter().any(|t| t == name) {
            manifest.version += 1;
            manifest.tables.push(name.to_string());
            write_atomic(
                &self.dir.join(MANIFEST_FILE),
                &serde_json::to_vec_pretty(&*manifest)?,
            )
            .await?;
            tracing::info!(table = name, version = manifest.version, "Schema upgraded");
        }

        if !path.exists() {
            write_atomic(&path, b"{}").await?;
        }

        Ok(EmbeddedTable {
            db: Arc::clone(self),
            name: name.to_string(),
            path,
        })
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(TABLES_DIR).join(format!("{name}.json"))
    }
}

fn validate_table_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTable(name.to_string()))
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Handle on one table of the embedded database.
pub struct EmbeddedTable {
    db: Arc<EmbeddedDatabase>,
    name: String,
    path: PathBuf,
}

impl EmbeddedTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn read_rows(&self) -> Result<Rows, StoreError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_rows(&self, rows: &Rows) -> Result<(), StoreError> {
        write_atomic(&self.path, &serde_json::to_vec(rows)?).await
    }
}

impl Backend for EmbeddedTable {
    fn name(&self) -> &str {
        "embedded"
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
        _session: Option<&'a Session>,
    ) -> BackendFuture<'a, Option<Dataset>> {
        Box::pin(async move {
            let _tx = self.db.transaction.lock().await;
            let mut rows = self.read_rows().await?;
            Ok(rows.remove(key))
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        dataset: &'a Dataset,
        _session: Option<&'a Session>,
    ) -> BackendFuture<'a, Option<Dataset>> {
        Box::pin(async move {
            let _tx = self.db.transaction.lock().await;
            let mut rows = self.read_rows().await?;
            rows.insert(key.to_string(), dataset.clone());
            self.write_rows(&rows).await?;
            tracing::debug!(table = %self.name, key, "Row written");
            Ok(Some(dataset.clone()))
        })
    }

    fn delete<'a>(
        &'a self,
        key: Option<&'a str>,
        _session: Option<&'a Session>,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let _tx = self.db.transaction.lock().await;
            let rows = match key {
                Some(key) => {
                    let mut rows = self.read_rows().await?;
                    rows.remove(key);
                    rows
                }
                None => Rows::new(),
            };
            self.write_rows(&rows).await
        })
    }

    fn count<'a>(&'a self, _session: Option<&'a Session>) -> BackendFuture<'a, usize> {
        Box::pin(async move {
            let _tx = self.db.transaction.lock().await;
            Ok(self.read_rows().await?.len())
        })
    }
}
