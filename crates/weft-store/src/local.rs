use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::dataset::{Dataset, matches_query};

/// In-memory first tier of every datastore.
///
/// Authoritative for queries: predicate lookups never reach the backend.
pub struct LocalCache {
    entries: RwLock<HashMap<String, Dataset>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Copy of the dataset stored under `key`.
    pub async fn get(&self, key: &str) -> Option<Dataset> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: String, dataset: Dataset) {
        self.entries.write().await.insert(key, dataset);
    }

    pub async fn remove(&self, key: &str) -> Option<Dataset> {
        self.entries.write().await.remove(key)
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Copies of all datasets matching `query`. Order is unspecified.
    pub async fn query(&self, query: &Dataset) -> Vec<Dataset> {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|candidate| matches_query(candidate, query))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}
