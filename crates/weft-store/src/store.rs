use std::sync::Arc;

use crate::backend::{Backend, BackendFactory};
use crate::dataset::{Dataset, generate_key, key_of, merge_into};
use crate::error::StoreError;
use crate::local::LocalCache;
use crate::settings::{DatastoreSettings, Session};

/// Local cache in front of the backend chosen by the settings.
///
/// * `get(key)` is read-through: a local hit never reaches the backend, a miss
///   is fetched and cached.
/// * `query` and `all` enumerate the local cache only.
/// * `set` merges over the previous state (local copy, or the backend's on a
///   local miss), writes through, and caches whatever the backend answers.
/// * `delete` removes from the backend first, then locally.
pub struct Store {
    settings: DatastoreSettings,
    local: LocalCache,
    backend: Option<Arc<dyn Backend>>,
}

impl Store {
    /// Open a store, connecting whichever backend `settings` selects.
    pub async fn open(
        settings: DatastoreSettings,
        factory: &BackendFactory,
    ) -> Result<Self, StoreError> {
        let backend = factory.connect(&settings).await?;
        let source = settings.source_id();
        tracing::info!(
            backend = backend.as_ref().map_or("local", |b| b.name()),
            source = %&source[..12],
            "Datastore opened"
        );
        Ok(Self::with_backend(settings, backend))
    }

    pub fn with_backend(settings: DatastoreSettings, backend: Option<Arc<dyn Backend>>) -> Self {
        Self {
            settings,
            local: LocalCache::new(),
            backend,
        }
    }

    pub fn settings(&self) -> &DatastoreSettings {
        &self.settings
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    pub fn is_local_only(&self) -> bool {
        self.backend.is_none()
    }

    pub async fn get(
        &self,
        key: &str,
        session: Option<&Session>,
    ) -> Result<Option<Dataset>, StoreError> {
        if let Some(hit) = self.local.get(key).await {
            tracing::debug!(key, "Local cache hit");
            return Ok(Some(hit));
        }

        let Some(backend) = &self.backend else {
            return Ok(None);
        };

        let fetched = backend.get(key, session).await?;
        if let Some(dataset) = &fetched {
            self.local.insert(key.to_string(), dataset.clone()).await;
        }
        Ok(fetched)
    }

    /// Every locally cached dataset deep-equal to `query` on each of its fields.
    pub async fn query(&self, query: &Dataset) -> Vec<Dataset> {
        self.local.query(query).await
    }

    pub async fn all(&self) -> Vec<Dataset> {
        self.local.query(&Dataset::new()).await
    }

    /// Merge `priority` over the stored dataset with the same key, generating
    /// a key when there is none. Returns the new local truth.
    pub async fn set(
        &self,
        mut priority: Dataset,
        session: Option<&Session>,
    ) -> Result<Dataset, StoreError> {
        let key_field = &self.settings.key_field;
        let (key, generated) = match key_of(&priority, key_field) {
            Some(key) => (key, false),
            None if priority.get(key_field).is_none_or(|v| v.is_null()) => {
                let key = generate_key();
                priority.insert(key_field.clone(), key.clone().into());
                (key, true)
            }
            None => return Err(StoreError::MissingKey(key_field.clone())),
        };

        // The merge base is the previous state, read through on a local miss.
        let mut merged = if generated {
            Dataset::new()
        } else {
            self.get(&key, session).await?.unwrap_or_default()
        };
        merge_into(&mut merged, priority);
        merged.insert(key_field.clone(), key.clone().into());

        let truth = match &self.backend {
            Some(backend) => backend
                .put(&key, &merged, session)
                .await?
                .unwrap_or(merged),
            None => merged,
        };

        self.local.insert(key.clone(), truth.clone()).await;
        tracing::debug!(key, "Dataset stored");
        Ok(truth)
    }

    /// Remove one dataset, or everything when `key` is `None`.
    pub async fn delete(
        &self,
        key: Option<&str>,
        session: Option<&Session>,
    ) -> Result<(), StoreError> {
        if let Some(backend) = &self.backend {
            backend.delete(key, session).await?;
        }
        match key {
            Some(key) => {
                self.local.remove(key).await;
            }
            None => self.local.clear().await,
        }
        Ok(())
    }

    /// Local entry count when local-only, the backend's count otherwise.
    pub async fn count(&self, session: Option<&Session>) -> Result<usize, StoreError> {
        match &self.backend {
            Some(backend) => backend.count(session).await,
            None => Ok(self.local.len().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn dataset(value: Value) -> Dataset {
        value.as_object().cloned().unwrap()
    }

    fn local_store() -> Store {
        Store::with_backend(DatastoreSettings::local(), None)
    }

    #[tokio::test]
    async fn set_get_count_delete_scenario() {
        let store = local_store();

        let stored = store.set(dataset(json!({"value": "B"})), None).await.unwrap();
        let key = stored["key"].as_str().unwrap().to_string();

        let fetched = store.get(&key, None).await.unwrap().unwrap();
        assert_eq!(Value::Object(fetched), json!({"key": key, "value": "B"}));
        assert_eq!(store.count(None).await.unwrap(), 1);

        store.delete(Some(&key), None).await.unwrap();
        assert!(store.get(&key, None).await.unwrap().is_none());
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_merges_over_previous_state() {
        let store = local_store();
        store
            .set(dataset(json!({"key": "k", "a": 1, "b": 2})), None)
            .await
            .unwrap();
        store
            .set(dataset(json!({"key": "k", "b": null, "c": 3})), None)
            .await
            .unwrap();

        let fetched = store.get("k", None).await.unwrap().unwrap();
        assert_eq!(Value::Object(fetched), json!({"key": "k", "a": 1, "c": 3}));
    }

    #[tokio::test]
    async fn non_string_key_is_rejected() {
        let store = local_store();
        let err = store
            .set(dataset(json!({"key": {"nested": 1}})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingKey(_)));
    }

    #[tokio::test]
    async fn delete_without_key_clears_everything() {
        let store = local_store();
        for k in ["a", "b", "c"] {
            store.set(dataset(json!({"key": k})), None).await.unwrap();
        }
        store.delete(None, None).await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn embedded_miss_reads_through_and_caches() {
        let tmp = TempDir::new().unwrap();
        let factory = BackendFactory::new(tmp.path().to_path_buf());
        let settings = DatastoreSettings::embedded("notes");

        {
            let writer = Store::open(settings.clone(), &factory).await.unwrap();
            writer
                .set(dataset(json!({"key": "n1", "text": "hi"})), None)
                .await
                .unwrap();
        }

        let reader = Store::open(settings, &factory).await.unwrap();
        assert!(reader.local().is_empty().await);
        assert!(reader.query(&Dataset::new()).await.is_empty());

        let fetched = reader.get("n1", None).await.unwrap().unwrap();
        assert_eq!(fetched["text"], json!("hi"));
        assert_eq!(reader.local().len().await, 1);
        assert_eq!(reader.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn partial_set_on_cold_cache_keeps_stored_fields() {
        let tmp = TempDir::new().unwrap();
        let factory = BackendFactory::new(tmp.path().to_path_buf());
        let settings = DatastoreSettings::embedded("notes");

        {
            let writer = Store::open(settings.clone(), &factory).await.unwrap();
            writer
                .set(dataset(json!({"key": "n1", "a": 1, "b": 2})), None)
                .await
                .unwrap();
        }

        let store = Store::open(settings.clone(), &factory).await.unwrap();
        let stored = store
            .set(dataset(json!({"key": "n1", "b": null, "c": 3})), None)
            .await
            .unwrap();
        assert_eq!(Value::Object(stored), json!({"key": "n1", "a": 1, "c": 3}));

        // The table row holds the union too, not just the priority data.
        let fresh = Store::open(settings, &factory).await.unwrap();
        let fetched = fresh.get("n1", None).await.unwrap().unwrap();
        assert_eq!(Value::Object(fetched), json!({"key": "n1", "a": 1, "c": 3}));
    }

    #[tokio::test]
    async fn embedded_delete_reaches_the_table() {
        let tmp = TempDir::new().unwrap();
        let factory = BackendFactory::new(tmp.path().to_path_buf());
        let store = Store::open(DatastoreSettings::embedded("t"), &factory)
            .await
            .unwrap();
        store.set(dataset(json!({"key": "x"})), None).await.unwrap();

        store.delete(Some("x"), None).await.unwrap();

        assert!(store.get("x", None).await.unwrap().is_none());
        assert_eq!(store.count(None).await.unwrap(), 0);
    }
}
