use std::future::Future;
use std::sync::Arc;

use weft_store::{BackendFactory, DatastoreSettings, Store, StoreError};

use crate::config::RuntimeConfig;
use crate::datastore::Datastore;
use crate::error::RuntimeError;
use crate::fetch::{Fetcher, RoutingFetcher};
use crate::loader::Loader;
use crate::registry::{ComponentDefinition, Registry};
use crate::resource::{Resource, ResourceKind, ResourceSpec};
use crate::script::{ManifestScriptHost, ScriptHost};
use crate::waitlist::{Claim, PendingGuard, WaitError, Waitlist};

/// Explicit engine context. Owns the resource cache, the component registry
/// and the datastore table; clones share them.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) loader: Loader,
    pub(crate) registry: Arc<Registry>,
    pub(crate) stores: Arc<Waitlist<String, Arc<Datastore>, Arc<StoreError>>>,
    pub(crate) backends: BackendFactory,
}

pub struct RuntimeBuilder {
    config: RuntimeConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    script_host: Option<Arc<dyn ScriptHost>>,
}

impl RuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            fetcher: None,
            script_host: None,
        }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn script_host(mut self, script_host: Arc<dyn ScriptHost>) -> Self {
        self.script_host = Some(script_host);
        self
    }

    pub fn build(self) -> Runtime {
        let registry = Arc::new(Registry::new());
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(RoutingFetcher::from_config(&self.config)));
        let script_host = self
            .script_host
            .unwrap_or_else(|| Arc::new(ManifestScriptHost::new()));

        Runtime {
            inner: Arc::new(RuntimeInner {
                loader: Loader::new(fetcher, script_host, registry.clone()),
                registry,
                stores: Arc::new(Waitlist::new()),
                backends: BackendFactory::new(self.config.database_dir.clone()),
                config: self.config,
            }),
        }
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        RuntimeBuilder::new(config).build()
    }

    pub fn builder(config: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn loader(&self) -> &Loader {
        &self.inner.loader
    }

    pub async fn load(&self, spec: impl Into<ResourceSpec>) -> Result<Resource, RuntimeError> {
        self.inner.loader.load(&spec.into()).await
    }

    pub async fn load_all(&self, specs: &[ResourceSpec]) -> Result<Vec<Resource>, RuntimeError> {
        self.inner.loader.load_all(specs).await
    }

    /// Register a definition; an index already taken keeps its definition.
    pub fn register(&self, definition: ComponentDefinition) -> Arc<ComponentDefinition> {
        self.inner.registry.register(definition).0
    }

    /// Load a script resource and return the component it provides.
    pub async fn register_script(&self, key: &str) -> Result<Arc<ComponentDefinition>, RuntimeError> {
        let spec = ResourceSpec::new(key).with_kind(ResourceKind::Script);
        match self.inner.loader.load(&spec).await? {
            Resource::Script(Some(definition)) => Ok(definition),
            _ => Err(RuntimeError::ComponentNotFound(key.to_string())),
        }
    }

    /// Wait, up to the resolve timeout, for `index` to be registered.
    pub async fn wait_for_component(
        &self,
        index: &str,
    ) -> Result<Arc<ComponentDefinition>, RuntimeError> {
        self.with_timeout(|| index.to_string(), self.inner.registry.wait_for(index))
            .await
    }

    /// The datastore for `settings`, opening it on first use. Structurally
    /// equal settings share one datastore; callers arriving while it opens
    /// wait for that open instead of starting another. The open runs in its
    /// own task and completes even if every caller stops waiting.
    pub async fn open_store(&self, settings: DatastoreSettings) -> Result<Arc<Datastore>, RuntimeError> {
        let source = settings.source_id();
        match self.inner.stores.claim(&source) {
            Claim::Ready(store) => Ok(store),
            Claim::Wait(waiter) => {
                tracing::debug!(source = %&source[..12], "Datastore opening, waitlisted");
                waiter.wait().await.map_err(|e| match e {
                    WaitError::Failed(e) => RuntimeError::StoreOpen(e),
                    WaitError::Abandoned => RuntimeError::Abandoned(format!("datastore {source}")),
                    WaitError::Cleared => RuntimeError::Reset(format!("datastore {source}")),
                })
            }
            Claim::Lead(guard) => {
                let inner = self.inner.clone();
                tokio::spawn(open_and_complete(inner, settings, guard))
                    .await
                    .unwrap_or_else(|e| {
                        tracing::error!(source = %&source[..12], error = %e, "Datastore open task died");
                        Err(RuntimeError::Abandoned(format!("datastore {source}")))
                    })
            }
        }
    }

    pub fn store_count(&self) -> usize {
        self.inner.stores.len()
    }

    /// Clear the resource cache, registry and datastore table together.
    /// Anything parked on them fails with [`RuntimeError::Reset`].
    pub fn reset(&self) {
        self.inner.loader.clear();
        self.inner.registry.clear();
        self.inner.stores.clear();
        tracing::info!("Runtime reset");
    }

    pub(crate) async fn with_timeout<T, F>(
        &self,
        label: impl FnOnce() -> String,
        work: F,
    ) -> Result<T, RuntimeError>
    where
        F: Future<Output = Result<T, RuntimeError>>,
    {
        let Some(limit) = self.inner.config.resolve_timeout() else {
            return work.await;
        };
        match tokio::time::timeout(limit, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let label = label();
                tracing::warn!(waiting_for = %label, ?limit, "Dependency timed out");
                Err(RuntimeError::Timeout(label))
            }
        }
    }
}

async fn open_and_complete(
    inner: Arc<RuntimeInner>,
    settings: DatastoreSettings,
    guard: PendingGuard<String, Arc<Datastore>, Arc<StoreError>>,
) -> Result<Arc<Datastore>, RuntimeError> {
    let source = settings.source_id();
    match Store::open(settings, &inner.backends).await {
        Ok(store) => {
            let store = Arc::new(Datastore::new(store, Arc::downgrade(&inner)));
            guard.resolve(store.clone());
            Ok(store)
        }
        Err(e) => {
            tracing::error!(source = %&source[..12], error = %e, "Datastore open failed");
            let e = Arc::new(e);
            guard.fail(e.clone());
            Err(RuntimeError::StoreOpen(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticFetcher;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn runtime(tmp: &TempDir, fetcher: StaticFetcher) -> Runtime {
        let config = RuntimeConfig {
            database_dir: tmp.path().to_path_buf(),
            resolve_timeout_ms: 200,
            ..RuntimeConfig::default()
        };
        Runtime::builder(config).fetcher(Arc::new(fetcher)).build()
    }

    #[tokio::test]
    async fn equal_settings_share_one_datastore() {
        let tmp = TempDir::new().unwrap();
        let rt = runtime(&tmp, StaticFetcher::new());

        let a: DatastoreSettings = serde_json::from_value(json!({"table": "notes", "key_field": "key"})).unwrap();
        let b: DatastoreSettings = serde_json::from_value(json!({"table": "notes"})).unwrap();

        let (first, second) = tokio::join!(rt.open_store(a), rt.open_store(b));
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));

        let other = rt.open_store(DatastoreSettings::embedded("other")).await.unwrap();
        assert_eq!(other.settings().table.as_deref(), Some("other"));
        assert_eq!(rt.store_count(), 2);
    }

    #[tokio::test]
    async fn failed_open_is_not_cached() {
        let tmp = TempDir::new().unwrap();
        let rt = runtime(&tmp, StaticFetcher::new());
        let bad = DatastoreSettings::remote("ftp://nowhere", "x");

        assert!(matches!(rt.open_store(bad.clone()).await, Err(RuntimeError::StoreOpen(_))));
        assert!(matches!(rt.open_store(bad).await, Err(RuntimeError::StoreOpen(_))));
        assert_eq!(rt.store_count(), 0);
    }

    #[tokio::test]
    async fn register_script_returns_the_provided_component() {
        let tmp = TempDir::new().unwrap();
        let rt = runtime(
            &tmp,
            StaticFetcher::new().with_asset("widgets/clock", r#"{"name": "clock"}"#),
        );

        let definition = rt.register_script("widgets/clock").await.unwrap();
        assert_eq!(definition.index(), "clock");
        assert!(rt.registry().contains("clock"));
    }

    #[tokio::test]
    async fn wait_for_component_times_out() {
        let tmp = TempDir::new().unwrap();
        let rt = runtime(&tmp, StaticFetcher::new());

        let err = rt.wait_for_component("ghost").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout(label) if label == "ghost"));
    }

    #[tokio::test]
    async fn reset_clears_every_table() {
        let tmp = TempDir::new().unwrap();
        let rt = runtime(
            &tmp,
            StaticFetcher::new()
                .with_asset("a.css", "a{}")
                .with_delay(Duration::from_millis(1)),
        );
        rt.load("a.css").await.unwrap();
        rt.register(ComponentDefinition::builder("x").build().unwrap());
        rt.open_store(DatastoreSettings::local()).await.unwrap();

        rt.reset();

        assert!(rt.loader().is_empty());
        assert!(rt.registry().is_empty());
        assert_eq!(rt.store_count(), 0);
    }

    #[tokio::test]
    async fn dropped_first_opener_still_serves_the_waiter() {
        let tmp = TempDir::new().unwrap();
        let rt = runtime(&tmp, StaticFetcher::new());

        let mut first = Box::pin(rt.open_store(DatastoreSettings::embedded("notes")));
        assert!(futures::poll!(&mut first).is_pending());
        let second = rt.open_store(DatastoreSettings::embedded("notes"));
        drop(first);

        let store = second.await.unwrap();
        assert_eq!(store.settings().table.as_deref(), Some("notes"));
        assert_eq!(rt.store_count(), 1);
    }
}
