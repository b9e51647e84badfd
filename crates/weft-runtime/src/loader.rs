use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;

use crate::error::{LoadError, RuntimeError};
use crate::fetch::{FetchRequest, Fetcher};
use crate::registry::Registry;
use crate::resource::{Resource, ResourceKind, ResourceSpec};
use crate::script::ScriptHost;
use crate::waitlist::{Claim, PendingGuard, WaitError, Waitlist};

/// Fetches each resource once per runtime and serves concurrent requesters
/// of an in-flight resource from its waitlist.
///
/// The fetch for a key runs in its own task. A requester that stops waiting,
/// the first one included, leaves the fetch running for everyone else.
#[derive(Clone)]
pub struct Loader {
    fetcher: Arc<dyn Fetcher>,
    script_host: Arc<dyn ScriptHost>,
    registry: Arc<Registry>,
    cache: Arc<Waitlist<String, Resource, LoadError>>,
}

impl Loader {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        script_host: Arc<dyn ScriptHost>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            fetcher,
            script_host,
            registry,
            cache: Arc::new(Waitlist::new()),
        }
    }

    pub async fn load(&self, spec: &ResourceSpec) -> Result<Resource, RuntimeError> {
        let key = spec.cache_key();
        match self.cache.claim(&key) {
            Claim::Ready(resource) => {
                tracing::debug!(key = %key, "Resource cache hit");
                Ok(resource)
            }
            Claim::Wait(waiter) => {
                tracing::debug!(key = %key, "Resource in flight, waitlisted");
                waiter.wait().await.map_err(|e| match e {
                    WaitError::Failed(e) => e.into(),
                    WaitError::Abandoned => LoadError::Abandoned { key }.into(),
                    WaitError::Cleared => RuntimeError::Reset(key),
                })
            }
            Claim::Lead(guard) => {
                tracing::info!(key = %key, kind = %spec.kind(), "Loading resource");
                let loader = self.clone();
                let spec = spec.clone();
                tokio::spawn(async move { loader.fetch_and_complete(&spec, guard).await })
                    .await
                    .unwrap_or_else(|e| {
                        tracing::error!(key = %key, error = %e, "Resource load task died");
                        Err(LoadError::Abandoned { key }.into())
                    })
            }
        }
    }

    async fn fetch_and_complete(
        &self,
        spec: &ResourceSpec,
        guard: PendingGuard<String, Resource, LoadError>,
    ) -> Result<Resource, RuntimeError> {
        match self.fetch(spec).await {
            Ok(resource) => {
                guard.resolve(resource.clone());
                Ok(resource)
            }
            Err(e) => {
                tracing::error!(key = %spec.cache_key(), error = %e, "Resource load failed");
                guard.fail(e.clone());
                Err(e.into())
            }
        }
    }

    /// Load several resources concurrently; results keep the input order.
    pub async fn load_all(&self, specs: &[ResourceSpec]) -> Result<Vec<Resource>, RuntimeError> {
        try_join_all(specs.iter().map(|spec| self.load(spec))).await
    }

    /// Cached value of a resolved resource.
    pub fn peek(&self, spec: &ResourceSpec) -> Option<Resource> {
        self.cache.peek(&spec.cache_key())
    }

    pub fn is_pending(&self, spec: &ResourceSpec) -> bool {
        self.cache.is_pending(&spec.cache_key())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    async fn fetch(&self, spec: &ResourceSpec) -> Result<Resource, LoadError> {
        let request = FetchRequest::from(spec);
        let body = self.fetcher.fetch(&request).await?;
        self.decode(&request, body)
    }

    fn decode(&self, request: &FetchRequest, body: Vec<u8>) -> Result<Resource, LoadError> {
        let decode_error = |reason: String| LoadError::Decode {
            key: request.key.clone(),
            kind: request.kind,
            reason,
        };
        Ok(match request.kind {
            ResourceKind::Markup => Resource::Markup(
                String::from_utf8(body)
                    .map_err(|e| decode_error(e.to_string()))?
                    .into(),
            ),
            ResourceKind::Stylesheet => Resource::Stylesheet(
                String::from_utf8(body)
                    .map_err(|e| decode_error(e.to_string()))?
                    .into(),
            ),
            ResourceKind::Image => Resource::Image(body.into()),
            ResourceKind::Data => Resource::Data(
                serde_json::from_slice(&body).map_err(|e| decode_error(e.to_string()))?,
            ),
            ResourceKind::Exchange => Resource::Exchange(
                serde_json::from_slice(&body).unwrap_or_else(|_| {
                    Value::String(String::from_utf8_lossy(&body).into_owned())
                }),
            ),
            ResourceKind::Script => {
                let definitions = self.script_host.evaluate(&request.key, &body)?;
                let mut provided = None;
                for definition in definitions {
                    let (definition, _new) = self.registry.register(definition);
                    provided.get_or_insert(definition);
                }
                if provided.is_none() {
                    tracing::warn!(key = %request.key, "Script registered no components");
                }
                Resource::Script(provided)
            }
        })
    }
}
