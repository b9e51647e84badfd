use std::fmt;
use std::sync::Weak;

use futures::future::try_join_all;
use serde_json::Value;
use weft_store::{Dataset, DatastoreSettings, Session, Store};

use crate::error::RuntimeError;
use crate::node::Node;
use crate::resolver::Scope;
use crate::runtime::{Runtime, RuntimeInner};

/// A datastore opened through a runtime.
///
/// Reads come back as [`Node`] trees: every dataset is copied out of the
/// local cache and any dependency tuple inside it is resolved before it is
/// returned. Writes take and return plain datasets.
pub struct Datastore {
    store: Store,
    runtime: Weak<RuntimeInner>,
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("settings", self.store.settings())
            .finish_non_exhaustive()
    }
}

impl Datastore {
    pub(crate) fn new(store: Store, runtime: Weak<RuntimeInner>) -> Self {
        Self { store, runtime }
    }

    pub fn settings(&self) -> &DatastoreSettings {
        self.store.settings()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn runtime(&self) -> Result<Runtime, RuntimeError> {
        self.runtime
            .upgrade()
            .map(Runtime::from_inner)
            .ok_or(RuntimeError::ShutDown)
    }

    /// Dataset `key` with its dependencies resolved and initialized.
    pub async fn get(&self, key: &str, session: Option<&Session>) -> Result<Option<Node>, RuntimeError> {
        let runtime = self.runtime()?;
        let Some(node) = self.load_node(&runtime, key, session, Scope::root()).await? else {
            return Ok(None);
        };
        runtime.initialize(&node).await?;
        Ok(Some(node))
    }

    /// Dataset `key` as stored, without resolving anything.
    pub async fn get_raw(&self, key: &str, session: Option<&Session>) -> Result<Option<Dataset>, RuntimeError> {
        Ok(self.store.get(key, session).await?)
    }

    /// Locally cached datasets matching `query`, resolved.
    pub async fn query(&self, query: &Dataset) -> Result<Vec<Node>, RuntimeError> {
        let runtime = self.runtime()?;
        let matches = self.store.query(query).await;
        let nodes = try_join_all(
            matches
                .into_iter()
                .map(|dataset| self.resolve_dataset(&runtime, dataset, Scope::root())),
        )
        .await?;
        for node in &nodes {
            runtime.initialize(node).await?;
        }
        Ok(nodes)
    }

    pub async fn all(&self) -> Result<Vec<Node>, RuntimeError> {
        self.query(&Dataset::new()).await
    }

    pub async fn set(&self, priority: Dataset, session: Option<&Session>) -> Result<Dataset, RuntimeError> {
        Ok(self.store.set(priority, session).await?)
    }

    pub async fn delete(&self, key: Option<&str>, session: Option<&Session>) -> Result<(), RuntimeError> {
        Ok(self.store.delete(key, session).await?)
    }

    pub async fn count(&self, session: Option<&Session>) -> Result<usize, RuntimeError> {
        Ok(self.store.count(session).await?)
    }

    /// Read-through get plus structural resolution, no initialization.
    pub(crate) async fn load_node(
        &self,
        runtime: &Runtime,
        key: &str,
        session: Option<&Session>,
        scope: Scope,
    ) -> Result<Option<Node>, RuntimeError> {
        match self.store.get(key, session).await? {
            Some(dataset) => Ok(Some(self.resolve_dataset(runtime, dataset, scope).await?)),
            None => Ok(None),
        }
    }

    async fn resolve_dataset(
        &self,
        runtime: &Runtime,
        dataset: Dataset,
        scope: Scope,
    ) -> Result<Node, RuntimeError> {
        let node = Node::from_json(Value::Object(dataset))?;
        runtime.resolve_node(node, scope).await
    }
}
