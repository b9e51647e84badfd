use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use semver::Version;
use serde_json::Value;

use crate::error::RuntimeError;
use crate::instance::{Behavior, Plain};
use crate::node::{Fields, Node};
use crate::waitlist::{WaitError, Waitlist};

pub type Constructor = Arc<dyn Fn() -> Box<dyn Behavior> + Send + Sync>;
pub type Setup = Arc<dyn Fn(&ComponentDefinition) + Send + Sync>;

/// `name@version`, or just `name` for unversioned components.
pub fn canonical_index(name: &str, version: Option<&Version>) -> String {
    match version {
        Some(version) => format!("{name}@{version}"),
        None => name.to_string(),
    }
}

/// A registered component type.
pub struct ComponentDefinition {
    index: String,
    name: String,
    version: Option<Version>,
    defaults: Value,
    constructor: Constructor,
    setup: Option<Setup>,
    created: AtomicU64,
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("index", &self.index)
            .field("defaults", &self.defaults)
            .field("created", &self.instance_count())
            .finish_non_exhaustive()
    }
}

impl ComponentDefinition {
    pub fn builder(name: impl Into<String>) -> DefinitionBuilder {
        DefinitionBuilder::new(name)
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn defaults(&self) -> &Value {
        &self.defaults
    }

    /// Default configuration as a fresh field tree.
    pub fn default_fields(&self) -> Fields {
        match Node::from_json(self.defaults.clone()) {
            Ok(Node::Object(fields)) => fields,
            _ => Fields::new(),
        }
    }

    /// Instances created so far.
    pub fn instance_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Next instance id, unique within this definition. Starts at 1.
    pub(crate) fn next_instance_id(&self) -> u64 {
        self.created.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn construct(&self) -> Box<dyn Behavior> {
        (self.constructor)()
    }
}

pub struct DefinitionBuilder {
    name: String,
    version: Option<String>,
    index: Option<String>,
    defaults: Value,
    constructor: Option<Constructor>,
    setup: Option<Setup>,
}

impl DefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            index: None,
            defaults: Value::Null,
            constructor: None,
            setup: None,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Override the derived `name@version` index.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn defaults(mut self, defaults: Value) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn constructor<F>(mut self, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn Behavior> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(constructor));
        self
    }

    pub fn behavior<B>(self) -> Self
    where
        B: Behavior + Default + 'static,
    {
        self.constructor(|| Box::new(B::default()))
    }

    /// One-time callback run when the definition is first registered.
    pub fn setup<F>(mut self, setup: F) -> Self
    where
        F: Fn(&ComponentDefinition) + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(setup));
        self
    }

    pub fn build(self) -> Result<ComponentDefinition, RuntimeError> {
        if self.name.trim().is_empty() {
            return Err(RuntimeError::InvalidDefinition(
                "component name is empty".into(),
            ));
        }
        let version = self
            .version
            .as_deref()
            .map(Version::parse)
            .transpose()
            .map_err(|e| {
                RuntimeError::InvalidDefinition(format!("{}: bad version: {e}", self.name))
            })?;
        let defaults = match self.defaults {
            Value::Null => Value::Object(Default::default()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(RuntimeError::InvalidDefinition(format!(
                    "{}: defaults must be an object, got {other}",
                    self.name
                )));
            }
        };
        let index = self
            .index
            .unwrap_or_else(|| canonical_index(&self.name, version.as_ref()));

        Ok(ComponentDefinition {
            index,
            name: self.name,
            version,
            defaults,
            constructor: self
                .constructor
                .unwrap_or_else(|| Arc::new(|| Box::new(Plain) as Box<dyn Behavior>)),
            setup: self.setup,
            created: AtomicU64::new(0),
        })
    }
}

/// Component definitions keyed by canonical index.
#[derive(Default)]
pub struct Registry {
    table: Waitlist<String, Arc<ComponentDefinition>, Infallible>,
    registering: Mutex<()>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `definition` unless its index is taken.
    ///
    /// Returns the definition now registered under the index and whether it
    /// is the one just passed in. Setup runs once, before any caller waiting
    /// on the index is woken.
    pub fn register(&self, definition: ComponentDefinition) -> (Arc<ComponentDefinition>, bool) {
        let _serial = self
            .registering
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = self.table.peek(&definition.index) {
            tracing::debug!(index = %existing.index, "Component already registered");
            return (existing, false);
        }

        if let Some(setup) = &definition.setup {
            setup(&definition);
        }
        let definition = Arc::new(definition);
        tracing::info!(index = %definition.index, "Component registered");
        self.table.insert(definition.index.clone(), definition)
    }

    pub fn get(&self, index: &str) -> Option<Arc<ComponentDefinition>> {
        self.table.peek(&index.to_string())
    }

    pub fn contains(&self, index: &str) -> bool {
        self.get(index).is_some()
    }

    /// Wait until `index` is registered. A wait that is given up on leaves
    /// nothing behind once the next wait starts.
    pub async fn wait_for(&self, index: &str) -> Result<Arc<ComponentDefinition>, RuntimeError> {
        match self.table.subscribe(&index.to_string()).wait().await {
            Ok(definition) => Ok(definition),
            Err(WaitError::Cleared) => Err(RuntimeError::Reset(index.to_string())),
            Err(WaitError::Failed(never)) => match never {},
            Err(WaitError::Abandoned) => Err(RuntimeError::Abandoned(index.to_string())),
        }
    }

    pub fn indices(&self) -> Vec<String> {
        let mut indices = self.table.resolved_keys();
        indices.sort();
        indices
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn clear(&self) {
        self.table.clear();
    }
}
