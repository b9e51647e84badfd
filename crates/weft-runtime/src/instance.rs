use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::OnceCell;

use crate::BoxFuture;
use crate::dependency::ComponentRef;
use crate::error::RuntimeError;
use crate::node::{Fields, Node, fields_to_json};
use crate::registry::ComponentDefinition;

pub type InstanceRef = Arc<Instance>;
pub type ProxyRef = Arc<Proxy>;

/// Per-component behavior supplied by the embedder.
///
/// `initialize` runs at most once per instance, after every instance
/// reachable from its fields has initialized.
pub trait Behavior: Send + Sync {
    fn has_initializer(&self) -> bool {
        false
    }

    fn initialize<'a>(&'a self, _instance: &'a Instance) -> BoxFuture<'a, Result<(), RuntimeError>> {
        Box::pin(async { Ok(()) })
    }

    /// Presentation hook called on a fully initialized instance.
    fn render<'a>(&'a self, instance: &'a Instance) -> BoxFuture<'a, Result<String, RuntimeError>> {
        Box::pin(async move { Ok(instance.index().to_string()) })
    }
}

/// Behavior of components registered without a constructor.
#[derive(Debug, Default)]
pub struct Plain;

impl Behavior for Plain {}

/// A live component instance.
pub struct Instance {
    id: u64,
    index: String,
    definition: Arc<ComponentDefinition>,
    parent: Option<Weak<Instance>>,
    fields: Mutex<Fields>,
    behavior: Box<dyn Behavior>,
    armed: AtomicBool,
    init: OnceCell<Result<(), String>>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("index", &self.index)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub(crate) fn new(
        definition: Arc<ComponentDefinition>,
        parent: Option<Weak<Instance>>,
        fields: Fields,
    ) -> InstanceRef {
        let id = definition.next_instance_id();
        let behavior = definition.construct();
        Arc::new(Self {
            id,
            index: format!("{}-{id}", definition.index()),
            armed: AtomicBool::new(behavior.has_initializer()),
            definition,
            parent,
            fields: Mutex::new(fields),
            behavior,
            init: OnceCell::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// `definitionIndex-id`, unique per runtime.
    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn definition(&self) -> &Arc<ComponentDefinition> {
        &self.definition
    }

    pub fn parent(&self) -> Option<InstanceRef> {
        self.parent.as_ref()?.upgrade()
    }

    pub fn behavior(&self) -> &dyn Behavior {
        self.behavior.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, Fields> {
        self.fields.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, field: &str) -> Option<Node> {
        self.lock().get(field).cloned()
    }

    pub fn set(&self, field: impl Into<String>, node: Node) -> Option<Node> {
        self.lock().insert(field.into(), node)
    }

    /// Copy of every field.
    pub fn snapshot(&self) -> Fields {
        self.lock().clone()
    }

    /// Run `f` with the fields locked. `f` must not block.
    pub fn with_fields<R>(&self, f: impl FnOnce(&mut Fields) -> R) -> R {
        f(&mut self.lock())
    }

    pub(crate) fn take_fields(&self) -> Fields {
        std::mem::take(&mut *self.lock())
    }

    pub fn to_json(&self) -> Value {
        Value::Object(fields_to_json(&self.lock()))
    }

    pub fn is_initialized(&self) -> bool {
        self.init.initialized()
    }

    /// Run the initializer unless it already ran. Concurrent callers wait
    /// for the one running it; the outcome is remembered either way.
    pub(crate) async fn initialize_once(&self) -> Result<(), RuntimeError> {
        let outcome = self
            .init
            .get_or_init(|| async {
                if !self.armed.swap(false, Ordering::SeqCst) {
                    return Ok(());
                }
                tracing::debug!(index = %self.index, "Initializing instance");
                self.behavior
                    .initialize(self)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;

        outcome.clone().map_err(|reason| {
            tracing::warn!(index = %self.index, %reason, "Initializer failed");
            RuntimeError::Initialize {
                index: self.index.clone(),
                reason,
            }
        })
    }

    pub(crate) async fn render_now(&self) -> Result<String, RuntimeError> {
        self.behavior.render(self).await
    }
}

/// One step from an instance's fields down to a nested slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Deferred instance: constructed and initialized on first
/// [`materialize`](crate::Runtime::materialize), after which it replaces
/// itself in the slot it was created in.
pub struct Proxy {
    pub(crate) component: ComponentRef,
    pub(crate) config: Option<Node>,
    pub(crate) parent: Option<Weak<Instance>>,
    pub(crate) slot: Vec<PathSegment>,
    pub(crate) materialized: OnceCell<InstanceRef>,
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("component", &self.component.label())
            .field("slot", &self.slot)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

impl Proxy {
    pub(crate) fn new(
        component: ComponentRef,
        config: Option<Node>,
        parent: Option<Weak<Instance>>,
        slot: Vec<PathSegment>,
    ) -> ProxyRef {
        Arc::new(Self {
            component,
            config,
            parent,
            slot,
            materialized: OnceCell::new(),
        })
    }

    pub fn component(&self) -> &ComponentRef {
        &self.component
    }

    pub fn slot(&self) -> &[PathSegment] {
        &self.slot
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized.initialized()
    }

    pub fn instance(&self) -> Option<&InstanceRef> {
        self.materialized.get()
    }

    pub fn to_json(&self) -> Value {
        match self.instance() {
            Some(instance) => Value::String(instance.index().to_string()),
            None => {
                let mut items = vec![
                    Value::String(crate::dependency::PROXY.into()),
                    Value::String(self.component.label().into()),
                ];
                if let Some(config) = &self.config {
                    items.push(config.to_json());
                }
                Value::Array(items)
            }
        }
    }

    /// Swap this proxy for `instance` in the parent's field tree. Only the
    /// exact slot is touched, and only while it still holds this proxy.
    pub(crate) fn replace_in_parent(self: &Arc<Self>, instance: &InstanceRef) -> bool {
        let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) else {
            return false;
        };
        parent.with_fields(|fields| {
            let Some(slot) = slot_mut(fields, &self.slot) else {
                return false;
            };
            if !matches!(slot, Node::Proxy(p) if Arc::ptr_eq(p, self)) {
                return false;
            }
            *slot = Node::Instance(instance.clone());
            true
        })
    }
}

fn slot_mut<'a>(fields: &'a mut Fields, path: &[PathSegment]) -> Option<&'a mut Node> {
    let (PathSegment::Field(first), rest) = path.split_first()? else {
        return None;
    };
    let mut node = fields.get_mut(first)?;
    for segment in rest {
        node = match (segment, node) {
            (PathSegment::Field(name), Node::Object(fields)) => fields.get_mut(name)?,
            (PathSegment::Index(i), Node::Array(items)) => items.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting(Arc<AtomicUsize>);

    impl Behavior for Counting {
        fn has_initializer(&self) -> bool {
            true
        }

        fn initialize<'a>(&'a self, _instance: &'a Instance) -> BoxFuture<'a, Result<(), RuntimeError>> {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn definition(calls: Arc<AtomicUsize>) -> Arc<ComponentDefinition> {
        Arc::new(
            ComponentDefinition::builder("counter")
                .constructor(move || Box::new(Counting(calls.clone())))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn initializer_runs_exactly_once_under_concurrency() {
        let calls = Arc::new(AtomicUsize::new(0));
        let instance = Instance::new(definition(calls.clone()), None, Fields::new());

        let (a, b) = tokio::join!(instance.initialize_once(), instance.initialize_once());
        a.unwrap();
        b.unwrap();
        instance.initialize_once().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instance.is_initialized());
    }

    #[test]
    fn ids_and_indices_are_per_definition() {
        let def = definition(Arc::new(AtomicUsize::new(0)));
        let first = Instance::new(def.clone(), None, Fields::new());
        let second = Instance::new(def.clone(), Some(Arc::downgrade(&first)), Fields::new());

        assert_eq!(first.index(), "counter-1");
        assert_eq!(second.index(), "counter-2");
        assert_eq!(def.instance_count(), 2);
        assert!(Arc::ptr_eq(&second.parent().unwrap(), &first));
    }

    #[test]
    fn slot_replacement_is_exact() {
        let def = definition(Arc::new(AtomicUsize::new(0)));
        let parent = Instance::new(def.clone(), None, Fields::new());
        let proxy = Proxy::new(
            ComponentRef::Index("counter".into()),
            None,
            Some(Arc::downgrade(&parent)),
            vec![PathSegment::Field("items".into()), PathSegment::Index(1)],
        );
        parent.set(
            "items",
            Node::Array(vec![Node::from("keep"), Node::Proxy(proxy.clone())]),
        );
        parent.set("title", Node::from("unchanged"));

        let child = Instance::new(def, Some(Arc::downgrade(&parent)), Fields::new());
        assert!(proxy.replace_in_parent(&child));

        let items = parent.get("items").unwrap();
        let items = items.as_array().unwrap();
        assert_eq!(items[0].as_str(), Some("keep"));
        assert!(Arc::ptr_eq(items[1].as_instance().unwrap(), &child));
        assert_eq!(parent.get("title").unwrap().as_str(), Some("unchanged"));

        // The slot no longer holds the proxy.
        assert!(!proxy.replace_in_parent(&child));
    }
}
