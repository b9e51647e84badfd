//! Dependency resolution and two-phase initialization.
//!
//! Building an instance resolves its component, resolves a tuple-valued
//! configuration, constructs the instance from defaults plus configuration,
//! then resolves every dependency tuple in its fields concurrently. A node is
//! structurally complete once all of those have joined. Initialization is a
//! separate pass over the finished graph: children before parents, each
//! initializer at most once.

use std::sync::{Arc, Weak};

use futures::future::try_join_all;
use serde_json::Value;

use crate::BoxFuture;
use crate::dependency::{ComponentRef, Dependency};
use crate::error::RuntimeError;
use crate::instance::{Instance, InstanceRef, PathSegment, Proxy, ProxyRef};
use crate::node::{Node, merge_fields};
use crate::registry::ComponentDefinition;
use crate::resource::{Resource, ResourceKind, ResourceSpec};
use crate::runtime::Runtime;

/// Where a node sits: the instance whose fields contain it, and the path
/// from those fields down to it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    parent: Option<Weak<Instance>>,
    path: Vec<PathSegment>,
}

impl Scope {
    pub(crate) fn root() -> Self {
        Self::default()
    }

    fn field_of(parent: &InstanceRef, field: &str) -> Self {
        Self {
            parent: Some(Arc::downgrade(parent)),
            path: vec![PathSegment::Field(field.to_string())],
        }
    }

    fn child(&self, segment: PathSegment) -> Self {
        let mut path = self.path.clone();
        path.push(segment);
        Self {
            parent: self.parent.clone(),
            path,
        }
    }
}

impl Runtime {
    /// Build `component` with `config`, then initialize the whole graph.
    pub async fn instantiate(
        &self,
        component: impl Into<ComponentRef>,
        config: Node,
    ) -> Result<InstanceRef, RuntimeError> {
        let component = component.into();
        let config = (!config.is_null()).then_some(config);
        let instance = self.build(component, config, None).await?;
        self.initialize_instance(&instance, &[]).await?;
        tracing::info!(index = %instance.index(), "Instance materialized");
        Ok(instance)
    }

    /// [`instantiate`](Self::instantiate) with a JSON configuration that may
    /// contain dependency tuples.
    pub async fn instantiate_json(
        &self,
        component: &str,
        config: Value,
    ) -> Result<InstanceRef, RuntimeError> {
        self.instantiate(component, Node::from_json(config)?).await
    }

    /// Resolve every dependency tuple in a free-standing tree and initialize
    /// the instances it produced.
    pub async fn resolve(&self, node: Node) -> Result<Node, RuntimeError> {
        let node = self.resolve_node(node, Scope::root()).await?;
        self.initialize(&node).await?;
        Ok(node)
    }

    /// Initialize every instance reachable from `node`.
    pub async fn initialize(&self, node: &Node) -> Result<(), RuntimeError> {
        self.initialize_node(node, &[]).await
    }

    /// Render an instance, initializing it first if needed.
    pub async fn render(&self, instance: &InstanceRef) -> Result<String, RuntimeError> {
        self.initialize_instance(instance, &[]).await?;
        instance.render_now().await
    }

    /// Build and initialize the instance behind a proxy, then put it in the
    /// slot the proxy occupies. Later calls return the same instance.
    pub async fn materialize(&self, proxy: &ProxyRef) -> Result<InstanceRef, RuntimeError> {
        let instance = proxy
            .materialized
            .get_or_try_init(|| async {
                let label = format!("proxy {}", proxy.component.label());
                let instance = self
                    .with_timeout(
                        || label,
                        self.build(
                            proxy.component.clone(),
                            proxy.config.clone(),
                            proxy.parent.clone(),
                        ),
                    )
                    .await?;
                self.initialize_instance(&instance, &[]).await?;
                Ok::<_, RuntimeError>(instance)
            })
            .await?
            .clone();

        if proxy.replace_in_parent(&instance) {
            tracing::debug!(index = %instance.index(), "Proxy replaced in parent");
        }
        Ok(instance)
    }

    pub(crate) async fn resolve_component(
        &self,
        component: &ComponentRef,
    ) -> Result<Arc<ComponentDefinition>, RuntimeError> {
        match component {
            ComponentRef::Definition(definition) => Ok(definition.clone()),
            ComponentRef::Script(key) => self.register_script(key).await,
            ComponentRef::Index(index) => {
                if let Some(definition) = self.registry().get(index) {
                    return Ok(definition);
                }
                let key = self.config().component_key(index);
                tracing::debug!(index = %index, key = %key, "Component not registered, loading");
                let spec = ResourceSpec::new(key).with_kind(ResourceKind::Script);
                match self.load(spec).await {
                    Ok(_) => self
                        .registry()
                        .get(index)
                        .ok_or_else(|| RuntimeError::ComponentNotFound(index.clone())),
                    Err(RuntimeError::Load(e)) if e.is_not_found() => {
                        Err(RuntimeError::ComponentNotFound(index.clone()))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Steps up to structural completeness; no initializer runs here.
    pub(crate) fn build(
        &self,
        component: ComponentRef,
        config: Option<Node>,
        parent: Option<Weak<Instance>>,
    ) -> BoxFuture<'_, Result<InstanceRef, RuntimeError>> {
        Box::pin(async move {
            let definition = self.resolve_component(&component).await?;

            let config = match config {
                Some(Node::Dependency(dependency)) => {
                    let scope = Scope {
                        parent: parent.clone(),
                        path: Vec::new(),
                    };
                    self.resolve_dependency(dependency, scope).await?
                }
                Some(config) => config,
                None => Node::Null,
            };
            let config = match config {
                Node::Resource(Resource::Data(data) | Resource::Exchange(data)) if data.is_object() => {
                    Node::from_json(data)?
                }
                other => other,
            };

            let mut fields = definition.default_fields();
            match config {
                Node::Null => {}
                Node::Object(config) => merge_fields(&mut fields, config),
                other => {
                    return Err(RuntimeError::MalformedConfig {
                        component: definition.index().to_string(),
                        reason: format!("expected an object, got {}", other.type_name()),
                    });
                }
            }

            let instance = Instance::new(definition, parent, fields);
            tracing::debug!(index = %instance.index(), "Instance constructed");

            let pending = instance.take_fields();
            let resolved = try_join_all(pending.into_iter().map(|(field, node)| {
                let scope = Scope::field_of(&instance, &field);
                async move { Ok::<_, RuntimeError>((field, self.resolve_node(node, scope).await?)) }
            }))
            .await?;
            instance.with_fields(|fields| fields.extend(resolved));

            Ok(instance)
        })
    }

    /// Replace every dependency tuple under `node` with what it produces.
    /// Instances, proxies and other live values are left alone.
    pub(crate) fn resolve_node(&self, node: Node, scope: Scope) -> BoxFuture<'_, Result<Node, RuntimeError>> {
        Box::pin(async move {
            match node {
                Node::Dependency(dependency) => {
                    let label = dependency.to_string();
                    self.with_timeout(|| label, self.resolve_dependency(dependency, scope))
                        .await
                }
                Node::Array(items) => {
                    let items = try_join_all(items.into_iter().enumerate().map(|(i, item)| {
                        self.resolve_node(item, scope.child(PathSegment::Index(i)))
                    }))
                    .await?;
                    Ok(Node::Array(items))
                }
                Node::Object(fields) => {
                    let fields = try_join_all(fields.into_iter().map(|(field, item)| {
                        let scope = scope.child(PathSegment::Field(field.clone()));
                        async move { Ok::<_, RuntimeError>((field, self.resolve_node(item, scope).await?)) }
                    }))
                    .await?;
                    Ok(Node::Object(fields.into_iter().collect()))
                }
                other => Ok(other),
            }
        })
    }

    fn resolve_dependency(
        &self,
        dependency: Arc<Dependency>,
        scope: Scope,
    ) -> BoxFuture<'_, Result<Node, RuntimeError>> {
        Box::pin(async move {
            tracing::debug!(dependency = %dependency, "Resolving dependency");
            match dependency.as_ref() {
                Dependency::Load(specs) => match specs.as_slice() {
                    [spec] => Ok(Node::Resource(self.inner.loader.load(spec).await?)),
                    specs => {
                        let resources = self.load_all(specs).await?;
                        Ok(Node::Array(resources.into_iter().map(Node::Resource).collect()))
                    }
                },
                Dependency::Register(component) => {
                    Ok(Node::Component(self.resolve_component(component).await?))
                }
                Dependency::Instantiate { component, config } => {
                    let instance = self
                        .build(component.clone(), config.clone(), scope.parent)
                        .await?;
                    Ok(Node::Instance(instance))
                }
                Dependency::Proxy { component, config } => Ok(Node::Proxy(Proxy::new(
                    component.clone(),
                    config.clone(),
                    scope.parent,
                    scope.path,
                ))),
                Dependency::Render { component, config } => {
                    let instance = self
                        .build(component.clone(), config.clone(), scope.parent)
                        .await?;
                    self.initialize_instance(&instance, &[]).await?;
                    Ok(Node::String(instance.render_now().await?))
                }
                Dependency::OpenStore(settings) => {
                    Ok(Node::Store(self.open_store(settings.clone()).await?))
                }
                Dependency::Dataset { settings, key } => {
                    let store = self.open_store(settings.clone()).await?;
                    Ok(store
                        .load_node(self, key, None, scope)
                        .await?
                        .unwrap_or(Node::Null))
                }
            }
        })
    }

    fn initialize_node<'a>(
        &'a self,
        node: &'a Node,
        ancestors: &'a [String],
    ) -> BoxFuture<'a, Result<(), RuntimeError>> {
        Box::pin(async move {
            match node {
                Node::Instance(instance) => self.initialize_instance(instance, ancestors).await,
                Node::Array(items) => {
                    try_join_all(items.iter().map(|item| self.initialize_node(item, ancestors)))
                        .await?;
                    Ok(())
                }
                Node::Object(fields) => {
                    try_join_all(fields.values().map(|item| self.initialize_node(item, ancestors)))
                        .await?;
                    Ok(())
                }
                Node::Null
                | Node::Bool(_)
                | Node::Number(_)
                | Node::String(_)
                | Node::Dependency(_)
                | Node::Resource(_)
                | Node::Component(_)
                | Node::Proxy(_)
                | Node::Store(_) => Ok(()),
            }
        })
    }

    /// Children first, concurrently; then the instance itself. The parent
    /// link is never followed, and an instance already on the current path
    /// is skipped.
    fn initialize_instance<'a>(
        &'a self,
        instance: &'a InstanceRef,
        ancestors: &'a [String],
    ) -> BoxFuture<'a, Result<(), RuntimeError>> {
        Box::pin(async move {
            if instance.is_initialized() || ancestors.iter().any(|a| a == instance.index()) {
                return Ok(());
            }
            let fields = instance.snapshot();
            let mut path = ancestors.to_vec();
            path.push(instance.index().to_string());

            try_join_all(fields.values().map(|node| self.initialize_node(node, &path))).await?;
            instance.initialize_once().await
        })
    }
}
