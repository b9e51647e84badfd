use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::datastore::Datastore;
use crate::dependency::Dependency;
use crate::error::RuntimeError;
use crate::instance::{InstanceRef, ProxyRef};
use crate::registry::ComponentDefinition;
use crate::resource::Resource;

pub type Fields = BTreeMap<String, Node>;

/// A configuration value: plain JSON, an unresolved dependency tuple, or
/// whatever a resolved tuple produced.
#[derive(Debug, Clone, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Node>),
    Object(Fields),
    Dependency(Arc<Dependency>),
    Resource(Resource),
    Component(Arc<ComponentDefinition>),
    Instance(InstanceRef),
    Proxy(ProxyRef),
    Store(Arc<Datastore>),
}

impl Node {
    /// Parse JSON, turning arrays headed by a reserved tag into dependencies.
    pub fn from_json(value: Value) -> Result<Self, RuntimeError> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => match Dependency::parse(&items) {
                Some(dependency) => Self::Dependency(Arc::new(dependency?)),
                None => Self::Array(
                    items
                        .into_iter()
                        .map(Self::from_json)
                        .collect::<Result<_, _>>()?,
                ),
            },
            Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Self::from_json(v)?)))
                    .collect::<Result<_, RuntimeError>>()?,
            ),
        })
    }

    /// JSON projection. Live objects collapse to their identity: instances
    /// and components to their index, stores to their settings.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(fields) => Value::Object(fields_to_json(fields)),
            Self::Dependency(dependency) => dependency.to_json(),
            Self::Resource(resource) => resource.to_json(),
            Self::Component(definition) => Value::String(definition.index().to_string()),
            Self::Instance(instance) => Value::String(instance.index().to_string()),
            Self::Proxy(proxy) => proxy.to_json(),
            Self::Store(store) => serde_json::to_value(store.settings()).unwrap_or(Value::Null),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Dependency(_) => "dependency",
            Self::Resource(_) => "resource",
            Self::Component(_) => "component",
            Self::Instance(_) => "instance",
            Self::Proxy(_) => "proxy",
            Self::Store(_) => "store",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Node]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&InstanceRef> {
        match self {
            Self::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&ProxyRef> {
        match self {
            Self::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Self::Resource(resource) => Some(resource),
            _ => None,
        }
    }

    pub fn as_store(&self) -> Option<&Arc<Datastore>> {
        match self {
            Self::Store(store) => Some(store),
            _ => None,
        }
    }

    /// Field of an object node.
    pub fn get(&self, field: &str) -> Option<&Node> {
        self.as_object()?.get(field)
    }
}

impl From<Value> for Node {
    /// Plain data only: arrays stay arrays even when headed by a reserved tag.
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<InstanceRef> for Node {
    fn from(instance: InstanceRef) -> Self {
        Self::Instance(instance)
    }
}

pub fn fields_to_json(fields: &Fields) -> Map<String, Value> {
    fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}

/// Merge `priority` over `base`: later values win, objects merge field by
/// field, and `Null` removes the field.
pub fn merge_fields(base: &mut Fields, priority: Fields) {
    for (field, node) in priority {
        match node {
            Node::Null => {
                base.remove(&field);
            }
            Node::Object(nested) => match base.get_mut(&field) {
                Some(Node::Object(existing)) => merge_fields(existing, nested),
                _ => {
                    base.insert(field, Node::Object(strip_absent(nested)));
                }
            },
            other => {
                base.insert(field, other);
            }
        }
    }
}

fn strip_absent(mut fields: Fields) -> Fields {
    fields.retain(|_, node| !node.is_null());
    for node in fields.values_mut() {
        if let Node::Object(nested) = node {
            *nested = strip_absent(std::mem::take(nested));
        }
    }
    fields
}
