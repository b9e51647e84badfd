use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use weft_store::DatastoreSettings;

use crate::error::RuntimeError;
use crate::node::Node;
use crate::registry::ComponentDefinition;
use crate::resource::{ResourceKind, ResourceSpec};

pub const LOAD: &str = "@load";
pub const REGISTER: &str = "@register";
pub const INSTANTIATE: &str = "@instantiate";
pub const PROXY: &str = "@proxy";
pub const RENDER: &str = "@render";
pub const STORE: &str = "@store";
pub const DATASET: &str = "@dataset";

const TAGS: [&str; 7] = [LOAD, REGISTER, INSTANTIATE, PROXY, RENDER, STORE, DATASET];

/// How a dependency names a component.
#[derive(Debug, Clone)]
pub enum ComponentRef {
    /// Canonical index, e.g. `menu@1.2.0`.
    Index(String),
    /// Script resource that registers the component when loaded.
    Script(String),
    Definition(Arc<ComponentDefinition>),
}

impl ComponentRef {
    pub fn label(&self) -> &str {
        match self {
            Self::Index(index) => index,
            Self::Script(key) => key,
            Self::Definition(definition) => definition.index(),
        }
    }

    fn to_json(&self) -> Value {
        Value::String(self.label().to_string())
    }
}

impl From<&str> for ComponentRef {
    fn from(reference: &str) -> Self {
        if ResourceKind::from_key(reference) == ResourceKind::Script {
            Self::Script(reference.to_string())
        } else {
            Self::Index(reference.to_string())
        }
    }
}

impl From<String> for ComponentRef {
    fn from(reference: String) -> Self {
        Self::from(reference.as_str())
    }
}

impl From<Arc<ComponentDefinition>> for ComponentRef {
    fn from(definition: Arc<ComponentDefinition>) -> Self {
        Self::Definition(definition)
    }
}

/// A dependency tuple: one engine operation whose result replaces the slot
/// the tuple occupies.
#[derive(Debug, Clone)]
pub enum Dependency {
    Load(Vec<ResourceSpec>),
    Register(ComponentRef),
    Instantiate {
        component: ComponentRef,
        config: Option<Node>,
    },
    Proxy {
        component: ComponentRef,
        config: Option<Node>,
    },
    Render {
        component: ComponentRef,
        config: Option<Node>,
    },
    OpenStore(DatastoreSettings),
    Dataset {
        settings: DatastoreSettings,
        key: String,
    },
}

fn malformed(tag: &str, reason: impl Into<String>) -> RuntimeError {
    RuntimeError::MalformedDependency {
        tag: tag.to_string(),
        reason: reason.into(),
    }
}

impl Dependency {
    /// `None` when `items` is not headed by a reserved tag.
    pub fn parse(items: &[Value]) -> Option<Result<Self, RuntimeError>> {
        let (Value::String(tag), args) = items.split_first()? else {
            return None;
        };
        let tag = TAGS.into_iter().find(|t| *t == tag.as_str())?;
        Some(Self::parse_args(tag, args))
    }

    fn parse_args(tag: &'static str, args: &[Value]) -> Result<Self, RuntimeError> {
        match tag {
            LOAD => {
                if args.is_empty() {
                    return Err(malformed(tag, "expected at least one resource"));
                }
                let specs = args
                    .iter()
                    .map(|arg| match arg {
                        Value::String(key) => Ok(ResourceSpec::new(key.clone())),
                        Value::Object(_) => serde_json::from_value(arg.clone())
                            .map_err(|e| malformed(tag, e.to_string())),
                        other => Err(malformed(tag, format!("bad resource spec {other}"))),
                    })
                    .collect::<Result<_, _>>()?;
                Ok(Self::Load(specs))
            }
            REGISTER => match args {
                [Value::String(reference)] => Ok(Self::Register(reference.as_str().into())),
                _ => Err(malformed(tag, "expected one component index or script key")),
            },
            INSTANTIATE | PROXY | RENDER => {
                let (component, config) = match args {
                    [Value::String(component)] => (component, None),
                    [Value::String(component), config] => {
                        (component, Some(Node::from_json(config.clone())?))
                    }
                    _ => return Err(malformed(tag, "expected a component and an optional config")),
                };
                let component = ComponentRef::from(component.as_str());
                Ok(match tag {
                    INSTANTIATE => Self::Instantiate { component, config },
                    PROXY => Self::Proxy { component, config },
                    _ => Self::Render { component, config },
                })
            }
            STORE => match args {
                [settings @ Value::Object(_)] => Ok(Self::OpenStore(
                    serde_json::from_value(settings.clone())
                        .map_err(|e| malformed(tag, e.to_string()))?,
                )),
                _ => Err(malformed(tag, "expected one settings object")),
            },
            DATASET => {
                let [settings @ Value::Object(_), key] = args else {
                    return Err(malformed(tag, "expected a settings object and a key"));
                };
                let key = match key {
                    Value::String(key) => key.clone(),
                    Value::Number(n) => n.to_string(),
                    other => return Err(malformed(tag, format!("bad dataset key {other}"))),
                };
                let settings = serde_json::from_value(settings.clone())
                    .map_err(|e| malformed(tag, e.to_string()))?;
                Ok(Self::Dataset { settings, key })
            }
            _ => Err(malformed(tag, "unknown tag")),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Load(_) => LOAD,
            Self::Register(_) => REGISTER,
            Self::Instantiate { .. } => INSTANTIATE,
            Self::Proxy { .. } => PROXY,
            Self::Render { .. } => RENDER,
            Self::OpenStore(_) => STORE,
            Self::Dataset { .. } => DATASET,
        }
    }

    /// Wire form: `[tag, ...args]`.
    pub fn to_json(&self) -> Value {
        let mut items = vec![Value::String(self.tag().to_string())];
        match self {
            Self::Load(specs) => items.extend(specs.iter().map(|spec| {
                if spec.kind.is_none() && spec.params.is_none() {
                    Value::String(spec.key.clone())
                } else {
                    serde_json::to_value(spec).unwrap_or(Value::Null)
                }
            })),
            Self::Register(component) => items.push(component.to_json()),
            Self::Instantiate { component, config }
            | Self::Proxy { component, config }
            | Self::Render { component, config } => {
                items.push(component.to_json());
                if let Some(config) = config {
                    items.push(config.to_json());
                }
            }
            Self::OpenStore(settings) => {
                items.push(serde_json::to_value(settings).unwrap_or(Value::Null));
            }
            Self::Dataset { settings, key } => {
                items.push(serde_json::to_value(settings).unwrap_or(Value::Null));
                items.push(Value::String(key.clone()));
            }
        }
        Value::Array(items)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(specs) => {
                let keys: Vec<_> = specs.iter().map(|s| s.key.as_str()).collect();
                write!(f, "{} {}", self.tag(), keys.join(", "))
            }
            Self::Register(component)
            | Self::Instantiate { component, .. }
            | Self::Proxy { component, .. }
            | Self::Render { component, .. } => write!(f, "{} {}", self.tag(), component.label()),
            Self::OpenStore(settings) => write!(f, "{} {}", self.tag(), settings.collection()),
            Self::Dataset { settings, key } => {
                write!(f, "{} {}/{key}", self.tag(), settings.collection())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Option<Result<Dependency, RuntimeError>> {
        Dependency::parse(value.as_array().unwrap())
    }

    #[test]
    fn ordinary_arrays_are_not_dependencies() {
        assert!(parse(json!([1, 2])).is_none());
        assert!(parse(json!(["load", "a.css"])).is_none());
        assert!(parse(json!([])).is_none());
    }

    #[test]
    fn parses_every_tag() {
        let load = parse(json!(["@load", "a.css", {"key": "/api", "kind": "exchange", "params": {"q": 1}}]))
            .unwrap()
            .unwrap();
        let Dependency::Load(specs) = &load else { panic!() };
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].kind(), ResourceKind::Exchange);

        let register = parse(json!(["@register", "components/menu.js"])).unwrap().unwrap();
        assert!(matches!(register, Dependency::Register(ComponentRef::Script(_))));

        let child = parse(json!(["@instantiate", "menu@1.0.0", {"open": true}])).unwrap().unwrap();
        assert!(matches!(
            child,
            Dependency::Instantiate { component: ComponentRef::Index(_), config: Some(Node::Object(_)) }
        ));

        let proxy = parse(json!(["@proxy", "menu"])).unwrap().unwrap();
        assert!(matches!(proxy, Dependency::Proxy { config: None, .. }));

        let store = parse(json!(["@store", {"table": "notes"}])).unwrap().unwrap();
        assert!(matches!(store, Dependency::OpenStore(s) if s.table.as_deref() == Some("notes")));

        let dataset = parse(json!(["@dataset", {}, 42])).unwrap().unwrap();
        assert!(matches!(dataset, Dependency::Dataset { key, .. } if key == "42"));
    }

    #[test]
    fn config_may_itself_be_a_tuple() {
        let dep = parse(json!(["@instantiate", "card", ["@dataset", {"table": "cards"}, "c1"]]))
            .unwrap()
            .unwrap();
        let Dependency::Instantiate { config: Some(Node::Dependency(inner)), .. } = dep else {
            panic!("expected nested dependency");
        };
        assert_eq!(inner.tag(), DATASET);
    }

    #[test]
    fn malformed_arguments_are_reported_with_the_tag() {
        for bad in [
            json!(["@load"]),
            json!(["@register", 1]),
            json!(["@instantiate"]),
            json!(["@render", "a", {}, "extra"]),
            json!(["@store", "notes"]),
            json!(["@dataset", {}]),
        ] {
            let err = parse(bad.clone()).unwrap().unwrap_err();
            let RuntimeError::MalformedDependency { tag, .. } = err else {
                panic!("{bad} should be malformed");
            };
            assert_eq!(tag, bad[0].as_str().unwrap());
        }
    }

    #[test]
    fn wire_form_is_preserved() {
        let value = json!(["@render", "card@2.0.0", {"title": "x"}]);
        let dep = parse(value.clone()).unwrap().unwrap();
        assert_eq!(dep.to_json(), value);
        assert_eq!(dep.to_string(), "@render card@2.0.0");
    }
}
