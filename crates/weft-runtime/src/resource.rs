use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::ComponentDefinition;

/// Fetch mode of a resource, derived from its key's suffix unless given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Markup,
    Stylesheet,
    Image,
    Script,
    Data,
    /// Posts parameters to an endpoint instead of fetching a static asset.
    Exchange,
}

impl ResourceKind {
    pub fn from_key(key: &str) -> Self {
        let path = key.split(['?', '#']).next().unwrap_or(key);
        let file = path.rsplit('/').next().unwrap_or(path);
        let Some((_, ext)) = file.rsplit_once('.') else {
            return Self::Exchange;
        };
        match ext.to_ascii_lowercase().as_str() {
            "html" | "htm" => Self::Markup,
            "css" => Self::Stylesheet,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" | "bmp" => Self::Image,
            "js" | "mjs" | "wasm" => Self::Script,
            "json" => Self::Data,
            _ => Self::Exchange,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Markup => "markup",
            Self::Stylesheet => "stylesheet",
            Self::Image => "image",
            Self::Script => "script",
            Self::Data => "data",
            Self::Exchange => "exchange",
        };
        f.write_str(name)
    }
}

/// One requested resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ResourceKind>,
    /// Request parameters of an exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ResourceSpec {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: None,
            params: None,
        }
    }

    pub fn exchange(key: impl Into<String>, params: Value) -> Self {
        Self {
            key: key.into(),
            kind: Some(ResourceKind::Exchange),
            params: Some(params),
        }
    }

    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind.unwrap_or_else(|| ResourceKind::from_key(&self.key))
    }

    /// Key the loader caches and waitlists on.
    ///
    /// Exchanges with different parameters are different resources.
    pub fn cache_key(&self) -> String {
        match (&self.params, self.kind()) {
            (Some(params), ResourceKind::Exchange) => format!("{}?{}", self.key, params),
            _ => self.key.clone(),
        }
    }
}

impl From<&str> for ResourceSpec {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ResourceSpec {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// A loaded resource. Cheap to clone; the cache hands out copies.
#[derive(Debug, Clone)]
pub enum Resource {
    Markup(Arc<str>),
    Stylesheet(Arc<str>),
    Image(Arc<[u8]>),
    /// The component the script registered, if it registered one.
    Script(Option<Arc<ComponentDefinition>>),
    Data(Value),
    Exchange(Value),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Markup(_) => ResourceKind::Markup,
            Self::Stylesheet(_) => ResourceKind::Stylesheet,
            Self::Image(_) => ResourceKind::Image,
            Self::Script(_) => ResourceKind::Script,
            Self::Data(_) => ResourceKind::Data,
            Self::Exchange(_) => ResourceKind::Exchange,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Markup(text) | Self::Stylesheet(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Data(value) | Self::Exchange(value) => Some(value),
            _ => None,
        }
    }

    pub fn definition(&self) -> Option<&Arc<ComponentDefinition>> {
        match self {
            Self::Script(definition) => definition.as_ref(),
            _ => None,
        }
    }

    /// JSON projection, used when a resource is written into plain data.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Markup(text) | Self::Stylesheet(text) => Value::String(text.to_string()),
            Self::Image(bytes) => Value::from(bytes.len()),
            Self::Script(definition) => definition
                .as_ref()
                .map_or(Value::Null, |d| Value::String(d.index().to_string())),
            Self::Data(value) | Self::Exchange(value) => value.clone(),
        }
    }
}
