use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::LoadError;
use crate::instance::Behavior;
use crate::registry::{ComponentDefinition, Constructor};

/// Evaluates a fetched script body into the component definitions it
/// provides.
pub trait ScriptHost: Send + Sync {
    fn evaluate(&self, key: &str, body: &[u8]) -> Result<Vec<ComponentDefinition>, LoadError>;
}

/// One component described by a script manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentManifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub defaults: Value,
    /// Name of a native constructor registered with the host.
    #[serde(default)]
    pub constructor: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Manifests {
    One(ComponentManifest),
    Many(Vec<ComponentManifest>),
}

/// Script host for JSON component manifests, one object or an array of them.
/// Behavior comes from constructors the embedder registers by name.
#[derive(Default)]
pub struct ManifestScriptHost {
    constructors: HashMap<String, Constructor>,
}

impl ManifestScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constructor<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn Behavior> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.into(), std::sync::Arc::new(constructor));
        self
    }

    pub fn with_behavior<B>(self, name: impl Into<String>) -> Self
    where
        B: Behavior + Default + 'static,
    {
        self.with_constructor(name, || Box::new(B::default()))
    }

    fn build(&self, key: &str, manifest: ComponentManifest) -> Result<ComponentDefinition, LoadError> {
        let mut builder = ComponentDefinition::builder(&manifest.name).defaults(manifest.defaults);
        if let Some(version) = manifest.version {
            builder = builder.version(version);
        }
        if let Some(index) = manifest.index {
            builder = builder.index(index);
        }
        if let Some(name) = manifest.constructor {
            let constructor = self.constructors.get(&name).ok_or_else(|| LoadError::Script {
                key: key.to_string(),
                reason: format!("unknown constructor {name}"),
            })?;
            let constructor = constructor.clone();
            builder = builder.constructor(move || constructor());
        }
        builder.build().map_err(|e| LoadError::Script {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

impl ScriptHost for ManifestScriptHost {
    fn evaluate(&self, key: &str, body: &[u8]) -> Result<Vec<ComponentDefinition>, LoadError> {
        let manifests = serde_json::from_slice::<Manifests>(body).map_err(|e| LoadError::Script {
            key: key.to_string(),
            reason: format!("not a component manifest: {e}"),
        })?;
        let manifests = match manifests {
            Manifests::One(manifest) => vec![manifest],
            Manifests::Many(manifests) => manifests,
        };
        manifests
            .into_iter()
            .map(|manifest| self.build(key, manifest))
            .collect()
    }
}
