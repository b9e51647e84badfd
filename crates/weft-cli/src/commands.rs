use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Value, json};
use weft_runtime::{
    Credentials, Dataset, DatastoreSettings, ManifestScriptHost, ResourceSpec, Runtime,
    ScriptHost, Session,
};

use crate::StoreAction;

pub async fn load(runtime: &Runtime, keys: Vec<String>) -> Result<()> {
    let specs: Vec<ResourceSpec> = keys.into_iter().map(ResourceSpec::from).collect();
    let resources = runtime.load_all(&specs).await?;

    for (spec, resource) in specs.iter().zip(&resources) {
        let line = json!({
            "key": spec.key,
            "kind": resource.kind().to_string(),
            "value": resource.to_json(),
        });
        println!("{line}");
    }
    Ok(())
}

pub async fn materialize(
    runtime: &Runtime,
    index: &str,
    data: Option<&Path>,
    manifests: &[PathBuf],
) -> Result<()> {
    let host = ManifestScriptHost::new();
    for path in manifests {
        let body = std::fs::read(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        for definition in host.evaluate(&path.display().to_string(), &body)? {
            let definition = runtime.register(definition);
            tracing::info!(index = %definition.index(), "Registered component from manifest");
        }
    }

    let config = match data {
        Some(path) => read_json(path)?,
        None => Value::Null,
    };
    let instance = runtime.instantiate_json(index, config).await?;
    let rendered = runtime.render(&instance).await?;

    let output = json!({
        "index": instance.index(),
        "fields": instance.to_json(),
        "rendered": rendered,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

pub async fn store(
    runtime: &Runtime,
    settings: &Path,
    token: Option<String>,
    action: StoreAction,
) -> Result<()> {
    let settings: DatastoreSettings = serde_json::from_value(read_json(settings)?)
        .context("Invalid datastore settings")?;
    let session = token.map(|token| {
        Session::new(Credentials {
            user: None,
            token: Some(token),
        })
    });
    let session = session.as_ref();
    let store = runtime.open_store(settings).await?;

    match action {
        StoreAction::Get { key, raw: true } => {
            let dataset = store.get_raw(&key, session).await?;
            println!("{}", dataset.map_or(Value::Null, Value::Object));
        }
        StoreAction::Get { key, raw: false } => {
            let node = store.get(&key, session).await?;
            println!("{}", node.map_or(Value::Null, |n| n.to_json()));
        }
        StoreAction::Set { dataset } => {
            let dataset: Dataset =
                serde_json::from_str(&dataset).context("Dataset must be a JSON object")?;
            let stored = store.set(dataset, session).await?;
            println!("{}", Value::Object(stored));
        }
        StoreAction::Delete { key } => {
            store.delete(key.as_deref(), session).await?;
        }
        StoreAction::Count => {
            println!("{}", store.count(session).await?);
        }
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}
