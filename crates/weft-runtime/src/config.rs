use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::RuntimeError;

const DATABASE_DIR_ENV: &str = "WEFT_DATABASE_DIR";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory relative resource keys are read from.
    pub asset_root: PathBuf,
    /// Origin prepended to relative keys; when set, relative keys go over HTTP.
    pub base_url: Option<String>,
    /// Where a missing component `index` is loaded from: `{component_root}/{index}.js`.
    pub component_root: String,
    /// Deadline for every dependency operation, in milliseconds. `0` disables it.
    pub resolve_timeout_ms: u64,
    /// Directory of the embedded table database.
    pub database_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("."),
            base_url: None,
            component_root: "components".into(),
            resolve_timeout_ms: 30_000,
            database_dir: weft_store::BackendFactory::default_database_dir(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, RuntimeError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RuntimeError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config.with_env_overrides())
    }

    /// Apply `WEFT_DATABASE_DIR` over the configured database directory.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var_os(DATABASE_DIR_ENV).filter(|d| !d.is_empty()) {
            self.database_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn resolve_timeout(&self) -> Option<Duration> {
        (self.resolve_timeout_ms > 0).then(|| Duration::from_millis(self.resolve_timeout_ms))
    }

    /// Resource key a missing component is loaded from.
    pub fn component_key(&self, index: &str) -> String {
        let root = self.component_root.trim_end_matches('/');
        if root.is_empty() {
            format!("{index}.js")
        } else {
            format!("{root}/{index}.js")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let config = RuntimeConfig::from_toml("").unwrap();
        assert_eq!(config.component_root, "components");
        assert_eq!(config.resolve_timeout(), Some(Duration::from_secs(30)));
        assert!(config.base_url.is_none());
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
asset_root = "/srv/assets"
base_url = "https://cdn.example.com"
component_root = "lib/components/"
resolve_timeout_ms = 0
database_dir = "/var/lib/weft"
"#;
        let config: RuntimeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.asset_root, PathBuf::from("/srv/assets"));
        assert_eq!(config.base_url.as_deref(), Some("https://cdn.example.com"));
        assert_eq!(config.resolve_timeout(), None);
        assert_eq!(config.component_key("menu@1.0.0"), "lib/components/menu@1.0.0.js");
    }

    #[test]
    fn rejects_bad_types() {
        let err = RuntimeConfig::from_toml("resolve_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }
}
