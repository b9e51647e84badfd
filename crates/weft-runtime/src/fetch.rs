use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;

use crate::BoxFuture;
use crate::config::RuntimeConfig;
use crate::error::LoadError;
use crate::resource::{ResourceKind, ResourceSpec};

/// What the loader asks a fetcher for.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub key: String,
    pub kind: ResourceKind,
    pub params: Option<Value>,
}

impl From<&ResourceSpec> for FetchRequest {
    fn from(spec: &ResourceSpec) -> Self {
        Self {
            key: spec.key.clone(),
            kind: spec.kind(),
            params: spec.params.clone(),
        }
    }
}

/// Network/asset layer behind the loader. Returns the raw body; decoding by
/// kind is the loader's job.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<Vec<u8>, LoadError>>;
}

fn is_absolute_url(key: &str) -> bool {
    key.starts_with("http://") || key.starts_with("https://")
}

pub struct HttpFetcher {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl HttpFetcher {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn has_base_url(&self) -> bool {
        self.base_url.is_some()
    }

    fn url_for(&self, key: &str) -> String {
        match &self.base_url {
            Some(base) if !is_absolute_url(key) => {
                format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
            }
            _ => key.to_string(),
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<Vec<u8>, LoadError>> {
        Box::pin(async move {
            let url = self.url_for(&request.key);
            let req = match request.kind {
                ResourceKind::Exchange => {
                    let params = request.params.clone().unwrap_or(Value::Object(Default::default()));
                    self.http.post(&url).json(&params)
                }
                _ => self.http.get(&url),
            };

            let resp = req.send().await.map_err(|e| LoadError::Fetch {
                key: request.key.clone(),
                reason: format!("HTTP request failed: {e}"),
            })?;

            if !resp.status().is_success() {
                return Err(LoadError::Status {
                    key: request.key.clone(),
                    status: resp.status().as_u16(),
                });
            }

            let body = resp.bytes().await.map_err(|e| LoadError::Fetch {
                key: request.key.clone(),
                reason: format!("Failed to read body: {e}"),
            })?;
            Ok(body.to_vec())
        })
    }
}

/// Reads keys as paths under a root directory.
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Fetcher for FileFetcher {
    fn fetch<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<Vec<u8>, LoadError>> {
        Box::pin(async move {
            if request.kind == ResourceKind::Exchange {
                return Err(LoadError::Unsupported {
                    key: request.key.clone(),
                    kind: request.kind,
                });
            }
            let path = self.root.join(request.key.trim_start_matches('/'));
            tokio::fs::read(&path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => LoadError::Status {
                    key: request.key.clone(),
                    status: 404,
                },
                _ => LoadError::Fetch {
                    key: request.key.clone(),
                    reason: format!("{}: {e}", path.display()),
                },
            })
        })
    }
}

/// Absolute URLs, and every key once a base URL is configured, go over HTTP;
/// everything else is read from disk.
pub struct RoutingFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl RoutingFetcher {
    pub fn new(http: HttpFetcher, file: FileFetcher) -> Self {
        Self { http, file }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            HttpFetcher::new(config.base_url.clone()),
            FileFetcher::new(config.asset_root.clone()),
        )
    }
}

impl Fetcher for RoutingFetcher {
    fn fetch<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<Vec<u8>, LoadError>> {
        if is_absolute_url(&request.key) || self.http.has_base_url() {
            self.http.fetch(request)
        } else {
            self.file.fetch(request)
        }
    }
}

/// In-memory fetcher for tests and embedding. Counts fetches per key and can
/// hold every fetch for a fixed delay so callers overlap.
#[derive(Default)]
pub struct StaticFetcher {
    assets: HashMap<String, Vec<u8>>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.assets.insert(key.into(), body.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fetches issued for `key`.
    pub fn calls(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }
}

impl Fetcher for StaticFetcher {
    fn fetch<'a>(&'a self, request: &'a FetchRequest) -> BoxFuture<'a, Result<Vec<u8>, LoadError>> {
        Box::pin(async move {
            self.total.fetch_add(1, Ordering::Relaxed);
            *self
                .calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(request.key.clone())
                .or_default() += 1;

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.assets
                .get(&request.key)
                .cloned()
                .ok_or_else(|| LoadError::Status {
                    key: request.key.clone(),
                    status: 404,
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(key: &str) -> FetchRequest {
        FetchRequest::from(&ResourceSpec::new(key))
    }

    #[tokio::test]
    async fn file_fetcher_reads_under_root() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("css")).unwrap();
        std::fs::write(tmp.path().join("css/site.css"), "body{}").unwrap();

        let fetcher = FileFetcher::new(tmp.path().to_path_buf());
        assert_eq!(fetcher.fetch(&request("/css/site.css")).await.unwrap(), b"body{}");

        let missing = fetcher.fetch(&request("nope.css")).await.unwrap_err();
        assert!(matches!(missing, LoadError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn file_fetcher_refuses_exchanges() {
        let fetcher = FileFetcher::new(PathBuf::from("."));
        let err = fetcher
            .fetch(&FetchRequest::from(&ResourceSpec::exchange("api", Value::Null)))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Unsupported { .. }));
    }

    #[test]
    fn http_fetcher_joins_base_url() {
        let fetcher = HttpFetcher::new(Some("https://cdn.example.com/".into()));
        assert_eq!(fetcher.url_for("/a/b.css"), "https://cdn.example.com/a/b.css");
        assert_eq!(fetcher.url_for("https://other.example.com/x.js"), "https://other.example.com/x.js");
    }

    #[tokio::test]
    async fn http_fetcher_reports_unreachable_hosts() {
        let fetcher = HttpFetcher::new(None);
        let err = fetcher.fetch(&request("http://127.0.0.1:9/x.css")).await.unwrap_err();
        assert!(matches!(err, LoadError::Fetch { .. }));
    }

    #[tokio::test]
    async fn static_fetcher_counts_calls() {
        let fetcher = StaticFetcher::new().with_asset("a.css", "a{}");
        fetcher.fetch(&request("a.css")).await.unwrap();
        fetcher.fetch(&request("a.css")).await.unwrap();
        assert!(fetcher.fetch(&request("b.css")).await.is_err());

        assert_eq!(fetcher.calls("a.css"), 2);
        assert_eq!(fetcher.calls("b.css"), 1);
        assert_eq!(fetcher.total_calls(), 3);
    }
}
