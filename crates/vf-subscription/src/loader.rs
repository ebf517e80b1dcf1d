//! Fetching and caching subscription documents
//!
//! Remote documents are cached on disk under a name derived from the URL.
//! A fresh cache is used as-is; otherwise the document is downloaded, and if
//! that fails a stale cache still beats nothing. Loading never fails: the
//! worst outcome is an empty rule list.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{SubscriptionError, SubscriptionResult};
use crate::parse::parse_document;
use crate::rule::Rule;

/// Downloads a document body
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> SubscriptionResult<String>;
}

/// [`Fetch`] over HTTP(S)
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> SubscriptionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubscriptionError::Request {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> SubscriptionResult<String> {
        let request_error = |e: reqwest::Error| SubscriptionError::Request {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self.client.get(url).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(SubscriptionError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(request_error)
    }
}

/// [`Fetch`] for hosts without network access: only caches and files load
pub struct OfflineFetcher;

#[async_trait]
impl Fetch for OfflineFetcher {
    async fn fetch(&self, url: &str) -> SubscriptionResult<String> {
        Err(SubscriptionError::Request {
            url: url.to_string(),
            message: "network access disabled".to_string(),
        })
    }
}

/// Where a workflow's rules come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionSource {
    Url(String),
    /// Absolute, or relative to the cache directory
    File(PathBuf),
}

impl SubscriptionSource {
    /// The URL wins when both are configured; blank values count as absent
    pub fn from_config(url: Option<&str>, file: Option<&str>) -> Option<Self> {
        match (present(url), present(file)) {
            (Some(url), _) => Some(SubscriptionSource::Url(url.to_string())),
            (None, Some(file)) => Some(SubscriptionSource::File(PathBuf::from(file))),
            (None, None) => None,
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

impl std::fmt::Display for SubscriptionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionSource::Url(url) => f.write_str(url),
            SubscriptionSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// `subscription_{first 16 hex chars of sha256(url)}.json`
pub fn cache_file_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("subscription_{}.json", &hex[..16])
}

/// Loads rule sets from URLs or files
#[derive(Clone)]
pub struct SubscriptionLoader {
    cache_dir: PathBuf,
    ttl: Duration,
    fetcher: Arc<dyn Fetch>,
}

impl SubscriptionLoader {
    pub fn new(cache_dir: impl Into<PathBuf>, ttl: Duration, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ttl,
            fetcher,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(cache_file_name(url))
    }

    pub async fn load(&self, source: &SubscriptionSource) -> Vec<Rule> {
        match source {
            SubscriptionSource::Url(url) => self.load_url(url).await,
            SubscriptionSource::File(path) => self.load_file(path).await,
        }
    }

    /// Rules from a URL, going through the cache
    pub async fn load_url(&self, url: &str) -> Vec<Rule> {
        let cache_path = self.cache_path(url);

        if self.is_fresh(&cache_path).await {
            if let Some(rules) = read_rules(&cache_path).await {
                debug!(url, cache = %cache_path.display(), "Using fresh subscription cache");
                return rules;
            }
        }

        match self.download(url).await {
            Ok((content, rules)) => {
                self.write_cache(&cache_path, &content).await;
                info!(url, rules = rules.len(), "Subscription downloaded");
                rules
            }
            Err(e) => {
                warn!(url, error = %e, "Subscription download failed, trying stale cache");
                match read_rules(&cache_path).await {
                    Some(rules) => {
                        info!(url, rules = rules.len(), "Using stale subscription cache");
                        rules
                    }
                    None => Vec::new(),
                }
            }
        }
    }

    /// Rules from a local file; relative paths resolve against the cache dir
    pub async fn load_file(&self, path: &Path) -> Vec<Rule> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cache_dir.join(path)
        };
        let rules = read_rules(&path).await.unwrap_or_default();
        info!(path = %path.display(), rules = rules.len(), "Subscription file loaded");
        rules
    }

    /// Fetch and validate; content that does not parse is a failed download
    async fn download(&self, url: &str) -> SubscriptionResult<(String, Vec<Rule>)> {
        let content = self.fetcher.fetch(url).await?;
        let rules = parse_document(&content)?;
        Ok((content, rules))
    }

    async fn is_fresh(&self, path: &Path) -> bool {
        let Ok(metadata) = tokio::fs::metadata(path).await else {
            return false;
        };
        metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age < self.ttl)
    }

    async fn write_cache(&self, path: &Path, content: &str) {
        if let Err(e) = tokio::fs::create_dir_all(&self.cache_dir).await {
            warn!(dir = %self.cache_dir.display(), error = %e, "Cannot create cache directory");
            return;
        }
        if let Err(e) = tokio::fs::write(path, content).await {
            warn!(path = %path.display(), error = %e, "Cannot write subscription cache");
        }
    }
}

async fn read_rules(path: &Path) -> Option<Vec<Rule>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Subscription file unreadable");
            return None;
        }
    };
    match parse_document(&content) {
        Ok(rules) => Some(rules),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Subscription file does not parse");
            None
        }
    }
}
