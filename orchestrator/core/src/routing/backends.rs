//! Backend Adapters
//!
//! The two interchangeable backends the router chooses between. Each adapter
//! maps a request kind to an endpoint, sends the payload and keeps its own
//! health view, which the router uses to seed and refresh its estimates.
//!
//! - [`EdgeWorkerAdapter`]: POSTs JSON to an edge worker, collapsing identical
//!   in-flight calls into one HTTP request
//! - [`StaticPagesAdapter`]: GETs prebuilt JSON assets from a static host,
//!   probing a CDN cascade first

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::header::CACHE_CONTROL;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::config::RequestKind;
use super::metrics::RouteMetrics;
use super::policy::BackendSlot;

// ============================================================================
// Backend Adapter Trait
// ============================================================================

/// Trait for backend adapters
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Name used in logs and metrics
    fn name(&self) -> &str;

    /// Endpoint or asset id serving `kind`
    fn endpoint_for(&self, kind: RequestKind) -> String;

    /// Send a payload to an endpoint
    async fn send(&self, endpoint: &str, payload: &Value) -> Result<Value, AdapterError>;

    /// The adapter's own view of its health
    fn metrics(&self) -> RouteMetrics;
}

/// Backend adapter errors
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The request never got a response
    #[error("connection failed: {0}")]
    Connection(String),

    /// The backend answered with a non-success status
    #[error("request to {url} failed with status {code}")]
    Status {
        /// HTTP status code
        code: u16,
        /// Requested URL
        url: String,
    },

    /// The response body was not valid JSON
    #[error("invalid response body: {0}")]
    Decode(String),

    /// The adapter cannot serve requests at all
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// The two backends, by slot
#[derive(Clone)]
pub struct BackendPair {
    /// First-listed backend
    pub primary: Arc<dyn BackendAdapter>,
    /// Second backend
    pub secondary: Arc<dyn BackendAdapter>,
}

impl BackendPair {
    /// Pair two adapters
    pub fn new(primary: Arc<dyn BackendAdapter>, secondary: Arc<dyn BackendAdapter>) -> Self {
        Self { primary, secondary }
    }

    /// Adapter in `slot`
    #[must_use]
    pub fn get(&self, slot: BackendSlot) -> &Arc<dyn BackendAdapter> {
        match slot {
            BackendSlot::Primary => &self.primary,
            BackendSlot::Secondary => &self.secondary,
        }
    }
}

impl std::fmt::Debug for BackendPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendPair")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.name())
            .finish()
    }
}

// ============================================================================
// Adapter Statistics
// ============================================================================

/// Health view kept inside an adapter
#[derive(Debug, Default)]
pub struct AdapterStats {
    metrics: Mutex<RouteMetrics>,
    in_flight: AtomicUsize,
}

impl AdapterStats {
    /// Mark a call as in flight until the guard drops
    pub fn track(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight {
            stats: Arc::clone(self),
        }
    }

    /// Fold a finished call into the estimate
    pub fn record<T>(&self, result: &Result<T, AdapterError>, elapsed: Duration) {
        let mut metrics = self.metrics.lock();
        match result {
            Ok(_) => {
                metrics.record_success(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
            }
            Err(_) => metrics.record_failure(),
        }
    }

    /// Current estimate with the live in-flight count
    #[must_use]
    pub fn snapshot(&self) -> RouteMetrics {
        let mut metrics = *self.metrics.lock();
        metrics.queue_size = self.in_flight.load(Ordering::Relaxed);
        metrics
    }
}

/// In-flight marker returned by [`AdapterStats::track`]
#[derive(Debug)]
pub struct InFlight {
    stats: Arc<AdapterStats>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

fn build_client(timeout_ms: u64) -> Result<reqwest::Client, AdapterError> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| AdapterError::Unavailable(format!("failed to create HTTP client: {e}")))
}

fn connection_error(e: &reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Connection(format!("timed out: {e}"))
    } else {
        AdapterError::Connection(e.to_string())
    }
}

async fn decode_json(response: reqwest::Response) -> Result<Value, AdapterError> {
    let status = response.status();
    if !status.is_success() {
        return Err(AdapterError::Status {
            code: status.as_u16(),
            url: response.url().to_string(),
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| AdapterError::Decode(e.to_string()))
}

// ============================================================================
// Edge Worker Adapter
// ============================================================================

/// Header carrying the edge cache tag
pub const CACHE_TAG_HEADER: &str = "CF-Cache-Tag";

/// Edge worker connection settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeWorkerConfig {
    /// Base URL of the worker
    pub worker_endpoint: String,
    /// Value of the cache-tag header
    pub cache_tag: String,
    /// Client-level timeout for each call
    pub request_timeout_ms: u64,
}

impl Default for EdgeWorkerConfig {
    fn default() -> Self {
        Self {
            worker_endpoint: "http://127.0.0.1:8787".to_string(),
            cache_tag: "edge-orchestrator".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

type SharedCall = Shared<BoxFuture<'static, Result<Value, AdapterError>>>;

/// Adapter for the edge worker
pub struct EdgeWorkerAdapter {
    config: EdgeWorkerConfig,
    client: reqwest::Client,
    in_flight: Mutex<HashMap<String, SharedCall>>,
    stats: Arc<AdapterStats>,
}

impl EdgeWorkerAdapter {
    /// Create an adapter
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Unavailable`] if the endpoint is not a valid
    /// URL or the HTTP client cannot be built.
    pub fn new(config: EdgeWorkerConfig) -> Result<Self, AdapterError> {
        Url::parse(&config.worker_endpoint).map_err(|e| {
            AdapterError::Unavailable(format!(
                "invalid worker endpoint {:?}: {e}",
                config.worker_endpoint
            ))
        })?;

        Ok(Self {
            client: build_client(config.request_timeout_ms)?,
            config,
            in_flight: Mutex::new(HashMap::new()),
            stats: Arc::new(AdapterStats::default()),
        })
    }

    /// Full URL for an endpoint
    ///
    /// Paths are appended to the worker base. Absolute URLs are sent through
    /// the worker's proxy route.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Unavailable`] if the result is not a valid URL.
    pub fn request_url(&self, endpoint: &str) -> Result<Url, AdapterError> {
        let base = self.config.worker_endpoint.trim_end_matches('/');
        let parsed = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Url::parse_with_params(&format!("{base}/proxy"), &[("url", endpoint)])
        } else {
            Url::parse(&format!("{base}{endpoint}"))
        };
        parsed.map_err(|e| AdapterError::Unavailable(format!("invalid endpoint {endpoint:?}: {e}")))
    }

    async fn execute(
        client: reqwest::Client,
        url: Url,
        payload: Value,
        cache_tag: String,
        stats: Arc<AdapterStats>,
    ) -> Result<Value, AdapterError> {
        let _in_flight = stats.track();
        let started = Instant::now();

        let result = match client
            .post(url.clone())
            .header(CACHE_CONTROL, "max-age=300")
            .header(CACHE_TAG_HEADER, cache_tag)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => decode_json(response).await,
            Err(e) => Err(connection_error(&e)),
        };

        stats.record(&result, started.elapsed());
        if let Err(e) = &result {
            tracing::debug!(url = %url, error = %e, "Edge worker call failed");
        }
        result
    }
}

/// Removes a dedupe entry when the call that created it finishes or is dropped
struct DedupeEntry<'a> {
    map: &'a Mutex<HashMap<String, SharedCall>>,
    key: &'a str,
}

impl Drop for DedupeEntry<'_> {
    fn drop(&mut self) {
        self.map.lock().remove(self.key);
    }
}

#[async_trait]
impl BackendAdapter for EdgeWorkerAdapter {
    fn name(&self) -> &str {
        "edge-worker"
    }

    fn endpoint_for(&self, kind: RequestKind) -> String {
        match kind {
            RequestKind::Trading => "/api/trading/execute",
            RequestKind::Analysis => "/api/analysis/generate",
            RequestKind::Market => "/api/market/data",
            RequestKind::Portfolio => "/api/portfolio/status",
        }
        .to_string()
    }

    async fn send(&self, endpoint: &str, payload: &Value) -> Result<Value, AdapterError> {
        let url = self.request_url(endpoint)?;
        let dedupe_key = format!("{url} {payload}");

        let (call, owner) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&dedupe_key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let call = Self::execute(
                        self.client.clone(),
                        url,
                        payload.clone(),
                        self.config.cache_tag.clone(),
                        Arc::clone(&self.stats),
                    )
                    .boxed()
                    .shared();
                    in_flight.insert(dedupe_key.clone(), call.clone());
                    (call, true)
                }
            }
        };

        if owner {
            let _entry = DedupeEntry {
                map: &self.in_flight,
                key: &dedupe_key,
            };
            call.await
        } else {
            tracing::trace!(endpoint = %endpoint, "Joined in-flight edge worker call");
            call.await
        }
    }

    fn metrics(&self) -> RouteMetrics {
        self.stats.snapshot()
    }
}

// ============================================================================
// Static Pages Adapter
// ============================================================================

/// Static host settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticPagesConfig {
    /// Repository in `owner/name` form
    pub repository: String,
    /// Published branch
    pub branch: String,
    /// CDN base URLs probed in order; each ends with `/`
    pub cdn_endpoints: Vec<String>,
    /// Client-level timeout for each call
    pub request_timeout_ms: u64,
}

impl StaticPagesConfig {
    /// Settings with the standard CDN cascade for `repository@branch`
    pub fn new(repository: impl Into<String>, branch: impl Into<String>) -> Self {
        let repository = repository.into();
        let branch = branch.into();
        Self {
            cdn_endpoints: Self::default_cdn_endpoints(&repository, &branch),
            repository,
            branch,
            request_timeout_ms: 10_000,
        }
    }

    /// Standard CDN mirrors for a repository branch
    #[must_use]
    pub fn default_cdn_endpoints(repository: &str, branch: &str) -> Vec<String> {
        vec![
            format!("https://cdn.jsdelivr.net/gh/{repository}@{branch}/"),
            format!("https://raw.githack.com/{repository}/{branch}/"),
        ]
    }

    /// Direct pages URL for an asset, used when no CDN answers
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Unavailable`] if the repository is not in
    /// `owner/name` form.
    pub fn pages_url(&self, asset: &str) -> Result<String, AdapterError> {
        match self.repository.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
                Ok(format!("https://{owner}.github.io/{name}/{asset}"))
            }
            _ => Err(AdapterError::Unavailable(format!(
                "repository {:?} is not in owner/name form",
                self.repository
            ))),
        }
    }
}

impl Default for StaticPagesConfig {
    fn default() -> Self {
        Self::new("example/static-data", "gh-pages")
    }
}

/// Adapter for prebuilt JSON assets on a static host
pub struct StaticPagesAdapter {
    config: StaticPagesConfig,
    client: reqwest::Client,
    /// Asset path -> resolved URL
    resolved: DashMap<String, String>,
    stats: Arc<AdapterStats>,
}

impl StaticPagesAdapter {
    /// Create an adapter
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(config: StaticPagesConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_client(config.request_timeout_ms)?,
            config,
            resolved: DashMap::new(),
            stats: Arc::new(AdapterStats::default()),
        })
    }

    /// Resolve the URL serving `asset`
    ///
    /// Each CDN endpoint is probed with `HEAD` in order; the first that
    /// answers with success wins. If none do, the direct pages URL is used.
    /// Either way the answer is remembered for the life of the adapter.
    ///
    /// # Errors
    ///
    /// Returns an error only if no CDN answered and the pages URL cannot be
    /// derived.
    pub async fn resolve_asset_url(&self, asset: &str) -> Result<String, AdapterError> {
        if let Some(url) = self.resolved.get(asset) {
            return Ok(url.value().clone());
        }

        for endpoint in &self.config.cdn_endpoints {
            let candidate = format!("{endpoint}{asset}");
            match self.client.head(&candidate).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(asset = %asset, url = %candidate, "Resolved asset via CDN");
                    self.resolved.insert(asset.to_string(), candidate.clone());
                    return Ok(candidate);
                }
                Ok(response) => {
                    tracing::debug!(
                        url = %candidate,
                        status = response.status().as_u16(),
                        "CDN endpoint rejected asset"
                    );
                }
                Err(e) => {
                    tracing::warn!(url = %candidate, error = %e, "CDN endpoint failed");
                }
            }
        }

        let fallback = self.config.pages_url(asset)?;
        tracing::debug!(asset = %asset, url = %fallback, "Falling back to pages URL");
        self.resolved.insert(asset.to_string(), fallback.clone());
        Ok(fallback)
    }
}

#[async_trait]
impl BackendAdapter for StaticPagesAdapter {
    fn name(&self) -> &str {
        "static-pages"
    }

    fn endpoint_for(&self, kind: RequestKind) -> String {
        match kind {
            RequestKind::Trading => "data/trading-templates.json",
            RequestKind::Analysis => "data/analysis-models.json",
            RequestKind::Market => "data/market-data.json",
            RequestKind::Portfolio => "data/portfolio-templates.json",
        }
        .to_string()
    }

    /// Fetch a static asset; the payload is not used
    async fn send(&self, endpoint: &str, _payload: &Value) -> Result<Value, AdapterError> {
        let _in_flight = self.stats.track();
        let started = Instant::now();

        let result = match self.resolve_asset_url(endpoint).await {
            Ok(url) => match self.client.get(&url).send().await {
                Ok(response) => decode_json(response).await,
                Err(e) => Err(connection_error(&e)),
            },
            Err(e) => Err(e),
        };

        self.stats.record(&result, started.elapsed());
        result
    }

    fn metrics(&self) -> RouteMetrics {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::test_utils::StubHttpServer;
    use serde_json::json;

    fn edge(endpoint: &str) -> EdgeWorkerAdapter {
        EdgeWorkerAdapter::new(EdgeWorkerConfig {
            worker_endpoint: endpoint.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_edge_endpoint_mapping() {
        let adapter = edge("https://worker.example.dev");

        assert_eq!(adapter.endpoint_for(RequestKind::Trading), "/api/trading/execute");
        assert_eq!(adapter.endpoint_for(RequestKind::Analysis), "/api/analysis/generate");
        assert_eq!(adapter.endpoint_for(RequestKind::Market), "/api/market/data");
        assert_eq!(adapter.endpoint_for(RequestKind::Portfolio), "/api/portfolio/status");
    }

    #[test]
    fn test_edge_request_url() {
        let adapter = edge("https://worker.example.dev/");

        assert_eq!(
            adapter.request_url("/api/market/data").unwrap().as_str(),
            "https://worker.example.dev/api/market/data"
        );

        let proxied = adapter
            .request_url("https://api.example.com/quote?s=BTC&x=1")
            .unwrap();
        assert_eq!(proxied.path(), "/proxy");
        let target: Vec<(String, String)> = proxied.query_pairs().into_owned().collect();
        assert_eq!(
            target,
            vec![("url".to_string(), "https://api.example.com/quote?s=BTC&x=1".to_string())]
        );
    }

    #[test]
    fn test_edge_rejects_invalid_endpoint() {
        let result = EdgeWorkerAdapter::new(EdgeWorkerConfig {
            worker_endpoint: "not a url".to_string(),
            ..Default::default()
        });

        assert!(matches!(result, Err(AdapterError::Unavailable(_))));
    }

    #[test]
    fn test_pages_url_and_default_cdns() {
        let config = StaticPagesConfig::new("octo/market-assets", "gh-pages");

        assert_eq!(
            config.pages_url("data/market-data.json").unwrap(),
            "https://octo.github.io/market-assets/data/market-data.json"
        );
        assert_eq!(
            config.cdn_endpoints[0],
            "https://cdn.jsdelivr.net/gh/octo/market-assets@gh-pages/"
        );

        let malformed = StaticPagesConfig::new("no-slash", "main");
        assert!(malformed.pages_url("x.json").is_err());
    }

    #[test]
    fn test_pages_endpoint_mapping() {
        let adapter = StaticPagesAdapter::new(StaticPagesConfig::default()).unwrap();

        assert_eq!(
            adapter.endpoint_for(RequestKind::Trading),
            "data/trading-templates.json"
        );
        assert_eq!(
            adapter.endpoint_for(RequestKind::Portfolio),
            "data/portfolio-templates.json"
        );
    }

    #[tokio::test]
    async fn test_edge_posts_json_and_records_success() {
        let server = StubHttpServer::start().await.unwrap();
        let adapter = edge(&server.base_url());

        let data = adapter
            .send("/api/market/data", &json!({"symbol": "BTC"}))
            .await
            .unwrap();

        assert_eq!(data, json!({"ok": true}));
        let seen = server.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].path, "/api/market/data");
        assert_eq!(seen[0].body, r#"{"symbol":"BTC"}"#);
        assert_eq!(
            seen[0].header("cf-cache-tag").as_deref(),
            Some("edge-orchestrator")
        );
        assert_eq!(
            seen[0].header("cache-control").as_deref(),
            Some("max-age=300")
        );
        let accepted = seen[0].header("accept-encoding").unwrap_or_default();
        for encoding in ["gzip", "br", "deflate"] {
            assert!(accepted.contains(encoding), "missing {encoding} in {accepted:?}");
        }

        let metrics = adapter.metrics();
        assert_eq!(metrics.queue_size, 0);
        assert_eq!(metrics.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_edge_maps_error_status() {
        let server = StubHttpServer::start().await.unwrap();
        let adapter = edge(&server.base_url());

        let result = adapter.send("/status/503", &Value::Null).await;

        assert!(matches!(result, Err(AdapterError::Status { code: 503, .. })));
        assert!(adapter.metrics().success_rate < 1.0);
    }

    #[tokio::test]
    async fn test_edge_collapses_identical_in_flight_calls() {
        let server = StubHttpServer::start_held().await.unwrap();
        let adapter = edge(&server.base_url());
        let payload = json!({"symbol": "ETH"});

        let (first, second, ()) = tokio::join!(
            adapter.send("/api/market/data", &payload),
            adapter.send("/api/market/data", &payload),
            async {
                server.wait_for_requests(1).await;
                assert_eq!(adapter.metrics().queue_size, 1);
                server.release();
            }
        );

        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(server.requests().len(), 1);
        assert_eq!(adapter.metrics().queue_size, 0);
    }

    #[tokio::test]
    async fn test_pages_cascade_memoizes_resolution() {
        let server = StubHttpServer::start().await.unwrap();
        let base = server.base_url();
        let adapter = StaticPagesAdapter::new(StaticPagesConfig {
            repository: "octo/assets".to_string(),
            branch: "gh-pages".to_string(),
            cdn_endpoints: vec![format!("{base}/status/404/"), format!("{base}/cdn/")],
            request_timeout_ms: 5_000,
        })
        .unwrap();

        let first = adapter
            .send("data/market-data.json", &Value::Null)
            .await
            .unwrap();
        let second = adapter
            .send("data/market-data.json", &Value::Null)
            .await
            .unwrap();

        assert_eq!(first, second);
        let methods: Vec<String> = server.requests().into_iter().map(|r| r.method).collect();
        // HEAD miss, HEAD hit, GET, then GET straight from the memo
        assert_eq!(methods, vec!["HEAD", "HEAD", "GET", "GET"]);
        assert_eq!(
            adapter.resolve_asset_url("data/market-data.json").await.unwrap(),
            format!("{base}/cdn/data/market-data.json")
        );
    }

    #[tokio::test]
    async fn test_pages_falls_back_to_pages_url() {
        let server = StubHttpServer::start().await.unwrap();
        let base = server.base_url();
        let adapter = StaticPagesAdapter::new(StaticPagesConfig {
            repository: "octo/assets".to_string(),
            branch: "gh-pages".to_string(),
            cdn_endpoints: vec![format!("{base}/status/404/")],
            request_timeout_ms: 5_000,
        })
        .unwrap();

        let url = adapter.resolve_asset_url("data/market-data.json").await.unwrap();

        assert_eq!(url, "https://octo.github.io/assets/data/market-data.json");
    }
}
