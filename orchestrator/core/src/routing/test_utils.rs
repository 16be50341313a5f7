//! Routing Test Utilities
//!
//! Mock infrastructure for exercising the router without real backends:
//!
//! - [`MockAdapter`]: scriptable [`BackendAdapter`] with call history, failure
//!   toggles and an optional gate that holds calls until released
//! - `StubHttpServer`: loopback axum server for the HTTP adapters, built with
//!   the `test-utils` feature
//!
//! # Usage
//!
//! ```ignore
//! use orchestrator_core::routing::test_utils::MockAdapter;
//!
//! let edge = MockAdapter::new("edge");
//! edge.set_failing(true);
//!
//! // After the test, verify what was sent
//! assert_eq!(edge.call_count(), 1);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;

use super::backends::{AdapterError, BackendAdapter};
use super::config::RequestKind;
use super::metrics::RouteMetrics;

// ============================================================================
// Mock Adapter
// ============================================================================

/// Captured call for test verification
#[derive(Clone, Debug, PartialEq)]
pub struct MockCall {
    /// Endpoint the router chose
    pub endpoint: String,
    /// Payload sent
    pub payload: Value,
}

/// Scriptable backend adapter
#[derive(Debug)]
pub struct MockAdapter {
    name: String,
    response: Mutex<Value>,
    failing: AtomicBool,
    metrics: Mutex<RouteMetrics>,
    calls: Mutex<Vec<MockCall>>,
    gate: Option<watch::Sender<bool>>,
}

impl MockAdapter {
    /// Healthy adapter answering `{"backend": name}`
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            response: Mutex::new(json!({ "backend": name })),
            name,
            failing: AtomicBool::new(false),
            metrics: Mutex::new(RouteMetrics::default()),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Adapter whose calls block until [`MockAdapter::release`]
    pub fn held(name: impl Into<String>) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            gate: Some(gate),
            ..Self::new(name)
        }
    }

    /// Replace the canned response
    #[must_use]
    pub fn with_response(self, response: Value) -> Self {
        *self.response.lock() = response;
        self
    }

    /// Make every call fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Replace the metrics reported by [`BackendAdapter::metrics`]
    pub fn set_metrics(&self, metrics: RouteMetrics) {
        *self.metrics.lock() = metrics;
    }

    /// Let held calls complete
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.send_replace(true);
        }
    }

    /// All calls received so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Number of calls received so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Wait until at least `n` calls have arrived
    pub async fn wait_for_calls(&self, n: usize) {
        while self.call_count() < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl BackendAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint_for(&self, kind: RequestKind) -> String {
        format!("/{}/{kind}", self.name)
    }

    async fn send(&self, endpoint: &str, payload: &Value) -> Result<Value, AdapterError> {
        self.calls.lock().push(MockCall {
            endpoint: endpoint.to_string(),
            payload: payload.clone(),
        });

        if let Some(gate) = &self.gate {
            let mut open = gate.subscribe();
            // Sender lives in self, so this only ends once released
            let _ = open.wait_for(|released| *released).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable(format!("{} is down", self.name)));
        }
        Ok(self.response.lock().clone())
    }

    fn metrics(&self) -> RouteMetrics {
        *self.metrics.lock()
    }
}

// ============================================================================
// Stub HTTP Server
// ============================================================================

#[cfg(any(test, feature = "test-utils"))]
pub use http_stub::{RecordedRequest, StubHttpServer};

#[cfg(any(test, feature = "test-utils"))]
mod http_stub {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::extract::{Path, Request, State};
    use axum::http::StatusCode;
    use axum::middleware::{self, Next};
    use axum::response::{IntoResponse, Response};
    use axum::routing::any;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::{oneshot, watch};

    /// Request seen by [`StubHttpServer`]
    #[derive(Clone, Debug)]
    pub struct RecordedRequest {
        /// HTTP method
        pub method: String,
        /// Path and query
        pub path: String,
        /// Headers with lowercased names
        pub headers: Vec<(String, String)>,
        /// Body as text
        pub body: String,
    }

    impl RecordedRequest {
        /// First header value with this (lowercase) name
        #[must_use]
        pub fn header(&self, name: &str) -> Option<String> {
            self.headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        }
    }

    #[derive(Debug)]
    struct StubState {
        requests: Mutex<Vec<RecordedRequest>>,
        gate: watch::Sender<bool>,
    }

    /// Loopback axum server with canned answers
    ///
    /// `/status/{code}` and `/status/{code}/...` answer with that status; every
    /// other path answers `200 {"ok":true}`. Every request is recorded before it
    /// is answered, and a held server keeps answers back until released.
    pub struct StubHttpServer {
        addr: SocketAddr,
        state: Arc<StubState>,
        shutdown_tx: Option<oneshot::Sender<()>>,
    }

    impl StubHttpServer {
        /// Start a server that answers immediately
        ///
        /// # Errors
        ///
        /// Returns an error if no loopback port can be bound.
        pub async fn start() -> std::io::Result<Self> {
            Self::spawn(true).await
        }

        /// Start a server that holds every answer until [`StubHttpServer::release`]
        ///
        /// # Errors
        ///
        /// Returns an error if no loopback port can be bound.
        pub async fn start_held() -> std::io::Result<Self> {
            Self::spawn(false).await
        }

        async fn spawn(open: bool) -> std::io::Result<Self> {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let addr = listener.local_addr()?;
            let (gate, _) = watch::channel(open);
            let state = Arc::new(StubState {
                requests: Mutex::new(Vec::new()),
                gate,
            });

            let app = Router::new()
                .route("/status/{code}", any(status_answer))
                .route("/status/{code}/{*rest}", any(status_answer))
                .fallback(ok_answer)
                .layer(middleware::from_fn_with_state(Arc::clone(&state), record_request));

            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            tokio::spawn(async move {
                let served = axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::warn!(error = %e, "Stub server stopped");
                }
            });

            Ok(Self {
                addr,
                state,
                shutdown_tx: Some(shutdown_tx),
            })
        }

        /// `http://127.0.0.1:<port>`
        #[must_use]
        pub fn base_url(&self) -> String {
            format!("http://{}", self.addr)
        }

        /// Requests received so far
        #[must_use]
        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.state.requests.lock().clone()
        }

        /// Wait until at least `n` requests have arrived
        pub async fn wait_for_requests(&self, n: usize) {
            while self.state.requests.lock().len() < n {
                tokio::task::yield_now().await;
            }
        }

        /// Let held answers go out
        pub fn release(&self) {
            self.state.gate.send_replace(true);
        }
    }

    impl Drop for StubHttpServer {
        fn drop(&mut self) {
            if let Some(tx) = self.shutdown_tx.take() {
                let _ = tx.send(());
            }
        }
    }

    async fn record_request(
        State(state): State<Arc<StubState>>,
        request: Request,
        next: Next,
    ) -> Response {
        let (parts, body) = request.into_parts();
        let body = to_bytes(body, usize::MAX).await.unwrap_or_default();

        state.requests.lock().push(RecordedRequest {
            method: parts.method.to_string(),
            path: parts
                .uri
                .path_and_query()
                .map_or_else(|| parts.uri.path().to_string(), ToString::to_string),
            headers: parts
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        value.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });

        let mut open = state.gate.subscribe();
        // The sender lives in the shared state, so this only ends once released
        let _ = open.wait_for(|released| *released).await;

        next.run(Request::from_parts(parts, Body::from(body))).await
    }

    async fn status_answer(Path(params): Path<HashMap<String, String>>) -> impl IntoResponse {
        let status = params
            .get("code")
            .and_then(|code| code.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::BAD_REQUEST);

        (status, Json(json!({ "status": status.as_u16() })))
    }

    async fn ok_answer() -> impl IntoResponse {
        Json(json!({ "ok": true }))
    }
}
