//! Request Router
//!
//! The [`Orchestrator`] is the entry point for callers. For each request it:
//!
//! 1. Serves a fresh cache row if one exists
//! 2. Scores both backend slots and sends to the winner
//! 3. Caches the result, or hands the failure to the failover controller
//!
//! It also owns a background queue for fire-and-forget submissions, drained
//! on a fixed tick by a task started with [`Orchestrator::start`] and stopped
//! with [`Orchestrator::shutdown`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::backends::{AdapterError, BackendPair};
use super::config::{CachePolicy, QueueConfig, RouterConfig, RoutingConfig};
use super::fallback::{AllRoutesFailed, FailoverController};
use super::metrics::{AggregateMetricsSnapshot, MetricsAggregator, RequestOutcome};
use super::policy::{BackendSlot, Request, RoutingPolicy};
use crate::cache::{cache_key, TtlCache};
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigError;
use crate::store::{KeyValueStore, StoreError};

/// Store key holding the active routing configuration
pub const ROUTING_CONFIG_KEY: &str = "config:routing";

// ============================================================================
// Response
// ============================================================================

/// Component that produced a response
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    /// Primary backend
    Primary,
    /// Secondary backend
    Secondary,
    /// Cache row, fresh or (after total failure) stale
    Cache,
}

impl From<BackendSlot> for ResponseSource {
    fn from(slot: BackendSlot) -> Self {
        match slot {
            BackendSlot::Primary => Self::Primary,
            BackendSlot::Secondary => Self::Secondary,
        }
    }
}

/// Answer to a request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Response {
    /// Response data
    pub data: Value,
    /// Producing component
    pub source: ResponseSource,
    /// Time spent producing the response
    pub latency_ms: u64,
    /// Whether the data came from the cache
    pub was_cached: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Both backends failed and no cache row existed
    #[error(transparent)]
    AllRoutesFailed(#[from] AllRoutesFailed),

    /// The background queue is at capacity
    #[error("background queue is full ({capacity} pending)")]
    QueueFull {
        /// Configured capacity
        capacity: usize,
    },

    /// The queue shut down before the submission ran
    #[error("background queue closed before the request ran")]
    QueueClosed,

    /// `submit` was called before `start` or after `shutdown`
    #[error("orchestrator is not running")]
    NotRunning,

    /// `start` was called twice
    #[error("orchestrator is already running")]
    AlreadyRunning,

    /// Persisting state failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The router configuration cannot drive the background queue
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

// ============================================================================
// Router Core
// ============================================================================

/// Shared routing machinery used by the router and the failover controller
pub(super) struct RouterCore {
    pub(super) backends: BackendPair,
    pub(super) cache: TtlCache,
    pub(super) metrics: MetricsAggregator,
    pub(super) policy: RoutingPolicy,
    pub(super) cache_policy: CachePolicy,
}

pub(super) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl RouterCore {
    /// Send `request` through one slot and record the attempt
    pub(super) async fn attempt(
        &self,
        slot: BackendSlot,
        request: &Request,
    ) -> Result<Value, AdapterError> {
        let adapter = self.backends.get(slot);
        let endpoint = adapter.endpoint_for(request.kind());
        let started = Instant::now();

        let result = adapter.send(&endpoint, request.payload()).await;
        let latency_ms = elapsed_ms(started);

        match &result {
            Ok(_) => {
                self.metrics.record_attempt_success(slot, latency_ms);
                tracing::debug!(
                    request_id = %request.id(),
                    backend = %adapter.name(),
                    endpoint = %endpoint,
                    latency_ms,
                    "Backend call succeeded"
                );
            }
            Err(e) => {
                self.metrics.record_attempt_failure(slot);
                tracing::warn!(
                    request_id = %request.id(),
                    backend = %adapter.name(),
                    endpoint = %endpoint,
                    error = %e,
                    "Backend call failed"
                );
            }
        }

        result
    }

    /// Write a successful result to the cache; failures are only logged
    pub(super) async fn remember(&self, key: &str, request: &Request, data: &Value) {
        let rule = self.cache_policy.rule_for(request.kind());
        if let Err(e) = self
            .cache
            .put(key, data.clone(), rule.ttl_seconds, rule.priority)
            .await
        {
            tracing::warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    /// Route a request that missed the cache
    async fn fetch(
        &self,
        request: &Request,
        key: &str,
        started: Instant,
    ) -> Result<Response, AllRoutesFailed> {
        for slot in BackendSlot::ALL {
            let queue_size = self.backends.get(slot).metrics().queue_size;
            self.metrics.refresh_queue_size(slot, queue_size);
        }

        let decision = self.policy.decide(
            request.kind(),
            request.priority(),
            &self.metrics.route(BackendSlot::Primary),
            &self.metrics.route(BackendSlot::Secondary),
        );
        tracing::debug!(
            request_id = %request.id(),
            kind = %request.kind(),
            slot = %decision.slot,
            primary_score = decision.primary_score.total,
            secondary_score = decision.secondary_score.total,
            reason = ?decision.reason,
            "Routing decision"
        );

        match self.attempt(decision.slot, request).await {
            Ok(data) => {
                self.remember(key, request, &data).await;
                Ok(Response {
                    data,
                    source: decision.slot.into(),
                    latency_ms: elapsed_ms(started),
                    was_cached: false,
                })
            }
            Err(error) => {
                FailoverController::new(self)
                    .recover(request, key, decision.slot, error, started)
                    .await
            }
        }
    }
}

// ============================================================================
// Background Queue
// ============================================================================

struct QueuedRequest {
    request: Request,
    response_tx: oneshot::Sender<Result<Response, OrchestratorError>>,
}

/// Pending submissions, highest priority first and FIFO within a priority
struct RequestQueue {
    pending: Vec<QueuedRequest>,
    capacity: usize,
    /// Set while no worker is draining the queue
    closed: bool,
}

impl RequestQueue {
    fn new(capacity: usize) -> Self {
        Self {
            pending: Vec::new(),
            capacity,
            closed: true,
        }
    }

    fn push(&mut self, queued: QueuedRequest) -> Result<(), OrchestratorError> {
        if self.closed {
            return Err(OrchestratorError::NotRunning);
        }
        if self.pending.len() >= self.capacity {
            return Err(OrchestratorError::QueueFull {
                capacity: self.capacity,
            });
        }

        let priority = queued.request.priority();
        let pos = self
            .pending
            .iter()
            .position(|r| r.request.priority() < priority)
            .unwrap_or(self.pending.len());

        self.pending.insert(pos, queued);
        Ok(())
    }

    fn pop_batch(&mut self, max: usize) -> Vec<QueuedRequest> {
        let n = max.min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    fn close(&mut self) -> Vec<QueuedRequest> {
        self.closed = true;
        std::mem::take(&mut self.pending)
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Handle to a queued request's eventual response
#[derive(Debug)]
pub struct Submission {
    rx: oneshot::Receiver<Result<Response, OrchestratorError>>,
}

impl Submission {
    /// Wait for the request to be processed
    ///
    /// # Errors
    ///
    /// Returns the request's own error, or [`OrchestratorError::QueueClosed`]
    /// if the orchestrator shut down first.
    pub async fn wait(self) -> Result<Response, OrchestratorError> {
        self.rx.await.unwrap_or(Err(OrchestratorError::QueueClosed))
    }
}

struct QueueWorker {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

// ============================================================================
// Orchestrator
// ============================================================================

type SharedFetch = Shared<BoxFuture<'static, Result<Response, AllRoutesFailed>>>;

struct Inner {
    core: RouterCore,
    config: RouterConfig,
    store: Arc<dyn KeyValueStore>,
    queue: Mutex<RequestQueue>,
    worker: Mutex<Option<QueueWorker>>,
    /// Cache key -> shared backend call, used when coalescing is enabled
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

/// Dual-backend request router
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backends", &self.inner.core.backends)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator using the system clock
    pub fn new(config: RouterConfig, backends: BackendPair, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(config, backends, store, Arc::new(SystemClock))
    }

    /// Create an orchestrator with an explicit clock for cache freshness
    pub fn with_clock(
        config: RouterConfig,
        backends: BackendPair,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = MetricsAggregator::new(backends.primary.name(), backends.secondary.name());
        let core = RouterCore {
            cache: TtlCache::new(Arc::clone(&store), clock),
            policy: RoutingPolicy::new(config.routing.clone()),
            cache_policy: config.cache.clone(),
            backends,
            metrics,
        };

        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(RequestQueue::new(config.queue.capacity)),
                core,
                config,
                store,
                worker: Mutex::new(None),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Persist the routing configuration, seed metrics and start the queue
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] if a queue limit is zero,
    /// [`OrchestratorError::AlreadyRunning`] if already started, or a store
    /// error if the configuration cannot be persisted.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        self.inner.config.queue.validate()?;
        if self.is_running() {
            return Err(OrchestratorError::AlreadyRunning);
        }

        self.persist_config().await?;

        {
            let mut worker = self.inner.worker.lock();
            if worker.is_some() {
                return Err(OrchestratorError::AlreadyRunning);
            }

            for slot in BackendSlot::ALL {
                let adapter = self.inner.core.backends.get(slot);
                self.inner.core.metrics.seed(slot, adapter.metrics());
                tracing::info!(slot = %slot, backend = %adapter.name(), "Registered backend");
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let tick = Duration::from_millis(self.inner.config.queue.tick_ms);
            let handle = tokio::spawn(run_queue(
                Arc::downgrade(&self.inner),
                shutdown_rx,
                tick,
            ));
            self.inner.queue.lock().closed = false;
            *worker = Some(QueueWorker {
                shutdown_tx,
                handle,
            });
        }

        tracing::info!(
            tick_ms = self.inner.config.queue.tick_ms,
            batch_size = self.inner.config.queue.batch_size,
            coalesce = self.inner.config.coalesce_requests,
            "Orchestrator started"
        );
        Ok(())
    }

    async fn persist_config(&self) -> Result<(), OrchestratorError> {
        #[derive(Serialize)]
        struct PersistedConfig<'a> {
            routing: &'a RoutingConfig,
            cache: &'a CachePolicy,
            queue: &'a QueueConfig,
            coalesce_requests: bool,
        }

        let config = &self.inner.config;
        let document = serde_json::to_string(&PersistedConfig {
            routing: &config.routing,
            cache: &config.cache,
            queue: &config.queue,
            coalesce_requests: config.coalesce_requests,
        })
        .map_err(StoreError::from)?;

        self.inner.store.set(ROUTING_CONFIG_KEY, document).await?;
        Ok(())
    }

    /// Stop the queue worker and answer pending submissions
    ///
    /// Pending submissions receive [`OrchestratorError::QueueClosed`]. Calling
    /// this when not running does nothing.
    pub async fn shutdown(&self) {
        let Some(worker) = self.inner.worker.lock().take() else {
            return;
        };

        let abandoned = self.inner.queue.lock().close();
        worker.shutdown_tx.send_replace(true);
        if let Err(e) = worker.handle.await {
            tracing::warn!(error = %e, "Queue worker ended abnormally");
        }

        let count = abandoned.len();
        for queued in abandoned {
            let _ = queued.response_tx.send(Err(OrchestratorError::QueueClosed));
        }
        self.inner.core.metrics.set_queue_depth(0);

        tracing::info!(abandoned = count, "Orchestrator shut down");
    }

    /// Whether the queue worker is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.worker.lock().is_some()
    }

    /// Process a request now
    ///
    /// # Errors
    ///
    /// Returns [`AllRoutesFailed`] if both backends failed and no cache row,
    /// fresh or stale, exists for the request.
    pub async fn process_request(&self, request: Request) -> Result<Response, AllRoutesFailed> {
        self.inner.process(&request).await
    }

    /// Queue a request for the background worker
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotRunning`] before `start` or after
    /// `shutdown`, and [`OrchestratorError::QueueFull`] at capacity.
    pub fn submit(&self, request: Request) -> Result<Submission, OrchestratorError> {
        let (response_tx, rx) = oneshot::channel();
        let depth = {
            let mut queue = self.inner.queue.lock();
            queue.push(QueuedRequest {
                request,
                response_tx,
            })?;
            queue.len()
        };
        self.inner.core.metrics.set_queue_depth(depth);
        Ok(Submission { rx })
    }

    /// Submissions waiting in the background queue
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Point-in-time metrics
    #[must_use]
    pub fn metrics(&self) -> AggregateMetricsSnapshot {
        self.inner.core.metrics.snapshot()
    }

    /// Metrics in Prometheus text format
    #[must_use]
    pub fn export_metrics(&self) -> String {
        self.inner.core.metrics.export_prometheus()
    }

    /// Remove every cache row
    ///
    /// # Errors
    ///
    /// Returns a store error if rows cannot be listed or removed.
    pub async fn purge_cache(&self) -> Result<usize, OrchestratorError> {
        Ok(self.inner.core.cache.purge_all().await?)
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }
}

/// Removes a coalescing entry when the call that created it finishes or is dropped
struct InFlightEntry<'a> {
    map: &'a Mutex<HashMap<String, SharedFetch>>,
    key: &'a str,
}

impl Drop for InFlightEntry<'_> {
    fn drop(&mut self) {
        self.map.lock().remove(self.key);
    }
}

impl Inner {
    async fn process(self: &Arc<Self>, request: &Request) -> Result<Response, AllRoutesFailed> {
        let started = Instant::now();
        let key = cache_key(request.kind(), request.payload());
        let metrics = &self.core.metrics;

        if let Some(entry) = self.core.cache.get(&key, false).await {
            let latency_ms = elapsed_ms(started);
            metrics.record_outcome(RequestOutcome::FreshCache, latency_ms);
            tracing::debug!(request_id = %request.id(), key = %key, "Served from cache");
            return Ok(Response {
                data: entry.data,
                source: ResponseSource::Cache,
                latency_ms,
                was_cached: true,
            });
        }

        let result = if self.config.coalesce_requests {
            self.fetch_coalesced(request, key, started).await
        } else {
            self.core.fetch(request, &key, started).await
        };

        let outcome = match &result {
            Ok(response) if response.was_cached => RequestOutcome::StaleCache,
            Ok(_) => RequestOutcome::Backend,
            Err(e) => {
                tracing::error!(
                    request_id = %request.id(),
                    error = %e,
                    "Request failed on every route"
                );
                RequestOutcome::Failed
            }
        };
        metrics.record_outcome(outcome, elapsed_ms(started));

        result
    }

    /// Share one backend call between concurrent requests with the same key
    async fn fetch_coalesced(
        self: &Arc<Self>,
        request: &Request,
        key: String,
        started: Instant,
    ) -> Result<Response, AllRoutesFailed> {
        let (call, owner) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let inner = Arc::clone(self);
                    let owned_request = request.clone();
                    let owned_key = key.clone();
                    let call = async move {
                        inner
                            .core
                            .fetch(&owned_request, &owned_key, started)
                            .await
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key.clone(), call.clone());
                    (call, true)
                }
            }
        };

        if owner {
            let _entry = InFlightEntry {
                map: &self.in_flight,
                key: &key,
            };
            call.await
        } else {
            tracing::debug!(request_id = %request.id(), key = %key, "Joined in-flight request");
            call.await.map(|mut response| {
                // The shared call timed the owner; a follower reports its own wait
                if !response.was_cached {
                    response.latency_ms = elapsed_ms(started);
                }
                response
            })
        }
    }

    async fn drain_batch(self: &Arc<Self>) {
        let (batch, remaining) = {
            let mut queue = self.queue.lock();
            let batch = queue.pop_batch(self.config.queue.batch_size);
            (batch, queue.len())
        };
        if batch.is_empty() {
            return;
        }
        self.core.metrics.set_queue_depth(remaining);

        tracing::trace!(batch = batch.len(), remaining, "Draining queue batch");
        join_all(batch.into_iter().map(|queued| async move {
            let result = self
                .process(&queued.request)
                .await
                .map_err(OrchestratorError::from);
            let _ = queued.response_tx.send(result);
        }))
        .await;
    }
}

async fn run_queue(inner: Weak<Inner>, mut shutdown: watch::Receiver<bool>, tick: Duration) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.drain_batch().await;
    }

    tracing::debug!("Queue worker stopped");
}
