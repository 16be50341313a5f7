//! Router integration tests
//!
//! These tests drive the public [`Orchestrator`] API end to end with scripted
//! backends:
//! - Cache hits, expiry, stale serving and purging
//! - Score-based routing and failover between backends
//! - Metrics smoothing observed through the aggregate snapshot
//! - Background queue ordering, capacity and shutdown
//! - Request coalescing
//! - Persistence across restarts with the file store
//! - HTTP adapters against a loopback server

use std::sync::Arc;

use chrono::Duration;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use orchestrator_core::routing::test_utils::{MockAdapter, StubHttpServer};
use orchestrator_core::routing::{QueueConfig, ROUTING_CONFIG_KEY};
use orchestrator_core::{
    AdapterError, BackendPair, EdgeWorkerAdapter, EdgeWorkerConfig, FileStore, KeyValueStore,
    ManualClock, MemoryStore, Orchestrator, OrchestratorError, Priority, Request, RequestKind,
    ResponseSource, RouterConfig, StaticPagesAdapter, StaticPagesConfig,
};

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    orchestrator: Orchestrator,
    edge: Arc<MockAdapter>,
    pages: Arc<MockAdapter>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with(RouterConfig::default(), MockAdapter::new("edge"))
    }

    fn with(config: RouterConfig, edge: MockAdapter) -> Self {
        let edge = Arc::new(edge);
        let pages = Arc::new(MockAdapter::new("pages"));
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());

        let orchestrator = Orchestrator::with_clock(
            config,
            BackendPair::new(edge.clone(), pages.clone()),
            store.clone(),
            clock.clone(),
        );

        Self {
            orchestrator,
            edge,
            pages,
            store,
            clock,
        }
    }
}

fn market(symbol: &str) -> Request {
    Request::new(RequestKind::Market, json!({ "symbol": symbol }))
}

// =============================================================================
// Cache
// =============================================================================

#[tokio::test]
async fn test_fresh_cache_hit_skips_backends() {
    let h = Harness::new();

    let first = h.orchestrator.process_request(market("AAPL")).await.unwrap();
    let second = h.orchestrator.process_request(market("AAPL")).await.unwrap();

    assert_eq!(first.source, ResponseSource::Primary);
    assert!(!first.was_cached);
    assert_eq!(second.source, ResponseSource::Cache);
    assert!(second.was_cached);
    assert_eq!(second.data, first.data);
    assert_eq!(h.edge.call_count() + h.pages.call_count(), 1);

    let snapshot = h.orchestrator.metrics();
    assert_eq!(snapshot.total_requests, 2);
    assert_eq!(snapshot.cache_hits, 1);
    assert_eq!(snapshot.averages.cache_hit_rate, 0.5);
}

#[tokio::test]
async fn test_payload_member_order_shares_a_cache_row() {
    let h = Harness::new();

    h.orchestrator
        .process_request(Request::new(RequestKind::Analysis, json!({"a": 1, "b": 2})))
        .await
        .unwrap();
    let response = h
        .orchestrator
        .process_request(Request::new(RequestKind::Analysis, json!({"b": 2, "a": 1})))
        .await
        .unwrap();

    assert_eq!(response.source, ResponseSource::Cache);
}

#[tokio::test]
async fn test_expired_row_goes_back_to_backend() {
    let h = Harness::new();
    h.orchestrator.process_request(market("AAPL")).await.unwrap();

    // Market rows live for 60 seconds
    h.clock.advance(Duration::milliseconds(59_999));
    let still_fresh = h.orchestrator.process_request(market("AAPL")).await.unwrap();
    assert_eq!(still_fresh.source, ResponseSource::Cache);

    h.clock.advance(Duration::milliseconds(1));
    let refreshed = h.orchestrator.process_request(market("AAPL")).await.unwrap();
    assert_eq!(refreshed.source, ResponseSource::Primary);
    assert_eq!(h.edge.call_count(), 2);
}

#[tokio::test]
async fn test_purge_removes_rows_and_is_idempotent() {
    let h = Harness::new();
    h.orchestrator.process_request(market("AAPL")).await.unwrap();
    h.orchestrator.process_request(market("MSFT")).await.unwrap();
    h.orchestrator.start().await.unwrap();

    assert_eq!(h.orchestrator.purge_cache().await.unwrap(), 2);
    assert_eq!(h.orchestrator.purge_cache().await.unwrap(), 0);

    // Config row survives the purge
    assert!(h.store.get(ROUTING_CONFIG_KEY).await.unwrap().is_some());

    let response = h.orchestrator.process_request(market("AAPL")).await.unwrap();
    assert_eq!(response.source, ResponseSource::Primary);
    assert_eq!(h.edge.call_count(), 3);

    h.orchestrator.shutdown().await;
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test]
async fn test_kind_bonus_picks_backend() {
    let h = Harness::new();

    let market = h.orchestrator.process_request(market("AAPL")).await.unwrap();
    let portfolio = h
        .orchestrator
        .process_request(Request::new(RequestKind::Portfolio, json!({"account": 7})))
        .await
        .unwrap();
    // Equal bonuses tie, and ties go to the primary
    let analysis = h
        .orchestrator
        .process_request(Request::new(RequestKind::Analysis, json!({"q": "rsi"})))
        .await
        .unwrap();

    assert_eq!(market.source, ResponseSource::Primary);
    assert_eq!(portfolio.source, ResponseSource::Secondary);
    assert_eq!(analysis.source, ResponseSource::Primary);
    assert_eq!(h.pages.calls()[0].endpoint, "/pages/portfolio");
}

#[tokio::test]
async fn test_same_state_routes_the_same_way() {
    let a = Harness::new();
    let b = Harness::new();

    for kind in RequestKind::ALL {
        let request = Request::new(kind, json!({"n": 1})).with_priority(Priority::High);
        let left = a.orchestrator.process_request(request.clone()).await.unwrap();
        let right = b.orchestrator.process_request(request).await.unwrap();
        assert_eq!(left.source, right.source, "{kind} routed differently");
    }
}

#[tokio::test]
async fn test_degraded_primary_metrics_send_traffic_to_secondary() {
    let h = Harness::new();
    h.edge.set_metrics(orchestrator_core::routing::RouteMetrics {
        average_latency_ms: 450.0,
        success_rate: 0.5,
        queue_size: 3,
    });
    h.orchestrator.start().await.unwrap();

    let response = h.orchestrator.process_request(market("AAPL")).await.unwrap();

    assert_eq!(response.source, ResponseSource::Secondary);
    assert_eq!(h.edge.call_count(), 0);
    h.orchestrator.shutdown().await;
}

// =============================================================================
// Failover
// =============================================================================

#[tokio::test]
async fn test_failover_to_secondary() {
    let h = Harness::new();
    h.edge.set_failing(true);

    let response = h.orchestrator.process_request(market("AAPL")).await.unwrap();

    assert_eq!(response.source, ResponseSource::Secondary);
    assert_eq!(response.data, json!({"backend": "pages"}));
    assert!(!response.was_cached);
    assert_eq!(h.edge.call_count(), 1);
    assert_eq!(h.pages.call_count(), 1);

    // The failover result is cached
    let again = h.orchestrator.process_request(market("AAPL")).await.unwrap();
    assert_eq!(again.source, ResponseSource::Cache);
    assert_eq!(again.data, json!({"backend": "pages"}));
}

#[tokio::test]
async fn test_failure_smoothing_moves_traffic() {
    let h = Harness::new();
    h.edge.set_failing(true);

    h.orchestrator.process_request(market("AAPL")).await.unwrap();
    let snapshot = h.orchestrator.metrics();
    let primary = &snapshot.backends[0];
    assert_eq!(primary.metrics.success_rate, 0.9);
    assert_eq!(primary.attempts, 1);
    assert_eq!(primary.failures, 1);
    assert_eq!(snapshot.failovers, 1);

    // Primary now misses the reliability threshold and loses outright
    let response = h.orchestrator.process_request(market("MSFT")).await.unwrap();
    assert_eq!(response.source, ResponseSource::Secondary);
    assert_eq!(h.edge.call_count(), 1);

    let snapshot = h.orchestrator.metrics();
    assert_eq!(snapshot.failovers, 1);
    assert_eq!(snapshot.backends[1].attempts, 2);
    assert_eq!(snapshot.backends[1].metrics.success_rate, 1.0);
}

#[tokio::test]
async fn test_stale_row_served_when_every_backend_fails() {
    let h = Harness::new();
    let fresh = h.orchestrator.process_request(market("AAPL")).await.unwrap();

    h.clock.advance(Duration::minutes(10));
    h.edge.set_failing(true);
    h.pages.set_failing(true);

    let response = h.orchestrator.process_request(market("AAPL")).await.unwrap();

    assert_eq!(response.source, ResponseSource::Cache);
    assert!(response.was_cached);
    assert_eq!(response.latency_ms, 0);
    assert_eq!(response.data, fresh.data);

    let snapshot = h.orchestrator.metrics();
    assert_eq!(snapshot.stale_serves, 1);
    assert_eq!(snapshot.cache_hits, 0);
    assert_eq!(snapshot.failures, 0);
}

#[tokio::test]
async fn test_all_routes_failed_reports_both_causes() {
    let h = Harness::new();
    h.edge.set_failing(true);
    h.pages.set_failing(true);

    let err = h
        .orchestrator
        .process_request(market("AAPL"))
        .await
        .unwrap_err();

    assert_eq!(err.primary, AdapterError::Unavailable("edge is down".to_string()));
    assert_eq!(err.secondary, AdapterError::Unavailable("pages is down".to_string()));
    assert!(err.to_string().contains("edge is down"));
    assert!(err.to_string().contains("pages is down"));

    let snapshot = h.orchestrator.metrics();
    assert_eq!(snapshot.failures, 1);
    assert_eq!(snapshot.averages.success_rate, 0.0);
}

#[tokio::test]
async fn test_failure_errors_are_ordered_by_slot_when_secondary_routed() {
    let h = Harness::new();
    h.edge.set_failing(true);
    h.pages.set_failing(true);

    // Portfolio favours the secondary, so it fails first
    let err = h
        .orchestrator
        .process_request(Request::new(RequestKind::Portfolio, json!({})))
        .await
        .unwrap_err();

    assert_eq!(h.pages.call_count(), 1);
    assert_eq!(h.edge.call_count(), 1);
    assert_eq!(err.primary, AdapterError::Unavailable("edge is down".to_string()));
    assert_eq!(err.secondary, AdapterError::Unavailable("pages is down".to_string()));
}

// =============================================================================
// Background Queue
// =============================================================================

#[tokio::test]
async fn test_queue_processes_by_priority() {
    let config = RouterConfig {
        queue: QueueConfig {
            capacity: 10,
            batch_size: 1,
            tick_ms: 5,
        },
        ..RouterConfig::default()
    };
    let h = Harness::with(config, MockAdapter::new("edge"));
    h.orchestrator.start().await.unwrap();

    let submissions: Vec<_> = [
        ("low", Priority::Low),
        ("normal", Priority::Normal),
        ("critical", Priority::Critical),
    ]
    .into_iter()
    .map(|(name, priority)| {
        h.orchestrator
            .submit(market(name).with_priority(priority))
            .unwrap()
    })
    .collect();
    assert_eq!(h.orchestrator.queue_depth(), 3);

    for submission in submissions {
        submission.wait().await.unwrap();
    }

    let order: Vec<Value> = h
        .edge
        .calls()
        .into_iter()
        .map(|call| call.payload["symbol"].clone())
        .collect();
    assert_eq!(order, vec![json!("critical"), json!("normal"), json!("low")]);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_rejects_and_shutdown_closes_pending() {
    let config = RouterConfig {
        queue: QueueConfig {
            capacity: 2,
            batch_size: 1,
            tick_ms: 60_000,
        },
        ..RouterConfig::default()
    };
    let h = Harness::with(config, MockAdapter::new("edge"));
    h.orchestrator.start().await.unwrap();

    // The worker task has not run yet on this single-threaded runtime
    let first = h.orchestrator.submit(market("A")).unwrap();
    let second = h.orchestrator.submit(market("B")).unwrap();
    let rejected = h.orchestrator.submit(market("C"));
    assert!(matches!(
        rejected,
        Err(OrchestratorError::QueueFull { capacity: 2 })
    ));
    assert_eq!(h.orchestrator.metrics().queue_depth, 2);

    h.orchestrator.shutdown().await;

    assert!(matches!(first.wait().await, Err(OrchestratorError::QueueClosed)));
    assert!(matches!(second.wait().await, Err(OrchestratorError::QueueClosed)));
    assert_eq!(h.edge.call_count(), 0);
    assert_eq!(h.orchestrator.queue_depth(), 0);
    assert!(matches!(
        h.orchestrator.submit(market("D")),
        Err(OrchestratorError::NotRunning)
    ));
}

#[tokio::test]
async fn test_orchestrator_restarts_after_shutdown() {
    let h = Harness::new();

    h.orchestrator.start().await.unwrap();
    h.orchestrator.shutdown().await;
    h.orchestrator.start().await.unwrap();

    let response = h
        .orchestrator
        .submit(market("AAPL"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(response.source, ResponseSource::Primary);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_zero_tick_is_rejected_before_the_worker_starts() {
    let config = RouterConfig {
        queue: QueueConfig {
            capacity: 10,
            batch_size: 5,
            tick_ms: 0,
        },
        ..RouterConfig::default()
    };
    let h = Harness::with(config, MockAdapter::new("edge"));

    let result = h.orchestrator.start().await;

    assert!(matches!(result, Err(OrchestratorError::InvalidConfig(_))));
    assert!(!h.orchestrator.is_running());
    assert!(h.store.get(ROUTING_CONFIG_KEY).await.unwrap().is_none());
    assert!(matches!(
        h.orchestrator.submit(market("AAPL")),
        Err(OrchestratorError::NotRunning)
    ));
    // Direct requests do not depend on the queue
    h.orchestrator.process_request(market("AAPL")).await.unwrap();
}

// =============================================================================
// Coalescing
// =============================================================================

async fn concurrent_identical_requests(coalesce: bool, n: usize) -> Harness {
    let config = RouterConfig {
        coalesce_requests: coalesce,
        ..RouterConfig::default()
    };
    let h = Harness::with(config, MockAdapter::held("edge"));

    let requests = join_all((0..n).map(|_| h.orchestrator.process_request(market("AAPL"))));
    let release = async {
        let expected = if coalesce { 1 } else { n };
        h.edge.wait_for_calls(expected).await;
        tokio::task::yield_now().await;
        h.edge.release();
    };
    let (responses, ()) = tokio::join!(requests, release);

    for response in responses {
        let response = response.unwrap();
        assert_eq!(response.source, ResponseSource::Primary);
        assert_eq!(response.data, json!({"backend": "edge"}));
    }
    h
}

#[tokio::test]
async fn test_coalescing_shares_one_backend_call() {
    let h = concurrent_identical_requests(true, 4).await;

    assert_eq!(h.edge.call_count(), 1);
    assert_eq!(h.orchestrator.metrics().total_requests, 4);
    assert_eq!(h.orchestrator.metrics().backends[0].attempts, 1);
}

#[tokio::test]
async fn test_coalesced_follower_reports_its_own_latency() {
    let config = RouterConfig {
        coalesce_requests: true,
        ..RouterConfig::default()
    };
    let h = Harness::with(config, MockAdapter::held("edge"));

    let owner = h.orchestrator.process_request(market("AAPL"));
    let follower = async {
        h.edge.wait_for_calls(1).await;
        // Let the owner's call age before the follower joins it
        let joined_at = std::time::Instant::now();
        while joined_at.elapsed() < std::time::Duration::from_millis(30) {
            tokio::task::yield_now().await;
        }

        let request = h.orchestrator.process_request(market("AAPL"));
        let release = async {
            tokio::task::yield_now().await;
            h.edge.release();
        };
        let (response, ()) = tokio::join!(request, release);
        response
    };
    let (owner, follower) = tokio::join!(owner, follower);

    let owner = owner.unwrap();
    let follower = follower.unwrap();
    assert_eq!(h.edge.call_count(), 1);
    assert!(owner.latency_ms >= 30);
    assert!(follower.latency_ms < owner.latency_ms);
    assert_eq!(follower.data, owner.data);
}

#[tokio::test]
async fn test_without_coalescing_each_request_calls_backend() {
    let h = concurrent_identical_requests(false, 4).await;

    assert_eq!(h.edge.call_count(), 4);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_cache_survives_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    {
        let store = Arc::new(FileStore::open(&path).await.unwrap());
        let orchestrator = Orchestrator::new(
            RouterConfig::default(),
            BackendPair::new(
                Arc::new(MockAdapter::new("edge")),
                Arc::new(MockAdapter::new("pages")),
            ),
            store,
        );
        orchestrator.start().await.unwrap();
        orchestrator.process_request(market("AAPL")).await.unwrap();
        orchestrator.shutdown().await;
    }

    let store = Arc::new(FileStore::open(&path).await.unwrap());
    assert!(store.get(ROUTING_CONFIG_KEY).await.unwrap().is_some());

    let edge = Arc::new(MockAdapter::new("edge"));
    let orchestrator = Orchestrator::new(
        RouterConfig::default(),
        BackendPair::new(edge.clone(), Arc::new(MockAdapter::new("pages"))),
        store,
    );
    let response = orchestrator.process_request(market("AAPL")).await.unwrap();

    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.data, json!({"backend": "edge"}));
    assert_eq!(edge.call_count(), 0);
}

// =============================================================================
// HTTP Adapters
// =============================================================================

#[tokio::test]
async fn test_http_failover_from_edge_to_pages() {
    let server = StubHttpServer::start().await.unwrap();

    let edge = EdgeWorkerAdapter::new(EdgeWorkerConfig {
        worker_endpoint: format!("{}/status/503", server.base_url()),
        ..EdgeWorkerConfig::default()
    })
    .unwrap();
    let pages = StaticPagesAdapter::new(StaticPagesConfig {
        cdn_endpoints: vec![format!("{}/cdn/", server.base_url())],
        ..StaticPagesConfig::default()
    })
    .unwrap();

    let orchestrator = Orchestrator::new(
        RouterConfig::default(),
        BackendPair::new(Arc::new(edge), Arc::new(pages)),
        Arc::new(MemoryStore::new()),
    );

    let response = orchestrator.process_request(market("AAPL")).await.unwrap();

    assert_eq!(response.source, ResponseSource::Secondary);
    assert_eq!(response.data, json!({"ok": true}));

    let seen = server.requests();
    let edge_call = &seen[0];
    assert!(edge_call
        .header("accept-encoding")
        .is_some_and(|accepted| accepted.contains("gzip")));
    assert_eq!(
        edge_call.header("cache-control").as_deref(),
        Some("max-age=300")
    );

    let methods: Vec<(String, String)> = seen.into_iter().map(|r| (r.method, r.path)).collect();
    assert_eq!(
        methods,
        vec![
            ("POST".to_string(), "/status/503/api/market/data".to_string()),
            ("HEAD".to_string(), "/cdn/data/market-data.json".to_string()),
            ("GET".to_string(), "/cdn/data/market-data.json".to_string()),
        ]
    );

    let exported = orchestrator.export_metrics();
    assert!(exported.contains("orchestrator_failovers_total 1"));
    assert!(exported
        .contains("backend_failures_total{slot=\"primary\",backend=\"edge-worker\"} 1"));
}
