//! Dual-Backend Request Routing
//!
//! Routes typed requests to one of two interchangeable backends, with a TTL
//! cache in front and a failover path behind.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |   Orchestrator   |  <-- Entry point: process_request / submit
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! |     TtlCache     |  <-- Fresh rows short-circuit everything below
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! |  RoutingPolicy   |  <-- Scores both slots from MetricsAggregator
//! +--------+---------+
//!          |
//!     +----+----+
//!     |         |
//!     v         v
//! +-------+ +-------+
//! | Edge  | | Pages |  <-- BackendAdapter implementations
//! +-------+ +-------+
//!          |
//!          v  (on failure)
//! +------------------+
//! |    Failover      |  <-- Alternate slot, then stale cache
//! +------------------+
//! ```
//!
//! # Design Principles
//!
//! 1. **Deterministic routing**: identical metrics and config give identical choices
//! 2. **Graceful degradation**: one failover hop, then stale data, then an error
//! 3. **Explicit construction**: no process-wide state; share an `Orchestrator` by cloning

pub mod backends;
pub mod config;
pub mod fallback;
pub mod metrics;
pub mod policy;
pub mod router;
pub mod test_utils;

pub use backends::{
    AdapterError, BackendAdapter, BackendPair, EdgeWorkerAdapter, EdgeWorkerConfig,
    StaticPagesAdapter, StaticPagesConfig,
};
pub use config::*;
pub use fallback::AllRoutesFailed;
pub use metrics::{AggregateMetricsSnapshot, BackendSnapshot, GlobalAverages, RouteMetrics};
pub use policy::{BackendSlot, Request, RouteScore, RoutingDecision, RoutingPolicy, RoutingReason};
pub use router::*;
