//! Orchestrator Core - Dual-Backend Request Routing
//!
//! This crate routes application requests to one of two interchangeable data
//! backends, a low-latency edge worker and a static pages site served through
//! CDN mirrors. Every request is scored against live per-backend metrics,
//! answered from a persistent TTL cache when possible, and failed over to the
//! other backend (or a stale cache row) when the chosen one errors.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Callers                                 │
//! │     process_request (direct)        submit (background queue)    │
//! └───────────────┬─────────────────────────────────┬────────────────┘
//!                 │                                 │
//! ┌───────────────┴─────────────────────────────────┴────────────────┐
//! │                        ORCHESTRATOR                              │
//! │  ┌──────────┐  ┌──────────────┐  ┌──────────┐  ┌──────────────┐  │
//! │  │ TtlCache │  │ RoutingPolicy│  │ Failover │  │   Metrics    │  │
//! │  │ (store)  │  │  (scoring)   │  │Controller│  │  Aggregator  │  │
//! │  └──────────┘  └──────────────┘  └──────────┘  └──────────────┘  │
//! └───────────────┬─────────────────────────────────┬────────────────┘
//!                 │                                 │
//!        ┌────────┴────────┐               ┌────────┴────────┐
//!        │  Edge worker    │               │  Static pages   │
//!        │  (primary)      │               │  (secondary)    │
//!        └─────────────────┘               └─────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Orchestrator`]: Entry point that owns the cache, metrics and queue
//! - [`Request`] / [`Response`]: What callers send and receive
//! - [`BackendAdapter`]: The seam each backend implements
//! - [`KeyValueStore`]: Persistence for cache rows and the routing config
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use orchestrator_core::{
//!     BackendPair, EdgeWorkerAdapter, MemoryStore, Orchestrator, Request, RequestKind,
//!     StaticPagesAdapter, load_config,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     // Blocking file read, so load before entering the runtime
//!     let config = load_config()?;
//!     tokio::runtime::Runtime::new()?.block_on(run(config))
//! }
//!
//! async fn run(config: orchestrator_core::OrchestratorConfig) -> anyhow::Result<()> {
//!     let backends = BackendPair::new(
//!         Arc::new(EdgeWorkerAdapter::new(config.edge.clone())?),
//!         Arc::new(StaticPagesAdapter::new(config.pages.clone())?),
//!     );
//!     let orchestrator = Orchestrator::new(config.router, backends, Arc::new(MemoryStore::new()));
//!     orchestrator.start().await?;
//!
//!     let response = orchestrator
//!         .process_request(Request::new(RequestKind::Market, serde_json::json!({"symbol": "AAPL"})))
//!         .await?;
//!     println!("{} from {:?}", response.data, response.source);
//!
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`cache`]: Cache keys and the TTL cache over the store
//! - [`clock`]: Wall-clock abstraction for freshness checks
//! - [`config`]: TOML/env/CLI configuration loading
//! - [`routing`]: Scoring, backends, failover, metrics and the orchestrator
//! - [`store`]: Key-value persistence (memory and JSON file)

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod routing;
pub mod store;

// Re-exports for convenience
pub use cache::{cache_key, CacheEntry, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{default_store_path, FileStore, KeyValueStore, MemoryStore, StoreError};

// Routing exports
pub use routing::{
    AdapterError, AggregateMetricsSnapshot, AllRoutesFailed, BackendAdapter, BackendPair,
    BackendSlot, EdgeWorkerAdapter, EdgeWorkerConfig, Orchestrator, OrchestratorError, Priority,
    Request, RequestKind, Response, ResponseSource, RouterConfig, RoutingDecision,
    StaticPagesAdapter, StaticPagesConfig, Submission,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_overrides,
    ConfigError, ConfigOverrides, ConfigSource, OrchestratorConfig, OrchestratorToml,
};
