//! Failover
//!
//! Recovery path taken when the routed backend fails.
//!
//! ```text
//! routed backend fails
//!         |
//!         v
//! alternate backend (once, no retry of the routed one)
//!         |  fails
//!         v
//! stale cache row (TTL ignored)
//!         |  missing
//!         v
//! AllRoutesFailed { primary, secondary }
//! ```

use std::time::Instant;

use thiserror::Error;

use super::backends::AdapterError;
use super::policy::{BackendSlot, Request};
use super::router::{elapsed_ms, Response, ResponseSource, RouterCore};

/// Both backends failed and no cache row could stand in
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("all routes failed (primary: {primary}; secondary: {secondary})")]
pub struct AllRoutesFailed {
    /// Error from the primary backend
    pub primary: AdapterError,
    /// Error from the secondary backend
    pub secondary: AdapterError,
}

impl AllRoutesFailed {
    /// Error from one slot
    #[must_use]
    pub fn error_for(&self, slot: BackendSlot) -> &AdapterError {
        match slot {
            BackendSlot::Primary => &self.primary,
            BackendSlot::Secondary => &self.secondary,
        }
    }
}

/// Runs the failover sequence for one request
pub(super) struct FailoverController<'a> {
    core: &'a RouterCore,
}

impl<'a> FailoverController<'a> {
    pub(super) fn new(core: &'a RouterCore) -> Self {
        Self { core }
    }

    /// Recover from a failure of `failed_slot`
    pub(super) async fn recover(
        &self,
        request: &Request,
        key: &str,
        failed_slot: BackendSlot,
        error: AdapterError,
        started: Instant,
    ) -> Result<Response, AllRoutesFailed> {
        let alternate = failed_slot.alternate();
        self.core.metrics.record_failover();
        tracing::info!(
            request_id = %request.id(),
            from = %failed_slot,
            to = %alternate,
            "Failing over to alternate backend"
        );

        let alternate_error = match self.core.attempt(alternate, request).await {
            Ok(data) => {
                self.core.remember(key, request, &data).await;
                return Ok(Response {
                    data,
                    source: ResponseSource::from(alternate),
                    latency_ms: elapsed_ms(started),
                    was_cached: false,
                });
            }
            Err(e) => e,
        };

        if let Some(entry) = self.core.cache.get(key, true).await {
            tracing::warn!(
                request_id = %request.id(),
                key = %key,
                written_at = %entry.written_at,
                "Both backends failed, serving stale cache row"
            );
            return Ok(Response {
                data: entry.data,
                source: ResponseSource::Cache,
                latency_ms: 0,
                was_cached: true,
            });
        }

        let (primary, secondary) = match failed_slot {
            BackendSlot::Primary => (error, alternate_error),
            BackendSlot::Secondary => (alternate_error, error),
        };
        Err(AllRoutesFailed { primary, secondary })
    }
}
