//! Routing Policy
//!
//! Pure scoring of the two backend slots for a request.
//!
//! # Scoring
//!
//! ```text
//! base  = latency_ok * W_lat + reliable * W_rel + load_ok * W_load
//! total = (base + kind_bonus[kind][slot]) * priority_multiplier[priority]
//! ```
//!
//! Each indicator is 0 or 1: `latency_ok` when the smoothed latency is below
//! the threshold, `reliable` when the success rate is above it, `load_ok`
//! when the queue size is below it. The higher total wins and ties go to the
//! primary slot, so identical inputs always produce the same decision.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::{Priority, RequestKind, RoutingConfig};
use super::metrics::RouteMetrics;

// ============================================================================
// Backend Slots
// ============================================================================

/// Position of a backend in the router
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSlot {
    /// First-listed backend; wins ties
    Primary,
    /// Second backend
    Secondary,
}

impl BackendSlot {
    /// Both slots, primary first
    pub const ALL: [Self; 2] = [Self::Primary, Self::Secondary];

    /// The other slot
    #[must_use]
    pub fn alternate(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }

    /// Index into per-slot arrays
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }

    /// Stable lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for BackendSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Request
// ============================================================================

/// A typed request submitted to the orchestrator
///
/// Fields are only readable after construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id used in logs
    #[serde(default = "Uuid::new_v4", skip_serializing)]
    id: Uuid,

    kind: RequestKind,

    #[serde(default)]
    payload: serde_json::Value,

    #[serde(default)]
    priority: Priority,
}

impl Request {
    /// Create a normal-priority request
    pub fn new(kind: RequestKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            priority: Priority::default(),
        }
    }

    /// Set priority
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Correlation id
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request kind
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Opaque payload
    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Priority
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }
}

// ============================================================================
// Routing Decision
// ============================================================================

/// Breakdown of one slot's score
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RouteScore {
    /// Weighted indicator sum
    pub base: f64,
    /// Kind bonus for the slot
    pub bonus: f64,
    /// Priority multiplier
    pub multiplier: f64,
    /// `(base + bonus) * multiplier`
    pub total: f64,
}

/// Why a slot was chosen
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RoutingReason {
    /// The chosen slot scored strictly higher
    HigherScore,
    /// Scores were equal; primary wins ties
    Tie,
}

/// Routing decision for one request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoutingDecision {
    /// Chosen slot
    pub slot: BackendSlot,
    /// Why it was chosen
    pub reason: RoutingReason,
    /// Primary slot score
    pub primary_score: RouteScore,
    /// Secondary slot score
    pub secondary_score: RouteScore,
}

// ============================================================================
// Routing Policy
// ============================================================================

/// Deterministic scoring policy
#[derive(Clone, Debug)]
pub struct RoutingPolicy {
    config: RoutingConfig,
}

impl RoutingPolicy {
    /// Create a policy from validated configuration
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    /// Scoring configuration
    #[must_use]
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Weighted indicator sum for one backend's metrics
    #[must_use]
    pub fn base_score(&self, metrics: &RouteMetrics) -> f64 {
        let weights = self.config.weights();
        let thresholds = self.config.thresholds();

        let latency_ok = metrics.average_latency_ms < thresholds.latency_ms;
        let reliable = metrics.success_rate > thresholds.reliability;
        #[allow(clippy::cast_precision_loss)]
        let load_ok = (metrics.queue_size as f64) < thresholds.load;

        indicator(latency_ok) * weights.latency
            + indicator(reliable) * weights.reliability
            + indicator(load_ok) * weights.load
    }

    /// Full score for one slot
    #[must_use]
    pub fn score(
        &self,
        slot: BackendSlot,
        metrics: &RouteMetrics,
        kind: RequestKind,
        priority: Priority,
    ) -> RouteScore {
        let base = self.base_score(metrics);
        let bonus = self.config.kind_bonus(kind, slot);
        let multiplier = self.config.priority_multiplier(priority);

        RouteScore {
            base,
            bonus,
            multiplier,
            total: (base + bonus) * multiplier,
        }
    }

    /// Choose a slot given both backends' metrics
    #[must_use]
    pub fn decide(
        &self,
        kind: RequestKind,
        priority: Priority,
        primary: &RouteMetrics,
        secondary: &RouteMetrics,
    ) -> RoutingDecision {
        let primary_score = self.score(BackendSlot::Primary, primary, kind, priority);
        let secondary_score = self.score(BackendSlot::Secondary, secondary, kind, priority);

        #[allow(clippy::float_cmp)]
        let (slot, reason) = if primary_score.total == secondary_score.total {
            (BackendSlot::Primary, RoutingReason::Tie)
        } else if primary_score.total > secondary_score.total {
            (BackendSlot::Primary, RoutingReason::HigherScore)
        } else {
            (BackendSlot::Secondary, RoutingReason::HigherScore)
        };

        RoutingDecision {
            slot,
            reason,
            primary_score,
            secondary_score,
        }
    }
}

fn indicator(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}
