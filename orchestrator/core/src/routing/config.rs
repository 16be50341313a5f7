//! Routing Configuration
//!
//! Request classification, scoring weights, per-kind tables and queue limits.
//! Everything here is built once at startup through a validating constructor
//! and never mutated afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::policy::BackendSlot;
use crate::config::ConfigError;

// ============================================================================
// Request Classification
// ============================================================================

/// Kind of request, used for endpoint selection, bonuses and cache TTLs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Order execution and other latency-sensitive calls
    Trading,
    /// Generated analysis
    Analysis,
    /// Market data snapshots
    Market,
    /// Portfolio status (mostly static)
    Portfolio,
}

impl RequestKind {
    /// All kinds in table order
    pub const ALL: [Self; 4] = [Self::Trading, Self::Analysis, Self::Market, Self::Portfolio];

    /// Stable lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trading => "trading",
            Self::Analysis => "analysis",
            Self::Market => "market",
            Self::Portfolio => "portfolio",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                what: "request kind",
                value: s.to_string(),
            })
    }
}

/// Caller-assigned urgency
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work
    Low,
    /// Default
    #[default]
    Normal,
    /// User is waiting
    High,
    /// Must be served as fast as possible
    Critical,
}

impl Priority {
    /// All priorities, lowest first
    pub const ALL: [Self; 4] = [Self::Low, Self::Normal, Self::High, Self::Critical];

    /// Stable lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                what: "priority",
                value: s.to_string(),
            })
    }
}

/// Parse failure for [`RequestKind`] or [`Priority`]
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown {what}: {value:?}")]
pub struct UnknownVariant {
    what: &'static str,
    value: String,
}

// ============================================================================
// Per-Kind Tables
// ============================================================================

/// One value per [`RequestKind`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KindTable<T> {
    /// Value for trading requests
    pub trading: T,
    /// Value for analysis requests
    pub analysis: T,
    /// Value for market requests
    pub market: T,
    /// Value for portfolio requests
    pub portfolio: T,
}

impl<T> KindTable<T> {
    /// Look up the value for `kind`
    #[must_use]
    pub fn get(&self, kind: RequestKind) -> &T {
        match kind {
            RequestKind::Trading => &self.trading,
            RequestKind::Analysis => &self.analysis,
            RequestKind::Market => &self.market,
            RequestKind::Portfolio => &self.portfolio,
        }
    }

    /// Mutable lookup, used while assembling configuration
    pub fn get_mut(&mut self, kind: RequestKind) -> &mut T {
        match kind {
            RequestKind::Trading => &mut self.trading,
            RequestKind::Analysis => &mut self.analysis,
            RequestKind::Market => &mut self.market,
            RequestKind::Portfolio => &mut self.portfolio,
        }
    }

    /// Iterate in table order
    pub fn iter(&self) -> impl Iterator<Item = (RequestKind, &T)> {
        RequestKind::ALL.into_iter().map(move |k| (k, self.get(k)))
    }
}

/// Per-kind score bonus for each backend slot
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KindBonus {
    /// Bonus added to the primary backend's score
    pub primary: f64,
    /// Bonus added to the secondary backend's score
    pub secondary: f64,
}

impl KindBonus {
    /// Bonus for a slot
    #[must_use]
    pub fn for_slot(&self, slot: BackendSlot) -> f64 {
        match slot {
            BackendSlot::Primary => self.primary,
            BackendSlot::Secondary => self.secondary,
        }
    }
}

impl Default for KindTable<KindBonus> {
    fn default() -> Self {
        // The edge worker is favoured for real-time kinds, static pages for
        // portfolio data that rarely changes.
        Self {
            trading: KindBonus {
                primary: 0.3,
                secondary: 0.1,
            },
            analysis: KindBonus {
                primary: 0.2,
                secondary: 0.2,
            },
            market: KindBonus {
                primary: 0.2,
                secondary: 0.1,
            },
            portfolio: KindBonus {
                primary: 0.1,
                secondary: 0.3,
            },
        }
    }
}

/// Score multiplier per [`Priority`]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriorityMultipliers {
    /// Multiplier for low priority
    pub low: f64,
    /// Multiplier for normal priority
    pub normal: f64,
    /// Multiplier for high priority
    pub high: f64,
    /// Multiplier for critical priority
    pub critical: f64,
}

impl PriorityMultipliers {
    /// Multiplier for `priority`
    #[must_use]
    pub fn get(&self, priority: Priority) -> f64 {
        match priority {
            Priority::Low => self.low,
            Priority::Normal => self.normal,
            Priority::High => self.high,
            Priority::Critical => self.critical,
        }
    }

    /// Mutable lookup, used while assembling configuration
    pub fn get_mut(&mut self, priority: Priority) -> &mut f64 {
        match priority {
            Priority::Low => &mut self.low,
            Priority::Normal => &mut self.normal,
            Priority::High => &mut self.high,
            Priority::Critical => &mut self.critical,
        }
    }
}

impl Default for PriorityMultipliers {
    fn default() -> Self {
        Self {
            low: 0.8,
            normal: 1.0,
            high: 1.2,
            critical: 1.5,
        }
    }
}

// ============================================================================
// Scoring Configuration
// ============================================================================

/// Weights applied to each threshold indicator
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingWeights {
    /// Weight of the latency indicator
    pub latency: f64,
    /// Weight of the reliability indicator
    pub reliability: f64,
    /// Weight of the load indicator
    pub load: f64,
}

impl Default for RoutingWeights {
    fn default() -> Self {
        Self {
            latency: 0.4,
            reliability: 0.3,
            load: 0.1,
        }
    }
}

/// Thresholds a backend's metrics must beat to earn each indicator
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingThresholds {
    /// Average latency must be strictly below this (ms)
    pub latency_ms: f64,
    /// Success rate must be strictly above this
    pub reliability: f64,
    /// Queue size must be strictly below this
    pub load: f64,
}

impl Default for RoutingThresholds {
    fn default() -> Self {
        Self {
            latency_ms: 200.0,
            reliability: 0.95,
            load: 0.8,
        }
    }
}

/// Validated, immutable scoring configuration
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoutingConfig {
    weights: RoutingWeights,
    thresholds: RoutingThresholds,
    kind_bonus: KindTable<KindBonus>,
    priority_multipliers: PriorityMultipliers,
}

impl RoutingConfig {
    /// Build a routing configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if a weight or bonus is negative
    /// or not finite, a multiplier is not positive, or a threshold is out of
    /// range.
    pub fn new(
        weights: RoutingWeights,
        thresholds: RoutingThresholds,
        kind_bonus: KindTable<KindBonus>,
        priority_multipliers: PriorityMultipliers,
    ) -> Result<Self, ConfigError> {
        for (name, value) in [
            ("latency_weight", weights.latency),
            ("reliability_weight", weights.reliability),
            ("load_weight", weights.load),
        ] {
            non_negative(name, value)?;
        }

        if !(thresholds.latency_ms.is_finite() && thresholds.latency_ms > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "latency_threshold_ms must be positive, got {}",
                thresholds.latency_ms
            )));
        }
        if !(0.0..=1.0).contains(&thresholds.reliability) {
            return Err(ConfigError::ValidationError(format!(
                "reliability_threshold must be within [0, 1], got {}",
                thresholds.reliability
            )));
        }
        non_negative("load_threshold", thresholds.load)?;

        for (kind, bonus) in kind_bonus.iter() {
            non_negative(&format!("kind_bonus.{kind}.primary"), bonus.primary)?;
            non_negative(&format!("kind_bonus.{kind}.secondary"), bonus.secondary)?;
        }

        for priority in Priority::ALL {
            let multiplier = priority_multipliers.get(priority);
            if !(multiplier.is_finite() && multiplier > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "priority_multiplier.{priority} must be positive, got {multiplier}"
                )));
            }
        }

        Ok(Self {
            weights,
            thresholds,
            kind_bonus,
            priority_multipliers,
        })
    }

    /// Indicator weights
    #[must_use]
    pub fn weights(&self) -> &RoutingWeights {
        &self.weights
    }

    /// Indicator thresholds
    #[must_use]
    pub fn thresholds(&self) -> &RoutingThresholds {
        &self.thresholds
    }

    /// Bonus for a kind/slot pair
    #[must_use]
    pub fn kind_bonus(&self, kind: RequestKind, slot: BackendSlot) -> f64 {
        self.kind_bonus.get(kind).for_slot(slot)
    }

    /// Full bonus table
    #[must_use]
    pub fn kind_bonus_table(&self) -> &KindTable<KindBonus> {
        &self.kind_bonus
    }

    /// Multiplier for a priority
    #[must_use]
    pub fn priority_multiplier(&self, priority: Priority) -> f64 {
        self.priority_multipliers.get(priority)
    }

    /// Full multiplier table
    #[must_use]
    pub fn priority_multipliers(&self) -> &PriorityMultipliers {
        &self.priority_multipliers
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            weights: RoutingWeights::default(),
            thresholds: RoutingThresholds::default(),
            kind_bonus: KindTable::default(),
            priority_multipliers: PriorityMultipliers::default(),
        }
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{name} must be a non-negative number, got {value}"
        )))
    }
}

// ============================================================================
// Cache Policy
// ============================================================================

/// How long responses of one kind stay fresh, and the priority they carry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRule {
    /// Time-to-live in seconds
    pub ttl_seconds: u64,
    /// Priority recorded on the cache entry
    pub priority: Priority,
}

/// Per-kind cache rules
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    rules: KindTable<CacheRule>,
}

impl CachePolicy {
    /// Build a cache policy
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any TTL is zero.
    pub fn new(rules: KindTable<CacheRule>) -> Result<Self, ConfigError> {
        for (kind, rule) in rules.iter() {
            if rule.ttl_seconds == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "cache ttl for {kind} must be at least one second"
                )));
            }
        }
        Ok(Self { rules })
    }

    /// Rule for `kind`
    #[must_use]
    pub fn rule_for(&self, kind: RequestKind) -> CacheRule {
        *self.rules.get(kind)
    }

    /// All rules
    #[must_use]
    pub fn rules(&self) -> &KindTable<CacheRule> {
        &self.rules
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            rules: KindTable {
                trading: CacheRule { ttl_seconds: 30, priority: Priority::High },
                analysis: CacheRule { ttl_seconds: 300, priority: Priority::Normal },
                market: CacheRule { ttl_seconds: 60, priority: Priority::Normal },
                portfolio: CacheRule { ttl_seconds: 600, priority: Priority::Low },
            },
        }
    }
}

// ============================================================================
// Background Queue
// ============================================================================

/// Background queue limits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum pending submissions
    pub capacity: usize,
    /// Submissions processed per tick
    pub batch_size: usize,
    /// Drain interval in milliseconds
    pub tick_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            batch_size: 5,
            tick_ms: 100,
        }
    }
}

impl QueueConfig {
    /// Check limits
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 || self.batch_size == 0 || self.tick_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "queue capacity, batch_size and tick_ms must be non-zero (got {}, {}, {})",
                self.capacity, self.batch_size, self.tick_ms
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Full Router Configuration
// ============================================================================

/// Complete router configuration
#[derive(Clone, Debug, Default)]
pub struct RouterConfig {
    /// Scoring configuration
    pub routing: RoutingConfig,

    /// Per-kind cache rules
    pub cache: CachePolicy,

    /// Background queue limits
    pub queue: QueueConfig,

    /// Share one backend call between concurrent requests with the same key
    pub coalesce_requests: bool,
}
