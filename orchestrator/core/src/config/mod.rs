//! TOML Configuration File Support
//!
//! Configuration for the orchestrator and its two backends, loaded from a TOML
//! file at `~/.config/edge-orchestrator/orchestrator.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`ORCHESTRATOR_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! Values from every layer are gathered first and validated once, producing
//! an immutable [`OrchestratorConfig`].
//!
//! # Example Configuration
//!
//! ```toml
//! [routing]
//! latency_weight = 0.4
//! reliability_weight = 0.3
//! load_weight = 0.1
//! latency_threshold_ms = 200
//! coalesce_requests = false
//!
//! [routing.kind_bonus.trading]
//! primary = 0.3
//! secondary = 0.1
//!
//! [routing.priority_multiplier]
//! critical = 1.5
//!
//! [cache.ttl_seconds]
//! market = 90
//!
//! [queue]
//! capacity = 100
//! batch_size = 5
//! tick_ms = 100
//!
//! [edge]
//! worker_endpoint = "https://worker.example.dev"
//!
//! [pages]
//! repository = "octo/market-assets"
//! branch = "gh-pages"
//!
//! [store]
//! path = "/var/lib/edge-orchestrator/store.json"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::{
    CachePolicy, CacheRule, EdgeWorkerConfig, KindBonus, KindTable, Priority,
    PriorityMultipliers, QueueConfig, RequestKind, RouterConfig, RoutingConfig,
    RoutingThresholds, RoutingWeights, StaticPagesConfig,
};
use crate::store::default_store_path;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Per-slot bonus entry in `[routing.kind_bonus.<kind>]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KindBonusToml {
    /// Bonus for the primary (edge) backend
    pub primary: Option<f64>,
    /// Bonus for the secondary (pages) backend
    pub secondary: Option<f64>,
}

/// Routing section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingToml {
    /// Weight of the latency indicator
    pub latency_weight: Option<f64>,

    /// Weight of the reliability indicator
    pub reliability_weight: Option<f64>,

    /// Weight of the load indicator
    pub load_weight: Option<f64>,

    /// Latency must be below this to earn the latency weight (ms)
    pub latency_threshold_ms: Option<f64>,

    /// Success rate must be above this to earn the reliability weight
    pub reliability_threshold: Option<f64>,

    /// Queue size must be below this to earn the load weight
    pub load_threshold: Option<f64>,

    /// Share backend calls between concurrent identical requests
    pub coalesce_requests: Option<bool>,

    /// Per-kind bonus, keyed by kind name
    pub kind_bonus: BTreeMap<String, KindBonusToml>,

    /// Per-priority multiplier, keyed by priority name
    pub priority_multiplier: BTreeMap<String, f64>,
}

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// TTL per kind name
    pub ttl_seconds: BTreeMap<String, u64>,

    /// Entry priority per kind name
    pub priority: BTreeMap<String, Priority>,
}

/// Queue section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueToml {
    /// Maximum pending submissions
    pub capacity: Option<usize>,

    /// Submissions processed per tick
    pub batch_size: Option<usize>,

    /// Drain interval in milliseconds
    pub tick_ms: Option<u64>,
}

/// Edge worker section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeToml {
    /// Worker base URL
    pub worker_endpoint: Option<String>,

    /// Cache tag header value
    pub cache_tag: Option<String>,

    /// Per-call timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// Static pages section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PagesToml {
    /// Repository in `owner/name` form
    pub repository: Option<String>,

    /// Published branch
    pub branch: Option<String>,

    /// CDN base URLs; derived from repository and branch when omitted
    pub cdn_endpoints: Option<Vec<String>>,

    /// Per-call timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// Store section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreToml {
    /// Location of the JSON store file
    pub path: Option<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorToml {
    /// Routing configuration section
    pub routing: RoutingToml,

    /// Cache configuration section
    pub cache: CacheToml,

    /// Queue configuration section
    pub queue: QueueToml,

    /// Edge worker configuration section
    pub edge: EdgeToml,

    /// Static pages configuration section
    pub pages: PagesToml,

    /// Store configuration section
    pub store: StoreToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Validated configuration for the orchestrator and its backends
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Routing, cache and queue settings
    pub router: RouterConfig,

    /// Primary backend settings
    pub edge: EdgeWorkerConfig,

    /// Secondary backend settings
    pub pages: StaticPagesConfig,

    /// Store file location (`None` when no data directory is known)
    pub store_path: Option<PathBuf>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            edge: EdgeWorkerConfig::default(),
            pages: StaticPagesConfig::default(),
            store_path: default_store_path(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl OrchestratorConfig {
    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Render the effective configuration as TOML
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented in TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&OrchestratorToml::from(self))
    }
}

impl From<&OrchestratorConfig> for OrchestratorToml {
    fn from(config: &OrchestratorConfig) -> Self {
        let routing = &config.router.routing;
        let weights = routing.weights();
        let thresholds = routing.thresholds();

        Self {
            routing: RoutingToml {
                latency_weight: Some(weights.latency),
                reliability_weight: Some(weights.reliability),
                load_weight: Some(weights.load),
                latency_threshold_ms: Some(thresholds.latency_ms),
                reliability_threshold: Some(thresholds.reliability),
                load_threshold: Some(thresholds.load),
                coalesce_requests: Some(config.router.coalesce_requests),
                kind_bonus: routing
                    .kind_bonus_table()
                    .iter()
                    .map(|(kind, bonus)| {
                        (
                            kind.to_string(),
                            KindBonusToml {
                                primary: Some(bonus.primary),
                                secondary: Some(bonus.secondary),
                            },
                        )
                    })
                    .collect(),
                priority_multiplier: Priority::ALL
                    .into_iter()
                    .map(|p| (p.to_string(), routing.priority_multiplier(p)))
                    .collect(),
            },
            cache: CacheToml {
                ttl_seconds: config
                    .router
                    .cache
                    .rules()
                    .iter()
                    .map(|(kind, rule)| (kind.to_string(), rule.ttl_seconds))
                    .collect(),
                priority: config
                    .router
                    .cache
                    .rules()
                    .iter()
                    .map(|(kind, rule)| (kind.to_string(), rule.priority))
                    .collect(),
            },
            queue: QueueToml {
                capacity: Some(config.router.queue.capacity),
                batch_size: Some(config.router.queue.batch_size),
                tick_ms: Some(config.router.queue.tick_ms),
            },
            edge: EdgeToml {
                worker_endpoint: Some(config.edge.worker_endpoint.clone()),
                cache_tag: Some(config.edge.cache_tag.clone()),
                request_timeout_ms: Some(config.edge.request_timeout_ms),
            },
            pages: PagesToml {
                repository: Some(config.pages.repository.clone()),
                branch: Some(config.pages.branch.clone()),
                cdn_endpoints: Some(config.pages.cdn_endpoints.clone()),
                request_timeout_ms: Some(config.pages.request_timeout_ms),
            },
            store: StoreToml {
                path: config.store_path.clone(),
            },
        }
    }
}

// =============================================================================
// Draft (unvalidated values from all layers)
// =============================================================================

struct ConfigDraft {
    weights: RoutingWeights,
    thresholds: RoutingThresholds,
    kind_bonus: KindTable<KindBonus>,
    multipliers: PriorityMultipliers,
    cache_rules: KindTable<CacheRule>,
    queue: QueueConfig,
    coalesce_requests: bool,
    edge: EdgeWorkerConfig,
    pages_repository: String,
    pages_branch: String,
    cdn_endpoints: Option<Vec<String>>,
    pages_timeout_ms: u64,
    store_path: Option<PathBuf>,
    config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for ConfigDraft {
    fn default() -> Self {
        let routing = RoutingConfig::default();
        let pages = StaticPagesConfig::default();
        Self {
            weights: *routing.weights(),
            thresholds: *routing.thresholds(),
            kind_bonus: routing.kind_bonus_table().clone(),
            multipliers: *routing.priority_multipliers(),
            cache_rules: CachePolicy::default().rules().clone(),
            queue: QueueConfig::default(),
            coalesce_requests: false,
            edge: EdgeWorkerConfig::default(),
            pages_repository: pages.repository,
            pages_branch: pages.branch,
            cdn_endpoints: None,
            pages_timeout_ms: pages.request_timeout_ms,
            store_path: default_store_path(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ConfigDraft {
    fn validate(self) -> Result<OrchestratorConfig, ConfigError> {
        let routing =
            RoutingConfig::new(self.weights, self.thresholds, self.kind_bonus, self.multipliers)?;
        let cache = CachePolicy::new(self.cache_rules)?;
        self.queue.validate()?;

        let endpoint = &self.edge.worker_endpoint;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "edge.worker_endpoint must be an http(s) URL, got {endpoint:?}"
            )));
        }
        if self.edge.request_timeout_ms == 0 || self.pages_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_ms must be non-zero".to_string(),
            ));
        }
        let valid_repository = self
            .pages_repository
            .split_once('/')
            .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty());
        if !valid_repository {
            return Err(ConfigError::ValidationError(format!(
                "pages.repository must be in owner/name form, got {:?}",
                self.pages_repository
            )));
        }

        let cdn_endpoints = self.cdn_endpoints.unwrap_or_else(|| {
            StaticPagesConfig::default_cdn_endpoints(&self.pages_repository, &self.pages_branch)
        });

        Ok(OrchestratorConfig {
            router: RouterConfig {
                routing,
                cache,
                queue: self.queue,
                coalesce_requests: self.coalesce_requests,
            },
            edge: self.edge,
            pages: StaticPagesConfig {
                repository: self.pages_repository,
                branch: self.pages_branch,
                cdn_endpoints,
                request_timeout_ms: self.pages_timeout_ms,
            },
            store_path: self.store_path,
            config_file_path: self.config_file_path,
            source: self.source,
        })
    }
}

fn parse_kind(section: &str, name: &str) -> Result<RequestKind, ConfigError> {
    RequestKind::from_str(name)
        .map_err(|e| ConfigError::ValidationError(format!("{section}: {e}")))
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/edge-orchestrator/orchestrator.toml` or
/// `~/.config/edge-orchestrator/orchestrator.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("edge-orchestrator").join("orchestrator.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// combined values fail validation. A missing config file is not an error.
pub fn load_config() -> Result<OrchestratorConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then apply the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// the combined values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<OrchestratorConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with CLI overrides applied last
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_overrides(
    path: Option<PathBuf>,
    overrides: &ConfigOverrides,
) -> Result<OrchestratorConfig, ConfigError> {
    let mut config = load_config_from_path(path)?;
    overrides.apply(&mut config)?;
    Ok(config)
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(
    path: Option<PathBuf>,
    env: F,
) -> Result<OrchestratorConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut draft = ConfigDraft::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: OrchestratorToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut draft, &toml_config)?;
            draft.config_file_path = Some(config_path.clone());
            draft.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut draft, env);

    draft.validate()
}

/// Apply TOML configuration values to the draft
fn apply_toml_config(draft: &mut ConfigDraft, toml: &OrchestratorToml) -> Result<(), ConfigError> {
    // Routing settings
    let routing = &toml.routing;
    if let Some(w) = routing.latency_weight {
        draft.weights.latency = w;
    }
    if let Some(w) = routing.reliability_weight {
        draft.weights.reliability = w;
    }
    if let Some(w) = routing.load_weight {
        draft.weights.load = w;
    }
    if let Some(t) = routing.latency_threshold_ms {
        draft.thresholds.latency_ms = t;
    }
    if let Some(t) = routing.reliability_threshold {
        draft.thresholds.reliability = t;
    }
    if let Some(t) = routing.load_threshold {
        draft.thresholds.load = t;
    }
    if let Some(coalesce) = routing.coalesce_requests {
        draft.coalesce_requests = coalesce;
    }
    for (name, bonus) in &routing.kind_bonus {
        let entry = draft
            .kind_bonus
            .get_mut(parse_kind("routing.kind_bonus", name)?);
        if let Some(primary) = bonus.primary {
            entry.primary = primary;
        }
        if let Some(secondary) = bonus.secondary {
            entry.secondary = secondary;
        }
    }
    for (name, multiplier) in &routing.priority_multiplier {
        let priority = Priority::from_str(name).map_err(|e| {
            ConfigError::ValidationError(format!("routing.priority_multiplier: {e}"))
        })?;
        *draft.multipliers.get_mut(priority) = *multiplier;
    }

    // Cache settings
    for (name, ttl) in &toml.cache.ttl_seconds {
        draft
            .cache_rules
            .get_mut(parse_kind("cache.ttl_seconds", name)?)
            .ttl_seconds = *ttl;
    }
    for (name, priority) in &toml.cache.priority {
        draft
            .cache_rules
            .get_mut(parse_kind("cache.priority", name)?)
            .priority = *priority;
    }

    // Queue settings
    if let Some(capacity) = toml.queue.capacity {
        draft.queue.capacity = capacity;
    }
    if let Some(batch) = toml.queue.batch_size {
        draft.queue.batch_size = batch;
    }
    if let Some(tick) = toml.queue.tick_ms {
        draft.queue.tick_ms = tick;
    }

    // Backend settings
    if let Some(endpoint) = &toml.edge.worker_endpoint {
        draft.edge.worker_endpoint.clone_from(endpoint);
    }
    if let Some(tag) = &toml.edge.cache_tag {
        draft.edge.cache_tag.clone_from(tag);
    }
    if let Some(timeout) = toml.edge.request_timeout_ms {
        draft.edge.request_timeout_ms = timeout;
    }
    if let Some(repository) = &toml.pages.repository {
        draft.pages_repository.clone_from(repository);
    }
    if let Some(branch) = &toml.pages.branch {
        draft.pages_branch.clone_from(branch);
    }
    if toml.pages.cdn_endpoints.is_some() {
        draft.cdn_endpoints.clone_from(&toml.pages.cdn_endpoints);
    }
    if let Some(timeout) = toml.pages.request_timeout_ms {
        draft.pages_timeout_ms = timeout;
    }

    // Store settings
    if toml.store.path.is_some() {
        draft.store_path.clone_from(&toml.store.path);
    }

    Ok(())
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Option<T> {
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(var = name, value = %value, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Apply environment variable overrides to the draft
fn apply_env_config<F>(draft: &mut ConfigDraft, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut touched = false;

    // Backend settings from environment
    if let Some(endpoint) = env("ORCHESTRATOR_EDGE_ENDPOINT") {
        draft.edge.worker_endpoint = endpoint;
        touched = true;
    }
    if let Some(tag) = env("ORCHESTRATOR_EDGE_CACHE_TAG") {
        draft.edge.cache_tag = tag;
        touched = true;
    }
    if let Some(repository) = env("ORCHESTRATOR_PAGES_REPOSITORY") {
        draft.pages_repository = repository;
        touched = true;
    }
    if let Some(branch) = env("ORCHESTRATOR_PAGES_BRANCH") {
        draft.pages_branch = branch;
        touched = true;
    }
    if let Some(raw) = env("ORCHESTRATOR_REQUEST_TIMEOUT_MS") {
        if let Some(ms) = parse_env::<u64>("ORCHESTRATOR_REQUEST_TIMEOUT_MS", &raw) {
            draft.edge.request_timeout_ms = ms;
            draft.pages_timeout_ms = ms;
            touched = true;
        }
    }

    // Routing settings from environment
    if let Some(raw) = env("ORCHESTRATOR_COALESCE") {
        draft.coalesce_requests = raw != "0" && !raw.eq_ignore_ascii_case("false");
        touched = true;
    }
    if let Some(raw) = env("ORCHESTRATOR_LATENCY_THRESHOLD_MS") {
        if let Some(ms) = parse_env::<f64>("ORCHESTRATOR_LATENCY_THRESHOLD_MS", &raw) {
            draft.thresholds.latency_ms = ms;
            touched = true;
        }
    }

    // Queue settings from environment
    if let Some(raw) = env("ORCHESTRATOR_QUEUE_CAPACITY") {
        if let Some(n) = parse_env::<usize>("ORCHESTRATOR_QUEUE_CAPACITY", &raw) {
            draft.queue.capacity = n;
            touched = true;
        }
    }
    if let Some(raw) = env("ORCHESTRATOR_QUEUE_BATCH_SIZE") {
        if let Some(n) = parse_env::<usize>("ORCHESTRATOR_QUEUE_BATCH_SIZE", &raw) {
            draft.queue.batch_size = n;
            touched = true;
        }
    }
    if let Some(raw) = env("ORCHESTRATOR_QUEUE_TICK_MS") {
        if let Some(ms) = parse_env::<u64>("ORCHESTRATOR_QUEUE_TICK_MS", &raw) {
            draft.queue.tick_ms = ms;
            touched = true;
        }
    }

    // Store settings from environment
    if let Some(path) = env("ORCHESTRATOR_STORE_PATH") {
        draft.store_path = Some(PathBuf::from(path));
        touched = true;
    }

    if touched {
        draft.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Edge worker URL override
    pub worker_endpoint: Option<String>,

    /// Pages repository override; also resets the CDN cascade for it
    pub repository: Option<String>,

    /// Store path override
    pub store_path: Option<PathBuf>,

    /// Coalescing override
    pub coalesce_requests: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set edge worker URL override
    #[must_use]
    pub fn with_worker_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.worker_endpoint = Some(endpoint.into());
        self
    }

    /// Set pages repository override
    #[must_use]
    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    /// Set store path override
    #[must_use]
    pub fn with_store_path(mut self, path: PathBuf) -> Self {
        self.store_path = Some(path);
        self
    }

    /// Set coalescing override
    #[must_use]
    pub fn with_coalesce_requests(mut self, coalesce: bool) -> Self {
        self.coalesce_requests = Some(coalesce);
        self
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override is malformed.
    pub fn apply(&self, config: &mut OrchestratorConfig) -> Result<(), ConfigError> {
        if self.worker_endpoint.is_some()
            || self.repository.is_some()
            || self.store_path.is_some()
            || self.coalesce_requests.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(endpoint) = &self.worker_endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "worker endpoint must be an http(s) URL, got {endpoint:?}"
                )));
            }
            config.edge.worker_endpoint.clone_from(endpoint);
        }

        if let Some(repository) = &self.repository {
            let pages = StaticPagesConfig {
                request_timeout_ms: config.pages.request_timeout_ms,
                ..StaticPagesConfig::new(repository.clone(), config.pages.branch.clone())
            };
            pages.pages_url("").map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            config.pages = pages;
        }

        if self.store_path.is_some() {
            config.store_path.clone_from(&self.store_path);
        }

        if let Some(coalesce) = self.coalesce_requests {
            config.router.coalesce_requests = coalesce;
        }

        Ok(())
    }
}
