//! Configuration loading and typed config structures for the Vigil engine.
//!
//! An engine is built from one [`EngineConfig`] per dashboard domain. The
//! config can be constructed in code (see [`crate::presets`]) or read from
//! a YAML file whose structure mirrors the structs below. Every field has a
//! default, so a file only needs to state what differs.
//!
//! [`EngineConfig::validate`] performs every structural check. An engine
//! refuses to build from a config that fails validation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use vigil_types::{Comparator, EntityId, HistoryOrder, MetricId, PoolId, Position, Severity};

use crate::metrics;

/// Smallest tick interval accepted from configuration or at runtime.
pub const MIN_TICK_INTERVAL_MS: u64 = 10;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A metric's lower bound exceeds its upper bound.
    #[error("metric {metric}: inverted bounds (min {min} > max {max})")]
    InvertedBounds {
        /// The offending metric.
        metric: MetricId,
        /// Configured lower bound.
        min: f64,
        /// Configured upper bound.
        max: f64,
    },

    /// A reference to a metric that does not exist.
    #[error("{context} references unknown metric {metric}")]
    UnknownMetric {
        /// Where the reference was found.
        context: String,
        /// The missing metric.
        metric: MetricId,
    },

    /// A reference to a flag that does not exist.
    #[error("{context} references unknown flag {flag}")]
    UnknownFlag {
        /// Where the reference was found.
        context: String,
        /// The missing flag.
        flag: String,
    },

    /// An entity references a pool that does not exist.
    #[error("entity {entity} references unknown pool {pool}")]
    UnknownPool {
        /// The entity.
        entity: EntityId,
        /// The missing pool.
        pool: PoolId,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle: {cycle}")]
    DependencyCycle {
        /// The cycle, rendered as `a -> b -> a`.
        cycle: String,
    },

    /// Two items of the same kind share an identifier.
    #[error("duplicate {kind} id: {id}")]
    DuplicateId {
        /// Kind of item (`metric`, `flag`, ...).
        kind: &'static str,
        /// The duplicated identifier.
        id: String,
    },

    /// A numeric or structural parameter is out of its valid range.
    #[error("{context}: {reason}")]
    InvalidParameter {
        /// Where the parameter was found.
        context: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A pool with member entities does not have one unit of capacity per member.
    #[error("pool {pool} has capacity {capacity} but {members} member entities")]
    PoolMembership {
        /// The pool.
        pool: PoolId,
        /// Configured capacity.
        capacity: u32,
        /// Number of member entities.
        members: usize,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Shorthand for an [`ConfigError::InvalidParameter`].
fn invalid(context: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        context: context.into(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

/// Top-level engine configuration for one dashboard domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Domain name, published in every snapshot.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Seed for every random draw the engine makes.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Real-time milliseconds between ticks when run by the scheduler.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Stop the scheduler after this many ticks (0 = unlimited).
    #[serde(default)]
    pub max_ticks: u64,

    /// Distance at which a dispatched entity counts as arrived.
    #[serde(default = "default_arrival_radius")]
    pub arrival_radius: f64,

    /// Ticks a resolved alert stays visible before moving to the log.
    #[serde(default = "default_resolved_grace_ticks")]
    pub resolved_grace_ticks: u64,

    /// Capacity of the activity log.
    #[serde(default = "default_activity_log_capacity")]
    pub activity_log_capacity: usize,

    /// Capacity of the retired incident log.
    #[serde(default = "default_incident_log_capacity")]
    pub incident_log_capacity: usize,

    /// Named boolean flags toggled by operators.
    #[serde(default)]
    pub flags: Vec<FlagConfig>,

    /// Metric definitions, advanced in this order each tick.
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,

    /// Directed dependency edges between metrics.
    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,

    /// Threshold rules that raise alerts.
    #[serde(default)]
    pub alert_rules: Vec<AlertRuleConfig>,

    /// Random incident generators.
    #[serde(default)]
    pub incident_generators: Vec<IncidentGeneratorConfig>,

    /// Simulated moving entities.
    #[serde(default)]
    pub entities: Vec<EntityConfig>,

    /// Finite resource pools.
    #[serde(default)]
    pub resource_pools: Vec<ResourcePoolConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            seed: default_seed(),
            tick_interval_ms: default_tick_interval_ms(),
            max_ticks: 0,
            arrival_radius: default_arrival_radius(),
            resolved_grace_ticks: default_resolved_grace_ticks(),
            activity_log_capacity: default_activity_log_capacity(),
            incident_log_capacity: default_incident_log_capacity(),
            flags: Vec::new(),
            metrics: Vec::new(),
            dependencies: Vec::new(),
            alert_rules: Vec::new(),
            incident_generators: Vec::new(),
            entities: Vec::new(),
            resource_pools: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override file values after parsing:
    /// - `VIGIL_SEED` overrides `seed`
    /// - `VIGIL_TICK_INTERVAL_MS` overrides `tick_interval_ms`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Override seed and tick interval from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override seed and tick interval from an arbitrary variable lookup.
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("VIGIL_SEED") {
            match raw.trim().parse::<u64>() {
                Ok(seed) => self.seed = seed,
                Err(e) => tracing::warn!(value = %raw, error = %e, "ignoring invalid VIGIL_SEED"),
            }
        }
        if let Some(raw) = lookup("VIGIL_TICK_INTERVAL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.tick_interval_ms = ms,
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "ignoring invalid VIGIL_TICK_INTERVAL_MS");
                }
            }
        }
    }

    /// Check every structural invariant of the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms < MIN_TICK_INTERVAL_MS {
            return Err(invalid(
                "tick_interval_ms",
                format!("must be at least {MIN_TICK_INTERVAL_MS}"),
            ));
        }
        if !self.arrival_radius.is_finite() || self.arrival_radius <= 0.0 {
            return Err(invalid("arrival_radius", "must be a positive number"));
        }
        if self.activity_log_capacity == 0 {
            return Err(invalid("activity_log_capacity", "must be at least 1"));
        }
        if self.incident_log_capacity == 0 {
            return Err(invalid("incident_log_capacity", "must be at least 1"));
        }

        let flags = validate_flags(&self.flags)?;
        validate_metrics(&self.metrics, Some(&flags))?;
        metrics::dependency_order(&self.metrics, &self.dependencies)?;
        let metric_ids: BTreeSet<&str> = self.metrics.iter().map(|m| m.id.as_str()).collect();
        validate_alert_rules(&self.alert_rules, &metric_ids)?;
        validate_generators(&self.incident_generators, &flags)?;
        validate_pools_and_entities(&self.resource_pools, &self.entities)?;
        Ok(())
    }

    /// Names of all declared flags.
    pub fn flag_names(&self) -> BTreeSet<&str> {
        self.flags.iter().map(|f| f.name.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// A named operator flag (weather toggle, camera feed, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagConfig {
    /// Flag name used by `ToggleFlag`.
    pub name: String,

    /// Whether the flag starts on.
    #[serde(default)]
    pub initial: bool,

    /// Ticks between switching on and taking effect.
    #[serde(default)]
    pub activation_delay_ticks: u64,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Value range of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricRange {
    /// Value is clamped into `[min, max]` after every update.
    Bounded {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Cumulative counter; only sanitized to a finite value.
    Unbounded,
}

impl Default for MetricRange {
    fn default() -> Self {
        Self::Bounded {
            min: 0.0,
            max: 100.0,
        }
    }
}

impl MetricRange {
    /// Effective clamp bounds.
    pub const fn limits(self) -> (f64, f64) {
        match self {
            Self::Bounded { min, max } => (min, max),
            Self::Unbounded => (f64::MIN, f64::MAX),
        }
    }
}

/// History buffer attached to a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of samples retained.
    pub capacity: usize,

    /// Presentation order.
    #[serde(default = "default_history_order")]
    pub order: HistoryOrder,
}

/// Definition of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    /// Unique identifier.
    pub id: MetricId,

    /// Value at engine start.
    pub initial: f64,

    /// Value range.
    #[serde(default)]
    pub range: MetricRange,

    /// Display unit.
    #[serde(default)]
    pub unit: Option<String>,

    /// Half-width of the uniform noise added each tick.
    #[serde(default = "default_step")]
    pub step: f64,

    /// Constant drift added each tick.
    #[serde(default)]
    pub bias: f64,

    /// Extra drift added while the named flag is on.
    #[serde(default)]
    pub flag_bias: BTreeMap<String, f64>,

    /// Absolute cap on the trend value.
    #[serde(default = "default_trend_limit")]
    pub trend_limit: f64,

    /// Weight of the newest change in the trend average, in `(0, 1]`.
    #[serde(default = "default_trend_smoothing")]
    pub trend_smoothing: f64,

    /// Independent noise added to the trend each tick.
    #[serde(default)]
    pub trend_jitter: f64,

    /// History buffer, if the metric is charted.
    #[serde(default)]
    pub history: Option<HistoryConfig>,
}

impl MetricConfig {
    /// A bounded metric with default dynamics.
    pub fn bounded(id: impl Into<MetricId>, initial: f64, min: f64, max: f64) -> Self {
        Self {
            id: id.into(),
            initial,
            range: MetricRange::Bounded { min, max },
            unit: None,
            step: default_step(),
            bias: 0.0,
            flag_bias: BTreeMap::new(),
            trend_limit: default_trend_limit(),
            trend_smoothing: default_trend_smoothing(),
            trend_jitter: 0.0,
            history: None,
        }
    }

    /// An unbounded counter with default dynamics.
    pub fn unbounded(id: impl Into<MetricId>, initial: f64) -> Self {
        Self {
            range: MetricRange::Unbounded,
            ..Self::bounded(id, initial, 0.0, 0.0)
        }
    }

    /// Set the noise half-width and drift.
    #[must_use]
    pub const fn with_walk(mut self, step: f64, bias: f64) -> Self {
        self.step = step;
        self.bias = bias;
        self
    }

    /// Add drift while a flag is on.
    #[must_use]
    pub fn with_flag_bias(mut self, flag: impl Into<String>, bias: f64) -> Self {
        self.flag_bias.insert(flag.into(), bias);
        self
    }

    /// Attach a chart history (oldest first).
    #[must_use]
    pub const fn with_history(mut self, capacity: usize) -> Self {
        self.history = Some(HistoryConfig {
            capacity,
            order: HistoryOrder::OldestFirst,
        });
        self
    }

    /// Set the display unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// How a source metric adjusts a target metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencyRule {
    /// Additive: `coefficient * (source - pivot)`.
    Linear {
        /// Slope.
        coefficient: f64,
        /// Source value with no effect.
        #[serde(default)]
        pivot: f64,
    },
    /// Additive: `delta` whenever `source <comparator> threshold`.
    Step {
        /// Comparison applied to the source.
        comparator: Comparator,
        /// Threshold compared against.
        threshold: f64,
        /// Adjustment applied while the comparison holds.
        delta: f64,
    },
    /// Multiplicative: factor `1 + coefficient * (source - pivot)`.
    Scale {
        /// Slope of the factor.
        coefficient: f64,
        /// Source value with no effect.
        #[serde(default)]
        pivot: f64,
    },
}

/// A directed dependency edge `source -> target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Metric that is adjusted.
    pub target: MetricId,
    /// Metric whose pre-tick value drives the adjustment.
    pub source: MetricId,
    /// The adjustment function.
    pub rule: DependencyRule,
}

impl DependencyConfig {
    /// Build a dependency edge.
    pub fn new(target: impl Into<MetricId>, source: impl Into<MetricId>, rule: DependencyRule) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
            rule,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts and incidents
// ---------------------------------------------------------------------------

/// A threshold rule on one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    /// Rule name, unique.
    pub name: String,

    /// Watched metric.
    pub metric: MetricId,

    /// Comparison applied to the metric value.
    pub comparator: Comparator,

    /// Threshold compared against.
    pub threshold: f64,

    /// Severity of raised alerts.
    #[serde(default = "default_severity")]
    pub severity: Severity,

    /// Alert category.
    #[serde(default = "default_category")]
    pub category: String,

    /// Location or scope label.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Explicit de-duplication key; defaults to `category:scope`.
    #[serde(default)]
    pub dedup_key: Option<String>,

    /// Message template; `{metric}`, `{value}` and `{threshold}` are filled in.
    #[serde(default)]
    pub message: Option<String>,

    /// Map position, making raised alerts dispatch targets.
    #[serde(default)]
    pub location: Option<Position>,

    /// Consecutive clear ticks before the alert resolves (hysteresis window).
    #[serde(default = "default_clear_after_ticks")]
    pub clear_after_ticks: u64,
}

impl AlertRuleConfig {
    /// A rule with default severity, category, scope and hysteresis.
    pub fn new(
        name: impl Into<String>,
        metric: impl Into<MetricId>,
        comparator: Comparator,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            comparator,
            threshold,
            severity: default_severity(),
            category: default_category(),
            scope: default_scope(),
            dedup_key: None,
            message: None,
            location: None,
            clear_after_ticks: default_clear_after_ticks(),
        }
    }

    /// The effective de-duplication key.
    pub fn effective_dedup_key(&self) -> String {
        self.dedup_key
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.category, self.scope))
    }
}

/// How generated incidents are de-duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupGranularity {
    /// One active incident per category and site.
    #[default]
    PerScope,
    /// One active incident per category.
    PerCategory,
}

/// A candidate site for generated incidents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Scope label.
    pub label: String,
    /// Map position.
    pub position: Position,
}

/// Spawns incidents at random sites with a per-tick probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentGeneratorConfig {
    /// Generator name, unique.
    pub name: String,

    /// Category of generated incidents.
    pub category: String,

    /// Probability per tick of an occurrence.
    pub chance: f64,

    /// Extra probability while the named flag is on.
    #[serde(default)]
    pub flag_chance: BTreeMap<String, f64>,

    /// Severity of generated incidents.
    #[serde(default = "default_severity")]
    pub severity: Severity,

    /// Candidate sites; one is picked uniformly per occurrence.
    pub sites: Vec<SiteConfig>,

    /// De-duplication granularity.
    #[serde(default)]
    pub dedup: DedupGranularity,

    /// Message template; `{category}` and `{scope}` are filled in.
    #[serde(default = "default_incident_message")]
    pub message: String,
}

// ---------------------------------------------------------------------------
// Entities and pools
// ---------------------------------------------------------------------------

/// Movement behaviour of an entity when it is not dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BehaviorConfig {
    /// Random jitter around the current position.
    Wander {
        /// Half-width of the per-axis jitter.
        #[serde(default = "default_wander_jitter")]
        jitter: f64,
    },
    /// Cycle through waypoints.
    Patrol {
        /// Waypoints visited in order, then repeated.
        waypoints: Vec<Position>,
    },
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self::Wander {
            jitter: default_wander_jitter(),
        }
    }
}

/// A simulated moving entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Unique identifier.
    pub id: EntityId,

    /// Display label; defaults to the id.
    #[serde(default)]
    pub label: Option<String>,

    /// Free-form kind (`ambulance`, `truck`, ...).
    #[serde(default = "default_entity_kind")]
    pub kind: String,

    /// Pool the entity serves, if any.
    #[serde(default)]
    pub pool: Option<PoolId>,

    /// Starting position.
    pub position: Position,

    /// Distance covered per tick when dispatched or patrolling.
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Behaviour when not dispatched.
    #[serde(default)]
    pub behavior: BehaviorConfig,
}

impl EntityConfig {
    /// A wandering entity with default speed.
    pub fn new(id: impl Into<EntityId>, position: Position) -> Self {
        Self {
            id: id.into(),
            label: None,
            kind: default_entity_kind(),
            pool: None,
            position,
            speed: default_speed(),
            behavior: BehaviorConfig::default(),
        }
    }

    /// Assign the entity to a pool.
    #[must_use]
    pub fn in_pool(mut self, pool: impl Into<PoolId>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    /// Set speed per tick.
    #[must_use]
    pub const fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Set the kind label.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Patrol the given waypoints.
    #[must_use]
    pub fn patrolling(mut self, waypoints: Vec<Position>) -> Self {
        self.behavior = BehaviorConfig::Patrol { waypoints };
        self
    }
}

/// A finite, countable resource pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePoolConfig {
    /// Unique identifier.
    pub id: PoolId,

    /// Display label; defaults to the id.
    #[serde(default)]
    pub label: Option<String>,

    /// Total capacity. Must equal the member count when entities belong to the pool.
    pub capacity: u32,

    /// Ticks between a dispatch and the unit starting to move.
    #[serde(default)]
    pub mobilization_ticks: u64,

    /// Ticks a unit stays on scene before automatic release; `None` waits for a command.
    #[serde(default = "default_dwell_ticks")]
    pub dwell_ticks: Option<u64>,
}

impl ResourcePoolConfig {
    /// A pool with no mobilization delay and the default dwell time.
    pub fn new(id: impl Into<PoolId>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            label: None,
            capacity,
            mobilization_ticks: 0,
            dwell_ticks: default_dwell_ticks(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check flags for duplicates and return the set of names.
fn validate_flags(flags: &[FlagConfig]) -> Result<BTreeSet<&str>, ConfigError> {
    let mut names = BTreeSet::new();
    for flag in flags {
        if !names.insert(flag.name.as_str()) {
            return Err(ConfigError::DuplicateId {
                kind: "flag",
                id: flag.name.clone(),
            });
        }
    }
    Ok(names)
}

/// Check metric definitions. `flags` is `None` when flag references are not checked.
pub(crate) fn validate_metrics(
    metrics: &[MetricConfig],
    flags: Option<&BTreeSet<&str>>,
) -> Result<(), ConfigError> {
    let mut ids = BTreeSet::new();
    for metric in metrics {
        let context = format!("metric {}", metric.id);
        if !ids.insert(metric.id.as_str()) {
            return Err(ConfigError::DuplicateId {
                kind: "metric",
                id: metric.id.to_string(),
            });
        }
        if let MetricRange::Bounded { min, max } = metric.range {
            if !min.is_finite() || !max.is_finite() {
                return Err(invalid(context, "bounds must be finite"));
            }
            if min > max {
                return Err(ConfigError::InvertedBounds {
                    metric: metric.id.clone(),
                    min,
                    max,
                });
            }
            if !(min..=max).contains(&metric.initial) {
                return Err(invalid(context, format!("initial value {} outside [{min}, {max}]", metric.initial)));
            }
        }
        if !metric.initial.is_finite() {
            return Err(invalid(context, "initial value must be finite"));
        }
        if !metric.step.is_finite() || metric.step < 0.0 {
            return Err(invalid(context, "step must be a non-negative number"));
        }
        if !metric.bias.is_finite() {
            return Err(invalid(context, "bias must be finite"));
        }
        if !metric.trend_limit.is_finite() || metric.trend_limit <= 0.0 {
            return Err(invalid(context, "trend_limit must be positive"));
        }
        if !(metric.trend_smoothing > 0.0 && metric.trend_smoothing <= 1.0) {
            return Err(invalid(context, "trend_smoothing must lie in (0, 1]"));
        }
        if !metric.trend_jitter.is_finite() || metric.trend_jitter < 0.0 {
            return Err(invalid(context, "trend_jitter must be a non-negative number"));
        }
        if metric.history.is_some_and(|h| h.capacity == 0) {
            return Err(invalid(context, "history capacity must be at least 1"));
        }
        for (flag, bias) in &metric.flag_bias {
            if !bias.is_finite() {
                return Err(invalid(context, format!("flag bias for {flag} must be finite")));
            }
            if let Some(known) = flags {
                if !known.contains(flag.as_str()) {
                    return Err(ConfigError::UnknownFlag {
                        context,
                        flag: flag.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Check threshold rules against the known metrics.
fn validate_alert_rules(rules: &[AlertRuleConfig], metrics: &BTreeSet<&str>) -> Result<(), ConfigError> {
    let mut names = BTreeSet::new();
    for rule in rules {
        let context = format!("alert rule {}", rule.name);
        if !names.insert(rule.name.as_str()) {
            return Err(ConfigError::DuplicateId {
                kind: "alert rule",
                id: rule.name.clone(),
            });
        }
        if !metrics.contains(rule.metric.as_str()) {
            return Err(ConfigError::UnknownMetric {
                context,
                metric: rule.metric.clone(),
            });
        }
        if !rule.threshold.is_finite() {
            return Err(invalid(context, "threshold must be finite"));
        }
        if rule.clear_after_ticks == 0 {
            return Err(invalid(context, "clear_after_ticks must be at least 1"));
        }
    }
    Ok(())
}

/// Check incident generators.
fn validate_generators(
    generators: &[IncidentGeneratorConfig],
    flags: &BTreeSet<&str>,
) -> Result<(), ConfigError> {
    let mut names = BTreeSet::new();
    for generator in generators {
        let context = format!("incident generator {}", generator.name);
        if !names.insert(generator.name.as_str()) {
            return Err(ConfigError::DuplicateId {
                kind: "incident generator",
                id: generator.name.clone(),
            });
        }
        if !(0.0..=1.0).contains(&generator.chance) {
            return Err(invalid(context, "chance must lie in [0, 1]"));
        }
        if generator.sites.is_empty() {
            return Err(invalid(context, "at least one site is required"));
        }
        for (flag, extra) in &generator.flag_chance {
            if !flags.contains(flag.as_str()) {
                return Err(ConfigError::UnknownFlag {
                    context,
                    flag: flag.clone(),
                });
            }
            if !(0.0..=1.0).contains(extra) {
                return Err(invalid(context, format!("flag chance for {flag} must lie in [0, 1]")));
            }
        }
    }
    Ok(())
}

/// Check pools, entities and pool membership.
fn validate_pools_and_entities(
    pools: &[ResourcePoolConfig],
    entities: &[EntityConfig],
) -> Result<(), ConfigError> {
    let mut pool_ids = BTreeSet::new();
    for pool in pools {
        if !pool_ids.insert(pool.id.as_str()) {
            return Err(ConfigError::DuplicateId {
                kind: "resource pool",
                id: pool.id.to_string(),
            });
        }
    }

    let mut entity_ids = BTreeSet::new();
    let mut members: BTreeMap<&str, usize> = BTreeMap::new();
    for entity in entities {
        let context = format!("entity {}", entity.id);
        if !entity_ids.insert(entity.id.as_str()) {
            return Err(ConfigError::DuplicateId {
                kind: "entity",
                id: entity.id.to_string(),
            });
        }
        if !entity.speed.is_finite() || entity.speed < 0.0 {
            return Err(invalid(context, "speed must be a non-negative number"));
        }
        match &entity.behavior {
            BehaviorConfig::Wander { jitter } => {
                if !jitter.is_finite() || *jitter < 0.0 {
                    return Err(invalid(context, "wander jitter must be a non-negative number"));
                }
            }
            BehaviorConfig::Patrol { waypoints } => {
                if waypoints.is_empty() {
                    return Err(invalid(context, "patrol needs at least one waypoint"));
                }
            }
        }
        if let Some(pool) = &entity.pool {
            if entity.speed <= 0.0 {
                return Err(invalid(context, "pool members need a positive speed to reach a dispatch"));
            }
            if !pool_ids.contains(pool.as_str()) {
                return Err(ConfigError::UnknownPool {
                    entity: entity.id.clone(),
                    pool: pool.clone(),
                });
            }
            let count = members.entry(pool.as_str()).or_insert(0);
            *count = count.saturating_add(1);
        }
    }

    for pool in pools {
        if let Some(&count) = members.get(pool.id.as_str()) {
            if usize::try_from(pool.capacity).ok() != Some(count) {
                return Err(ConfigError::PoolMembership {
                    pool: pool.id.clone(),
                    capacity: pool.capacity,
                    members: count,
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_domain() -> String {
    "default".to_owned()
}

const fn default_seed() -> u64 {
    42
}

const fn default_tick_interval_ms() -> u64 {
    2000
}

const fn default_arrival_radius() -> f64 {
    3.0
}

const fn default_resolved_grace_ticks() -> u64 {
    5
}

const fn default_activity_log_capacity() -> usize {
    50
}

const fn default_incident_log_capacity() -> usize {
    100
}

const fn default_history_order() -> HistoryOrder {
    HistoryOrder::OldestFirst
}

const fn default_step() -> f64 {
    1.0
}

const fn default_trend_limit() -> f64 {
    10.0
}

const fn default_trend_smoothing() -> f64 {
    1.0
}

const fn default_severity() -> Severity {
    Severity::Medium
}

fn default_category() -> String {
    "threshold".to_owned()
}

fn default_scope() -> String {
    "global".to_owned()
}

const fn default_clear_after_ticks() -> u64 {
    2
}

fn default_incident_message() -> String {
    "{category} reported at {scope}".to_owned()
}

const fn default_wander_jitter() -> f64 {
    0.5
}

fn default_entity_kind() -> String {
    "unit".to_owned()
}

const fn default_speed() -> f64 {
    2.0
}

#[allow(clippy::unnecessary_wraps)]
const fn default_dwell_ticks() -> Option<u64> {
    Some(3)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn minimal() -> EngineConfig {
        EngineConfig {
            flags: vec![FlagConfig {
                name: "rain".to_owned(),
                initial: false,
                activation_delay_ticks: 0,
            }],
            metrics: vec![
                MetricConfig::bounded("gridLoad", 65.0, 0.0, 100.0).with_flag_bias("rain", 1.0),
                MetricConfig::bounded("temperature", 20.0, -10.0, 45.0),
            ],
            ..EngineConfig::default()
        }
    }

    #[test]
    fn parse_empty_yaml_uses_defaults() {
        let config = EngineConfig::parse("{}").unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.tick_interval_ms, 2000);
        assert_eq!(config.resolved_grace_ticks, 5);
        assert!(config.metrics.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
domain: waste
seed: 7
flags:
  - name: rain
    activation_delay_ticks: 2
metrics:
  - id: landfillCapacity
    initial: 85
    range: { kind: bounded, min: 0, max: 100 }
    step: 1.5
    bias: 0.2
    flag_bias: { rain: 0.5 }
    history: { capacity: 7 }
  - id: treesSaved
    initial: 1200
    range: { kind: unbounded }
dependencies:
  - target: landfillCapacity
    source: treesSaved
    rule: { kind: linear, coefficient: -0.001, pivot: 1000 }
alert_rules:
  - name: landfill-critical
    metric: landfillCapacity
    comparator: '>='
    threshold: 90
    severity: critical
    category: capacity
    scope: North Landfill
    dedup_key: landfill-critical
entities:
  - id: truck-1
    position: { x: 10, y: 20 }
    pool: trucks
    behavior: { kind: patrol, waypoints: [ { x: 10, y: 20 }, { x: 80, y: 20 } ] }
resource_pools:
  - id: trucks
    capacity: 1
    dwell_ticks: ~
";
        let config = EngineConfig::parse(yaml).unwrap();
        assert_eq!(config.domain, "waste");
        assert_eq!(config.metrics.len(), 2);
        assert_eq!(config.metrics.get(1).map(|m| m.range), Some(MetricRange::Unbounded));
        assert_eq!(
            config.alert_rules.first().map(|r| r.comparator),
            Some(Comparator::Ge)
        );
        assert_eq!(config.resource_pools.first().and_then(|p| p.dwell_ticks), None);
        config.validate().unwrap();
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut config = minimal();
        config.metrics.push(MetricConfig::bounded("broken", 5.0, 10.0, 0.0));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedBounds { .. })
        ));
    }

    #[test]
    fn initial_outside_range_is_rejected() {
        let mut config = minimal();
        config.metrics.push(MetricConfig::bounded("high", 150.0, 0.0, 100.0));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn duplicate_metric_is_rejected() {
        let mut config = minimal();
        config.metrics.push(MetricConfig::bounded("gridLoad", 1.0, 0.0, 100.0));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateId { kind: "metric", .. })
        ));
    }

    #[test]
    fn unknown_flag_in_flag_bias_is_rejected() {
        let mut config = minimal();
        config.metrics.push(MetricConfig::bounded("x", 1.0, 0.0, 10.0).with_flag_bias("snow", 1.0));
        assert!(matches!(config.validate(), Err(ConfigError::UnknownFlag { .. })));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut config = minimal();
        config.dependencies.push(DependencyConfig::new(
            "gridLoad",
            "missing",
            DependencyRule::Linear {
                coefficient: 1.0,
                pivot: 0.0,
            },
        ));
        assert!(matches!(config.validate(), Err(ConfigError::UnknownMetric { .. })));
    }

    #[test]
    fn alert_rule_on_unknown_metric_is_rejected() {
        let mut config = minimal();
        config
            .alert_rules
            .push(AlertRuleConfig::new("r", "nope", Comparator::Gt, 1.0));
        assert!(matches!(config.validate(), Err(ConfigError::UnknownMetric { .. })));
    }

    #[test]
    fn zero_hysteresis_window_is_rejected() {
        let mut config = minimal();
        let mut rule = AlertRuleConfig::new("r", "gridLoad", Comparator::Gt, 90.0);
        rule.clear_after_ticks = 0;
        config.alert_rules.push(rule);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidParameter { .. })));
    }

    #[test]
    fn entity_with_unknown_pool_is_rejected() {
        let mut config = minimal();
        config
            .entities
            .push(EntityConfig::new("amb-1", Position::new(1.0, 1.0)).in_pool("ambulances"));
        assert!(matches!(config.validate(), Err(ConfigError::UnknownPool { .. })));
    }

    #[test]
    fn stationary_pool_member_is_rejected() {
        let mut config = minimal();
        config.resource_pools.push(ResourcePoolConfig::new("ambulances", 1));
        config.entities.push(
            EntityConfig::new("amb-1", Position::new(1.0, 1.0))
                .in_pool("ambulances")
                .with_speed(0.0),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { ref context, .. }) if context == "entity amb-1"
        ));

        config.entities.clear();
        config
            .entities
            .push(EntityConfig::new("statue", Position::new(1.0, 1.0)).with_speed(0.0));
        config.resource_pools.clear();
        config.validate().unwrap();
    }

    #[test]
    fn pool_membership_must_match_capacity() {
        let mut config = minimal();
        config.resource_pools.push(ResourcePoolConfig::new("ambulances", 2));
        config
            .entities
            .push(EntityConfig::new("amb-1", Position::new(1.0, 1.0)).in_pool("ambulances"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PoolMembership { members: 1, capacity: 2, .. })
        ));
    }

    #[test]
    fn tiny_tick_interval_is_rejected() {
        let mut config = minimal();
        config.tick_interval_ms = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let mut config = minimal();
        config.apply_overrides(|key| match key {
            "VIGIL_SEED" => Some("99".to_owned()),
            "VIGIL_TICK_INTERVAL_MS" => Some("fast".to_owned()),
            _ => None,
        });
        assert_eq!(config.seed, 99);
        assert_eq!(config.tick_interval_ms, 2000);
    }

    #[test]
    fn sample_config_file_is_valid() {
        let config = EngineConfig::parse(include_str!("../../../config/vigil.yaml")).unwrap();
        assert_eq!(config.domain, "power_grid");
        assert_eq!(config.max_ticks, 600);
        assert_eq!(config.flag_names().len(), 2);
        config.validate().unwrap();
    }

    #[test]
    fn default_dedup_key_is_category_and_scope() {
        let mut rule = AlertRuleConfig::new("r", "gridLoad", Comparator::Gt, 90.0);
        rule.category = "power".to_owned();
        rule.scope = "Zone A".to_owned();
        assert_eq!(rule.effective_dedup_key(), "power:Zone A");
        rule.dedup_key = Some("grid".to_owned());
        assert_eq!(rule.effective_dedup_key(), "grid");
    }
}
