//! The metric graph.
//!
//! Metrics are advanced once per tick in configuration order. Every
//! dependency rule reads the pre-tick value of its source, so the result of
//! a tick does not depend on the order in which metrics are listed. The
//! only ordering that matters is the order of random draws, which follows
//! the configuration and is therefore reproducible.
//!
//! Numeric faults never escape: a non-finite candidate value is replaced by
//! the metric's last good value and reported as a [`MetricFault`].

use std::collections::BTreeMap;

use vigil_types::{MetricId, MetricView, Sample};

use crate::config::{self, ConfigError, DependencyConfig, DependencyRule, MetricConfig, MetricRange};
use crate::flags::FlagSet;
use crate::history::HistoryBuffer;
use crate::walk::RandomWalkGenerator;

/// Errors raised by direct metric manipulation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    /// No metric with this id exists.
    #[error("unknown metric: {0}")]
    Unknown(MetricId),

    /// The value cannot be assigned to the metric.
    #[error("invalid value {value} for metric {metric}: {reason}")]
    InvalidValue {
        /// Target metric.
        metric: MetricId,
        /// Rejected value.
        value: f64,
        /// Why it was rejected.
        reason: String,
    },
}

/// A non-finite candidate value that was replaced by the last good value.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFault {
    /// Offending metric.
    pub metric: MetricId,
    /// The rejected candidate.
    pub candidate: f64,
    /// The value kept instead.
    pub restored: f64,
}

impl DependencyRule {
    /// Additive adjustment for a target whose pre-tick value is `target`,
    /// given the pre-tick value of the source.
    pub fn adjustment(self, source: f64, target: f64) -> f64 {
        match self {
            Self::Linear { coefficient, pivot } => coefficient * (source - pivot),
            Self::Step {
                comparator,
                threshold,
                delta,
            } => {
                if comparator.holds(source, threshold) {
                    delta
                } else {
                    0.0
                }
            }
            Self::Scale { coefficient, pivot } => target * (coefficient * (source - pivot)),
        }
    }

    fn is_finite(self) -> bool {
        match self {
            Self::Linear { coefficient, pivot } | Self::Scale { coefficient, pivot } => {
                coefficient.is_finite() && pivot.is_finite()
            }
            Self::Step {
                threshold, delta, ..
            } => threshold.is_finite() && delta.is_finite(),
        }
    }
}

/// Check dependency edges and return the metrics in topological order
/// (sources before the targets they adjust).
///
/// # Errors
///
/// Returns [`ConfigError::UnknownMetric`] for an edge naming a missing
/// metric, [`ConfigError::InvalidParameter`] for non-finite rule
/// parameters, and [`ConfigError::DependencyCycle`] for self-edges and
/// cycles.
pub fn dependency_order(
    metrics: &[MetricConfig],
    dependencies: &[DependencyConfig],
) -> Result<Vec<MetricId>, ConfigError> {
    let mut adjacency: BTreeMap<&str, Vec<&str>> =
        metrics.iter().map(|m| (m.id.as_str(), Vec::new())).collect();

    for dep in dependencies {
        let context = format!("dependency {} -> {}", dep.source, dep.target);
        for id in [&dep.source, &dep.target] {
            if !adjacency.contains_key(id.as_str()) {
                return Err(ConfigError::UnknownMetric {
                    context,
                    metric: id.clone(),
                });
            }
        }
        if !dep.rule.is_finite() {
            return Err(ConfigError::InvalidParameter {
                context,
                reason: "rule parameters must be finite".to_owned(),
            });
        }
        if let Some(targets) = adjacency.get_mut(dep.source.as_str()) {
            targets.push(dep.target.as_str());
        }
    }

    let mut marks = BTreeMap::new();
    let mut stack = Vec::new();
    let mut finished = Vec::new();
    for metric in metrics {
        visit(metric.id.as_str(), &adjacency, &mut marks, &mut stack, &mut finished)?;
    }
    Ok(finished.into_iter().rev().map(MetricId::from).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn visit<'a>(
    node: &'a str,
    adjacency: &BTreeMap<&'a str, Vec<&'a str>>,
    marks: &mut BTreeMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
    finished: &mut Vec<&'a str>,
) -> Result<(), ConfigError> {
    match marks.get(node) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let mut cycle: Vec<&str> = stack.iter().copied().skip_while(|n| *n != node).collect();
            cycle.push(node);
            return Err(ConfigError::DependencyCycle {
                cycle: cycle.join(" -> "),
            });
        }
        None => {}
    }
    marks.insert(node, Mark::Visiting);
    stack.push(node);
    for next in adjacency.get(node).into_iter().flatten() {
        visit(next, adjacency, marks, stack, finished)?;
    }
    stack.pop();
    marks.insert(node, Mark::Done);
    finished.push(node);
    Ok(())
}

/// An inbound dependency edge, resolved to the source's index.
#[derive(Debug, Clone, Copy)]
struct Input {
    source: usize,
    rule: DependencyRule,
}

/// Live state of one metric.
#[derive(Debug, Clone)]
struct Metric {
    id: MetricId,
    unit: Option<String>,
    range: MetricRange,
    step: f64,
    bias: f64,
    flag_bias: Vec<(String, f64)>,
    trend_limit: f64,
    trend_smoothing: f64,
    trend_jitter: f64,
    value: f64,
    trend: f64,
    inputs: Vec<Input>,
    history: Option<HistoryBuffer<f64>>,
}

impl Metric {
    fn view(&self) -> MetricView {
        let (min, max) = match self.range {
            MetricRange::Bounded { min, max } => (Some(min), Some(max)),
            MetricRange::Unbounded => (None, None),
        };
        MetricView {
            id: self.id.clone(),
            value: self.value,
            trend: self.trend,
            unit: self.unit.clone(),
            min,
            max,
        }
    }

    fn check_value(&self, value: f64) -> Result<(), MetricError> {
        let reject = |reason: String| MetricError::InvalidValue {
            metric: self.id.clone(),
            value,
            reason,
        };
        if !value.is_finite() {
            return Err(reject("value must be finite".to_owned()));
        }
        if let MetricRange::Bounded { min, max } = self.range {
            if !(min..=max).contains(&value) {
                return Err(reject(format!("outside [{min}, {max}]")));
            }
        }
        Ok(())
    }
}

/// Named metrics with bounds, trends, histories and dependency edges.
#[derive(Debug, Clone)]
pub struct MetricGraph {
    metrics: Vec<Metric>,
    index: BTreeMap<MetricId, usize>,
}

impl MetricGraph {
    /// Build the graph from metric definitions and dependency edges.
    ///
    /// Flag references in `flag_bias` are not checked here; see
    /// [`crate::config::EngineConfig::validate`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for invalid metrics, unknown dependency ids
    /// or dependency cycles.
    pub fn new(metrics: &[MetricConfig], dependencies: &[DependencyConfig]) -> Result<Self, ConfigError> {
        config::validate_metrics(metrics, None)?;
        dependency_order(metrics, dependencies)?;

        let index: BTreeMap<MetricId, usize> = metrics
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();

        let mut built = Vec::with_capacity(metrics.len());
        for cfg in metrics {
            let inputs = dependencies
                .iter()
                .filter(|d| d.target == cfg.id)
                .filter_map(|d| {
                    index.get(&d.source).map(|&source| Input {
                        source,
                        rule: d.rule,
                    })
                })
                .collect();
            let history = match cfg.history {
                Some(h) => Some(HistoryBuffer::new(h.capacity, h.order).map_err(|e| {
                    ConfigError::InvalidParameter {
                        context: format!("metric {}", cfg.id),
                        reason: e.to_string(),
                    }
                })?),
                None => None,
            };
            built.push(Metric {
                id: cfg.id.clone(),
                unit: cfg.unit.clone(),
                range: cfg.range,
                step: cfg.step,
                bias: cfg.bias,
                flag_bias: cfg.flag_bias.iter().map(|(f, b)| (f.clone(), *b)).collect(),
                trend_limit: cfg.trend_limit,
                trend_smoothing: cfg.trend_smoothing,
                trend_jitter: cfg.trend_jitter,
                value: cfg.initial,
                trend: 0.0,
                inputs,
                history,
            });
        }

        Ok(Self {
            metrics: built,
            index,
        })
    }

    /// Advance every metric by one tick.
    ///
    /// Returns the faults that were healed during the tick.
    pub fn advance(&mut self, walk: &mut RandomWalkGenerator, flags: &FlagSet, tick: u64) -> Vec<MetricFault> {
        let previous: Vec<f64> = self.metrics.iter().map(|m| m.value).collect();
        let mut faults = Vec::new();

        for metric in &mut self.metrics {
            let old = metric.value;
            let bias = metric
                .flag_bias
                .iter()
                .filter(|(flag, _)| flags.is_on(flag))
                .fold(metric.bias, |acc, (_, extra)| acc + extra);

            let walked = walk.perturb(old, metric.step, bias);
            let adjustment: f64 = metric
                .inputs
                .iter()
                .map(|input| {
                    let source = previous.get(input.source).copied().unwrap_or(0.0);
                    input.rule.adjustment(source, old)
                })
                .sum();
            let candidate = walked + adjustment;

            let (min, max) = metric.range.limits();
            let value = if candidate.is_finite() {
                candidate.clamp(min, max)
            } else {
                tracing::warn!(
                    metric = %metric.id,
                    candidate,
                    restored = old,
                    "non-finite metric value, keeping last good value"
                );
                faults.push(MetricFault {
                    metric: metric.id.clone(),
                    candidate,
                    restored: old,
                });
                old
            };

            let change = value - old;
            let smoothed = metric
                .trend_smoothing
                .mul_add(change - metric.trend, metric.trend)
                + walk.noise(metric.trend_jitter);
            metric.trend = if smoothed.is_finite() {
                smoothed.clamp(-metric.trend_limit, metric.trend_limit)
            } else {
                0.0
            };
            metric.value = value;

            if let Some(history) = metric.history.as_mut() {
                history.push(tick, value);
            }
        }

        faults
    }

    /// Check that `value` could be assigned to metric `id`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::Unknown`] or [`MetricError::InvalidValue`].
    pub fn check_value(&self, id: &str, value: f64) -> Result<(), MetricError> {
        self.get(id)?.check_value(value)
    }

    /// Assign a value directly. The trend is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::Unknown`] or [`MetricError::InvalidValue`].
    pub fn set_value(&mut self, id: &str, value: f64) -> Result<f64, MetricError> {
        let metric = self.get_mut(id)?;
        metric.check_value(value)?;
        let previous = metric.value;
        metric.value = value;
        Ok(previous)
    }

    /// Current value of a metric.
    pub fn value(&self, id: &str) -> Option<f64> {
        self.get(id).ok().map(|m| m.value)
    }

    /// Current trend of a metric.
    pub fn trend(&self, id: &str) -> Option<f64> {
        self.get(id).ok().map(|m| m.trend)
    }

    /// Metric ids in configuration order.
    pub fn ids(&self) -> impl Iterator<Item = &MetricId> {
        self.metrics.iter().map(|m| &m.id)
    }

    /// History buffer of a metric, if it has one.
    pub fn history(&self, id: &str) -> Option<&HistoryBuffer<f64>> {
        self.get(id).ok().and_then(|m| m.history.as_ref())
    }

    /// Views of every metric keyed by id.
    pub fn views(&self) -> BTreeMap<MetricId, MetricView> {
        self.metrics.iter().map(|m| (m.id.clone(), m.view())).collect()
    }

    /// Histories of every charted metric, each in its buffer's order.
    pub fn histories(&self) -> BTreeMap<MetricId, Vec<Sample<f64>>> {
        self.metrics
            .iter()
            .filter_map(|m| m.history.as_ref().map(|h| (m.id.clone(), h.to_vec())))
            .collect()
    }

    fn get(&self, id: &str) -> Result<&Metric, MetricError> {
        self.index
            .get(id)
            .and_then(|&i| self.metrics.get(i))
            .ok_or_else(|| MetricError::Unknown(MetricId::from(id)))
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Metric, MetricError> {
        self.index
            .get(id)
            .and_then(|&i| self.metrics.get_mut(i))
            .ok_or_else(|| MetricError::Unknown(MetricId::from(id)))
    }
}
