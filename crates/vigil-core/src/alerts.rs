//! Alert and incident lifecycle.
//!
//! [`ThresholdAlertEngine`] owns every alert the engine has raised. Alerts
//! come from two sources: threshold rules evaluated against the metric
//! graph, and random incident generators. Both de-duplicate on a key, so at
//! most one active alert exists per key at any time.
//!
//! Lifecycle: `Pending -> Acknowledged/Dispatched -> Resolved`. Resolved
//! alerts stay visible for a grace period and then move to the incident
//! log.

use vigil_types::{Alert, AlertId, AlertOrigin, AlertStatus, AllocationId, HistoryOrder, Position};

use crate::config::{AlertRuleConfig, ConfigError, DedupGranularity, IncidentGeneratorConfig};
use crate::flags::FlagSet;
use crate::history::HistoryBuffer;
use crate::metrics::MetricGraph;
use crate::walk::RandomWalkGenerator;

/// Errors raised by alert operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlertError {
    /// No visible alert with this id exists.
    #[error("unknown alert: {0}")]
    Unknown(AlertId),

    /// The alert is in a state that does not allow the operation.
    #[error("alert {id} is {status:?}")]
    InvalidState {
        /// The alert.
        id: AlertId,
        /// Its current status.
        status: AlertStatus,
    },
}

/// Whether an operation changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// State changed.
    Applied,
    /// State already matched; nothing to do.
    Unchanged,
}

/// Why an alert was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveCause {
    /// The threshold condition stayed clear for the hysteresis window.
    Cleared,
    /// A dispatched unit arrived on scene.
    Arrival,
    /// An operator resolved it.
    Command,
}

/// Lifecycle events produced during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertEvent {
    /// A new alert was created.
    Raised(AlertId),
    /// An alert was resolved.
    Resolved {
        /// The alert.
        id: AlertId,
        /// Why.
        cause: ResolveCause,
    },
}

#[derive(Debug, Clone)]
struct RuleState {
    rule: AlertRuleConfig,
    dedup_key: String,
    clear_streak: u64,
}

/// Threshold rules, incident generators and the alerts they produced.
#[derive(Debug, Clone)]
pub struct ThresholdAlertEngine {
    rules: Vec<RuleState>,
    generators: Vec<IncidentGeneratorConfig>,
    alerts: Vec<Alert>,
    next_id: AlertId,
    resolved_grace_ticks: u64,
    incident_log: HistoryBuffer<Alert>,
}

impl ThresholdAlertEngine {
    /// Build the alert engine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidParameter`] if the incident log capacity is zero.
    pub fn new(
        rules: &[AlertRuleConfig],
        generators: &[IncidentGeneratorConfig],
        resolved_grace_ticks: u64,
        incident_log_capacity: usize,
    ) -> Result<Self, ConfigError> {
        let incident_log = HistoryBuffer::new(incident_log_capacity, HistoryOrder::NewestFirst)
            .map_err(|e| ConfigError::InvalidParameter {
                context: "incident_log_capacity".to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            rules: rules
                .iter()
                .map(|rule| RuleState {
                    dedup_key: rule.effective_dedup_key(),
                    rule: rule.clone(),
                    clear_streak: 0,
                })
                .collect(),
            generators: generators.to_vec(),
            alerts: Vec::new(),
            next_id: AlertId(1),
            resolved_grace_ticks,
            incident_log,
        })
    }

    /// Evaluate every threshold rule against the current metric values.
    pub fn evaluate(&mut self, graph: &MetricGraph, tick: u64) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        for index in 0..self.rules.len() {
            let Some(state) = self.rules.get(index) else {
                continue;
            };
            let Some(value) = graph.value(state.rule.metric.as_str()) else {
                continue;
            };
            let holds = state.rule.comparator.holds(value, state.rule.threshold);
            let key = state.dedup_key.clone();
            let rule_name = state.rule.name.clone();
            let clear_after = state.rule.clear_after_ticks;

            let active = self.active_index(&key);
            let mut streak = state.clear_streak;
            match (holds, active) {
                (true, Some(i)) => {
                    streak = 0;
                    if let Some(alert) = self.alerts.get_mut(i) {
                        alert.last_seen_tick = tick;
                        alert.observed = Some(value);
                    }
                }
                (true, None) => {
                    streak = 0;
                    let alert = self.rule_alert(index, value, tick);
                    if let Some(id) = alert.and_then(|a| self.insert(a)) {
                        events.push(AlertEvent::Raised(id));
                    }
                }
                (false, Some(i)) => {
                    let owned = self.alerts.get(i).is_some_and(
                        |a| matches!(&a.origin, AlertOrigin::Threshold { rule, .. } if *rule == rule_name),
                    );
                    if owned {
                        streak = streak.saturating_add(1);
                        if streak >= clear_after {
                            streak = 0;
                            if let Some(alert) = self.alerts.get_mut(i) {
                                resolve_in_place(alert, tick);
                                tracing::info!(alert = %alert.id, rule = %rule_name, "alert cleared");
                                events.push(AlertEvent::Resolved {
                                    id: alert.id,
                                    cause: ResolveCause::Cleared,
                                });
                            }
                        }
                    }
                }
                (false, None) => streak = 0,
            }
            if let Some(state) = self.rules.get_mut(index) {
                state.clear_streak = streak;
            }
        }
        events
    }

    /// Roll every incident generator once.
    pub fn generate(&mut self, walk: &mut RandomWalkGenerator, flags: &FlagSet, tick: u64) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        for index in 0..self.generators.len() {
            let Some(generator) = self.generators.get(index) else {
                continue;
            };
            let chance = generator
                .flag_chance
                .iter()
                .filter(|(flag, _)| flags.is_on(flag))
                .fold(generator.chance, |acc, (_, extra)| acc + extra);
            if !walk.chance(chance) {
                continue;
            }
            let Some(site) = walk.pick(generator.sites.len()).and_then(|i| generator.sites.get(i)) else {
                continue;
            };
            let key = match generator.dedup {
                DedupGranularity::PerScope => format!("{}:{}", generator.category, site.label),
                DedupGranularity::PerCategory => generator.category.clone(),
            };
            if let Some(i) = self.active_index(&key) {
                if let Some(alert) = self.alerts.get_mut(i) {
                    alert.last_seen_tick = tick;
                }
                continue;
            }
            let message = generator
                .message
                .replace("{category}", &generator.category)
                .replace("{scope}", &site.label);
            let alert = Alert {
                id: self.next_id,
                category: generator.category.clone(),
                severity: generator.severity,
                scope: site.label.clone(),
                message,
                location: Some(site.position.clamped()),
                origin: AlertOrigin::Generator {
                    generator: generator.name.clone(),
                },
                dedup_key: key,
                status: AlertStatus::Pending,
                created_tick: tick,
                last_seen_tick: tick,
                resolved_tick: None,
                observed: None,
                acknowledged: false,
                allocations: Vec::new(),
            };
            if let Some(id) = self.insert(alert) {
                events.push(AlertEvent::Raised(id));
            }
        }
        events
    }

    /// Move resolved alerts whose grace period has elapsed into the incident log.
    pub fn retire(&mut self, tick: u64) -> usize {
        let grace = self.resolved_grace_ticks;
        let (expired, kept): (Vec<Alert>, Vec<Alert>) =
            std::mem::take(&mut self.alerts).into_iter().partition(|a| {
                a.resolved_tick
                    .is_some_and(|resolved| resolved.saturating_add(grace) <= tick)
            });
        self.alerts = kept;
        let count = expired.len();
        for alert in expired {
            self.incident_log.push(tick, alert);
        }
        count
    }

    /// Acknowledge an alert.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Unknown`] or, for a resolved alert,
    /// [`AlertError::InvalidState`].
    pub fn acknowledge(&mut self, id: AlertId) -> Result<Change, AlertError> {
        let alert = self.get_mut(id)?;
        if alert.status == AlertStatus::Resolved {
            return Err(AlertError::InvalidState {
                id,
                status: alert.status,
            });
        }
        if alert.acknowledged {
            return Ok(Change::Unchanged);
        }
        alert.acknowledged = true;
        if alert.status == AlertStatus::Pending {
            alert.status = AlertStatus::Acknowledged;
        }
        Ok(Change::Applied)
    }

    /// Resolve an alert. Resolving a resolved alert is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Unknown`].
    pub fn resolve(&mut self, id: AlertId, tick: u64, cause: ResolveCause) -> Result<Change, AlertError> {
        let alert = self.get_mut(id)?;
        if alert.status == AlertStatus::Resolved {
            return Ok(Change::Unchanged);
        }
        resolve_in_place(alert, tick);
        tracing::info!(alert = %id, cause = ?cause, "alert resolved");
        Ok(Change::Applied)
    }

    /// Check that an alert can receive a dispatch and return its location.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Unknown`], or [`AlertError::InvalidState`] for a
    /// resolved alert.
    pub fn dispatch_target(&self, id: AlertId) -> Result<Option<Position>, AlertError> {
        let alert = self.get(id).ok_or(AlertError::Unknown(id))?;
        if alert.status == AlertStatus::Resolved {
            return Err(AlertError::InvalidState {
                id,
                status: alert.status,
            });
        }
        Ok(alert.location)
    }

    /// Record an allocation serving the alert and mark it dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Unknown`], or [`AlertError::InvalidState`] for a
    /// resolved alert.
    pub fn attach(&mut self, id: AlertId, allocation: AllocationId) -> Result<(), AlertError> {
        let alert = self.get_mut(id)?;
        if alert.status == AlertStatus::Resolved {
            return Err(AlertError::InvalidState {
                id,
                status: alert.status,
            });
        }
        alert.status = AlertStatus::Dispatched;
        if !alert.allocations.contains(&allocation) {
            alert.allocations.push(allocation);
        }
        Ok(())
    }

    /// Forget an allocation. An unresolved alert left without allocations
    /// falls back to `Acknowledged` if an operator acknowledged it, else to
    /// `Pending`.
    pub fn detach(&mut self, id: AlertId, allocation: AllocationId) {
        if let Ok(alert) = self.get_mut(id) {
            alert.allocations.retain(|a| *a != allocation);
            if alert.status == AlertStatus::Dispatched && alert.allocations.is_empty() {
                alert.status = if alert.acknowledged {
                    AlertStatus::Acknowledged
                } else {
                    AlertStatus::Pending
                };
            }
        }
    }

    /// Look up a visible alert.
    pub fn get(&self, id: AlertId) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    /// Whether the alert exists and is not resolved.
    pub fn is_active(&self, id: AlertId) -> bool {
        self.get(id).is_some_and(|a| a.status.is_active())
    }

    /// Number of active alerts.
    pub fn active_count(&self) -> usize {
        self.alerts.iter().filter(|a| a.status.is_active()).count()
    }

    /// Visible alerts, most severe first, then newest first.
    pub fn visible(&self) -> Vec<Alert> {
        let mut alerts = self.alerts.clone();
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.created_tick.cmp(&a.created_tick))
                .then(b.id.cmp(&a.id))
        });
        alerts
    }

    /// Retired alerts, newest first.
    pub fn incident_log(&self) -> Vec<Alert> {
        self.incident_log.values()
    }

    fn get_mut(&mut self, id: AlertId) -> Result<&mut Alert, AlertError> {
        self.alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(AlertError::Unknown(id))
    }

    fn active_index(&self, key: &str) -> Option<usize> {
        self.alerts
            .iter()
            .position(|a| a.status.is_active() && a.dedup_key == key)
    }

    fn rule_alert(&self, index: usize, value: f64, tick: u64) -> Option<Alert> {
        let state = self.rules.get(index)?;
        let rule = &state.rule;
        let template = rule
            .message
            .as_deref()
            .unwrap_or("{metric} {comparator} {threshold} (observed {value})");
        let message = template
            .replace("{metric}", rule.metric.as_str())
            .replace("{comparator}", rule.comparator.symbol())
            .replace("{threshold}", &format!("{}", rule.threshold))
            .replace("{value}", &format!("{value:.1}"));
        Some(Alert {
            id: self.next_id,
            category: rule.category.clone(),
            severity: rule.severity,
            scope: rule.scope.clone(),
            message,
            location: rule.location.map(Position::clamped),
            origin: AlertOrigin::Threshold {
                rule: rule.name.clone(),
                metric: rule.metric.clone(),
            },
            dedup_key: state.dedup_key.clone(),
            status: AlertStatus::Pending,
            created_tick: tick,
            last_seen_tick: tick,
            resolved_tick: None,
            observed: Some(value),
            acknowledged: false,
            allocations: Vec::new(),
        })
    }

    /// Store a new alert under the next id. Returns `None` once ids are exhausted.
    fn insert(&mut self, alert: Alert) -> Option<AlertId> {
        let id = alert.id;
        let Some(next) = id.next() else {
            tracing::error!("alert id space exhausted, dropping alert");
            return None;
        };
        tracing::info!(
            alert = %id,
            category = %alert.category,
            scope = %alert.scope,
            severity = ?alert.severity,
            "alert raised"
        );
        self.next_id = next;
        self.alerts.push(alert);
        Some(id)
    }
}

fn resolve_in_place(alert: &mut Alert, tick: u64) {
    alert.status = AlertStatus::Resolved;
    alert.resolved_tick = Some(tick);
}
