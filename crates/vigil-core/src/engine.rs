//! The simulation engine: composition root for one dashboard domain.
//!
//! [`SimulationEngine`] exclusively owns every piece of mutable state. The
//! outside world reads immutable [`Snapshot`]s and submits [`Command`]s.
//!
//! Each call to [`SimulationEngine::tick`] runs these phases in order:
//!
//! 1. **Clock** -- advance the tick counter.
//! 2. **Commands** -- apply commands queued since the previous tick:
//!    parameter changes, operator resolutions, unit assignments for
//!    dispatches and releases.
//! 3. **Transitions** -- fire delayed transitions that are now due (flag
//!    activations, mobilizations, dwell releases).
//! 4. **Metrics** -- advance the metric graph.
//! 5. **Alerts** -- evaluate threshold rules, then roll incident generators.
//! 6. **Entities** -- move entities, detect arrivals and recalls.
//! 7. **Reconciliation** -- resolve incidents on arrival, release recalled
//!    and completed allocations, retire old alerts, verify pool
//!    conservation.
//! 8. **Publish** -- build and store the new snapshot.
//!
//! A tick never fails. Component faults are logged and healed in place.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use vigil_types::{
    ActivityEntry, ActivityKind, AlertId, AllocationHandle, AllocationId, ConsumerRef, EntityId, MetricId, PoolId,
    Position, Snapshot,
};

use crate::alerts::{AlertEvent, Change, ResolveCause, ThresholdAlertEngine};
use crate::clock::{SimulationClock, Transition};
use crate::command::{Command, CommandError, CommandOutcome};
use crate::config::{ConfigError, EngineConfig};
use crate::dispatch::{ConservationResult, DispatchAllocator, ReleaseOutcome, ResourcePool};
use crate::entities::{Assignment, EntityEvent, EntitySimulator};
use crate::flags::FlagSet;
use crate::history::HistoryBuffer;
use crate::metrics::MetricGraph;
use crate::walk::RandomWalkGenerator;

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The tick that was executed.
    pub tick: u64,
    /// Alerts raised this tick.
    pub raised: Vec<AlertId>,
    /// Alerts resolved this tick.
    pub resolved: Vec<AlertId>,
    /// Entities that arrived on scene this tick.
    pub arrivals: Vec<EntityId>,
    /// Entities recalled because their target vanished.
    pub recalls: Vec<EntityId>,
    /// Allocations released this tick.
    pub released: Vec<AllocationId>,
    /// Number of metric values healed this tick.
    pub sanitized: usize,
    /// Queued commands that could no longer be applied.
    pub dropped_commands: usize,
    /// Active alerts after the tick.
    pub active_alerts: usize,
    /// Whether the engine refused to tick (tick counter exhausted).
    pub halted: bool,
}

/// Summary of flushing pending transitions on shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Dwell timers completed early.
    pub dwell_released: usize,
    /// Mobilizations cancelled with their allocation released.
    pub mobilizations_cancelled: usize,
    /// Flag activations completed early.
    pub flags_activated: usize,
    /// Queued dispatches dropped with their reserved capacity released.
    pub dispatches_cancelled: usize,
    /// Queued releases carried out early.
    pub releases_applied: usize,
}

/// Work accepted by [`SimulationEngine::submit`] for the next tick.
#[derive(Debug)]
enum Queued {
    SetParameter {
        metric: MetricId,
        value: f64,
    },
    Resolve {
        alert: AlertId,
    },
    /// Capacity is already reserved under `handle`.
    Dispatch {
        handle: AllocationHandle,
        alert: AlertId,
        unit: Option<(EntityId, Position)>,
    },
    Release {
        handle: AllocationHandle,
    },
}

/// Why an allocation is being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReleaseReason {
    Command,
    Dwell,
    Recall,
    Completed,
    Cancelled,
    Shutdown,
}

impl ReleaseReason {
    const fn label(self) -> &'static str {
        match self {
            Self::Command => "released by operator",
            Self::Dwell => "released after dwell time",
            Self::Recall => "released after recall",
            Self::Completed => "released, incident closed",
            Self::Cancelled => "released, dispatch cancelled",
            Self::Shutdown => "released on shutdown",
        }
    }
}

/// One coupled set of metrics, alerts, entities and resource pools.
#[derive(Debug)]
pub struct SimulationEngine {
    domain: String,
    arrival_radius: f64,
    clock: SimulationClock,
    walk: RandomWalkGenerator,
    flags: FlagSet,
    metrics: MetricGraph,
    alerts: ThresholdAlertEngine,
    entities: EntitySimulator,
    dispatch: DispatchAllocator,
    queue: VecDeque<Queued>,
    activity: HistoryBuffer<ActivityEntry>,
    snapshot: Arc<Snapshot>,
}

impl SimulationEngine {
    /// Build an engine from a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found by [`EngineConfig::validate`].
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let activity = HistoryBuffer::log(config.activity_log_capacity).map_err(|e| {
            ConfigError::InvalidParameter {
                context: "activity_log_capacity".to_owned(),
                reason: e.to_string(),
            }
        })?;
        let mut engine = Self {
            domain: config.domain.clone(),
            arrival_radius: config.arrival_radius,
            clock: SimulationClock::new(),
            walk: RandomWalkGenerator::seeded(config.seed),
            flags: FlagSet::from_config(&config.flags),
            metrics: MetricGraph::new(&config.metrics, &config.dependencies)?,
            alerts: ThresholdAlertEngine::new(
                &config.alert_rules,
                &config.incident_generators,
                config.resolved_grace_ticks,
                config.incident_log_capacity,
            )?,
            entities: EntitySimulator::new(&config.entities),
            dispatch: DispatchAllocator::new(&config.resource_pools),
            queue: VecDeque::new(),
            activity,
            snapshot: Arc::new(empty_snapshot(&config.domain)),
        };
        engine.publish();

        info!(
            domain = %engine.domain,
            seed = config.seed,
            metrics = config.metrics.len(),
            rules = config.alert_rules.len(),
            entities = config.entities.len(),
            pools = config.resource_pools.len(),
            "simulation engine built"
        );
        Ok(engine)
    }

    /// Domain name.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Number of the last completed tick (0 before the first tick).
    pub const fn current_tick(&self) -> u64 {
        self.clock.tick()
    }

    /// The snapshot published by the last tick.
    ///
    /// Repeated calls between ticks return the same `Arc`.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }

    /// Number of commands waiting for the next tick.
    pub fn queued_commands(&self) -> usize {
        self.queue.len()
    }

    /// Pool conservation check across every pool.
    pub fn verify_conservation(&self) -> ConservationResult {
        self.dispatch.verify_conservation()
    }

    /// Run one tick.
    pub fn tick(&mut self) -> TickReport {
        let tick = match self.clock.advance() {
            Ok(tick) => tick,
            Err(e) => {
                error!(error = %e, "cannot advance clock, tick skipped");
                return TickReport {
                    tick: self.clock.tick(),
                    halted: true,
                    active_alerts: self.alerts.active_count(),
                    ..TickReport::default()
                };
            }
        };
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        self.apply_queued(tick, &mut report);
        self.fire_transitions(tick, &mut report);

        for fault in self.metrics.advance(&mut self.walk, &self.flags, tick) {
            report.sanitized = report.sanitized.saturating_add(1);
            self.log_activity(
                tick,
                ActivityKind::MetricSanitized,
                format!("{} produced {}, kept {:.2}", fault.metric, fault.candidate, fault.restored),
            );
        }

        let mut events = self.alerts.evaluate(&self.metrics, tick);
        events.extend(self.alerts.generate(&mut self.walk, &self.flags, tick));
        for event in events {
            self.record_alert_event(tick, event, &mut report);
        }

        let alerts = &self.alerts;
        let entity_events = self
            .entities
            .advance(&mut self.walk, |id| alerts.is_active(id), self.arrival_radius);
        for event in entity_events {
            self.reconcile_entity(tick, event, &mut report);
        }
        self.reconcile_allocations(tick, &mut report);

        let retired = self.alerts.retire(tick);
        if retired > 0 {
            debug!(tick, retired, "alerts moved to incident log");
        }
        if let ConservationResult::Violation {
            pool,
            total,
            available,
            outstanding,
        } = self.dispatch.verify_conservation()
        {
            error!(%pool, total, available, outstanding, "resource pool out of balance");
        }

        report.active_alerts = self.alerts.active_count();
        self.publish();
        debug!(
            tick,
            raised = report.raised.len(),
            resolved = report.resolved.len(),
            arrivals = report.arrivals.len(),
            active = report.active_alerts,
            "tick complete"
        );
        report
    }

    /// Validate and apply or queue a command.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] describing why the command was rejected.
    /// A rejected command leaves the engine unchanged.
    pub fn submit(&mut self, command: Command) -> Result<CommandOutcome, CommandError> {
        let name = command.name();
        let result = self.apply_command(command);
        match &result {
            Ok(outcome) => debug!(command = name, ?outcome, "command accepted"),
            Err(e) => warn!(command = name, error = %e, "command rejected"),
        }
        result
    }

    /// Complete or cancel every pending delayed transition.
    ///
    /// Queued dispatches are dropped and their reservation released, queued
    /// releases happen now. Dwell timers release their allocation now,
    /// mobilizations are cancelled and their allocation released, flag
    /// activations complete. Other queued commands wait for the next tick.
    /// Publishes a fresh snapshot of the same tick.
    pub fn flush_pending(&mut self) -> FlushReport {
        let tick = self.clock.tick();
        let mut flush = FlushReport::default();
        let mut report = TickReport::default();
        let mut kept = VecDeque::new();
        for queued in std::mem::take(&mut self.queue) {
            match queued {
                Queued::Dispatch { handle, .. } => {
                    self.release_allocation(tick, handle.id, ReleaseReason::Shutdown, &mut report);
                    flush.dispatches_cancelled = flush.dispatches_cancelled.saturating_add(1);
                }
                Queued::Release { handle } => {
                    self.release_allocation(tick, handle.id, ReleaseReason::Command, &mut report);
                    flush.releases_applied = flush.releases_applied.saturating_add(1);
                }
                other => kept.push_back(other),
            }
        }
        self.queue = kept;
        for transition in self.clock.drain() {
            match transition {
                Transition::FlagReady { flag } => {
                    if self.flags.complete_activation(&flag) {
                        flush.flags_activated = flush.flags_activated.saturating_add(1);
                    }
                }
                Transition::DwellComplete { allocation } => {
                    self.release_allocation(tick, allocation, ReleaseReason::Dwell, &mut report);
                    flush.dwell_released = flush.dwell_released.saturating_add(1);
                }
                Transition::MobilizationComplete { allocation } => {
                    self.release_allocation(tick, allocation, ReleaseReason::Shutdown, &mut report);
                    flush.mobilizations_cancelled = flush.mobilizations_cancelled.saturating_add(1);
                }
            }
        }
        self.publish();
        info!(
            dwell_released = flush.dwell_released,
            mobilizations_cancelled = flush.mobilizations_cancelled,
            flags_activated = flush.flags_activated,
            dispatches_cancelled = flush.dispatches_cancelled,
            releases_applied = flush.releases_applied,
            still_queued = self.queued_commands(),
            "pending transitions flushed"
        );
        flush
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn apply_command(&mut self, command: Command) -> Result<CommandOutcome, CommandError> {
        let tick = self.clock.tick();
        match command {
            Command::ToggleFlag { flag } => {
                let state = self.flags.toggle(&flag, &mut self.clock)?;
                self.log_activity(tick, ActivityKind::FlagChanged, format!("{flag} is now {state:?}"));
                Ok(CommandOutcome::FlagToggled { flag, state })
            }
            Command::SetParameter { metric, value } => {
                self.metrics.check_value(metric.as_str(), value)?;
                self.queue.push_back(Queued::SetParameter { metric, value });
                Ok(self.queued_outcome())
            }
            Command::ResolveIncident { alert } => {
                let current = self.alerts.get(alert).ok_or_else(|| CommandError::UnknownReference {
                    kind: "alert",
                    id: alert.to_string(),
                })?;
                if !current.status.is_active() {
                    return Ok(CommandOutcome::Unchanged);
                }
                self.queue.push_back(Queued::Resolve { alert });
                Ok(self.queued_outcome())
            }
            Command::AcknowledgeAlert { alert } => match self.alerts.acknowledge(alert)? {
                Change::Applied => {
                    self.log_activity(tick, ActivityKind::AlertAcknowledged, format!("{alert} acknowledged"));
                    Ok(CommandOutcome::Acknowledged { alert })
                }
                Change::Unchanged => Ok(CommandOutcome::Unchanged),
            },
            Command::Dispatch { pool, alert } => self.reserve_dispatch(tick, &pool, alert),
            Command::Release { handle } => {
                let outstanding = self.dispatch.is_outstanding(&handle)?;
                let queued = self
                    .queue
                    .iter()
                    .any(|q| matches!(q, Queued::Release { handle: h } if *h == handle));
                if !outstanding || queued {
                    return Ok(CommandOutcome::Unchanged);
                }
                self.queue.push_back(Queued::Release { handle });
                Ok(self.queued_outcome())
            }
        }
    }

    fn queued_outcome(&self) -> CommandOutcome {
        CommandOutcome::Queued {
            applies_at: self.clock.tick().saturating_add(1),
        }
    }

    /// Check a dispatch and reserve its capacity now; the unit is assigned
    /// at the start of the next tick.
    fn reserve_dispatch(&mut self, tick: u64, pool_id: &PoolId, alert: AlertId) -> Result<CommandOutcome, CommandError> {
        let pool = self
            .dispatch
            .pool(pool_id.as_str())
            .ok_or_else(|| CommandError::UnknownReference {
                kind: "pool",
                id: pool_id.to_string(),
            })?;
        let location = self.alerts.dispatch_target(alert)?;
        if pool.available() == 0 {
            return Err(CommandError::NoCapacity {
                pool: pool_id.clone(),
            });
        }

        let unit = if self.entities.has_members(pool_id) {
            let target = location.ok_or_else(|| CommandError::InvalidState {
                reason: format!("{alert} has no location to dispatch to"),
            })?;
            let entity = self
                .entities
                .nearest_available(pool_id, target, &self.reserved_units())
                .ok_or_else(|| CommandError::NoCapacity {
                    pool: pool_id.clone(),
                })?;
            Some((entity, target))
        } else {
            None
        };

        let entity = unit.as_ref().map(|(entity, _)| entity.clone());
        let handle = self
            .dispatch
            .allocate(pool_id, ConsumerRef::Alert(alert), entity.clone(), tick)?;
        debug!(pool = %pool_id, %alert, allocation = %handle.id, entity = ?entity, "capacity reserved");
        self.queue.push_back(Queued::Dispatch {
            handle: handle.clone(),
            alert,
            unit,
        });
        Ok(CommandOutcome::Dispatched {
            handle,
            entity,
            applies_at: tick.saturating_add(1),
        })
    }

    /// Units promised to dispatches still waiting in the queue.
    fn reserved_units(&self) -> Vec<EntityId> {
        self.queue
            .iter()
            .filter_map(|q| match q {
                Queued::Dispatch {
                    unit: Some((entity, _)),
                    ..
                } => Some(entity.clone()),
                _ => None,
            })
            .collect()
    }

    fn apply_queued(&mut self, tick: u64, report: &mut TickReport) {
        while let Some(queued) = self.queue.pop_front() {
            match queued {
                Queued::SetParameter { metric, value } => {
                    match self.metrics.set_value(metric.as_str(), value) {
                        Ok(previous) => self.log_activity(
                            tick,
                            ActivityKind::ParameterSet,
                            format!("{metric} set from {previous:.2} to {value:.2}"),
                        ),
                        Err(e) => self.drop_command(tick, "set_parameter", &e.to_string(), report),
                    }
                }
                Queued::Resolve { alert } => {
                    match self.alerts.resolve(alert, tick, ResolveCause::Command) {
                        Ok(Change::Applied) => {
                            self.record_alert_event(
                                tick,
                                AlertEvent::Resolved {
                                    id: alert,
                                    cause: ResolveCause::Command,
                                },
                                report,
                            );
                        }
                        Ok(Change::Unchanged) => {}
                        Err(e) => self.drop_command(tick, "resolve_incident", &e.to_string(), report),
                    }
                }
                Queued::Dispatch { handle, alert, unit } => self.start_dispatch(tick, &handle, alert, unit, report),
                Queued::Release { handle } => match self.dispatch.release(&handle) {
                    Ok(ReleaseOutcome::Released(allocation)) => {
                        self.after_release(tick, &allocation, ReleaseReason::Command, report);
                    }
                    Ok(ReleaseOutcome::AlreadyReleased) => debug!(allocation = %handle.id, "already released"),
                    Err(e) => self.drop_command(tick, "release", &e.to_string(), report),
                },
            }
        }
    }

    fn start_dispatch(
        &mut self,
        tick: u64,
        handle: &AllocationHandle,
        alert: AlertId,
        unit: Option<(EntityId, Position)>,
        report: &mut TickReport,
    ) {
        if let Err(reason) = self.assign_reserved(handle, alert, unit.as_ref()) {
            self.release_allocation(tick, handle.id, ReleaseReason::Cancelled, report);
            self.drop_command(tick, "dispatch", &reason, report);
            return;
        }
        let entity = unit.map(|(entity, _)| entity);
        let message = entity.as_ref().map_or_else(
            || format!("{} allocated from {} to {alert}", handle.id, handle.pool),
            |e| format!("{e} dispatched from {} to {alert}", handle.pool),
        );
        info!(pool = %handle.pool, %alert, allocation = %handle.id, entity = ?entity, "unit dispatched");
        self.log_activity(tick, ActivityKind::UnitDispatched, message);
    }

    /// Hand a reserved allocation to its unit and alert. On failure only
    /// the reservation is left, for the caller to release.
    fn assign_reserved(
        &mut self,
        handle: &AllocationHandle,
        alert: AlertId,
        unit: Option<&(EntityId, Position)>,
    ) -> Result<(), String> {
        if self.dispatch.allocation(handle.id).is_none() {
            return Err(format!("{} is no longer reserved", handle.id));
        }
        self.alerts.dispatch_target(alert).map_err(|e| e.to_string())?;
        let mobilization = self
            .dispatch
            .pool(handle.pool.as_str())
            .map_or(0, ResourcePool::mobilization_ticks);

        if let Some((entity, target)) = unit {
            let assignment = Assignment {
                alert,
                allocation: handle.id,
                target: *target,
            };
            let mobilizing = mobilization > 0;
            self.entities
                .assign(entity, assignment, mobilizing)
                .map_err(|e| e.to_string())?;
            if mobilizing {
                let transition = Transition::MobilizationComplete { allocation: handle.id };
                if let Err(e) = self.clock.schedule(mobilization, transition) {
                    self.entities.release(handle.id);
                    return Err(e.to_string());
                }
            }
        }
        if let Err(e) = self.alerts.attach(alert, handle.id) {
            self.entities.release(handle.id);
            self.clock.cancel_allocation(handle.id);
            return Err(e.to_string());
        }
        Ok(())
    }

    fn drop_command(&mut self, tick: u64, name: &str, reason: &str, report: &mut TickReport) {
        warn!(command = name, reason, "queued command dropped");
        report.dropped_commands = report.dropped_commands.saturating_add(1);
        self.log_activity(tick, ActivityKind::CommandDropped, format!("{name} dropped: {reason}"));
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    fn fire_transitions(&mut self, tick: u64, report: &mut TickReport) {
        for transition in self.clock.take_due() {
            match transition {
                Transition::FlagReady { flag } => {
                    if self.flags.complete_activation(&flag) {
                        self.log_activity(tick, ActivityKind::FlagChanged, format!("{flag} is now On"));
                    }
                }
                Transition::MobilizationComplete { allocation } => {
                    match self.entities.start_moving(allocation) {
                        Some(entity) => debug!(%entity, %allocation, "mobilization complete"),
                        None => debug!(%allocation, "stale mobilization ignored"),
                    }
                }
                Transition::DwellComplete { allocation } => {
                    self.release_allocation(tick, allocation, ReleaseReason::Dwell, report);
                }
            }
        }
    }

    fn reconcile_entity(&mut self, tick: u64, event: EntityEvent, report: &mut TickReport) {
        match event {
            EntityEvent::Arrived {
                entity,
                alert,
                allocation,
            } => {
                self.log_activity(tick, ActivityKind::UnitArrived, format!("{entity} arrived at {alert}"));
                report.arrivals.push(entity);
                match self.alerts.resolve(alert, tick, ResolveCause::Arrival) {
                    Ok(Change::Applied) => self.record_alert_event(
                        tick,
                        AlertEvent::Resolved {
                            id: alert,
                            cause: ResolveCause::Arrival,
                        },
                        report,
                    ),
                    Ok(Change::Unchanged) => {}
                    Err(e) => warn!(%alert, error = %e, "arrival at unknown alert"),
                }
                let dwell = self
                    .dispatch
                    .allocation(allocation)
                    .and_then(|a| self.dispatch.pool(a.pool.as_str()))
                    .and_then(|p| p.dwell_ticks());
                if let Some(delay) = dwell {
                    if let Err(e) = self.clock.schedule(delay, Transition::DwellComplete { allocation }) {
                        error!(%allocation, error = %e, "cannot schedule dwell release, releasing now");
                        self.release_allocation(tick, allocation, ReleaseReason::Dwell, report);
                    }
                }
            }
            EntityEvent::Recalled {
                entity,
                alert,
                allocation,
            } => {
                self.log_activity(
                    tick,
                    ActivityKind::UnitRecalled,
                    format!("{entity} recalled, {alert} no longer active"),
                );
                report.recalls.push(entity);
                self.release_allocation(tick, allocation, ReleaseReason::Recall, report);
            }
        }
    }

    /// Release allocations without a unit whose incident has closed.
    fn reconcile_allocations(&mut self, tick: u64, report: &mut TickReport) {
        let completed: Vec<AllocationId> = self
            .dispatch
            .outstanding()
            .filter(|a| a.entity.is_none())
            .filter(|a| match &a.consumer {
                ConsumerRef::Alert(alert) => !self.alerts.is_active(*alert),
                ConsumerRef::External(_) => false,
            })
            .map(|a| a.id)
            .collect();
        for allocation in completed {
            self.release_allocation(tick, allocation, ReleaseReason::Completed, report);
        }
    }

    fn release_allocation(
        &mut self,
        tick: u64,
        allocation: AllocationId,
        reason: ReleaseReason,
        report: &mut TickReport,
    ) {
        match self.dispatch.release_id(allocation) {
            Ok(ReleaseOutcome::Released(released)) => self.after_release(tick, &released, reason, report),
            Ok(ReleaseOutcome::AlreadyReleased) => debug!(%allocation, "allocation already released"),
            Err(e) => error!(%allocation, error = %e, "cannot release allocation"),
        }
    }

    fn after_release(
        &mut self,
        tick: u64,
        allocation: &vigil_types::Allocation,
        reason: ReleaseReason,
        report: &mut TickReport,
    ) {
        self.entities.release(allocation.id);
        self.clock.cancel_allocation(allocation.id);
        if let ConsumerRef::Alert(alert) = allocation.consumer {
            self.alerts.detach(alert, allocation.id);
        }
        report.released.push(allocation.id);
        let holder = allocation
            .entity
            .as_ref()
            .map_or_else(|| allocation.id.to_string(), ToString::to_string);
        info!(allocation = %allocation.id, pool = %allocation.pool, reason = reason.label(), "unit released");
        self.log_activity(
            tick,
            ActivityKind::UnitReleased,
            format!("{holder} {} to {}", reason.label(), allocation.pool),
        );
    }

    fn record_alert_event(&mut self, tick: u64, event: AlertEvent, report: &mut TickReport) {
        match event {
            AlertEvent::Raised(id) => {
                let message = self.alerts.get(id).map_or_else(
                    || format!("{id} raised"),
                    |a| format!("{id} {:?} {} at {}: {}", a.severity, a.category, a.scope, a.message),
                );
                report.raised.push(id);
                self.log_activity(tick, ActivityKind::AlertRaised, message);
            }
            AlertEvent::Resolved { id, cause } => {
                report.resolved.push(id);
                let how = match cause {
                    ResolveCause::Cleared => "condition cleared",
                    ResolveCause::Arrival => "unit on scene",
                    ResolveCause::Command => "closed by operator",
                };
                self.log_activity(tick, ActivityKind::AlertResolved, format!("{id} resolved: {how}"));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    fn log_activity(&mut self, tick: u64, kind: ActivityKind, message: String) {
        self.activity.push(tick, ActivityEntry { tick, kind, message });
    }

    fn publish(&mut self) {
        self.snapshot = Arc::new(Snapshot {
            domain: self.domain.clone(),
            tick: self.clock.tick(),
            flags: self.flags.states(),
            metrics: self.metrics.views(),
            histories: self.metrics.histories(),
            alerts: self.alerts.visible(),
            incident_log: self.alerts.incident_log(),
            entities: self.entities.views(),
            resource_pools: self.dispatch.views(),
            activity: self.activity.values(),
        });
    }
}

fn empty_snapshot(domain: &str) -> Snapshot {
    Snapshot {
        domain: domain.to_owned(),
        tick: 0,
        flags: std::collections::BTreeMap::new(),
        metrics: std::collections::BTreeMap::new(),
        histories: std::collections::BTreeMap::new(),
        alerts: Vec::new(),
        incident_log: Vec::new(),
        entities: Vec::new(),
        resource_pools: Vec::new(),
        activity: Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vigil_types::{AlertStatus, Comparator, EntityStatus, FlagState};

    use super::*;
    use crate::config::{
        AlertRuleConfig, DependencyConfig, DependencyRule, EntityConfig, FlagConfig, MetricConfig,
        ResourcePoolConfig,
    };

    fn config() -> EngineConfig {
        EngineConfig {
            flags: vec![FlagConfig {
                name: "rain".to_owned(),
                initial: false,
                activation_delay_ticks: 0,
            }],
            metrics: vec![
                MetricConfig::bounded("load", 50.0, 0.0, 100.0).with_walk(0.0, 0.0),
                MetricConfig::bounded("queue", 10.0, 0.0, 100.0).with_walk(0.0, 0.0),
            ],
            alert_rules: vec![AlertRuleConfig::new("busy", "load", Comparator::Gt, 70.0)],
            ..EngineConfig::default()
        }
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut bad = config();
        bad.dependencies = vec![
            DependencyConfig::new("load", "queue", DependencyRule::Linear { coefficient: 1.0, pivot: 0.0 }),
            DependencyConfig::new("queue", "load", DependencyRule::Linear { coefficient: 1.0, pivot: 0.0 }),
        ];
        assert!(matches!(
            SimulationEngine::new(&bad),
            Err(ConfigError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn snapshot_is_stable_between_ticks() {
        let mut engine = SimulationEngine::new(&config()).unwrap();
        assert_eq!(engine.snapshot().tick, 0);
        assert!(Arc::ptr_eq(&engine.snapshot(), &engine.snapshot()));
        engine.tick();
        let a = engine.snapshot();
        assert!(Arc::ptr_eq(&a, &engine.snapshot()));
        assert_eq!(a.tick, 1);
    }

    #[test]
    fn set_parameter_applies_on_next_tick() {
        let mut engine = SimulationEngine::new(&config()).unwrap();
        let outcome = engine
            .submit(Command::SetParameter {
                metric: "load".into(),
                value: 80.0,
            })
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Queued { applies_at: 1 });
        assert_eq!(engine.queued_commands(), 1);
        assert!(engine.snapshot().metric("load").is_some_and(|m| (m.value - 50.0).abs() < 1e-9));

        let report = engine.tick();
        assert_eq!(engine.queued_commands(), 0);
        assert_eq!(report.raised.len(), 1);
        let snapshot = engine.snapshot();
        assert!(snapshot.metric("load").is_some_and(|m| (m.value - 80.0).abs() < 1e-9));
        assert!(snapshot.activity.iter().any(|e| e.kind == ActivityKind::ParameterSet));
        assert!(snapshot.activity.first().is_some_and(|e| e.kind == ActivityKind::AlertRaised));
    }

    #[test]
    fn toggle_and_acknowledge_apply_immediately() {
        let mut engine = SimulationEngine::new(&config()).unwrap();
        let toggled = engine
            .submit(Command::ToggleFlag {
                flag: "rain".to_owned(),
            })
            .unwrap();
        assert_eq!(
            toggled,
            CommandOutcome::FlagToggled {
                flag: "rain".to_owned(),
                state: FlagState::On,
            }
        );

        engine
            .submit(Command::SetParameter {
                metric: "load".into(),
                value: 90.0,
            })
            .unwrap();
        let report = engine.tick();
        let alert = *report.raised.first().unwrap();
        assert_eq!(
            engine.submit(Command::AcknowledgeAlert { alert }),
            Ok(CommandOutcome::Acknowledged { alert })
        );
        assert_eq!(
            engine.submit(Command::AcknowledgeAlert { alert }),
            Ok(CommandOutcome::Unchanged)
        );
        engine.tick();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.alert(alert).unwrap().status, AlertStatus::Acknowledged);
        assert!(snapshot.flags.get("rain").is_some_and(|f| f.is_on()));
    }

    #[test]
    fn duplicate_resolve_in_queue_resolves_once() {
        let mut engine = SimulationEngine::new(&config()).unwrap();
        engine
            .submit(Command::SetParameter {
                metric: "load".into(),
                value: 90.0,
            })
            .unwrap();
        let alert = *engine.tick().raised.first().unwrap();
        engine.submit(Command::ResolveIncident { alert }).unwrap();
        engine.submit(Command::ResolveIncident { alert }).unwrap();
        let report = engine.tick();
        assert_eq!(report.resolved, vec![alert]);
        assert_eq!(report.dropped_commands, 0);
    }

    #[test]
    fn resolving_while_the_condition_holds_raises_a_fresh_alert() {
        let mut engine = SimulationEngine::new(&config()).unwrap();
        engine
            .submit(Command::SetParameter {
                metric: "load".into(),
                value: 90.0,
            })
            .unwrap();
        let alert = *engine.tick().raised.first().unwrap();
        engine.submit(Command::ResolveIncident { alert }).unwrap();

        // Resolved is terminal, so a threshold still breached after the
        // operator closes the incident opens a new one in the same tick.
        let report = engine.tick();
        assert_eq!(report.resolved, vec![alert]);
        assert_eq!(report.raised.len(), 1);
        let fresh = *report.raised.first().unwrap();
        assert_ne!(fresh, alert);
        assert_eq!(report.active_alerts, 1);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.alert(alert).unwrap().status, AlertStatus::Resolved);
        assert_eq!(snapshot.alert(fresh).unwrap().status, AlertStatus::Pending);
        assert_eq!(
            snapshot.alert(fresh).unwrap().dedup_key,
            snapshot.alert(alert).unwrap().dedup_key
        );
    }

    fn dispatch_config() -> EngineConfig {
        EngineConfig {
            metrics: vec![MetricConfig::bounded("load", 90.0, 0.0, 100.0).with_walk(0.0, 0.0)],
            alert_rules: vec![AlertRuleConfig {
                location: Some(Position::new(50.0, 50.0)),
                ..AlertRuleConfig::new("busy", "load", Comparator::Gt, 70.0)
            }],
            entities: vec![
                EntityConfig::new("u1", Position::new(40.0, 40.0)).in_pool("units").with_speed(5.0),
                EntityConfig::new("u2", Position::new(90.0, 90.0)).in_pool("units").with_speed(5.0),
            ],
            resource_pools: vec![ResourcePoolConfig::new("units", 2)],
            ..EngineConfig::default()
        }
    }

    #[test]
    fn dispatch_reserves_now_and_moves_units_on_the_next_tick() {
        let mut engine = SimulationEngine::new(&dispatch_config()).unwrap();
        let alert = *engine.tick().raised.first().unwrap();
        let dispatch = || Command::Dispatch {
            pool: "units".into(),
            alert,
        };

        let first = engine.submit(dispatch()).unwrap();
        assert!(matches!(
            first,
            CommandOutcome::Dispatched { ref entity, applies_at: 2, .. } if *entity == Some(EntityId::from("u1"))
        ));
        let second = engine.submit(dispatch()).unwrap();
        assert!(matches!(
            second,
            CommandOutcome::Dispatched { ref entity, .. } if *entity == Some(EntityId::from("u2"))
        ));
        assert_eq!(
            engine.submit(dispatch()),
            Err(CommandError::NoCapacity { pool: "units".into() })
        );

        // Capacity is reserved, but nothing has moved yet.
        assert_eq!(engine.dispatch.pool("units").unwrap().available(), 0);
        assert_eq!(engine.verify_conservation(), ConservationResult::Balanced);
        for id in ["u1", "u2"] {
            let unit = engine.entities.view(id).unwrap();
            assert_eq!(unit.status, EntityStatus::Idle);
            assert_eq!(unit.target_alert, None);
        }
        let pending = engine.alerts.get(alert).unwrap();
        assert_eq!(pending.status, AlertStatus::Pending);
        assert!(pending.allocations.is_empty());
        assert_eq!(engine.queued_commands(), 2);

        engine.tick();
        for id in ["u1", "u2"] {
            let unit = engine.entities.view(id).unwrap();
            assert_eq!(unit.status, EntityStatus::Dispatched);
            assert_eq!(unit.target_alert, Some(alert));
        }
        let dispatched = engine.alerts.get(alert).unwrap();
        assert_eq!(dispatched.status, AlertStatus::Dispatched);
        assert_eq!(dispatched.allocations.len(), 2);
        assert_eq!(engine.queued_commands(), 0);
    }

    #[test]
    fn queued_dispatch_to_a_closed_alert_is_dropped() {
        let mut engine = SimulationEngine::new(&dispatch_config()).unwrap();
        let alert = *engine.tick().raised.first().unwrap();
        engine.submit(Command::ResolveIncident { alert }).unwrap();
        engine
            .submit(Command::Dispatch {
                pool: "units".into(),
                alert,
            })
            .unwrap();

        let report = engine.tick();
        assert_eq!(report.dropped_commands, 1);
        assert_eq!(report.released.len(), 1);
        assert_eq!(engine.dispatch.pool("units").unwrap().available(), 2);
        assert_eq!(engine.entities.view("u1").unwrap().status, EntityStatus::Idle);
        assert!(engine.snapshot().activity.iter().any(|e| e.kind == ActivityKind::CommandDropped));
    }

    #[test]
    fn release_waits_for_the_next_tick() {
        let mut engine = SimulationEngine::new(&dispatch_config()).unwrap();
        let alert = *engine.tick().raised.first().unwrap();
        engine.submit(Command::AcknowledgeAlert { alert }).unwrap();
        let outcome = engine
            .submit(Command::Dispatch {
                pool: "units".into(),
                alert,
            })
            .unwrap();
        let handle = match outcome {
            CommandOutcome::Dispatched { handle, .. } => Some(handle),
            _ => None,
        }
        .unwrap();
        engine.tick();

        assert_eq!(
            engine.submit(Command::Release { handle: handle.clone() }),
            Ok(CommandOutcome::Queued { applies_at: 3 })
        );
        assert_eq!(engine.entities.view("u1").unwrap().status, EntityStatus::Dispatched);
        assert_eq!(engine.dispatch.pool("units").unwrap().available(), 1);

        let report = engine.tick();
        assert_eq!(report.released, vec![handle.id]);
        assert_eq!(engine.dispatch.pool("units").unwrap().available(), 2);
        assert_ne!(engine.entities.view("u1").unwrap().status, EntityStatus::Dispatched);
        assert_eq!(engine.alerts.get(alert).unwrap().status, AlertStatus::Acknowledged);
    }

    #[test]
    fn flush_returns_reserved_capacity() {
        let mut engine = SimulationEngine::new(&dispatch_config()).unwrap();
        let alert = *engine.tick().raised.first().unwrap();
        engine
            .submit(Command::Dispatch {
                pool: "units".into(),
                alert,
            })
            .unwrap();
        engine
            .submit(Command::SetParameter {
                metric: "load".into(),
                value: 10.0,
            })
            .unwrap();

        let flush = engine.flush_pending();
        assert_eq!(flush.dispatches_cancelled, 1);
        assert_eq!(engine.snapshot().pool("units").unwrap().available, 2);
        assert_eq!(engine.queued_commands(), 1);
        assert_eq!(engine.verify_conservation(), ConservationResult::Balanced);
    }

    #[test]
    fn flush_with_nothing_pending_is_empty() {
        let mut engine = SimulationEngine::new(&config()).unwrap();
        engine.tick();
        assert_eq!(engine.flush_pending(), FlushReport::default());
        assert_eq!(engine.current_tick(), 1);
        assert_eq!(engine.verify_conservation(), ConservationResult::Balanced);
    }
}
