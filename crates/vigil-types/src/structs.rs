//! Core data structures published by the engine.
//!
//! Everything here is plain data: the engine owns the live state and hands
//! out immutable [`Snapshot`] values built from these types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ActivityKind, AlertStatus, EntityStatus, FlagState, Severity};
use crate::ids::{AlertId, AllocationId, EntityId, MetricId, PoolId};

/// Lower bound of both map axes.
pub const MAP_MIN: f64 = 0.0;

/// Upper bound of both map axes.
pub const MAP_MAX: f64 = 100.0;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A point on the normalized `[0, 100] x [0, 100]` map.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

/// Clamp one coordinate into the map. NaN collapses to [`MAP_MIN`].
fn clamp_axis(value: f64) -> f64 {
    if value.is_nan() {
        MAP_MIN
    } else {
        value.clamp(MAP_MIN, MAP_MAX)
    }
}

impl Position {
    /// Create a position without clamping.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Return this position moved inside the map bounds.
    pub fn clamped(self) -> Self {
        Self {
            x: clamp_axis(self.x),
            y: clamp_axis(self.y),
        }
    }

    /// Whether both coordinates lie inside the map bounds.
    pub fn is_within_bounds(self) -> bool {
        (MAP_MIN..=MAP_MAX).contains(&self.x) && (MAP_MIN..=MAP_MAX).contains(&self.y)
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(self, other: Self) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Translate by `(dx, dy)` and clamp into the map.
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy).clamped()
    }

    /// Move at most `max_step` along the straight line toward `target`.
    ///
    /// Never overshoots: when the remaining distance is at most `max_step`
    /// the result is `target` itself. A non-positive step stays in place.
    pub fn step_toward(self, target: Self, max_step: f64) -> Self {
        let remaining = self.distance_to(target);
        if max_step.is_nan() || max_step <= 0.0 || !remaining.is_finite() {
            return self.clamped();
        }
        if remaining <= max_step {
            return target.clamped();
        }
        let ratio = max_step / remaining;
        Self::new(
            (target.x - self.x).mul_add(ratio, self.x),
            (target.y - self.y).mul_add(ratio, self.y),
        )
        .clamped()
    }
}

// ---------------------------------------------------------------------------
// Metrics and histories
// ---------------------------------------------------------------------------

/// A timestamped sample in a history buffer. Timestamps are tick numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Sample<T> {
    /// Tick at which the sample was recorded.
    pub tick: u64,
    /// Recorded value.
    pub value: T,
}

/// Published state of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MetricView {
    /// Metric identifier.
    pub id: MetricId,
    /// Current value.
    pub value: f64,
    /// Recent rate of change (per tick).
    pub trend: f64,
    /// Display unit, if any.
    pub unit: Option<String>,
    /// Lower bound; `None` for unbounded metrics.
    pub min: Option<f64>,
    /// Upper bound; `None` for unbounded metrics.
    pub max: Option<f64>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// What raised an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AlertOrigin {
    /// A threshold rule on a metric.
    Threshold {
        /// Rule name.
        rule: String,
        /// Watched metric.
        metric: MetricId,
    },
    /// A random incident generator.
    Generator {
        /// Generator name.
        generator: String,
    },
}

/// An alert or incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Alert {
    /// Unique identifier.
    pub id: AlertId,
    /// Category (e.g. `fire`, `capacity`).
    pub category: String,
    /// Severity.
    pub severity: Severity,
    /// Location or scope label (e.g. `Sector 7`).
    pub scope: String,
    /// Human-readable message.
    pub message: String,
    /// Map position, when the alert can be a dispatch target.
    pub location: Option<Position>,
    /// What raised the alert.
    pub origin: AlertOrigin,
    /// De-duplication key. At most one active alert per key.
    pub dedup_key: String,
    /// Lifecycle status.
    pub status: AlertStatus,
    /// Whether an operator acknowledged the alert. Survives dispatch, so a
    /// unit returning without resolving the alert restores the right status.
    #[serde(default)]
    pub acknowledged: bool,
    /// Tick at which the alert was created.
    pub created_tick: u64,
    /// Last tick at which the triggering condition was observed.
    pub last_seen_tick: u64,
    /// Tick at which the alert was resolved.
    pub resolved_tick: Option<u64>,
    /// Last observed metric value, for threshold alerts.
    pub observed: Option<f64>,
    /// Allocations currently serving this alert.
    pub allocations: Vec<AllocationId>,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Who holds an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case", tag = "kind", content = "ref")]
pub enum ConsumerRef {
    /// An alert or incident.
    Alert(AlertId),
    /// A free-form consumer label.
    External(String),
}

/// Handle returned by a successful allocation. Needed to release it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AllocationHandle {
    /// Pool the allocation was taken from.
    pub pool: PoolId,
    /// Allocation identifier.
    pub id: AllocationId,
}

/// An outstanding allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Allocation {
    /// Allocation identifier.
    pub id: AllocationId,
    /// Pool the capacity was taken from.
    pub pool: PoolId,
    /// Holder of the allocation.
    pub consumer: ConsumerRef,
    /// Entity carrying out the allocation, for pools with member units.
    pub entity: Option<EntityId>,
    /// Tick at which the allocation was made.
    pub allocated_tick: u64,
}

/// Published state of a resource pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PoolView {
    /// Pool identifier.
    pub id: PoolId,
    /// Display label.
    pub label: String,
    /// Total capacity.
    pub total: u32,
    /// Capacity currently available.
    pub available: u32,
    /// Outstanding allocations, oldest first.
    pub allocations: Vec<Allocation>,
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Published state of a simulated entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EntityView {
    /// Entity identifier.
    pub id: EntityId,
    /// Display label.
    pub label: String,
    /// Free-form kind (e.g. `ambulance`, `truck`).
    pub kind: String,
    /// Pool the entity belongs to, if any.
    pub pool: Option<PoolId>,
    /// Current position.
    pub position: Position,
    /// Current status.
    pub status: EntityStatus,
    /// Current movement target, if any.
    pub target: Option<Position>,
    /// Alert the entity is assigned to, if any.
    pub target_alert: Option<AlertId>,
    /// Allocation the entity is carrying out, if any.
    pub allocation: Option<AllocationId>,
    /// Distance covered per tick.
    pub speed: f64,
}

// ---------------------------------------------------------------------------
// Activity and snapshot
// ---------------------------------------------------------------------------

/// One line in the activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActivityEntry {
    /// Tick at which it happened.
    pub tick: u64,
    /// What happened.
    pub kind: ActivityKind,
    /// Human-readable description.
    pub message: String,
}

/// Immutable view of the whole engine state after a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Snapshot {
    /// Domain name of the engine (e.g. `waste`).
    pub domain: String,
    /// Tick that produced this snapshot (0 before the first tick).
    pub tick: u64,
    /// Flag states keyed by name.
    pub flags: BTreeMap<String, FlagState>,
    /// Metric values keyed by id.
    pub metrics: BTreeMap<MetricId, MetricView>,
    /// Metric histories keyed by id, each in its buffer's configured order.
    pub histories: BTreeMap<MetricId, Vec<Sample<f64>>>,
    /// Visible alerts, most severe first, then newest first.
    pub alerts: Vec<Alert>,
    /// Retired alerts, newest first.
    pub incident_log: Vec<Alert>,
    /// Entities in configuration order.
    pub entities: Vec<EntityView>,
    /// Resource pools in configuration order.
    pub resource_pools: Vec<PoolView>,
    /// Activity log, newest first.
    pub activity: Vec<ActivityEntry>,
}

impl Snapshot {
    /// Look up a metric view by id.
    pub fn metric(&self, id: &str) -> Option<&MetricView> {
        self.metrics.get(id)
    }

    /// Look up a visible alert by id.
    pub fn alert(&self, id: AlertId) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    /// Look up an entity by id.
    pub fn entity(&self, id: &str) -> Option<&EntityView> {
        self.entities.iter().find(|e| e.id.as_str() == id)
    }

    /// Look up a pool by id.
    pub fn pool(&self, id: &str) -> Option<&PoolView> {
        self.resource_pools.iter().find(|p| p.id.as_str() == id)
    }

    /// Alerts that are not yet resolved.
    pub fn active_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(|a| a.status.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn clamped_keeps_points_on_the_map() {
        let p = Position::new(-5.0, 140.0).clamped();
        assert!(close(p.x, MAP_MIN));
        assert!(close(p.y, MAP_MAX));
        assert!(p.is_within_bounds());
    }

    #[test]
    fn clamped_collapses_nan() {
        let p = Position::new(f64::NAN, 50.0).clamped();
        assert!(close(p.x, MAP_MIN));
        assert!(close(p.y, 50.0));
    }

    #[test]
    fn step_toward_moves_exactly_max_step() {
        let start = Position::new(0.0, 0.0);
        let next = start.step_toward(Position::new(30.0, 40.0), 5.0);
        assert!(close(next.x, 3.0));
        assert!(close(next.y, 4.0));
        assert!(close(start.distance_to(next), 5.0));
    }

    #[test]
    fn step_toward_never_overshoots() {
        let target = Position::new(12.0, 10.0);
        let next = Position::new(10.0, 10.0).step_toward(target, 5.0);
        assert_eq!(next, target);
    }

    #[test]
    fn step_toward_with_zero_speed_stays() {
        let start = Position::new(10.0, 10.0);
        assert_eq!(start.step_toward(Position::new(50.0, 50.0), 0.0), start);
    }
}
