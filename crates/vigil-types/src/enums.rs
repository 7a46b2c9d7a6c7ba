//! Enumeration types shared between the engine and its consumers.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Severity of an alert. Ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no action expected.
    Low,
    /// Worth watching.
    Medium,
    /// Needs attention soon.
    High,
    /// Needs attention now.
    Critical,
}

/// Lifecycle status of an alert or incident.
///
/// `Pending -> Acknowledged/Dispatched -> Resolved`. `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Raised and not yet handled.
    Pending,
    /// Seen by an operator.
    Acknowledged,
    /// At least one unit has been dispatched to it.
    Dispatched,
    /// Closed. Kept visible for a grace period, then moved to the log.
    Resolved,
}

impl AlertStatus {
    /// Whether the alert still participates in de-duplication.
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

/// Comparison applied between a value and a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum Comparator {
    /// `value > threshold`
    #[serde(rename = ">")]
    Gt,
    /// `value >= threshold`
    #[serde(rename = ">=")]
    Ge,
    /// `value < threshold`
    #[serde(rename = "<")]
    Lt,
    /// `value <= threshold`
    #[serde(rename = "<=")]
    Le,
}

impl Comparator {
    /// Evaluate the comparison. A non-finite `value` never satisfies it.
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self {
            Self::Gt => value > threshold,
            Self::Ge => value >= threshold,
            Self::Lt => value < threshold,
            Self::Le => value <= threshold,
        }
    }

    /// Operator symbol used in messages.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Externally visible status of a simulated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    /// Wandering near its position, available for dispatch.
    Idle,
    /// Following a patrol route, available for dispatch.
    Moving,
    /// Travelling to an assigned target.
    Dispatched,
    /// Reached its target and waiting to be released.
    Arrived,
    /// Assigned but not yet moving (mobilizing).
    Busy,
}

// ---------------------------------------------------------------------------
// Histories and flags
// ---------------------------------------------------------------------------

/// Presentation order of a history buffer.
///
/// Charts read oldest-to-newest; logs read newest-to-oldest. Every buffer
/// states its order explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum HistoryOrder {
    /// Chart order: newest sample last.
    OldestFirst,
    /// Log order: newest sample first.
    NewestFirst,
}

/// State of a named boolean flag (weather toggles, camera feeds, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum FlagState {
    /// Inactive.
    Off,
    /// Switched on, becomes [`FlagState::On`] at `ready_at`.
    Activating {
        /// Tick at which the flag turns on.
        ready_at: u64,
    },
    /// Active.
    On,
}

impl FlagState {
    /// Whether the flag currently takes effect.
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

/// Kind of an activity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A new alert or incident was raised.
    AlertRaised,
    /// An operator acknowledged an alert.
    AlertAcknowledged,
    /// An alert or incident was resolved.
    AlertResolved,
    /// A unit or resource was dispatched.
    UnitDispatched,
    /// A dispatched unit reached its target.
    UnitArrived,
    /// A unit was released back to its pool.
    UnitReleased,
    /// A unit was redirected because its target disappeared.
    UnitRecalled,
    /// A flag changed state.
    FlagChanged,
    /// A metric was set by command.
    ParameterSet,
    /// A metric produced a non-finite value and was restored.
    MetricSanitized,
    /// A queued command could no longer be applied.
    CommandDropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn comparator_rejects_non_finite() {
        assert!(!Comparator::Gt.holds(f64::NAN, 0.0));
        assert!(!Comparator::Lt.holds(f64::NEG_INFINITY, 0.0));
    }

    #[test]
    fn comparator_boundaries() {
        assert!(Comparator::Ge.holds(90.0, 90.0));
        assert!(!Comparator::Gt.holds(90.0, 90.0));
        assert!(Comparator::Le.holds(10.0, 10.0));
        assert!(Comparator::Lt.holds(9.5, 10.0));
    }

    #[test]
    fn comparator_uses_symbols_in_yaml_and_json() {
        let parsed: Result<Comparator, _> = serde_json::from_str(r#"">=""#);
        assert!(matches!(parsed, Ok(Comparator::Ge)));
    }

    #[test]
    fn resolved_is_not_active() {
        assert!(AlertStatus::Pending.is_active());
        assert!(AlertStatus::Dispatched.is_active());
        assert!(!AlertStatus::Resolved.is_active());
    }

    #[test]
    fn flag_state_serializes_tagged() {
        let json = serde_json::to_string(&FlagState::Activating { ready_at: 4 }).ok();
        assert_eq!(json.as_deref(), Some(r#"{"state":"activating","ready_at":4}"#));
    }
}
