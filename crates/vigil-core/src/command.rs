//! Commands submitted by the presentation layer.
//!
//! Each [`Command`] is validated against current state when it is
//! submitted. State flips (`ToggleFlag`, `AcknowledgeAlert`) apply
//! immediately. Everything that moves units, changes values or closes
//! incidents is queued and applied at the start of the next tick.
//!
//! `Dispatch` reserves pool capacity at submit time so the caller learns
//! the real outcome, e.g. [`CommandError::NoCapacity`], and two dispatches
//! between ticks cannot claim the same unit. The unit is assigned and the
//! alert marked dispatched when the reservation is applied.

use serde::{Deserialize, Serialize};
use vigil_types::{AlertId, AllocationHandle, EntityId, FlagState, MetricId, PoolId};

use crate::alerts::AlertError;
use crate::dispatch::AllocationError;
use crate::entities::EntityError;
use crate::flags::FlagError;
use crate::metrics::MetricError;

/// An external request to change engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Flip a named flag.
    ToggleFlag {
        /// Flag name.
        flag: String,
    },
    /// Set a metric to a value at the start of the next tick.
    SetParameter {
        /// Target metric.
        metric: MetricId,
        /// New value.
        value: f64,
    },
    /// Allocate a unit from a pool and send it to an alert.
    Dispatch {
        /// Pool to allocate from.
        pool: PoolId,
        /// Target alert.
        alert: AlertId,
    },
    /// Return an allocation to its pool.
    Release {
        /// Handle returned by the dispatch.
        handle: AllocationHandle,
    },
    /// Acknowledge an alert.
    AcknowledgeAlert {
        /// The alert.
        alert: AlertId,
    },
    /// Resolve an incident at the start of the next tick.
    ResolveIncident {
        /// The alert.
        alert: AlertId,
    },
}

impl Command {
    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ToggleFlag { .. } => "toggle_flag",
            Self::SetParameter { .. } => "set_parameter",
            Self::Dispatch { .. } => "dispatch",
            Self::Release { .. } => "release",
            Self::AcknowledgeAlert { .. } => "acknowledge_alert",
            Self::ResolveIncident { .. } => "resolve_incident",
        }
    }
}

/// Successful result of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The flag changed to `state`.
    FlagToggled {
        /// Flag name.
        flag: String,
        /// New state.
        state: FlagState,
    },
    /// The command will be applied at the start of tick `applies_at`.
    Queued {
        /// Tick at which the command applies.
        applies_at: u64,
    },
    /// Capacity was reserved; the unit is sent at the start of tick
    /// `applies_at`.
    Dispatched {
        /// Handle needed to release the allocation.
        handle: AllocationHandle,
        /// Unit reserved, for pools with member units.
        entity: Option<EntityId>,
        /// Tick at which the unit is assigned.
        applies_at: u64,
    },
    /// The alert was acknowledged.
    Acknowledged {
        /// The alert.
        alert: AlertId,
    },
    /// Valid, but state already matched.
    Unchanged,
}

/// Why a command was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The pool has no available capacity.
    #[error("no capacity left in pool {pool}")]
    NoCapacity {
        /// The exhausted pool.
        pool: PoolId,
    },

    /// The command names something that does not exist.
    #[error("unknown {kind}: {id}")]
    UnknownReference {
        /// Kind of the missing item.
        kind: &'static str,
        /// Its id.
        id: String,
    },

    /// The target is in a state that does not allow the command.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// What is wrong.
        reason: String,
    },

    /// A supplied value is unacceptable.
    #[error("invalid value: {reason}")]
    InvalidValue {
        /// What is wrong.
        reason: String,
    },

    /// The engine is no longer accepting commands.
    #[error("engine stopped")]
    Stopped,
}

impl From<AllocationError> for CommandError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::NoCapacity(pool) => Self::NoCapacity { pool },
            AllocationError::UnknownPool(pool) => Self::UnknownReference {
                kind: "pool",
                id: pool.to_string(),
            },
            AllocationError::UnknownAllocation(id) => Self::UnknownReference {
                kind: "allocation",
                id: id.to_string(),
            },
        }
    }
}

impl From<AlertError> for CommandError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::Unknown(id) => Self::UnknownReference {
                kind: "alert",
                id: id.to_string(),
            },
            AlertError::InvalidState { .. } => Self::InvalidState {
                reason: err.to_string(),
            },
        }
    }
}

impl From<FlagError> for CommandError {
    fn from(err: FlagError) -> Self {
        match err {
            FlagError::Unknown(flag) => Self::UnknownReference { kind: "flag", id: flag },
            FlagError::Clock(e) => Self::InvalidState {
                reason: e.to_string(),
            },
        }
    }
}

impl From<MetricError> for CommandError {
    fn from(err: MetricError) -> Self {
        match err {
            MetricError::Unknown(metric) => Self::UnknownReference {
                kind: "metric",
                id: metric.to_string(),
            },
            MetricError::InvalidValue { .. } => Self::InvalidValue {
                reason: err.to_string(),
            },
        }
    }
}

impl From<EntityError> for CommandError {
    fn from(err: EntityError) -> Self {
        match err {
            EntityError::Unknown(entity) => Self::UnknownReference {
                kind: "entity",
                id: entity.to_string(),
            },
            EntityError::Unavailable { .. } => Self::InvalidState {
                reason: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vigil_types::AllocationId;

    use super::*;

    #[test]
    fn commands_use_tagged_json() {
        let command = Command::Dispatch {
            pool: PoolId::from("ambulances"),
            alert: AlertId(3),
        };
        let json = serde_json::to_string(&command).unwrap();
        assert_eq!(json, r#"{"type":"dispatch","pool":"ambulances","alert":3}"#);
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, command);
    }

    #[test]
    fn release_parses_from_json() {
        let json = r#"{"type":"release","handle":{"pool":"trucks","id":4}}"#;
        let command: Command = serde_json::from_str(json).unwrap();
        assert_eq!(
            command,
            Command::Release {
                handle: AllocationHandle {
                    pool: PoolId::from("trucks"),
                    id: AllocationId(4),
                },
            }
        );
        assert_eq!(command.name(), "release");
    }

    #[test]
    fn allocation_errors_map_to_command_errors() {
        let err = CommandError::from(AllocationError::NoCapacity(PoolId::from("a")));
        assert_eq!(err, CommandError::NoCapacity { pool: PoolId::from("a") });
        let err = CommandError::from(AllocationError::UnknownAllocation(AllocationId(9)));
        assert_eq!(
            err,
            CommandError::UnknownReference {
                kind: "allocation",
                id: "ALC-0009".to_owned(),
            }
        );
    }
}
