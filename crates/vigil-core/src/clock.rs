//! Simulation clock and delayed transitions.
//!
//! The clock is the single source of truth for simulated time. It counts
//! ticks with checked arithmetic and holds the queue of transitions that
//! were scheduled to take effect at a later tick: flags finishing their
//! activation delay, units finishing mobilization, units finishing their
//! dwell time on scene.
//!
//! Due transitions are handed out in `(due tick, scheduling order)` order,
//! so processing them is deterministic.

use std::collections::BTreeMap;

use vigil_types::AllocationId;

/// Errors that can occur during clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,
}

/// A state change that takes effect at a later tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A flag finishes its activation delay and turns on.
    FlagReady {
        /// Flag name.
        flag: String,
    },
    /// A dispatched unit finishes mobilizing and starts moving.
    MobilizationComplete {
        /// Allocation the unit is carrying out.
        allocation: AllocationId,
    },
    /// A unit finishes its dwell time on scene and is released.
    DwellComplete {
        /// Allocation to release.
        allocation: AllocationId,
    },
}

impl Transition {
    /// Allocation this transition concerns, if any.
    pub const fn allocation(&self) -> Option<AllocationId> {
        match self {
            Self::FlagReady { .. } => None,
            Self::MobilizationComplete { allocation } | Self::DwellComplete { allocation } => {
                Some(*allocation)
            }
        }
    }
}

/// Tick counter plus the queue of pending transitions.
#[derive(Debug, Clone, Default)]
pub struct SimulationClock {
    /// Current tick (0 before the first tick).
    tick: u64,
    /// Scheduling sequence number, breaks ties between equal due ticks.
    sequence: u64,
    /// Pending transitions keyed by `(due tick, sequence)`.
    pending: BTreeMap<(u64, u64), Transition>,
}

impl SimulationClock {
    /// A clock at tick 0 with nothing scheduled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by one tick. Returns the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] if the tick counter would exceed
    /// `u64::MAX`.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        self.tick = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        Ok(self.tick)
    }

    /// Return the current tick number.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Schedule `transition` to fire `delay` ticks from now. Returns the due tick.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] if the due tick would exceed
    /// `u64::MAX`.
    pub fn schedule(&mut self, delay: u64, transition: Transition) -> Result<u64, ClockError> {
        let due = self.tick.checked_add(delay).ok_or(ClockError::TickOverflow)?;
        let sequence = self.sequence;
        self.sequence = sequence.checked_add(1).ok_or(ClockError::TickOverflow)?;
        self.pending.insert((due, sequence), transition);
        Ok(due)
    }

    /// Remove and return every transition due at or before the current tick.
    pub fn take_due(&mut self) -> Vec<Transition> {
        let later = self
            .tick
            .checked_add(1)
            .map_or_else(BTreeMap::new, |next| self.pending.split_off(&(next, 0)));
        let due = std::mem::replace(&mut self.pending, later);
        due.into_values().collect()
    }

    /// Cancel every pending transition matching `predicate`. Returns how many were removed.
    pub fn cancel(&mut self, predicate: impl Fn(&Transition) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, transition| !predicate(transition));
        before.saturating_sub(self.pending.len())
    }

    /// Cancel pending transitions for one allocation.
    pub fn cancel_allocation(&mut self, allocation: AllocationId) -> usize {
        self.cancel(|t| t.allocation() == Some(allocation))
    }

    /// Remove and return every pending transition regardless of due tick.
    pub fn drain(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    /// Number of pending transitions.
    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Due tick of the earliest pending transition.
    #[cfg(test)]
    pub fn next_due(&self) -> Option<u64> {
        self.pending.keys().next().map(|(due, _)| *due)
    }
}
