//! Operator-controlled boolean flags.
//!
//! A flag either takes effect immediately or, when configured with an
//! activation delay, passes through [`FlagState::Activating`] until the
//! clock fires its [`Transition::FlagReady`]. Switching off is always
//! immediate and cancels a pending activation.

use std::collections::BTreeMap;

use vigil_types::FlagState;

use crate::clock::{ClockError, SimulationClock, Transition};
use crate::config::FlagConfig;

/// Errors raised by flag operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlagError {
    /// No flag with this name is configured.
    #[error("unknown flag: {0}")]
    Unknown(String),

    /// Scheduling the activation overflowed the clock.
    #[error(transparent)]
    Clock(#[from] ClockError),
}

#[derive(Debug, Clone)]
struct FlagEntry {
    state: FlagState,
    activation_delay_ticks: u64,
}

/// The set of configured flags and their states.
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    flags: BTreeMap<String, FlagEntry>,
}

impl FlagSet {
    /// Build the flag set from configuration.
    pub fn from_config(configs: &[FlagConfig]) -> Self {
        let flags = configs
            .iter()
            .map(|c| {
                let state = if c.initial { FlagState::On } else { FlagState::Off };
                (
                    c.name.clone(),
                    FlagEntry {
                        state,
                        activation_delay_ticks: c.activation_delay_ticks,
                    },
                )
            })
            .collect();
        Self { flags }
    }

    /// Current state of a flag.
    pub fn state(&self, name: &str) -> Option<FlagState> {
        self.flags.get(name).map(|f| f.state)
    }

    /// Whether the flag is on. Unknown and activating flags are off.
    pub fn is_on(&self, name: &str) -> bool {
        self.state(name).is_some_and(FlagState::is_on)
    }

    /// Flip a flag. Returns the new state.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError::Unknown`] for an unconfigured flag.
    pub fn toggle(&mut self, name: &str, clock: &mut SimulationClock) -> Result<FlagState, FlagError> {
        let entry = self
            .flags
            .get_mut(name)
            .ok_or_else(|| FlagError::Unknown(name.to_owned()))?;
        let next = match entry.state {
            FlagState::Off if entry.activation_delay_ticks == 0 => FlagState::On,
            FlagState::Off => {
                let transition = Transition::FlagReady {
                    flag: name.to_owned(),
                };
                let ready_at = clock.schedule(entry.activation_delay_ticks, transition)?;
                FlagState::Activating { ready_at }
            }
            FlagState::Activating { .. } => {
                clock.cancel(|t| matches!(t, Transition::FlagReady { flag } if flag == name));
                FlagState::Off
            }
            FlagState::On => FlagState::Off,
        };
        entry.state = next;
        tracing::debug!(flag = name, state = ?next, "flag toggled");
        Ok(next)
    }

    /// Finish a pending activation. Returns `true` if the flag turned on.
    pub fn complete_activation(&mut self, name: &str) -> bool {
        match self.flags.get_mut(name) {
            Some(entry) if matches!(entry.state, FlagState::Activating { .. }) => {
                entry.state = FlagState::On;
                true
            }
            _ => false,
        }
    }

    /// All flag states keyed by name.
    pub fn states(&self) -> BTreeMap<String, FlagState> {
        self.flags
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn flags() -> FlagSet {
        FlagSet::from_config(&[
            FlagConfig {
                name: "rain".to_owned(),
                initial: false,
                activation_delay_ticks: 0,
            },
            FlagConfig {
                name: "cameras".to_owned(),
                initial: false,
                activation_delay_ticks: 2,
            },
            FlagConfig {
                name: "lights".to_owned(),
                initial: true,
                activation_delay_ticks: 0,
            },
        ])
    }

    #[test]
    fn immediate_toggle() {
        let mut set = flags();
        let mut clock = SimulationClock::new();
        assert!(!set.is_on("rain"));
        assert_eq!(set.toggle("rain", &mut clock).unwrap(), FlagState::On);
        assert!(set.is_on("rain"));
        assert_eq!(set.toggle("rain", &mut clock).unwrap(), FlagState::Off);
        assert!(set.is_on("lights"));
    }

    #[test]
    fn delayed_activation_waits_for_the_clock() {
        let mut set = flags();
        let mut clock = SimulationClock::new();
        let state = set.toggle("cameras", &mut clock).unwrap();
        assert_eq!(state, FlagState::Activating { ready_at: 2 });
        assert!(!set.is_on("cameras"));

        clock.advance().unwrap();
        assert!(clock.take_due().is_empty());
        clock.advance().unwrap();
        for transition in clock.take_due() {
            if let Transition::FlagReady { flag } = transition {
                assert!(set.complete_activation(&flag));
            }
        }
        assert!(set.is_on("cameras"));
    }

    #[test]
    fn toggling_during_activation_cancels_it() {
        let mut set = flags();
        let mut clock = SimulationClock::new();
        set.toggle("cameras", &mut clock).unwrap();
        assert_eq!(set.toggle("cameras", &mut clock).unwrap(), FlagState::Off);
        assert_eq!(clock.pending_len(), 0);
        assert!(!set.complete_activation("cameras"));
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let mut set = flags();
        let mut clock = SimulationClock::new();
        assert_eq!(
            set.toggle("snow", &mut clock),
            Err(FlagError::Unknown("snow".to_owned()))
        );
    }
}
