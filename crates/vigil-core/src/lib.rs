//! Tick-driven telemetry and incident simulation engine.
//!
//! One [`SimulationEngine`] owns a coupled set of metrics, alerts, moving
//! entities and resource pools for a dashboard domain. Driving it with
//! [`SimulationEngine::tick`] is fully deterministic for a given seed and
//! command sequence; [`TickScheduler`] drives it on a wall-clock cadence.
//!
//! # Modules
//!
//! - [`walk`] -- Seeded random walk, the only source of randomness.
//! - [`history`] -- Fixed-capacity rolling sample buffers.
//! - [`metrics`] -- Metric graph with declared dependency edges.
//! - [`alerts`] -- Threshold rules, incident generators, de-duplication
//!   and hysteresis.
//! - [`entities`] -- Moving units, dispatch targets and arrival detection.
//! - [`dispatch`] -- Finite resource pools and allocation handles.
//! - [`clock`] -- Tick counter and delayed transitions.
//! - [`flags`] -- Domain toggles with delayed activation.
//! - [`command`] -- Operator commands and their outcomes.
//! - [`engine`] -- Composition root and the per-tick phase order.
//! - [`operator`] -- Pause, resume and speed controls shared with handles.
//! - [`runner`] -- Async tick scheduler and engine handles.
//! - [`config`] -- YAML configuration and validation.
//! - [`presets`] -- Built-in domain configurations.

pub mod alerts;
pub mod clock;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod entities;
pub mod flags;
pub mod history;
pub mod metrics;
pub mod operator;
pub mod presets;
pub mod runner;
pub mod walk;

pub use command::{Command, CommandError, CommandOutcome};
pub use config::{ConfigError, EngineConfig};
pub use engine::{FlushReport, SimulationEngine, TickReport};
pub use runner::{EngineHandle, NoOpObserver, RunSummary, SchedulerError, TickObserver, TickScheduler};
