//! Error types for the Vigil engine binary.

/// Top-level error for the engine binary.
///
/// Each variant wraps a failure from one startup or run step, so `main`
/// can propagate everything with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: vigil_core::ConfigError,
    },

    /// The tick scheduler failed.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: vigil_core::SchedulerError,
    },

    /// The named preset does not exist.
    #[error("unknown preset {name:?}, expected one of {expected}")]
    UnknownPreset {
        /// The requested name.
        name: String,
        /// Comma-separated list of known presets.
        expected: String,
    },

    /// Installing the Ctrl-C handler failed.
    #[error("signal error: {message}")]
    Signal {
        /// Description of the failure.
        message: String,
    },
}
