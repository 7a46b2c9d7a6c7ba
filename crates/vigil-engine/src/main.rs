//! Vigil engine binary.
//!
//! Loads a domain configuration, runs the tick scheduler and logs tick
//! summaries until the tick limit is reached or Ctrl-C is pressed.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing, `RUST_LOG`, default `info`)
//! 2. Resolve the configuration: the first argument, else `VIGIL_CONFIG`,
//!    else the `waste_management` preset. A value ending in `.yaml` or
//!    `.yml` is read as a file, anything else names a preset.
//! 3. Apply `VIGIL_SEED` / `VIGIL_TICK_INTERVAL_MS` overrides
//! 4. Build and validate the engine
//! 5. Run the scheduler until `max_ticks` or Ctrl-C
//! 6. Flush pending transitions and log the result
//!
//! With `VIGIL_DUMP_SNAPSHOT=1` the final snapshot is printed to stdout as
//! JSON.

mod error;
mod observer;

use std::path::Path;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vigil_core::presets::{self, PRESET_NAMES};
use vigil_core::{EngineConfig, FlushReport, RunSummary, SimulationEngine, TickScheduler};

use crate::error::EngineError;
use crate::observer::LogObserver;

/// Preset used when nothing is configured.
const DEFAULT_PRESET: &str = "waste_management";

/// Ticks between dashboard overview log lines.
const SUMMARY_EVERY: u64 = 10;

/// Application entry point for the Vigil engine.
///
/// # Errors
///
/// Returns an error if configuration, startup or the run itself fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("vigil-engine starting");

    let source = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VIGIL_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_PRESET.to_owned());
    let config = load_config(&source)?;
    info!(
        source = %source,
        domain = %config.domain,
        seed = config.seed,
        tick_interval_ms = config.tick_interval_ms,
        max_ticks = config.max_ticks,
        "Configuration loaded"
    );

    let engine = SimulationEngine::new(&config).map_err(EngineError::from)?;
    let mut scheduler = TickScheduler::new(engine)
        .with_observer(LogObserver::new(SUMMARY_EVERY))
        .with_max_ticks(config.max_ticks);
    let handle = scheduler.start(config.tick_interval_ms).map_err(EngineError::from)?;

    let mut updates = handle.subscribe();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| EngineError::Signal { message: e.to_string() })?;
            info!("Ctrl-C received, stopping");
        }
        () = async { while updates.changed().await.is_ok() {} } => {
            info!("run finished");
        }
    }

    let summary = scheduler.stop().await.map_err(EngineError::from)?;
    if let Some(summary) = &summary {
        log_run_end(summary);
    }

    if std::env::var("VIGIL_DUMP_SNAPSHOT").is_ok_and(|v| v == "1") {
        let snapshot = handle.snapshot();
        println!("{}", serde_json::to_string_pretty(&*snapshot)?);
    }

    info!("vigil-engine shutdown complete");
    Ok(())
}

/// Resolve `source` to a configuration and apply environment overrides.
///
/// Presets get overrides here; files get them in [`EngineConfig::from_file`].
fn load_config(source: &str) -> Result<EngineConfig, EngineError> {
    let path = Path::new(source);
    let is_file = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
    if is_file {
        return Ok(EngineConfig::from_file(path)?);
    }
    let mut config = presets::by_name(source).ok_or_else(|| EngineError::UnknownPreset {
        name: source.to_owned(),
        expected: PRESET_NAMES.join(", "),
    })?;
    config.apply_env_overrides();
    Ok(config)
}

/// Log the outcome of a finished run.
fn log_run_end(summary: &RunSummary) {
    info!(
        run = %summary.run_id,
        end_reason = ?summary.end_reason,
        total_ticks = summary.total_ticks,
        last_tick = summary.last_report.as_ref().map(|r| r.tick),
        active_alerts = summary.last_report.as_ref().map(|r| r.active_alerts),
        "run ended"
    );
    let flush = summary.flush;
    if flush != FlushReport::default() {
        warn!(
            dwell_released = flush.dwell_released,
            mobilizations_cancelled = flush.mobilizations_cancelled,
            flags_activated = flush.flags_activated,
            dispatches_cancelled = flush.dispatches_cancelled,
            releases_applied = flush.releases_applied,
            "pending work flushed at shutdown"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn preset_names_resolve() {
        for name in PRESET_NAMES {
            assert_eq!(load_config(name).unwrap().domain, name);
        }
    }

    #[test]
    fn unknown_preset_lists_alternatives() {
        let err = load_config("volcano").unwrap_err();
        assert!(err.to_string().contains("traffic"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config("/nonexistent/vigil.yaml").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Config {
                source: vigil_core::ConfigError::Io { .. }
            }
        ));
    }
}
