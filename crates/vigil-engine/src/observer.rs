//! Tick observer that logs what happened on each tick.
//!
//! Quiet ticks are logged at `debug`; ticks that raised, resolved or moved
//! anything are logged at `info`. Every `summary_every` ticks a one-line
//! overview of the dashboard is logged regardless.

use tracing::{debug, info, warn};
use vigil_core::{TickObserver, TickReport};
use vigil_types::Snapshot;

/// Observer that turns tick reports into structured log lines.
pub struct LogObserver {
    summary_every: u64,
}

impl LogObserver {
    /// Log an overview every `summary_every` ticks (0 disables overviews).
    pub const fn new(summary_every: u64) -> Self {
        Self { summary_every }
    }

    const fn is_summary_tick(&self, tick: u64) -> bool {
        matches!(tick.checked_rem(self.summary_every), Some(0))
    }
}

impl TickObserver for LogObserver {
    fn on_tick(&mut self, report: &TickReport, snapshot: &Snapshot) {
        if report.halted {
            warn!(tick = report.tick, "engine halted");
            return;
        }

        let eventful = !report.raised.is_empty()
            || !report.resolved.is_empty()
            || !report.arrivals.is_empty()
            || !report.recalls.is_empty()
            || !report.released.is_empty();
        if eventful {
            info!(
                tick = report.tick,
                raised = report.raised.len(),
                resolved = report.resolved.len(),
                arrivals = report.arrivals.len(),
                recalls = report.recalls.len(),
                released = report.released.len(),
                active = report.active_alerts,
                "tick"
            );
        } else {
            debug!(tick = report.tick, active = report.active_alerts, "tick");
        }
        if report.sanitized > 0 || report.dropped_commands > 0 {
            warn!(
                tick = report.tick,
                sanitized = report.sanitized,
                dropped_commands = report.dropped_commands,
                "tick healed faults"
            );
        }

        if self.is_summary_tick(report.tick) {
            let metrics: Vec<String> = snapshot
                .metrics
                .values()
                .map(|m| format!("{}={:.1}", m.id, m.value))
                .collect();
            let pools: Vec<String> = snapshot
                .resource_pools
                .iter()
                .map(|p| format!("{}={}/{}", p.id, p.available, p.total))
                .collect();
            info!(
                domain = %snapshot.domain,
                tick = snapshot.tick,
                metrics = %metrics.join(" "),
                pools = %pools.join(" "),
                alerts = snapshot.active_alerts().count(),
                "dashboard"
            );
        }
    }
}
