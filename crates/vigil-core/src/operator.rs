//! Operator control state shared between a running scheduler and its handles.
//!
//! The tick loop reads these fields on every iteration; handles write them.
//! All mutable control fields are atomics so neither side takes a lock on
//! the hot path. Pausing parks the loop on a [`Notify`] until resumed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use vigil_types::RunId;

use crate::config::MIN_TICK_INTERVAL_MS;

/// Reason why a scheduler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEndReason {
    /// Reached the configured `max_ticks` limit.
    MaxTicksReached,
    /// `stop()` was called.
    Stopped,
    /// The engine could not advance its clock any further.
    ClockExhausted,
}

/// Shared control state for one scheduler run.
#[derive(Debug)]
pub struct OperatorState {
    /// Identifier of this run.
    run_id: RunId,

    /// Whether the tick loop is paused.
    paused: AtomicBool,

    /// Wakes the tick loop when resumed.
    resume_notify: Notify,

    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Tick interval in milliseconds (runtime-adjustable).
    tick_interval_ms: AtomicU64,

    /// Last completed tick.
    tick: AtomicU64,

    /// Wall-clock time when the run started.
    started_at: DateTime<Utc>,

    /// Maximum number of ticks (0 = unlimited).
    max_ticks: u64,

    /// Reason the run ended, once it has.
    end_reason: Mutex<Option<RunEndReason>>,
}

impl OperatorState {
    /// Create control state for a new run.
    pub fn new(tick_interval_ms: u64, max_ticks: u64) -> Self {
        Self {
            run_id: RunId::new(),
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
            stop_requested: AtomicBool::new(false),
            tick_interval_ms: AtomicU64::new(tick_interval_ms),
            tick: AtomicU64::new(0),
            started_at: Utc::now(),
            max_ticks,
            end_reason: Mutex::new(None),
        }
    }

    /// Identifier of this run.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    // -----------------------------------------------------------------------
    // Pause / Resume
    // -----------------------------------------------------------------------

    /// Check whether the tick loop is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause the tick loop. Commands are still served while paused.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume the tick loop and wake it.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resume_notify.notify_one();
    }

    /// Wait until the loop is no longer paused.
    pub async fn wait_if_paused(&self) {
        while self.paused.load(Ordering::Acquire) {
            self.resume_notify.notified().await;
        }
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Record that a stop was requested.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Record the reason the run ended.
    pub async fn set_end_reason(&self, reason: RunEndReason) {
        let mut guard = self.end_reason.lock().await;
        *guard = Some(reason);
    }

    /// The reason the run ended, if it has.
    pub async fn end_reason(&self) -> Option<RunEndReason> {
        *self.end_reason.lock().await
    }

    // -----------------------------------------------------------------------
    // Tick Speed
    // -----------------------------------------------------------------------

    /// Current tick interval in milliseconds.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.load(Ordering::Acquire)
    }

    /// Set the tick interval. Values below [`MIN_TICK_INTERVAL_MS`] are rejected.
    ///
    /// Returns the previous interval, or `None` if the value was rejected.
    pub fn set_tick_interval_ms(&self, ms: u64) -> Option<u64> {
        if ms < MIN_TICK_INTERVAL_MS {
            return None;
        }
        Some(self.tick_interval_ms.swap(ms, Ordering::AcqRel))
    }

    // -----------------------------------------------------------------------
    // Progress
    // -----------------------------------------------------------------------

    /// Record the last completed tick.
    pub fn record_tick(&self, tick: u64) {
        self.tick.store(tick, Ordering::Release);
    }

    /// Last completed tick.
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Whether the tick limit has been reached (`max_ticks > 0` and `tick >= max_ticks`).
    pub const fn tick_limit_reached(&self, tick: u64) -> bool {
        self.max_ticks > 0 && tick >= self.max_ticks
    }

    /// Configured maximum ticks.
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// Wall-clock start time.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Elapsed seconds since the run started.
    pub fn elapsed_seconds(&self) -> u64 {
        let elapsed = Utc::now().signed_duration_since(self.started_at).num_seconds();
        u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
    }

    /// Serializable status report.
    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            run_id: self.run_id,
            tick: self.tick(),
            paused: self.is_paused(),
            stop_requested: self.is_stop_requested(),
            tick_interval_ms: self.tick_interval_ms(),
            elapsed_seconds: self.elapsed_seconds(),
            max_ticks: self.max_ticks,
            end_reason: self.end_reason().await,
            started_at: self.started_at.to_rfc3339(),
        }
    }
}

/// JSON-serializable status of a scheduler run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Identifier of the run.
    pub run_id: RunId,
    /// Last completed tick.
    pub tick: u64,
    /// Whether the loop is paused.
    pub paused: bool,
    /// Whether a stop has been requested.
    pub stop_requested: bool,
    /// Current tick interval in milliseconds.
    pub tick_interval_ms: u64,
    /// Elapsed wall-clock seconds since start.
    pub elapsed_seconds: u64,
    /// Configured maximum ticks (0 = unlimited).
    pub max_ticks: u64,
    /// Why the run ended, if it has.
    pub end_reason: Option<RunEndReason>,
    /// RFC 3339 timestamp of the start.
    pub started_at: String,
}
