//! Real-time tick scheduler.
//!
//! [`TickScheduler`] drives a [`SimulationEngine`] on a fixed cadence. On
//! [`TickScheduler::start`] the engine moves into a spawned task which is
//! its only owner while running. Callers interact through an
//! [`EngineHandle`]:
//!
//! - commands travel over an `mpsc` channel and are answered on a
//!   `oneshot` channel, so they are applied between ticks, never during one
//! - snapshots are published on a `watch` channel after every tick
//! - pause, resume and tick speed go through the shared [`OperatorState`]
//!
//! The loop ends on [`TickScheduler::stop`], when `max_ticks` is reached,
//! or when the engine clock is exhausted. Before the task exits it flushes
//! pending delayed transitions, so pool capacity is never stranded. `stop`
//! awaits the task: once it returns, no further tick runs.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};
use vigil_types::{RunId, Snapshot};

use crate::command::{Command, CommandError, CommandOutcome};
use crate::config::MIN_TICK_INTERVAL_MS;
use crate::engine::{FlushReport, SimulationEngine, TickReport};
use crate::operator::{OperatorState, RunEndReason, SchedulerStatus};

/// Depth of the command channel.
const COMMAND_BUFFER: usize = 64;

/// Errors raised by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `start` was called while a run is in progress.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// The engine is no longer available (a previous run failed).
    #[error("scheduler has no engine to run")]
    Stopped,

    /// The requested tick interval is too small.
    #[error("tick interval {0} ms is below the minimum of {MIN_TICK_INTERVAL_MS} ms")]
    InvalidInterval(u64),

    /// The tick task panicked or was cancelled.
    #[error("tick task failed: {reason}")]
    TaskFailed {
        /// Description of the failure.
        reason: String,
    },
}

/// Callback invoked after each tick completes.
pub trait TickObserver: Send {
    /// Called after every tick with its report and the published snapshot.
    fn on_tick(&mut self, report: &TickReport, snapshot: &Snapshot);
}

/// A tick observer that does nothing.
pub struct NoOpObserver;

impl TickObserver for NoOpObserver {
    fn on_tick(&mut self, _report: &TickReport, _snapshot: &Snapshot) {}
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Identifier of the run.
    pub run_id: RunId,
    /// Why the run ended.
    pub end_reason: RunEndReason,
    /// Ticks executed during the run.
    pub total_ticks: u64,
    /// Report of the last tick, if any ran.
    pub last_report: Option<TickReport>,
    /// What was flushed on exit.
    pub flush: FlushReport,
}

/// A command awaiting application by the tick task.
struct Request {
    command: Command,
    reply: oneshot::Sender<Result<CommandOutcome, CommandError>>,
}

/// Cloneable handle to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Request>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    operator: Arc<OperatorState>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request").field("command", &self.command).finish_non_exhaustive()
    }
}

impl EngineHandle {
    /// Submit a command and wait for its outcome.
    ///
    /// # Errors
    ///
    /// Returns the engine's [`CommandError`], or [`CommandError::Stopped`] if
    /// the run has ended.
    pub async fn submit(&self, command: Command) -> Result<CommandOutcome, CommandError> {
        let (reply, outcome) = oneshot::channel();
        if self.commands.send(Request { command, reply }).await.is_err() {
            return Err(CommandError::Stopped);
        }
        outcome.await.unwrap_or(Err(CommandError::Stopped))
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// A receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.clone()
    }

    /// Pause ticking. Commands are still applied.
    pub fn pause(&self) {
        self.operator.pause();
        info!(run = %self.operator.run_id(), "scheduler paused");
    }

    /// Resume ticking.
    pub fn resume(&self) {
        self.operator.resume();
        info!(run = %self.operator.run_id(), "scheduler resumed");
    }

    /// Change the tick interval. Returns the previous interval.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidInterval`] below [`MIN_TICK_INTERVAL_MS`].
    pub fn set_tick_interval_ms(&self, ms: u64) -> Result<u64, SchedulerError> {
        self.operator
            .set_tick_interval_ms(ms)
            .ok_or(SchedulerError::InvalidInterval(ms))
    }

    /// Status of the run.
    pub async fn status(&self) -> SchedulerStatus {
        self.operator.status().await
    }
}

/// A run in progress.
struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<TaskOutput>,
    handle: EngineHandle,
}

/// What the tick task hands back when it exits.
struct TaskOutput {
    engine: SimulationEngine,
    observer: Box<dyn TickObserver>,
    summary: RunSummary,
}

/// Drives an engine on a fixed cadence. States: stopped, running.
pub struct TickScheduler {
    engine: Option<SimulationEngine>,
    observer: Option<Box<dyn TickObserver>>,
    max_ticks: u64,
    running: Option<Running>,
}

impl std::fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("max_ticks", &self.max_ticks)
            .field("running", &self.running.is_some())
            .finish_non_exhaustive()
    }
}

impl TickScheduler {
    /// Wrap an engine. Nothing runs until [`TickScheduler::start`].
    pub fn new(engine: SimulationEngine) -> Self {
        Self {
            engine: Some(engine),
            observer: Some(Box::new(NoOpObserver)),
            max_ticks: 0,
            running: None,
        }
    }

    /// Install a tick observer.
    #[must_use]
    pub fn with_observer(mut self, observer: impl TickObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// End every run after `max_ticks` ticks (0 = unlimited).
    #[must_use]
    pub const fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Whether a run is in progress.
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Handle to the current run.
    pub fn handle(&self) -> Option<EngineHandle> {
        self.running.as_ref().map(|r| r.handle.clone())
    }

    /// The engine, while stopped.
    pub const fn engine(&self) -> Option<&SimulationEngine> {
        self.engine.as_ref()
    }

    /// Start ticking every `interval_ms` milliseconds.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyRunning`], [`SchedulerError::InvalidInterval`]
    /// or [`SchedulerError::Stopped`].
    pub fn start(&mut self, interval_ms: u64) -> Result<EngineHandle, SchedulerError> {
        if self.running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        if interval_ms < MIN_TICK_INTERVAL_MS {
            return Err(SchedulerError::InvalidInterval(interval_ms));
        }
        let engine = self.engine.take().ok_or(SchedulerError::Stopped)?;
        let observer: Box<dyn TickObserver> = self.observer.take().unwrap_or_else(|| Box::new(NoOpObserver));

        let operator = Arc::new(OperatorState::new(interval_ms, self.max_ticks));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());

        info!(
            run = %operator.run_id(),
            domain = engine.domain(),
            interval_ms,
            max_ticks = self.max_ticks,
            "scheduler starting"
        );

        let task = tokio::spawn(run_loop(
            engine,
            observer,
            Arc::clone(&operator),
            shutdown_rx,
            command_rx,
            snapshot_tx,
        ));
        let handle = EngineHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            operator,
        };
        self.running = Some(Running {
            shutdown: shutdown_tx,
            task,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    /// Run exactly `ticks` ticks at `interval_ms` and return the summary.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`TickScheduler::start`] and [`TickScheduler::wait`].
    pub async fn run_for(&mut self, interval_ms: u64, ticks: u64) -> Result<RunSummary, SchedulerError> {
        let previous = self.max_ticks;
        self.max_ticks = ticks.max(1);
        let started = self.start(interval_ms);
        self.max_ticks = previous;
        started?;
        self.wait().await?.ok_or(SchedulerError::Stopped)
    }

    /// Stop ticking and wait for the tick task to exit. Idempotent.
    ///
    /// Returns the summary of the run that was stopped, or `None` when the
    /// scheduler was not running.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TaskFailed`] if the tick task panicked.
    pub async fn stop(&mut self) -> Result<Option<RunSummary>, SchedulerError> {
        let Some(running) = self.running.take() else {
            return Ok(None);
        };
        running.handle.operator.request_stop();
        // The task may already have exited on its own; a closed channel is fine.
        let _ = running.shutdown.send(true);
        self.join(running.task).await.map(Some)
    }

    /// Wait for the current run to end on its own (tick limit or exhausted
    /// clock). Returns `None` when not running.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TaskFailed`] if the tick task panicked.
    pub async fn wait(&mut self) -> Result<Option<RunSummary>, SchedulerError> {
        let Some(running) = self.running.take() else {
            return Ok(None);
        };
        let Running { shutdown, task, .. } = running;
        let summary = self.join(task).await;
        drop(shutdown);
        summary.map(Some)
    }

    async fn join(&mut self, task: JoinHandle<TaskOutput>) -> Result<RunSummary, SchedulerError> {
        match task.await {
            Ok(output) => {
                self.engine = Some(output.engine);
                self.observer = Some(output.observer);
                Ok(output.summary)
            }
            Err(e) => {
                error!(error = %e, "tick task failed");
                Err(SchedulerError::TaskFailed { reason: e.to_string() })
            }
        }
    }
}

/// The next tick deadline after `from`, using the current interval.
fn next_deadline(from: Instant, operator: &OperatorState) -> Instant {
    let interval = Duration::from_millis(operator.tick_interval_ms());
    from.checked_add(interval).unwrap_or(from)
}

/// Apply one command on the tick task and answer it.
fn serve(engine: &mut SimulationEngine, request: Request) {
    let outcome = engine.submit(request.command);
    if request.reply.send(outcome).is_err() {
        warn!("command submitter went away before the reply");
    }
}

async fn run_loop(
    mut engine: SimulationEngine,
    mut observer: Box<dyn TickObserver>,
    operator: Arc<OperatorState>,
    mut shutdown: watch::Receiver<bool>,
    mut requests: mpsc::Receiver<Request>,
    snapshots: watch::Sender<Arc<Snapshot>>,
) -> TaskOutput {
    let mut deadline = next_deadline(Instant::now(), &operator);
    let mut total_ticks: u64 = 0;
    let mut last_report: Option<TickReport> = None;
    let mut open = true;

    let end_reason = loop {
        if operator.is_paused() {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break RunEndReason::Stopped,
                request = requests.recv(), if open => match request {
                    Some(request) => serve(&mut engine, request),
                    None => open = false,
                },
                () = operator.wait_if_paused() => {
                    deadline = next_deadline(Instant::now(), &operator);
                }
            }
            continue;
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => break RunEndReason::Stopped,
            request = requests.recv(), if open => match request {
                Some(request) => serve(&mut engine, request),
                None => open = false,
            },
            () = tokio::time::sleep_until(deadline) => {
                let report = engine.tick();
                let snapshot = engine.snapshot();
                snapshots.send_replace(Arc::clone(&snapshot));
                observer.on_tick(&report, &snapshot);
                operator.record_tick(report.tick);
                total_ticks = total_ticks.saturating_add(1);

                if report.halted {
                    break RunEndReason::ClockExhausted;
                }
                let limit = operator.tick_limit_reached(total_ticks);
                last_report = Some(report);
                if limit {
                    break RunEndReason::MaxTicksReached;
                }

                // Late ticks are not made up in a burst.
                let now = Instant::now();
                deadline = next_deadline(deadline, &operator);
                if deadline < now {
                    deadline = next_deadline(now, &operator);
                }
            }
        }
    };

    let flush = engine.flush_pending();
    snapshots.send_replace(engine.snapshot());
    operator.set_end_reason(end_reason).await;
    info!(
        run = %operator.run_id(),
        reason = ?end_reason,
        total_ticks,
        final_tick = engine.current_tick(),
        "scheduler stopped"
    );

    TaskOutput {
        engine,
        observer,
        summary: RunSummary {
            run_id: operator.run_id(),
            end_reason,
            total_ticks,
            last_report,
            flush,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::{EngineConfig, MetricConfig};

    fn engine() -> SimulationEngine {
        let config = EngineConfig {
            metrics: vec![MetricConfig::bounded("load", 50.0, 0.0, 100.0)],
            ..EngineConfig::default()
        };
        SimulationEngine::new(&config).unwrap()
    }

    struct Counting(Arc<Mutex<Vec<u64>>>);

    impl TickObserver for Counting {
        fn on_tick(&mut self, report: &TickReport, _snapshot: &Snapshot) {
            self.0.lock().unwrap().push(report.tick);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_tick_limit() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = TickScheduler::new(engine())
            .with_max_ticks(5)
            .with_observer(Counting(Arc::clone(&seen)));
        scheduler.start(100).unwrap();
        let summary = scheduler.wait().await.unwrap().unwrap();
        assert_eq!(summary.end_reason, RunEndReason::MaxTicksReached);
        assert_eq!(summary.total_ticks, 5);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(scheduler.engine().unwrap().current_tick(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn run_for_is_bounded_and_repeatable() {
        let mut scheduler = TickScheduler::new(engine());
        let first = scheduler.run_for(20, 3).await.unwrap();
        assert_eq!(first.total_ticks, 3);
        let second = scheduler.run_for(20, 4).await.unwrap();
        assert_eq!(second.total_ticks, 4);
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(scheduler.engine().unwrap().current_tick(), 7);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn no_tick_runs_after_stop() {
        let mut scheduler = TickScheduler::new(engine());
        let handle = scheduler.start(100).unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        let summary = scheduler.stop().await.unwrap().unwrap();
        assert_eq!(summary.end_reason, RunEndReason::Stopped);
        let stopped_at = handle.snapshot().tick;
        assert_eq!(stopped_at, summary.total_ticks);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.snapshot().tick, stopped_at);
        assert_eq!(scheduler.engine().unwrap().current_tick(), stopped_at);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_restart_works() {
        let mut scheduler = TickScheduler::new(engine());
        assert!(scheduler.stop().await.unwrap().is_none());
        scheduler.start(50).unwrap();
        assert!(matches!(scheduler.start(50), Err(SchedulerError::AlreadyRunning)));
        assert!(scheduler.stop().await.unwrap().is_some());
        assert!(scheduler.stop().await.unwrap().is_none());
        assert!(scheduler.start(50).is_ok());
        assert!(scheduler.stop().await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn commands_after_stop_are_rejected() {
        let mut scheduler = TickScheduler::new(engine());
        let handle = scheduler.start(100).unwrap();
        scheduler.stop().await.unwrap();
        let result = handle
            .submit(Command::ToggleFlag {
                flag: "rain".to_owned(),
            })
            .await;
        assert_eq!(result, Err(CommandError::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn commands_are_served_while_running() {
        let mut scheduler = TickScheduler::new(engine());
        let handle = scheduler.start(100).unwrap();
        let result = handle
            .submit(Command::SetParameter {
                metric: "load".into(),
                value: 10.0,
            })
            .await;
        assert!(matches!(result, Ok(CommandOutcome::Queued { .. })));
        let unknown = handle
            .submit(Command::ToggleFlag {
                flag: "rain".to_owned(),
            })
            .await;
        assert!(matches!(unknown, Err(CommandError::UnknownReference { kind: "flag", .. })));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_the_clock() {
        let mut scheduler = TickScheduler::new(engine());
        let handle = scheduler.start(100).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.pause();
        // A tick already waiting on its deadline still completes.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let paused_at = handle.snapshot().tick;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.snapshot().tick, paused_at);
        handle.resume();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(handle.snapshot().tick > paused_at);
        assert!(handle.set_tick_interval_ms(1).is_err());
        assert_eq!(handle.set_tick_interval_ms(200).unwrap(), 100);
        scheduler.stop().await.unwrap();
    }

    #[test]
    fn tiny_interval_is_rejected() {
        let mut scheduler = TickScheduler::new(engine());
        assert!(matches!(scheduler.start(1), Err(SchedulerError::InvalidInterval(1))));
    }
}
