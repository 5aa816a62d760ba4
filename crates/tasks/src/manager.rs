//! Task manager: registration, per-task loops and bounded shutdown.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::{RegistrationError, TaskError};
use crate::task::{CycleReport, Task, TaskContext, TaskDescriptor};

/// Runtime counters for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub cycles: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub timed_out: u64,
    /// Rows whose state changed, summed over all cycles.
    pub items_processed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_ms: Option<u64>,
    pub last_error: Option<String>,
}

/// Descriptor plus stats, as exposed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub name: String,
    pub enabled: bool,
    pub interval_ms: u64,
    pub cycle_timeout_ms: u64,
    pub stats: TaskStats,
}

/// Outcome of [`TaskManager::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Loops that exited within the grace period.
    pub graceful: Vec<String>,
    /// Loops still running at the deadline; they were aborted.
    pub abandoned: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

struct Registered {
    task: Arc<dyn Task>,
    descriptor: TaskDescriptor,
    stats: Arc<Mutex<TaskStats>>,
}

struct RunningState {
    token: CancellationToken,
    tracker: TaskTracker,
    handles: Vec<(String, JoinHandle<()>)>,
}

/// Owns the registered tasks and their loop lifetimes.
///
/// Lifecycle is `stopped -> running -> stopped`. Registration is only possible
/// while stopped; `start` and `stop` are idempotent.
pub struct TaskManager {
    tasks: Vec<Registered>,
    shutdown_grace: Duration,
    running: Mutex<Option<RunningState>>,
}

impl TaskManager {
    pub fn new(shutdown_grace: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            shutdown_grace,
            running: Mutex::new(None),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Add a task.
    ///
    /// Names must be unique and non-blank, intervals non-zero. Registering while
    /// running is rejected rather than queued.
    pub fn register<T: Task + 'static>(&mut self, task: T) -> Result<(), RegistrationError> {
        if self.is_running() {
            return Err(RegistrationError::AlreadyRunning);
        }

        let descriptor = task.descriptor();
        if descriptor.name.trim().is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if descriptor.interval.is_zero() {
            return Err(RegistrationError::ZeroInterval(descriptor.name));
        }
        if self.tasks.iter().any(|t| t.descriptor.name == descriptor.name) {
            return Err(RegistrationError::DuplicateName(descriptor.name));
        }

        info!(
            task = %descriptor.name,
            interval_ms = descriptor.interval.as_millis() as u64,
            enabled = descriptor.enabled,
            "registered background task"
        );

        self.tasks.push(Registered {
            task: Arc::new(task),
            descriptor,
            stats: Arc::new(Mutex::new(TaskStats::default())),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn descriptors(&self) -> Vec<TaskDescriptor> {
        self.tasks.iter().map(|t| t.descriptor.clone()).collect()
    }

    pub fn stats(&self, name: &str) -> Option<TaskStats> {
        self.tasks
            .iter()
            .find(|t| t.descriptor.name == name)
            .map(|t| t.stats.lock().clone())
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.tasks
            .iter()
            .map(|t| TaskSnapshot {
                name: t.descriptor.name.clone(),
                enabled: t.descriptor.enabled,
                interval_ms: t.descriptor.interval.as_millis() as u64,
                cycle_timeout_ms: t.descriptor.cycle_timeout.as_millis() as u64,
                stats: t.stats.lock().clone(),
            })
            .collect()
    }

    /// Launch one loop per enabled task.
    ///
    /// Must be called from within a tokio runtime. A no-op while already running.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("task manager already running");
            return;
        }

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut handles = Vec::with_capacity(self.tasks.len());

        for registered in &self.tasks {
            let name = registered.descriptor.name.clone();
            if !registered.descriptor.enabled {
                info!(task = %name, "background task disabled; not started");
                continue;
            }

            let handle = tracker.spawn(run_loop(
                registered.task.clone(),
                registered.descriptor.clone(),
                token.clone(),
                registered.stats.clone(),
            ));
            handles.push((name, handle));
        }

        info!(tasks = handles.len(), "task manager started");
        *running = Some(RunningState {
            token,
            tracker,
            handles,
        });
    }

    /// Cancel every loop and wait at most the shutdown grace for them to exit.
    ///
    /// Loops still alive at the deadline are logged and aborted. A no-op before
    /// `start` or after a previous `stop`.
    pub async fn stop(&self) -> ShutdownReport {
        let state = self.running.lock().take();
        let Some(state) = state else {
            debug!("task manager not running; stop is a no-op");
            return ShutdownReport::default();
        };

        info!(
            tasks = state.handles.len(),
            grace_ms = self.shutdown_grace.as_millis() as u64,
            "stopping task manager"
        );
        state.token.cancel();
        state.tracker.close();

        let mut report = ShutdownReport::default();
        match tokio::time::timeout(self.shutdown_grace, state.tracker.wait()).await {
            Ok(()) => {
                report.graceful = state.handles.into_iter().map(|(name, _)| name).collect();
            }
            Err(_) => {
                for (name, handle) in state.handles {
                    if handle.is_finished() {
                        report.graceful.push(name);
                    } else {
                        warn!(
                            task = %name,
                            grace_ms = self.shutdown_grace.as_millis() as u64,
                            "task did not stop within grace period; abandoning"
                        );
                        handle.abort();
                        report.abandoned.push(name);
                    }
                }
            }
        }

        info!(
            graceful = report.graceful.len(),
            abandoned = report.abandoned.len(),
            "task manager stopped"
        );
        report
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("tasks", &self.descriptors())
            .field("shutdown_grace", &self.shutdown_grace)
            .field("running", &self.is_running())
            .finish()
    }
}

enum CycleOutcome {
    Completed(CycleReport),
    Failed(TaskError),
    Panicked(String),
    TimedOut,
}

async fn run_loop(
    task: Arc<dyn Task>,
    descriptor: TaskDescriptor,
    token: CancellationToken,
    stats: Arc<Mutex<TaskStats>>,
) {
    let name = descriptor.name;
    let mut ticker = tokio::time::interval_at(Instant::now() + descriptor.interval, descriptor.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(task = %name, "background task loop started");

    let mut cycle: u64 = 0;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        cycle += 1;
        let ctx = TaskContext::new(cycle, token.child_token(), descriptor.cycle_timeout);
        let started = Instant::now();

        let span = tracing::info_span!("task_cycle", task = %name, cycle);
        let outcome = match tokio::time::timeout(
            descriptor.cycle_timeout,
            AssertUnwindSafe(task.run(&ctx)).catch_unwind(),
        )
        .instrument(span)
        .await
        {
            Ok(Ok(Ok(report))) => CycleOutcome::Completed(report),
            Ok(Ok(Err(e))) => CycleOutcome::Failed(e),
            Ok(Err(payload)) => CycleOutcome::Panicked(panic_message(payload.as_ref())),
            Err(_) => CycleOutcome::TimedOut,
        };

        let elapsed = started.elapsed();
        record(&stats, &outcome, elapsed);

        match outcome {
            CycleOutcome::Completed(report) => {
                if report.selected > 0 {
                    info!(
                        task = %name,
                        cycle,
                        selected = report.selected,
                        resolved = report.resolved,
                        failed = report.failed,
                        retried = report.retried,
                        deferred = report.deferred,
                        skipped = report.skipped,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "task cycle completed"
                    );
                } else {
                    debug!(task = %name, cycle, "task cycle found no work");
                }
            }
            CycleOutcome::Failed(e) => {
                warn!(task = %name, cycle, error = %e, "task cycle failed");
            }
            CycleOutcome::Panicked(msg) => {
                error!(task = %name, cycle, panic = %msg, "task cycle panicked");
            }
            CycleOutcome::TimedOut => {
                warn!(
                    task = %name,
                    cycle,
                    timeout_ms = descriptor.cycle_timeout.as_millis() as u64,
                    "task cycle timed out and was dropped"
                );
            }
        }
    }

    info!(task = %name, cycles = cycle, "background task loop stopped");
}

fn record(stats: &Mutex<TaskStats>, outcome: &CycleOutcome, elapsed: Duration) {
    let mut s = stats.lock();
    s.cycles += 1;
    s.last_cycle_at = Some(Utc::now());
    s.last_cycle_ms = Some(elapsed.as_millis() as u64);
    match outcome {
        CycleOutcome::Completed(report) => {
            s.succeeded += 1;
            s.items_processed += report.processed() as u64;
        }
        CycleOutcome::Failed(e) => {
            s.failed += 1;
            s.last_error = Some(e.to_string());
        }
        CycleOutcome::Panicked(msg) => {
            s.panicked += 1;
            s.last_error = Some(format!("panic: {msg}"));
        }
        CycleOutcome::TimedOut => {
            s.timed_out += 1;
            s.last_error = Some("cycle timed out".to_string());
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
