//! Task Runner
//!
//! Executes every scheduled task on its own timer:
//! - One watcher polls the schedule file and swaps the shared mapping on change
//! - One timer per task, spawned when the task appears and retired when it
//!   disappears
//! - A timer's next start is `completion of last run + current interval`,
//!   re-evaluated on every poll so reloaded intervals apply immediately
//! - Payloads run outside the schedule guard; a slow task only delays itself
//! - Failed payloads count as completed runs

mod executor;
mod shared;

pub use executor::{CommandExecutor, ExecError, TaskExecutor};
pub use shared::{ScheduleDiff, SharedSchedule};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{non_zero_tick, RunnerConfig};
use crate::history::{unix_now, HistoryLog, RunEvent};
use crate::store::ScheduleStore;

/// Per-task deadline bookkeeping
#[derive(Debug, Clone, Default)]
pub struct TaskTimer {
    last_finished: Option<Instant>,
}

impl TaskTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next start for `interval`; `None` means run now
    pub fn next_run(&self, interval: Duration) -> Option<Instant> {
        self.last_finished.map(|t| t + interval)
    }

    pub fn is_due(&self, now: Instant, interval: Duration) -> bool {
        self.next_run(interval).map_or(true, |next| now >= next)
    }

    pub fn complete(&mut self, finished: Instant) {
        self.last_finished = Some(finished);
    }
}

/// Convert a schedule interval to a duration, treating garbage as zero
fn interval_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// Handle the watcher keeps for each live timer
struct TimerHandle {
    retired: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Shared pieces every timer needs
#[derive(Clone)]
struct TimerContext {
    schedule: SharedSchedule,
    executor: Arc<dyn TaskExecutor>,
    history: HistoryLog,
    idle_retry: Duration,
    shutdown: watch::Receiver<bool>,
}

/// Multi-timer runner over a schedule file
pub struct Runner {
    config: RunnerConfig,
    store: ScheduleStore,
    history: HistoryLog,
    executor: Arc<dyn TaskExecutor>,
    schedule: SharedSchedule,
}

impl Runner {
    pub fn new(
        config: RunnerConfig,
        store: ScheduleStore,
        history: HistoryLog,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            config,
            store,
            history,
            executor,
            schedule: SharedSchedule::new(),
        }
    }

    /// Handle onto the in-memory schedule
    pub fn schedule(&self) -> SharedSchedule {
        self.schedule.clone()
    }

    /// Watch the schedule and run tasks until shutdown
    ///
    /// In-flight payloads are allowed to finish before this returns.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let ctx = TimerContext {
            schedule: self.schedule.clone(),
            executor: self.executor.clone(),
            history: self.history.clone(),
            idle_retry: non_zero_tick(self.config.idle_retry),
            shutdown: shutdown.clone(),
        };

        let mut timers: HashMap<String, TimerHandle> = HashMap::new();
        let mut retired: Vec<JoinHandle<()>> = Vec::new();
        let mut version: Option<SystemTime> = None;
        let mut failed_version: Option<Option<SystemTime>> = None;

        self.reload(&ctx, &mut timers, &mut retired, &mut version, &mut failed_version);
        info!(tasks = timers.len(), "Runner started");

        let mut ticker = tokio::time::interval(non_zero_tick(self.config.watch_tick));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.store.changed_since(version) {
                        self.reload(&ctx, &mut timers, &mut retired, &mut version, &mut failed_version);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Runner stopping, waiting for in-flight tasks");
        for timer in timers.values() {
            timer.retired.store(true, Ordering::Relaxed);
        }
        let handles = timers.into_values().map(|t| t.join).chain(retired);
        futures_util::future::join_all(handles).await;
        info!("Runner stopped");
    }

    /// Load the file into the shared mapping and reconcile timers
    ///
    /// On failure the last good mapping stays in effect. Timers of removed
    /// tasks are kept in `retired` until they exit so shutdown can await them.
    fn reload(
        &self,
        ctx: &TimerContext,
        timers: &mut HashMap<String, TimerHandle>,
        retired: &mut Vec<JoinHandle<()>>,
        version: &mut Option<SystemTime>,
        failed_version: &mut Option<Option<SystemTime>>,
    ) {
        let snapshot = match self.store.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let current = self.store.version();
                if *failed_version != Some(current) {
                    warn!("Keeping last good schedule: {}", e);
                    *failed_version = Some(current);
                }
                return;
            }
        };

        *version = snapshot.version;
        *failed_version = None;

        let snapshot = snapshot.clamped(self.config.min_interval);
        info!("Reloaded schedule: {:?}", snapshot.intervals);
        let diff = self.schedule.replace(snapshot.intervals);

        for task in &diff.removed {
            if let Some(timer) = timers.remove(task) {
                timer.retired.store(true, Ordering::Relaxed);
                retired.push(timer.join);
                info!(task = %task, "Retired timer for removed task");
            }
        }
        retired.retain(|join| !join.is_finished());

        // Spawn for new names, and for names whose timer already exited
        timers.retain(|_, t| !t.join.is_finished());
        for task in self.schedule.tasks() {
            if timers.contains_key(&task) {
                continue;
            }
            let retired = Arc::new(AtomicBool::new(false));
            let join = tokio::spawn(run_timer(task.clone(), ctx.clone(), retired.clone()));
            debug!(task = %task, "Spawned timer");
            timers.insert(task, TimerHandle { retired, join });
        }
    }
}

/// Poll loop for one task
async fn run_timer(task: String, mut ctx: TimerContext, retired: Arc<AtomicBool>) {
    let mut timer = TaskTimer::new();

    loop {
        if retired.load(Ordering::Relaxed) || *ctx.shutdown.borrow() {
            break;
        }

        let Some(interval) = ctx.schedule.interval(&task).map(interval_duration) else {
            if !sleep_or_shutdown(ctx.idle_retry, &mut ctx.shutdown).await {
                break;
            }
            continue;
        };

        let now = Instant::now();
        if timer.is_due(now, interval) {
            debug!(task = %task, "Running task");
            if let Err(e) = ctx.executor.execute(&task).await {
                warn!(task = %task, "Task failed, counted as run: {}", e);
            }

            let event = RunEvent {
                timestamp: unix_now(),
                task: task.clone(),
            };
            if let Err(e) = ctx.history.append_run(&event) {
                warn!(task = %task, "Failed to record run: {}", e);
            }
            timer.complete(Instant::now());
            continue;
        }

        let wait = timer
            .next_run(interval)
            .map(|next| next.saturating_duration_since(now))
            .unwrap_or_default()
            .min(ctx.idle_retry);
        if !sleep_or_shutdown(wait, &mut ctx.shutdown).await {
            break;
        }
    }

    debug!(task = %task, "Timer exited");
}

/// Sleep for `duration`; returns false if shutdown was signalled
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}
