//! Periodic iteration loop.
//!
//! The loop runs on its own thread: run one iteration, clean up expired queue
//! entries, then sleep on a stop channel with `recv_timeout`. Stopping sends on
//! that channel and joins the thread, so an iteration already in progress is
//! always allowed to finish. A failing or panicking iteration is logged and the
//! loop carries on after the error backoff instead of the normal interval.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::common::clock::Clock;
use crate::common::constants::DEFAULT_ERROR_BACKOFF;
use crate::common::error::LightingError;
use crate::runner::LightingBehaviorRunner;

/// Counters kept across the lifetime of a scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub running: bool,
    pub iteration_count: u64,
    pub error_count: u64,
    pub last_iteration: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_seconds: Option<i64>,
    pub interval_seconds: Option<f64>,
}

struct LoopHandle {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

pub struct Scheduler {
    runner: Arc<LightingBehaviorRunner>,
    clock: Arc<dyn Clock>,
    error_backoff: Duration,
    stats: Arc<Mutex<SchedulerStats>>,
    handle: Mutex<Option<LoopHandle>>,
}

impl Scheduler {
    pub fn new(runner: Arc<LightingBehaviorRunner>, clock: Arc<dyn Clock>) -> Self {
        Self::with_error_backoff(runner, clock, Duration::from_secs(DEFAULT_ERROR_BACKOFF))
    }

    pub fn with_error_backoff(
        runner: Arc<LightingBehaviorRunner>,
        clock: Arc<dyn Clock>,
        error_backoff: Duration,
    ) -> Self {
        Self {
            runner,
            clock,
            error_backoff,
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
            handle: Mutex::new(None),
        }
    }

    fn handle(&self) -> MutexGuard<'_, Option<LoopHandle>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.handle().is_some()
    }

    /// Start the loop with the given interval between iterations.
    pub fn start(&self, interval: Duration) -> Result<(), LightingError> {
        if interval.is_zero() {
            return Err(LightingError::validation(
                "update_interval",
                "must be greater than 0",
            ));
        }

        let mut handle = self.handle();
        if handle.is_some() {
            return Err(LightingError::AlreadyRunning);
        }

        {
            let mut stats = lock_stats(&self.stats);
            stats.running = true;
            stats.started_at = Some(self.clock.now());
            stats.interval_seconds = Some(interval.as_secs_f64());
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let runner = Arc::clone(&self.runner);
        let clock = Arc::clone(&self.clock);
        let stats = Arc::clone(&self.stats);
        let error_backoff = self.error_backoff;

        let thread = thread::Builder::new()
            .name("lightcycle-scheduler".to_string())
            .spawn(move || {
                loop {
                    let wait = if run_once(&runner, clock.as_ref(), &stats) {
                        interval
                    } else {
                        error_backoff
                    };
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|e| {
                lock_stats(&self.stats).running = false;
                LightingError::validation("scheduler", format!("could not spawn loop thread: {e}"))
            })?;

        log_block_start!(
            "Scheduler started: every {}s (error backoff {}s)",
            interval.as_secs_f64(),
            error_backoff.as_secs_f64()
        );
        *handle = Some(LoopHandle { stop_tx, thread });
        Ok(())
    }

    /// Stop the loop, waiting for an in-flight iteration to finish.
    pub fn stop(&self) -> Result<(), LightingError> {
        let Some(LoopHandle { stop_tx, thread }) = self.handle().take() else {
            return Err(LightingError::NotRunning);
        };
        // The loop may already have exited and dropped its receiver
        let _ = stop_tx.send(());
        if thread.join().is_err() {
            log_critical!("Scheduler thread terminated abnormally");
        }

        let mut stats = lock_stats(&self.stats);
        stats.running = false;
        log_block_start!(
            "Scheduler stopped after {} iteration(s), {} error(s)",
            stats.iteration_count,
            stats.error_count
        );
        Ok(())
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = lock_stats(&self.stats).clone();
        if stats.running {
            stats.uptime_seconds = stats
                .started_at
                .map(|started| (self.clock.now() - started).num_seconds());
        }
        stats
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

fn lock_stats(stats: &Mutex<SchedulerStats>) -> MutexGuard<'_, SchedulerStats> {
    stats.lock().unwrap_or_else(|e| e.into_inner())
}

/// One iteration plus housekeeping. Returns whether it succeeded.
fn run_once(
    runner: &LightingBehaviorRunner,
    clock: &dyn Clock,
    stats: &Mutex<SchedulerStats>,
) -> bool {
    let now = clock.now();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let applied = runner.run_iteration(now)?;
        runner.queues().cleanup_expired_entries(now);
        Ok::<_, anyhow::Error>(applied)
    }));

    let error = match outcome {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(panic) => Some(panic_message(panic.as_ref())),
    };

    let mut stats = lock_stats(stats);
    stats.iteration_count += 1;
    stats.last_iteration = Some(now);
    match error {
        None => true,
        Some(message) => {
            log_error!("Iteration failed: {message}");
            stats.error_count += 1;
            stats.last_error = Some(message);
            false
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("iteration panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("iteration panicked: {message}")
    } else {
        "iteration panicked".to_string()
    }
}
