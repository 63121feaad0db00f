//! Explicit point-to-point transitions on a single channel.
//!
//! A ramp runs on its own thread and walks from a start to an end output
//! percentage in fixed steps. At most one ramp exists per physical output:
//! starting a new one cancels the old one and waits for its thread to exit
//! before the new thread is spawned. Cancellation is cooperative through a
//! [`CancellationToken`] checked between steps; the token's condition variable
//! also wakes the step sleep early.
//!
//! ## Failure policy
//!
//! A failed step write is retried once. If the retry fails too the ramp is
//! aborted and the remaining steps are not executed.
//!
//! ## Checkpoints
//!
//! The written value is persisted at the first and last step, and for ramps
//! longer than `RAMP_CHECKPOINT_THRESHOLD_MS` also every
//! `RAMP_CHECKPOINT_INTERVAL_MS` of ramp time in between.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::common::clock::Clock;
use crate::common::constants::*;
use crate::common::error::{HardwareError, LightingError};
use crate::common::utils::clamp_unit;
use crate::hardware::{
    Actuator, ChannelKey, ChannelRegistration, ChannelRegistry, ChannelWriteLocks, percent_to_duty,
};
use crate::model::ChannelId;
use crate::stores::{ChannelStateRecord, StateSource, StateStore};

/// Cooperative cancellation flag shared between a ramp and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for `timeout` unless cancelled first. Returns whether the token
    /// is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = wake
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// Shape of a ramp between its endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RampCurve {
    #[default]
    Linear,
    /// Quadratic ease-in.
    Exponential,
}

impl RampCurve {
    pub fn parse(name: &str) -> Result<Self, LightingError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(RampCurve::Linear),
            "exponential" => Ok(RampCurve::Exponential),
            other => Err(LightingError::validation(
                "curve",
                format!("'{other}' is not one of linear, exponential"),
            )),
        }
    }

    pub fn value(self, start: f64, end: f64, progress: f64) -> f64 {
        let p = progress.clamp(0.0, 1.0);
        let eased = match self {
            RampCurve::Linear => p,
            RampCurve::Exponential => p * p,
        };
        start + (end - start) * eased
    }
}

/// A request to ramp one channel. Intensities are output percentages (0-100).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RampRequest {
    pub channel_id: ChannelId,
    pub start_intensity: f64,
    pub end_intensity: f64,
    pub duration_ms: u64,
    #[serde(default)]
    pub curve: RampCurve,
    /// Falls back to the executor's default step interval.
    #[serde(default)]
    pub step_interval_ms: Option<u64>,
}

/// How a ramp ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RampOutcome {
    Completed { steps: u64 },
    Cancelled { steps: u64 },
    Aborted { steps: u64, error: String },
}

impl RampOutcome {
    pub fn steps(&self) -> u64 {
        match self {
            RampOutcome::Completed { steps }
            | RampOutcome::Cancelled { steps }
            | RampOutcome::Aborted { steps, .. } => *steps,
        }
    }
}

/// A ramp currently owned by the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRamp {
    pub channel_id: ChannelId,
    pub controller_address: u8,
    pub channel_number: u8,
    pub start_intensity: f64,
    pub end_intensity: f64,
    pub duration_ms: u64,
    pub curve: RampCurve,
    pub started_at: DateTime<Utc>,
}

struct RampTask {
    info: ActiveRamp,
    token: CancellationToken,
    handle: JoinHandle<RampOutcome>,
}

/// Shared components a ramp executor writes through.
pub struct RampParams {
    pub actuator: Arc<dyn Actuator>,
    pub registry: Arc<ChannelRegistry>,
    pub write_locks: Arc<ChannelWriteLocks>,
    pub state_store: Option<Arc<dyn StateStore>>,
    pub clock: Arc<dyn Clock>,
    pub default_step_interval_ms: u64,
}

/// Everything a ramp thread needs, cheaply cloned out of the executor.
#[derive(Clone)]
struct RampContext {
    actuator: Arc<dyn Actuator>,
    registry: Arc<ChannelRegistry>,
    write_locks: Arc<ChannelWriteLocks>,
    state_store: Option<Arc<dyn StateStore>>,
    clock: Arc<dyn Clock>,
}

pub struct RampExecutor {
    context: RampContext,
    default_step_interval_ms: u64,
    tasks: Mutex<HashMap<ChannelKey, RampTask>>,
}

impl RampExecutor {
    pub fn new(params: RampParams) -> Self {
        Self {
            context: RampContext {
                actuator: params.actuator,
                registry: params.registry,
                write_locks: params.write_locks,
                state_store: params.state_store,
                clock: params.clock,
            },
            default_step_interval_ms: params.default_step_interval_ms,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<ChannelKey, RampTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a ramp, replacing any ramp on the same output.
    ///
    /// Returns the outcome of the replaced ramp, if there was one.
    pub fn start_ramp(&self, request: RampRequest) -> Result<Option<RampOutcome>, LightingError> {
        let registration = self
            .context
            .registry
            .get(request.channel_id)
            .ok_or(LightingError::UnregisteredChannel(request.channel_id))?;
        let step_interval_ms = request
            .step_interval_ms
            .unwrap_or(self.default_step_interval_ms);
        validate_request(&request, step_interval_ms)?;

        let key = registration.key();
        let mut tasks = self.tasks();

        // The old thread must be gone before a new one may write this output.
        let replaced = tasks.remove(&key).map(|task| {
            task.token.cancel();
            let outcome = join_task(task.handle);
            log_decorated!(
                "Replaced ramp on channel {} ({} step(s) run)",
                task.info.channel_id,
                outcome.steps()
            );
            outcome
        });

        let token = CancellationToken::new();
        let info = ActiveRamp {
            channel_id: request.channel_id,
            controller_address: registration.controller_address,
            channel_number: registration.channel_number,
            start_intensity: request.start_intensity,
            end_intensity: request.end_intensity,
            duration_ms: request.duration_ms,
            curve: request.curve,
            started_at: self.context.clock.now(),
        };

        let plan = RampPlan {
            registration,
            start: request.start_intensity,
            end: request.end_intensity,
            duration_ms: request.duration_ms,
            step_interval_ms,
            curve: request.curve,
        };
        let context = self.context.clone();
        let thread_token = token.clone();
        let handle = thread::Builder::new()
            .name(format!("ramp-{:#04x}-{}", key.0, key.1))
            .spawn(move || perform_ramp(&context, &plan, &thread_token))
            .map_err(|e| {
                LightingError::validation("ramp", format!("could not spawn ramp thread: {e}"))
            })?;

        log_decorated!(
            "Ramp on channel {}: {:.1}% → {:.1}% over {} ms ({:?}, {} ms steps)",
            request.channel_id,
            request.start_intensity,
            request.end_intensity,
            request.duration_ms,
            request.curve,
            step_interval_ms
        );
        tasks.insert(key, RampTask { info, token, handle });
        Ok(replaced)
    }

    /// Cancel the ramp on a channel and wait for it to stop.
    pub fn cancel_ramp(&self, channel_id: ChannelId) -> Option<RampOutcome> {
        let registration = self.context.registry.get(channel_id)?;
        let task = self.tasks().remove(&registration.key())?;
        task.token.cancel();
        Some(join_task(task.handle))
    }

    /// Cancel every ramp. Returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let tasks: Vec<RampTask> = self.tasks().drain().map(|(_, task)| task).collect();
        for task in &tasks {
            task.token.cancel();
        }
        let count = tasks.len();
        for task in tasks {
            join_task(task.handle);
        }
        if count > 0 {
            log_decorated!("Cancelled {count} ramp(s)");
        }
        count
    }

    /// Wait for the ramp on a channel to finish on its own.
    pub fn wait_for_ramp(&self, channel_id: ChannelId) -> Option<RampOutcome> {
        let registration = self.context.registry.get(channel_id)?;
        let task = self.tasks().remove(&registration.key())?;
        Some(join_task(task.handle))
    }

    /// Ramps whose thread is still running. Finished ones are dropped.
    pub fn active_ramps(&self) -> Vec<ActiveRamp> {
        let mut tasks = self.tasks();
        tasks.retain(|_, task| !task.handle.is_finished());
        let mut active: Vec<ActiveRamp> = tasks.values().map(|task| task.info.clone()).collect();
        active.sort_by_key(|ramp| ramp.channel_id);
        active
    }

    pub fn is_ramping(&self, channel_id: ChannelId) -> bool {
        self.active_ramps()
            .iter()
            .any(|ramp| ramp.channel_id == channel_id)
    }
}

impl Drop for RampExecutor {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn validate_request(request: &RampRequest, step_interval_ms: u64) -> Result<(), LightingError> {
    for (field, value) in [
        ("start_intensity", request.start_intensity),
        ("end_intensity", request.end_intensity),
    ] {
        if !(MINIMUM_PHYSICAL_PERCENT..=MAXIMUM_PHYSICAL_PERCENT).contains(&value) {
            return Err(LightingError::validation(
                field,
                format!("{value} is outside 0-100"),
            ));
        }
    }
    if step_interval_ms == 0 {
        return Err(LightingError::validation(
            "step_interval_ms",
            "must be greater than 0",
        ));
    }
    Ok(())
}

fn join_task(handle: JoinHandle<RampOutcome>) -> RampOutcome {
    handle.join().unwrap_or_else(|_| RampOutcome::Aborted {
        steps: 0,
        error: "ramp thread panicked".to_string(),
    })
}

struct RampPlan {
    registration: ChannelRegistration,
    start: f64,
    end: f64,
    duration_ms: u64,
    step_interval_ms: u64,
    curve: RampCurve,
}

impl RampPlan {
    fn total_steps(&self) -> u64 {
        self.duration_ms / self.step_interval_ms
    }

    fn target(&self, step: u64) -> f64 {
        let total = self.total_steps();
        if step >= total {
            return self.end;
        }
        self.curve
            .value(self.start, self.end, step as f64 / total as f64)
    }

    fn should_checkpoint(&self, step: u64, last_checkpoint_ms: Option<u64>) -> bool {
        let total = self.total_steps();
        if step == 0 || step == total {
            return true;
        }
        if self.duration_ms <= RAMP_CHECKPOINT_THRESHOLD_MS {
            return false;
        }
        let elapsed = step * self.step_interval_ms;
        last_checkpoint_ms.is_none_or(|last| elapsed - last >= RAMP_CHECKPOINT_INTERVAL_MS)
    }
}

fn perform_ramp(context: &RampContext, plan: &RampPlan, token: &CancellationToken) -> RampOutcome {
    let registration = &plan.registration;
    let total = plan.total_steps();
    let step_sleep = Duration::from_millis(plan.step_interval_ms);
    let mut last_checkpoint_ms = None;
    let mut steps = 0;

    for step in 0..=total {
        if token.is_cancelled() {
            log_debug!(
                "Ramp on channel {} cancelled at step {step}/{total}",
                registration.channel_id
            );
            return RampOutcome::Cancelled { steps };
        }

        let target = plan.target(step);
        if let Err(e) = write_step(context, registration, target) {
            log_warning!(
                "Ramp on channel {} aborted at step {step}/{total}: {e}",
                registration.channel_id
            );
            return RampOutcome::Aborted {
                steps,
                error: e.to_string(),
            };
        }
        steps += 1;

        let now = context.clock.now();
        let span = registration.max_value - registration.min_value;
        let logical = clamp_unit((target - registration.min_value) / span);
        context
            .registry
            .record_success(registration.channel_id, logical, target, now);

        if plan.should_checkpoint(step, last_checkpoint_ms) {
            last_checkpoint_ms = Some(step * plan.step_interval_ms);
            checkpoint(context, registration, target, now);
        }

        if step < total && token.wait_timeout(step_sleep) {
            log_debug!(
                "Ramp on channel {} cancelled after step {step}/{total}",
                registration.channel_id
            );
            return RampOutcome::Cancelled { steps };
        }
    }

    log_debug!(
        "Ramp on channel {} completed in {steps} step(s)",
        registration.channel_id
    );
    RampOutcome::Completed { steps }
}

/// Write one step, retrying once.
fn write_step(
    context: &RampContext,
    registration: &ChannelRegistration,
    percent: f64,
) -> Result<(), HardwareError> {
    let duties = BTreeMap::from([(registration.channel_number, percent_to_duty(percent))]);
    let attempt = || {
        context.write_locks.with_lock(registration.key(), || {
            context
                .actuator
                .write_many(registration.controller_address, &duties)
        })
    };

    match attempt() {
        Ok(()) => Ok(()),
        Err(first) => {
            log_debug!(
                "Ramp write on channel {} failed ({first}), retrying",
                registration.channel_id
            );
            let result = attempt();
            if let Err(e) = &result {
                context
                    .registry
                    .record_failure(registration.channel_id, e, context.clock.now());
            }
            result
        }
    }
}

fn checkpoint(
    context: &RampContext,
    registration: &ChannelRegistration,
    percent: f64,
    now: DateTime<Utc>,
) {
    let Some(store) = context.state_store.as_ref() else {
        return;
    };
    let record = ChannelStateRecord {
        channel_id: registration.channel_id,
        controller_address: registration.controller_address,
        channel_number: registration.channel_number,
        intensity_percent: percent,
        source: StateSource::Ramp,
        recorded_at: now,
    };
    if let Err(e) = store.save_channel_state(&record) {
        log_debug!(
            "Could not persist ramp state of channel {}: {e}",
            registration.channel_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::clock::SystemClock;
    use crate::common::constants::test_constants::*;
    use crate::hardware::SimulatedActuator;
    use crate::stores::InMemoryStateStore;
    use std::time::Instant;

    fn plan(duration_ms: u64, step_interval_ms: u64, curve: RampCurve) -> RampPlan {
        RampPlan {
            registration: ChannelRegistration::new(1, TEST_CONTROLLER, 0, 0.0, 100.0).unwrap(),
            start: 0.0,
            end: 100.0,
            duration_ms,
            step_interval_ms,
            curve,
        }
    }

    fn executor(
        actuator: Arc<SimulatedActuator>,
        state: Option<Arc<InMemoryStateStore>>,
    ) -> RampExecutor {
        let registry = Arc::new(ChannelRegistry::new());
        registry
            .register(ChannelRegistration::new(TEST_CHANNEL_ID, TEST_CONTROLLER, 3, 0.0, 100.0).unwrap())
            .unwrap();
        RampExecutor::new(RampParams {
            actuator,
            registry,
            write_locks: Arc::new(ChannelWriteLocks::new()),
            state_store: state.map(|s| s as Arc<dyn StateStore>),
            clock: Arc::new(SystemClock),
            default_step_interval_ms: DEFAULT_RAMP_STEP_INTERVAL,
        })
    }

    fn request(duration_ms: u64, step_interval_ms: u64) -> RampRequest {
        RampRequest {
            channel_id: TEST_CHANNEL_ID,
            start_intensity: 0.0,
            end_intensity: 100.0,
            duration_ms,
            curve: RampCurve::Linear,
            step_interval_ms: Some(step_interval_ms),
        }
    }

    #[test]
    fn test_token_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!CancellationToken::new().wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_plan_targets() {
        let linear = plan(1000, 50, RampCurve::Linear);
        assert_eq!(linear.total_steps(), 20);
        assert_eq!(linear.target(0), 0.0);
        assert_eq!(linear.target(10), 50.0);
        assert_eq!(linear.target(20), 100.0);

        let exponential = plan(1000, 50, RampCurve::Exponential);
        assert_eq!(exponential.target(10), 25.0);

        // Shorter than a step: a single write of the end value
        let instant = plan(30, 50, RampCurve::Linear);
        assert_eq!(instant.total_steps(), 0);
        assert_eq!(instant.target(0), 100.0);
    }

    #[test]
    fn test_checkpoint_spacing() {
        let short = plan(1000, 50, RampCurve::Linear);
        let short_points: Vec<u64> = (0..=20)
            .filter(|s| short.should_checkpoint(*s, Some(0)))
            .collect();
        assert_eq!(short_points, vec![0, 20]);

        // 20 s ramp with 100 ms steps: every 2 s plus the ends
        let long = plan(20_000, 100, RampCurve::Linear);
        let mut last = None;
        let mut points = Vec::new();
        for step in 0..=long.total_steps() {
            if long.should_checkpoint(step, last) {
                last = Some(step * 100);
                points.push(step);
            }
        }
        assert_eq!(points, (0..=200).step_by(20).collect::<Vec<u64>>());
    }

    #[test]
    fn test_ramp_completes_and_checkpoints() {
        let actuator = Arc::new(SimulatedActuator::new());
        let state = Arc::new(InMemoryStateStore::new());
        let executor = executor(actuator.clone(), Some(state.clone()));

        assert_eq!(executor.start_ramp(request(100, 10)).unwrap(), None);
        assert_eq!(
            executor.wait_for_ramp(TEST_CHANNEL_ID),
            Some(RampOutcome::Completed { steps: 11 })
        );

        let written = actuator.writes_for(TEST_CONTROLLER, 3);
        assert_eq!(written.len(), 11);
        assert_eq!(written.last(), Some(&u16::MAX));
        let records = state.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.source == StateSource::Ramp));
        assert_eq!(records[1].intensity_percent, 100.0);
    }

    #[test]
    fn test_retry_once_then_abort() {
        let actuator = Arc::new(SimulatedActuator::new());
        let executor = executor(actuator.clone(), None);

        // One failure is absorbed by the retry
        actuator.fail_next_writes(TEST_CONTROLLER, 3, 1);
        executor.start_ramp(request(20, 10)).unwrap();
        assert_eq!(
            executor.wait_for_ramp(TEST_CHANNEL_ID),
            Some(RampOutcome::Completed { steps: 3 })
        );

        // Two consecutive failures abort before anything is written
        actuator.clear_writes();
        actuator.fail_next_writes(TEST_CONTROLLER, 3, 2);
        executor.start_ramp(request(20, 10)).unwrap();
        let outcome = executor.wait_for_ramp(TEST_CHANNEL_ID).unwrap();
        assert!(matches!(outcome, RampOutcome::Aborted { steps: 0, .. }));
        assert!(actuator.writes().is_empty());
    }

    #[test]
    fn test_validation() {
        let executor = executor(Arc::new(SimulatedActuator::new()), None);
        let mut bad = request(100, 10);
        bad.end_intensity = 120.0;
        assert!(executor.start_ramp(bad).is_err());
        assert!(executor.start_ramp(request(100, 0)).is_err());

        let mut unknown = request(100, 10);
        unknown.channel_id = 99;
        assert!(matches!(
            executor.start_ramp(unknown),
            Err(LightingError::UnregisteredChannel(99))
        ));
    }

    #[test]
    fn test_curve_parse() {
        assert_eq!(RampCurve::parse("Exponential").unwrap(), RampCurve::Exponential);
        assert!(RampCurve::parse("cubic").is_err());
    }
}
