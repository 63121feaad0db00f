//! Explicit wiring of every engine component.
//!
//! [`LightingEngine`] builds one registry, one set of write locks, one queue
//! manager, one runner, one scheduler and one ramp executor from the
//! collaborators it is given, and exposes the operational surface on top of
//! them. Nothing here is process-wide; two engines in one process are fully
//! independent.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::common::clock::Clock;
use crate::common::constants::*;
use crate::common::error::LightingError;
use crate::config::Config;
use crate::hardware::{
    Actuator, ChannelRegistry, ChannelStatus, ChannelWriteLocks, TimeoutActuator,
};
use crate::intensity::IntensityCalculator;
use crate::intensity::weather::{WeatherCache, WeatherProvider};
use crate::model::{ChannelId, IntensityMap};
use crate::queue::{ChannelQueueStatus, CleanupReport, NewEffect, NewOverride, QueueManager};
use crate::ramp::{ActiveRamp, RampExecutor, RampOutcome, RampParams, RampRequest};
use crate::runner::{LightingBehaviorRunner, RunnerParams};
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::stores::{
    AssignmentStore, BehaviorStore, InMemoryAssignmentStore, InMemoryBehaviorStore, StateStore,
};

/// Timing knobs, usually taken from the configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub update_interval: Duration,
    pub error_backoff: Duration,
    pub ramp_step_interval_ms: u64,
    /// `None` calls the actuator directly without a deadline.
    pub write_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(DEFAULT_UPDATE_INTERVAL),
            error_backoff: Duration::from_secs(DEFAULT_ERROR_BACKOFF),
            ramp_step_interval_ms: DEFAULT_RAMP_STEP_INTERVAL,
            write_timeout: Some(Duration::from_millis(DEFAULT_WRITE_TIMEOUT)),
        }
    }
}

/// External collaborators an engine is built around.
pub struct EngineParams {
    pub assignments: Arc<dyn AssignmentStore>,
    pub behaviors: Arc<dyn BehaviorStore>,
    pub actuator: Arc<dyn Actuator>,
    pub state_store: Option<Arc<dyn StateStore>>,
    pub clock: Arc<dyn Clock>,
    pub calculator: IntensityCalculator,
    pub settings: EngineSettings,
}

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub timestamp: DateTime<Utc>,
    pub simulated_time: bool,
    pub scheduler: SchedulerStats,
    pub channels: Vec<ChannelStatus>,
    pub active_effects: usize,
    pub active_overrides: usize,
    pub active_ramps: Vec<ActiveRamp>,
}

pub struct LightingEngine {
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    registry: Arc<ChannelRegistry>,
    queues: Arc<QueueManager>,
    runner: Arc<LightingBehaviorRunner>,
    scheduler: Scheduler,
    ramps: RampExecutor,
}

impl LightingEngine {
    pub fn new(params: EngineParams) -> Self {
        let EngineParams {
            assignments,
            behaviors,
            actuator,
            state_store,
            clock,
            calculator,
            settings,
        } = params;

        let actuator: Arc<dyn Actuator> = match settings.write_timeout {
            Some(timeout) => Arc::new(TimeoutActuator::new(actuator, timeout)),
            None => actuator,
        };
        let registry = Arc::new(ChannelRegistry::new());
        let write_locks = Arc::new(ChannelWriteLocks::new());
        let queues = Arc::new(QueueManager::new());

        let runner = Arc::new(LightingBehaviorRunner::new(RunnerParams {
            assignments,
            behaviors,
            actuator: Arc::clone(&actuator),
            calculator,
            queues: Arc::clone(&queues),
            registry: Arc::clone(&registry),
            write_locks: Arc::clone(&write_locks),
            state_store: state_store.clone(),
        }));
        let scheduler = Scheduler::with_error_backoff(
            Arc::clone(&runner),
            Arc::clone(&clock),
            settings.error_backoff,
        );
        let ramps = RampExecutor::new(RampParams {
            actuator,
            registry: Arc::clone(&registry),
            write_locks,
            state_store,
            clock: Arc::clone(&clock),
            default_step_interval_ms: settings.ramp_step_interval_ms,
        });

        Self {
            clock,
            settings,
            registry,
            queues,
            runner,
            scheduler,
            ramps,
        }
    }

    /// Build an engine whose stores are filled from a configuration file, then
    /// register the configured channels.
    pub fn from_config(
        config: &Config,
        actuator: Arc<dyn Actuator>,
        weather: Option<Arc<dyn WeatherProvider>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let assignments = Arc::new(InMemoryAssignmentStore::new());
        for assignment in config.assignments()? {
            assignments.add_assignment(assignment);
        }
        for (group_id, channels) in &config.groups {
            assignments.set_group(group_id.clone(), channels.clone());
        }

        let behaviors = Arc::new(InMemoryBehaviorStore::new());
        for behavior in &config.behaviors {
            behaviors.insert(behavior.clone());
        }

        let calculator = IntensityCalculator::new(
            config.timezone(),
            WeatherCache::new(weather, config.weather_settings()),
        );
        let engine = Self::new(EngineParams {
            assignments,
            behaviors,
            actuator,
            state_store: None,
            clock,
            calculator,
            settings: config.engine_settings(),
        });

        for channel in &config.channels {
            engine
                .register_channel(
                    channel.id,
                    channel.controller_address,
                    channel.channel_number,
                    channel.min_value(),
                    channel.max_value(),
                )
                .with_context(|| format!("Failed to register channel {}", channel.id))?;
        }
        Ok(engine)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // # Channels

    pub fn register_channel(
        &self,
        channel_id: ChannelId,
        controller_address: u8,
        channel_number: u8,
        min_value: f64,
        max_value: f64,
    ) -> Result<(), LightingError> {
        self.runner.try_register_channel(
            channel_id,
            controller_address,
            channel_number,
            min_value,
            max_value,
        )
    }

    /// Unregister a channel, cancelling its ramp first.
    pub fn unregister_channel(&self, channel_id: ChannelId) -> bool {
        self.ramps.cancel_ramp(channel_id);
        self.runner.unregister_channel(channel_id)
    }

    pub fn read_channel_intensity(&self, channel_id: ChannelId) -> Result<f64, LightingError> {
        self.runner.read_channel_intensity(channel_id)
    }

    pub fn hardware_status(&self) -> Vec<ChannelStatus> {
        self.registry.status()
    }

    // # Effects and overrides

    pub fn add_effect(&self, request: NewEffect) -> Result<String, LightingError> {
        self.queues.add_effect(request, self.clock.now())
    }

    pub fn remove_effect(&self, effect_id: &str) -> bool {
        self.queues.remove_effect(effect_id)
    }

    pub fn add_override(&self, request: NewOverride) -> Result<String, LightingError> {
        self.queues.add_override(request, self.clock.now())
    }

    pub fn remove_override(&self, override_id: &str) -> bool {
        self.queues.remove_override(override_id)
    }

    pub fn cleanup_expired(&self) -> CleanupReport {
        self.queues.cleanup_expired_entries(self.clock.now())
    }

    pub fn channel_queue_status(&self, channel_id: ChannelId) -> ChannelQueueStatus {
        self.queues
            .get_channel_queue_status(channel_id, self.clock.now())
    }

    // # Iterations

    /// Run one iteration at the engine clock's current time.
    pub fn run_iteration_now(&self) -> Result<IntensityMap> {
        self.runner.run_iteration(self.clock.now())
    }

    pub fn start_scheduler(&self) -> Result<(), LightingError> {
        self.scheduler.start(self.settings.update_interval)
    }

    pub fn start_scheduler_with_interval(&self, interval: Duration) -> Result<(), LightingError> {
        self.scheduler.start(interval)
    }

    pub fn stop_scheduler(&self) -> Result<(), LightingError> {
        self.scheduler.stop()
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    // # Ramps

    pub fn start_ramp(&self, request: RampRequest) -> Result<Option<RampOutcome>, LightingError> {
        self.ramps.start_ramp(request)
    }

    pub fn cancel_ramp(&self, channel_id: ChannelId) -> Option<RampOutcome> {
        self.ramps.cancel_ramp(channel_id)
    }

    pub fn wait_for_ramp(&self, channel_id: ChannelId) -> Option<RampOutcome> {
        self.ramps.wait_for_ramp(channel_id)
    }

    pub fn active_ramps(&self) -> Vec<ActiveRamp> {
        self.ramps.active_ramps()
    }

    // # Lifecycle

    pub fn status(&self) -> EngineStatus {
        let now = self.clock.now();
        EngineStatus {
            timestamp: now,
            simulated_time: self.clock.is_simulated(),
            scheduler: self.scheduler.stats(),
            channels: self.registry.status(),
            active_effects: self.queues.active_effects(now).len(),
            active_overrides: self.queues.active_overrides(now).len(),
            active_ramps: self.ramps.active_ramps(),
        }
    }

    /// Cancel every ramp and stop the scheduler if it runs.
    pub fn shutdown(&self) {
        self.ramps.cancel_all();
        if self.scheduler.is_running()
            && let Err(e) = self.scheduler.stop()
        {
            log_warning!("Failed to stop scheduler: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::clock::ManualClock;
    use crate::common::constants::test_constants::*;
    use crate::hardware::SimulatedActuator;
    use crate::model::{Assignment, Behavior, BehaviorKind};
    use crate::stores::{InMemoryAssignmentStore, InMemoryBehaviorStore};
    use chrono::TimeZone;
    use serde_json::{Map, json};

    fn engine() -> (LightingEngine, Arc<SimulatedActuator>, Arc<ManualClock>) {
        let assignments = Arc::new(InMemoryAssignmentStore::new());
        assignments.add_assignment(Assignment::for_channel(1, TEST_CHANNEL_ID));
        let behaviors = Arc::new(InMemoryBehaviorStore::new());
        behaviors.insert(Behavior::new(1, BehaviorKind::Fixed).with_config("intensity", 0.4));
        let actuator = Arc::new(SimulatedActuator::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));

        let engine = LightingEngine::new(EngineParams {
            assignments,
            behaviors,
            actuator: actuator.clone(),
            state_store: None,
            clock: clock.clone(),
            calculator: IntensityCalculator::utc(),
            settings: EngineSettings::default(),
        });
        engine
            .register_channel(TEST_CHANNEL_ID, TEST_CONTROLLER, 3, 0.0, 100.0)
            .unwrap();
        (engine, actuator, clock)
    }

    #[test]
    fn test_iteration_through_timeout_decorator() {
        let (engine, actuator, _) = engine();
        let result = engine.run_iteration_now().unwrap();
        assert_eq!(result.get(&TEST_CHANNEL_ID), Some(&0.4));
        assert_eq!(actuator.duty(TEST_CONTROLLER, 3), Some(26214));
    }

    #[test]
    fn test_override_uses_engine_clock() {
        let (engine, _, clock) = engine();
        let id = engine
            .add_override(NewOverride {
                override_type: "maintenance".to_string(),
                channels: vec![TEST_CHANNEL_ID],
                intensity: 1.0,
                parameters: Map::new(),
                start_time: None,
                duration_minutes: 30,
                priority: 0,
                reason: None,
            })
            .unwrap();

        let status = engine.channel_queue_status(TEST_CHANNEL_ID);
        assert_eq!(status.override_status.map(|o| o.override_id), Some(id));
        assert_eq!(engine.run_iteration_now().unwrap()[&TEST_CHANNEL_ID], 1.0);

        clock.advance(chrono::Duration::minutes(31));
        assert_eq!(engine.cleanup_expired().overrides_cleaned, 1);
        assert_eq!(engine.run_iteration_now().unwrap()[&TEST_CHANNEL_ID], 0.4);
    }

    #[test]
    fn test_status_snapshot_serializes() {
        let (engine, _, _) = engine();
        engine
            .add_effect(NewEffect {
                effect_type: "dim".to_string(),
                channels: vec![TEST_CHANNEL_ID],
                parameters: json!({ "dim_factor": 0.5 }).as_object().cloned().unwrap(),
                start_time: None,
                duration_minutes: 10,
                priority: 0,
            })
            .unwrap();

        let status = engine.status();
        assert!(status.simulated_time);
        assert_eq!(status.active_effects, 1);
        assert_eq!(status.channels.len(), 1);
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["scheduler"]["running"], json!(false));
    }

    #[test]
    fn test_unregister_cancels_ramp() {
        let (engine, _, _) = engine();
        engine
            .start_ramp(RampRequest {
                channel_id: TEST_CHANNEL_ID,
                start_intensity: 0.0,
                end_intensity: 100.0,
                duration_ms: 60_000,
                curve: Default::default(),
                step_interval_ms: Some(100),
            })
            .unwrap();
        assert_eq!(engine.active_ramps().len(), 1);

        assert!(engine.unregister_channel(TEST_CHANNEL_ID));
        assert!(engine.active_ramps().is_empty());
        assert!(engine.hardware_status().is_empty());
    }

    #[test]
    fn test_scheduler_lifecycle_through_engine() {
        let (engine, _, _) = engine();
        engine
            .start_scheduler_with_interval(Duration::from_millis(10))
            .unwrap();
        assert!(matches!(
            engine.start_scheduler(),
            Err(LightingError::AlreadyRunning)
        ));
        engine.shutdown();
        assert!(!engine.is_scheduler_running());
        assert!(engine.scheduler_stats().iteration_count >= 1);
    }
}
