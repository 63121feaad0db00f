//! The iteration pipeline: assignments → behaviors → baseline intensities →
//! effects and overrides → hardware writes.
//!
//! One call to [`LightingBehaviorRunner::run_iteration`] is one pass. A write
//! failure on one channel never stops the pass; the channel is left out of the
//! returned map and its failure is recorded in the channel registry.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::common::error::LightingError;
use crate::common::utils::clamp_unit;
use crate::hardware::{
    Actuator, ChannelRegistration, ChannelRegistry, ChannelStatus, ChannelWriteLocks,
};
use crate::intensity::IntensityCalculator;
use crate::model::{AssignmentTarget, Behavior, BehaviorId, ChannelId, IntensityMap};
use crate::queue::QueueManager;
use crate::stores::{AssignmentStore, BehaviorStore, ChannelStateRecord, StateSource, StateStore};

/// Collaborators and shared components a runner is built from.
pub struct RunnerParams {
    pub assignments: Arc<dyn AssignmentStore>,
    pub behaviors: Arc<dyn BehaviorStore>,
    pub actuator: Arc<dyn Actuator>,
    pub calculator: IntensityCalculator,
    pub queues: Arc<QueueManager>,
    pub registry: Arc<ChannelRegistry>,
    pub write_locks: Arc<ChannelWriteLocks>,
    pub state_store: Option<Arc<dyn StateStore>>,
}

pub struct LightingBehaviorRunner {
    assignments: Arc<dyn AssignmentStore>,
    behaviors: Arc<dyn BehaviorStore>,
    actuator: Arc<dyn Actuator>,
    calculator: IntensityCalculator,
    queues: Arc<QueueManager>,
    registry: Arc<ChannelRegistry>,
    write_locks: Arc<ChannelWriteLocks>,
    state_store: Option<Arc<dyn StateStore>>,
}

impl LightingBehaviorRunner {
    pub fn new(params: RunnerParams) -> Self {
        Self {
            assignments: params.assignments,
            behaviors: params.behaviors,
            actuator: params.actuator,
            calculator: params.calculator,
            queues: params.queues,
            registry: params.registry,
            write_locks: params.write_locks,
            state_store: params.state_store,
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    /// Register a channel, reporting why a registration was rejected.
    pub fn try_register_channel(
        &self,
        channel_id: ChannelId,
        controller_address: u8,
        channel_number: u8,
        min_value: f64,
        max_value: f64,
    ) -> Result<(), LightingError> {
        let registration = ChannelRegistration::new(
            channel_id,
            controller_address,
            channel_number,
            min_value,
            max_value,
        )?;
        self.registry.register(registration)?;
        log_decorated!(
            "Registered channel {channel_id} → controller {controller_address:#04x} output {channel_number} ({min_value}-{max_value}%)"
        );
        Ok(())
    }

    /// Register a channel. Invalid registrations are logged and leave the
    /// registry untouched.
    pub fn register_channel(
        &self,
        channel_id: ChannelId,
        controller_address: u8,
        channel_number: u8,
        min_value: f64,
        max_value: f64,
    ) -> bool {
        match self.try_register_channel(
            channel_id,
            controller_address,
            channel_number,
            min_value,
            max_value,
        ) {
            Ok(()) => true,
            Err(e) => {
                log_warning!("Rejected registration of channel {channel_id}: {e}");
                false
            }
        }
    }

    pub fn unregister_channel(&self, channel_id: ChannelId) -> bool {
        match self.registry.unregister(channel_id) {
            Some(_) => {
                log_decorated!("Unregistered channel {channel_id}");
                true
            }
            None => false,
        }
    }

    pub fn hardware_status(&self) -> Vec<ChannelStatus> {
        self.registry.status()
    }

    /// Current logical intensity of a channel, read back from hardware.
    pub fn read_channel_intensity(&self, channel_id: ChannelId) -> Result<f64, LightingError> {
        let registration = self
            .registry
            .get(channel_id)
            .ok_or(LightingError::UnregisteredChannel(channel_id))?;
        let fraction = self.actuator.read_channel_intensity(
            registration.controller_address,
            registration.channel_number,
        )?;
        let percent = fraction * 100.0;
        let span = registration.max_value - registration.min_value;
        Ok(clamp_unit((percent - registration.min_value) / span))
    }

    /// Run one pass and return the logical intensity of every channel that
    /// was written successfully.
    pub fn run_iteration(&self, now: DateTime<Utc>) -> Result<IntensityMap> {
        let targets = self.resolve_targets(now)?;
        let base = self.calculate_base(&targets, now);
        let resolved = self.queues.process(&base, now);

        let mut applied = IntensityMap::new();
        let mut failed = 0usize;
        for (channel_id, logical) in resolved {
            let Some(registration) = self.registry.get(channel_id) else {
                log_debug!("Skipping channel {channel_id}: not registered");
                continue;
            };
            if self.write_channel(&registration, logical, now) {
                applied.insert(channel_id, logical);
            } else {
                failed += 1;
            }
        }

        log_debug!(
            "Iteration at {}: {} channel(s) written, {failed} failed",
            now.format("%H:%M:%S"),
            applied.len()
        );
        Ok(applied)
    }

    /// Registered channels with the behavior driving each one.
    ///
    /// Explicit channel assignments are resolved first; a group assignment
    /// only fills channels no explicit assignment claimed.
    fn resolve_targets(&self, now: DateTime<Utc>) -> Result<BTreeMap<ChannelId, BehaviorId>> {
        let assignments = self
            .assignments
            .get_active_assignments(now)
            .context("Failed to fetch active assignments")?;

        let mut targets = BTreeMap::new();
        for assignment in assignments.iter() {
            if let AssignmentTarget::Channel(channel_id) = assignment.target {
                if !self.registry.is_registered(channel_id) {
                    continue;
                }
                match targets.entry(channel_id) {
                    Entry::Vacant(slot) => {
                        slot.insert(assignment.behavior_id);
                    }
                    Entry::Occupied(slot) if *slot.get() != assignment.behavior_id => {
                        log_warning!(
                            "Channel {channel_id} has more than one active assignment; using behavior {}",
                            slot.get()
                        );
                    }
                    Entry::Occupied(_) => {}
                }
            }
        }

        for assignment in assignments.iter() {
            let AssignmentTarget::Group(group_id) = &assignment.target else {
                continue;
            };
            let channels = match self.assignments.get_group_channels(group_id) {
                Ok(channels) => channels,
                Err(e) => {
                    log_warning!("Could not resolve group '{group_id}': {e}");
                    continue;
                }
            };
            for channel_id in channels {
                if self.registry.is_registered(channel_id) {
                    targets.entry(channel_id).or_insert(assignment.behavior_id);
                }
            }
        }

        Ok(targets)
    }

    fn calculate_base(
        &self,
        targets: &BTreeMap<ChannelId, BehaviorId>,
        now: DateTime<Utc>,
    ) -> IntensityMap {
        let mut behaviors: HashMap<BehaviorId, Option<Behavior>> = HashMap::new();
        let mut base = IntensityMap::new();

        for (channel_id, behavior_id) in targets {
            let behavior = behaviors.entry(*behavior_id).or_insert_with(|| {
                match self.behaviors.get_behavior(*behavior_id) {
                    Ok(Some(behavior)) => Some(behavior),
                    Ok(None) => {
                        log_warning!("Behavior {behavior_id} not found");
                        None
                    }
                    Err(e) => {
                        log_warning!("Failed to load behavior {behavior_id}: {e}");
                        None
                    }
                }
            });
            if let Some(behavior) = behavior {
                base.insert(*channel_id, self.calculator.calculate(behavior, now));
            }
        }
        base
    }

    fn write_channel(
        &self,
        registration: &ChannelRegistration,
        logical: f64,
        now: DateTime<Utc>,
    ) -> bool {
        let physical = registration.to_physical_percent(logical);
        let result = self.write_locks.with_lock(registration.key(), || {
            self.actuator.write_channel_intensity(
                registration.controller_address,
                registration.channel_number,
                physical / 100.0,
            )
        });

        match result {
            Ok(()) => {
                self.registry
                    .record_success(registration.channel_id, logical, physical, now);
                self.checkpoint(registration, physical, now);
                true
            }
            Err(e) => {
                log_warning!("Channel {} write failed: {e}", registration.channel_id);
                self.registry
                    .record_failure(registration.channel_id, &e, now);
                false
            }
        }
    }

    fn checkpoint(&self, registration: &ChannelRegistration, physical: f64, now: DateTime<Utc>) {
        let Some(store) = self.state_store.as_ref() else {
            return;
        };
        let record = ChannelStateRecord {
            channel_id: registration.channel_id,
            controller_address: registration.controller_address,
            channel_number: registration.channel_number,
            intensity_percent: physical,
            source: StateSource::Iteration,
            recorded_at: now,
        };
        if let Err(e) = store.save_channel_state(&record) {
            log_debug!(
                "Could not persist state of channel {}: {e}",
                registration.channel_id
            );
        }
    }
}
