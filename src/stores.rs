//! Collaborator contracts consumed by the engine, with in-memory implementations.
//!
//! Persistence of behaviors, assignments and channel state belongs to the
//! surrounding application. The engine only sees these traits; the in-memory
//! types back the daemon binary and the tests.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::model::{Assignment, Behavior, BehaviorId, ChannelId, GroupId};

/// Source of assignments.
#[cfg_attr(any(test, feature = "testing-support"), mockall::automock)]
pub trait AssignmentStore: Send + Sync {
    /// Assignments whose active flag is set and whose window contains `now`.
    fn get_active_assignments(&self, now: DateTime<Utc>) -> Result<Vec<Assignment>>;

    /// Channels belonging to a group. Unknown groups resolve to no channels.
    fn get_group_channels(&self, group_id: &str) -> Result<Vec<ChannelId>>;
}

/// Source of behavior definitions.
#[cfg_attr(any(test, feature = "testing-support"), mockall::automock)]
pub trait BehaviorStore: Send + Sync {
    fn get_behavior(&self, behavior_id: BehaviorId) -> Result<Option<Behavior>>;
}

/// Who produced a persisted channel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSource {
    Iteration,
    Ramp,
}

/// A best-effort checkpoint of what was last written to a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStateRecord {
    pub channel_id: ChannelId,
    pub controller_address: u8,
    pub channel_number: u8,
    /// Physical output in percent (0-100).
    pub intensity_percent: f64,
    pub source: StateSource,
    pub recorded_at: DateTime<Utc>,
}

/// Sink for channel state checkpoints.
#[cfg_attr(any(test, feature = "testing-support"), mockall::automock)]
pub trait StateStore: Send + Sync {
    fn save_channel_state(&self, record: &ChannelStateRecord) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryAssignmentStore {
    assignments: RwLock<Vec<Assignment>>,
    groups: RwLock<HashMap<GroupId, Vec<ChannelId>>>,
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_assignment(&self, assignment: Assignment) {
        self.assignments
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(assignment);
    }

    pub fn set_group(&self, group_id: impl Into<GroupId>, channels: Vec<ChannelId>) {
        self.groups
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(group_id.into(), channels);
    }

    pub fn clear(&self) {
        self.assignments
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl AssignmentStore for InMemoryAssignmentStore {
    fn get_active_assignments(&self, now: DateTime<Utc>) -> Result<Vec<Assignment>> {
        let assignments = self.assignments.read().unwrap_or_else(|e| e.into_inner());
        Ok(assignments
            .iter()
            .filter(|a| a.is_active_at(now))
            .cloned()
            .collect())
    }

    fn get_group_channels(&self, group_id: &str) -> Result<Vec<ChannelId>> {
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        Ok(groups.get(group_id).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBehaviorStore {
    behaviors: RwLock<HashMap<BehaviorId, Behavior>>,
}

impl InMemoryBehaviorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, behavior: Behavior) {
        self.behaviors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(behavior.id, behavior);
    }
}

impl BehaviorStore for InMemoryBehaviorStore {
    fn get_behavior(&self, behavior_id: BehaviorId) -> Result<Option<Behavior>> {
        let behaviors = self.behaviors.read().unwrap_or_else(|e| e.into_inner());
        Ok(behaviors.get(&behavior_id).cloned())
    }
}

/// Keeps every checkpoint in memory, oldest first.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    records: Mutex<Vec<ChannelStateRecord>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ChannelStateRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl StateStore for InMemoryStateStore {
    fn save_channel_state(&self, record: &ChannelStateRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_in_memory_store_filters_inactive_assignments() {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        let store = InMemoryAssignmentStore::new();
        store.add_assignment(Assignment::for_channel(1, 1));

        let mut expired = Assignment::for_channel(2, 2);
        expired.end_time = Some(now - Duration::minutes(1));
        store.add_assignment(expired);

        let mut disabled = Assignment::for_channel(3, 3);
        disabled.active = false;
        store.add_assignment(disabled);

        let active = store.get_active_assignments(now).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].behavior_id, 1);
    }

    #[test]
    fn test_unknown_group_has_no_channels() {
        let store = InMemoryAssignmentStore::new();
        store.set_group("reef", vec![1, 2]);
        assert_eq!(store.get_group_channels("reef").unwrap(), vec![1, 2]);
        assert!(store.get_group_channels("sump").unwrap().is_empty());
    }
}
