//! Authoritative, time-bounded replacements of channel intensity.
//!
//! An override does not compose with the value underneath it: whatever the
//! behavior and effects produced, the override's own value wins. The reserved
//! `DayPreview` type replays a compressed 24-hour day over the override window
//! so a day cycle can be inspected in minutes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::f64::consts::PI;

use super::{entry_window_end, number_param, validate_channels, validate_duration};
use crate::common::constants::*;
use crate::common::error::{LightingError, QueueKind};
use crate::common::utils::wrap_hour;
use crate::model::{BehaviorId, ChannelId, IntensityMap};

/// One channel driven by a day preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewAssignment {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub behavior_id: Option<BehaviorId>,
}

/// Validated override variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OverrideKind {
    /// Simulated day replayed over the override window.
    DayPreview { assignments: Vec<PreviewAssignment> },
    /// Constant replacement, optionally faded in and out.
    Standard {
        override_type: String,
        fade_duration_minutes: f64,
    },
}

impl OverrideKind {
    pub fn parse(override_type: &str, params: &Map<String, Value>) -> Result<Self, LightingError> {
        let override_type = override_type.trim();
        if override_type.is_empty() {
            return Err(LightingError::validation("override_type", "must not be empty"));
        }

        if override_type == DAY_PREVIEW_TYPE {
            let raw = params.get("assignments").cloned().ok_or_else(|| {
                LightingError::validation("assignments", "is required for a day preview")
            })?;
            let assignments: Vec<PreviewAssignment> = serde_json::from_value(raw)
                .map_err(|e| LightingError::validation("assignments", e.to_string()))?;
            if assignments.is_empty() {
                return Err(LightingError::validation(
                    "assignments",
                    "a day preview needs at least one channel",
                ));
            }
            return Ok(OverrideKind::DayPreview { assignments });
        }

        let fade_duration_minutes = number_param(params, "fade_duration")?.unwrap_or(0.0);
        if fade_duration_minutes < 0.0 {
            return Err(LightingError::validation(
                "fade_duration",
                format!("{fade_duration_minutes} must not be negative"),
            ));
        }
        Ok(OverrideKind::Standard {
            override_type: override_type.to_string(),
            fade_duration_minutes,
        })
    }

    pub fn type_name(&self) -> &str {
        match self {
            OverrideKind::DayPreview { .. } => DAY_PREVIEW_TYPE,
            OverrideKind::Standard { override_type, .. } => override_type,
        }
    }

    pub fn is_day_preview(&self) -> bool {
        matches!(self, OverrideKind::DayPreview { .. })
    }
}

/// A request to create an override.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOverride {
    pub override_type: String,
    #[serde(default)]
    pub channels: Vec<ChannelId>,
    pub intensity: f64,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Defaults to the time of insertion.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub reason: Option<String>,
}

/// An override accepted into the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Override {
    pub override_id: String,
    pub kind: OverrideKind,
    pub channels: BTreeSet<ChannelId>,
    pub intensity: f64,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub priority: i32,
    pub reason: Option<String>,
}

impl Override {
    pub fn end_time(&self) -> DateTime<Utc> {
        entry_window_end(self.start_time, self.duration_minutes)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now <= self.end_time()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.end_time()
    }

    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        let total = Duration::minutes(i64::from(self.duration_minutes)).num_milliseconds();
        if total <= 0 {
            return 1.0;
        }
        let elapsed = (now - self.start_time).num_milliseconds();
        (elapsed as f64 / total as f64).clamp(0.0, 1.0)
    }

    /// Value a standard override drives its channels to at `now`.
    ///
    /// With a fade duration the value ramps linearly from 0 over the first
    /// `fade_duration / duration_minutes` of the window and back to 0 over
    /// the same fraction at the end.
    pub fn get_override_intensity(&self, now: DateTime<Utc>) -> f64 {
        let fade = match &self.kind {
            OverrideKind::Standard {
                fade_duration_minutes,
                ..
            } => *fade_duration_minutes,
            OverrideKind::DayPreview { .. } => 0.0,
        };
        if fade <= 0.0 || self.duration_minutes == 0 {
            return self.intensity;
        }

        let fraction = (fade / f64::from(self.duration_minutes)).min(0.5);
        let progress = self.progress(now);
        if progress < fraction {
            self.intensity * progress / fraction
        } else if progress > 1.0 - fraction {
            self.intensity * (1.0 - progress) / fraction
        } else {
            self.intensity
        }
    }

    /// Hour on the simulated clock of a day preview.
    pub fn simulated_hour(&self, now: DateTime<Utc>) -> f64 {
        wrap_hour(DAY_PREVIEW_START_HOUR + HOURS_PER_DAY * self.progress(now))
    }

    /// Day/night value of a day preview at `now`, peaking at `intensity`.
    pub fn day_preview_intensity(&self, now: DateTime<Utc>) -> f64 {
        day_night_intensity(self.simulated_hour(now), self.intensity)
    }
}

/// Simplified day model: a half sine between day start and day end,
/// a constant low level otherwise.
pub fn day_night_intensity(hour: f64, peak: f64) -> f64 {
    if (DAY_PREVIEW_DAY_START..DAY_PREVIEW_DAY_END).contains(&hour) {
        let day_length = DAY_PREVIEW_DAY_END - DAY_PREVIEW_DAY_START;
        let sun = (PI * (hour - DAY_PREVIEW_DAY_START) / day_length).sin();
        (peak * sun).max(DAY_PREVIEW_NIGHT_INTENSITY)
    } else {
        DAY_PREVIEW_NIGHT_INTENSITY
    }
}

#[derive(Debug, Default)]
pub struct OverrideQueue {
    overrides: Vec<Override>,
}

impl OverrideQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert an override, returning its id.
    pub fn add(&mut self, request: NewOverride, now: DateTime<Utc>) -> Result<String, LightingError> {
        let kind = OverrideKind::parse(&request.override_type, &request.parameters)?;
        if !(0.0..=1.0).contains(&request.intensity) {
            return Err(LightingError::validation(
                "intensity",
                format!("{} is outside [0, 1]", request.intensity),
            ));
        }
        validate_duration(request.duration_minutes)?;

        // A day preview claims every channel it drives.
        let mut requested = request.channels.clone();
        if let OverrideKind::DayPreview { assignments } = &kind {
            requested.extend(assignments.iter().map(|a| a.channel_id));
        }
        let channels = validate_channels(&requested)?;

        if let Some((existing, channel_id)) = self.find_claim(&channels, now) {
            log_warning!(
                "Rejected {} override: channel {channel_id} is claimed by override {}",
                kind.type_name(),
                existing.override_id
            );
            return Err(LightingError::Conflict {
                kind: QueueKind::Override,
                entry_id: existing.override_id.clone(),
                channel_id,
            });
        }

        let entry = Override {
            override_id: uuid::Uuid::new_v4().to_string(),
            kind,
            channels,
            intensity: request.intensity,
            start_time: request.start_time.unwrap_or(now),
            duration_minutes: request.duration_minutes,
            priority: request.priority,
            reason: request.reason,
        };
        log_decorated!(
            "Added {} override {} on channels {:?} at {:.0}% for {} min (priority {})",
            entry.kind.type_name(),
            entry.override_id,
            entry.channels,
            entry.intensity * 100.0,
            entry.duration_minutes,
            entry.priority
        );
        if let Some(reason) = &entry.reason {
            log_indented!("Reason: {reason}");
        }
        let id = entry.override_id.clone();
        self.overrides.push(entry);
        Ok(id)
    }

    fn find_claim(
        &self,
        channels: &BTreeSet<ChannelId>,
        now: DateTime<Utc>,
    ) -> Option<(&Override, ChannelId)> {
        self.overrides
            .iter()
            .filter(|o| o.is_active(now))
            .find_map(|o| {
                o.channels
                    .intersection(channels)
                    .next()
                    .map(|channel_id| (o, *channel_id))
            })
    }

    pub fn remove(&mut self, override_id: &str) -> bool {
        let before = self.overrides.len();
        self.overrides.retain(|o| o.override_id != override_id);
        before != self.overrides.len()
    }

    /// Overrides active at `now`, highest priority first.
    pub fn get_active(&self, now: DateTime<Utc>) -> Vec<&Override> {
        let mut active: Vec<&Override> =
            self.overrides.iter().filter(|o| o.is_active(now)).collect();
        active.sort_by_key(|o| Reverse(o.priority));
        active
    }

    pub fn get_for_channel(&self, channel_id: ChannelId, now: DateTime<Utc>) -> Vec<&Override> {
        self.get_active(now)
            .into_iter()
            .filter(|o| o.channels.contains(&channel_id))
            .collect()
    }

    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.overrides.len();
        self.overrides.retain(|o| !o.is_expired(now));
        before - self.overrides.len()
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Replace channel intensities with active override values.
    ///
    /// Overrides are visited highest priority first and the first one to
    /// write a channel in a pass owns it. A day preview drives every channel
    /// it claimed, listed directly or through its assignments, and those are
    /// additionally reported as preview-controlled. Channels absent from
    /// `intensities` are inserted.
    pub fn apply(&self, intensities: &IntensityMap, now: DateTime<Utc>) -> IntensityMap {
        let mut result = intensities.clone();
        let mut preview_controlled = BTreeSet::new();
        let mut claimed = BTreeSet::new();

        for entry in self.get_active(now) {
            match &entry.kind {
                OverrideKind::DayPreview { .. } => {
                    let value = entry.day_preview_intensity(now);
                    for channel_id in &entry.channels {
                        if claimed.insert(*channel_id) {
                            preview_controlled.insert(*channel_id);
                            result.insert(*channel_id, value);
                        }
                    }
                }
                OverrideKind::Standard { .. } => {
                    let value = entry.get_override_intensity(now).clamp(0.0, 1.0);
                    for channel_id in &entry.channels {
                        if claimed.insert(*channel_id) {
                            result.insert(*channel_id, value);
                        }
                    }
                }
            }
        }

        if !preview_controlled.is_empty() {
            log_debug!("Day preview controls channels {preview_controlled:?}");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 10, 8, 0, 0).unwrap()
    }

    fn standard(channels: &[ChannelId], intensity: f64) -> NewOverride {
        NewOverride {
            override_type: "Maintenance".to_string(),
            channels: channels.to_vec(),
            intensity,
            parameters: Map::new(),
            start_time: None,
            duration_minutes: 60,
            priority: 0,
            reason: None,
        }
    }

    fn day_preview(channels: &[ChannelId], peak: f64) -> NewOverride {
        let assignments: Vec<Value> = channels
            .iter()
            .map(|id| json!({ "channel_id": id }))
            .collect();
        NewOverride {
            override_type: DAY_PREVIEW_TYPE.to_string(),
            channels: Vec::new(),
            intensity: peak,
            parameters: json!({ "assignments": assignments })
                .as_object()
                .cloned()
                .unwrap(),
            start_time: None,
            duration_minutes: 1440,
            priority: 5,
            reason: Some("preview".to_string()),
        }
    }

    #[test]
    fn test_validation() {
        let mut queue = OverrideQueue::new();
        assert!(queue.add(standard(&[1], 1.2), now()).is_err());
        assert!(queue.add(standard(&[], 0.5), now()).is_err());

        let mut zero = standard(&[1], 0.5);
        zero.duration_minutes = 0;
        assert!(queue.add(zero, now()).is_err());

        let mut preview = day_preview(&[1], 0.8);
        preview.parameters = Map::new();
        assert!(queue.add(preview, now()).is_err());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_override_replaces_and_inserts() {
        let mut queue = OverrideQueue::new();
        queue.add(standard(&[1, 4], 0.25), now()).unwrap();
        let result = queue.apply(&IntensityMap::from([(1, 0.9), (2, 0.6)]), now());
        assert_eq!(result, IntensityMap::from([(1, 0.25), (2, 0.6), (4, 0.25)]));
    }

    #[test]
    fn test_conflict_rejected() {
        let mut queue = OverrideQueue::new();
        let first = queue.add(standard(&[1], 0.5), now()).unwrap();
        let err = queue.add(day_preview(&[3, 1], 0.8), now()).unwrap_err();
        assert!(matches!(
            err,
            LightingError::Conflict { kind: QueueKind::Override, ref entry_id, channel_id: 1 }
                if *entry_id == first
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_fade_in_and_out() {
        let mut queue = OverrideQueue::new();
        let mut request = standard(&[1], 0.8);
        request.parameters = json!({ "fade_duration": 6 }).as_object().cloned().unwrap();
        queue.add(request, now()).unwrap();
        let entry = &queue.overrides[0];

        assert_eq!(entry.get_override_intensity(now()), 0.0);
        assert!((entry.get_override_intensity(now() + Duration::minutes(3)) - 0.4).abs() < 1e-9);
        assert!((entry.get_override_intensity(now() + Duration::minutes(30)) - 0.8).abs() < 1e-9);
        assert!((entry.get_override_intensity(now() + Duration::minutes(57)) - 0.4).abs() < 1e-9);
        assert!(entry.get_override_intensity(now() + Duration::minutes(60)).abs() < 1e-9);
    }

    #[test]
    fn test_day_preview_maps_progress_onto_simulated_day() {
        let mut queue = OverrideQueue::new();
        queue.add(day_preview(&[7], 1.0), now()).unwrap();
        let entry = &queue.overrides[0];

        assert_eq!(entry.simulated_hour(now()), 6.0);
        assert!((entry.simulated_hour(now() + Duration::minutes(360)) - 12.0).abs() < 1e-9);

        // Noon is the peak of the simulated day
        let noon = queue.apply(&IntensityMap::new(), now() + Duration::minutes(360));
        assert!((noon[&7] - 1.0).abs() < 1e-9);

        // Halfway through a 24h preview is 18:00, already night
        let dusk = queue.apply(&IntensityMap::from([(7, 0.9)]), now() + Duration::minutes(720));
        assert_eq!(dusk[&7], DAY_PREVIEW_NIGHT_INTENSITY);
    }

    #[test]
    fn test_preview_channels_are_not_touched_by_lower_priority() {
        let mut queue = OverrideQueue::new();
        // Not yet active when the preview is added, so no conflict
        let mut low = standard(&[7], 0.9);
        low.priority = 1;
        low.duration_minutes = 1440;
        low.start_time = Some(now() + Duration::minutes(1));
        queue.add(low, now()).unwrap();
        queue.add(day_preview(&[7], 1.0), now()).unwrap();

        let at = now() + Duration::minutes(720);
        let result = queue.apply(&IntensityMap::new(), at);
        assert_eq!(result[&7], DAY_PREVIEW_NIGHT_INTENSITY);
    }

    #[test]
    fn test_day_preview_drives_every_claimed_channel() {
        let mut queue = OverrideQueue::new();
        let mut preview = day_preview(&[7], 1.0);
        preview.channels = vec![9];
        queue.add(preview, now()).unwrap();
        assert!(queue.add(standard(&[9], 0.3), now()).is_err());

        let noon = queue.apply(&IntensityMap::from([(9, 0.2)]), now() + Duration::minutes(360));
        assert!((noon[&7] - 1.0).abs() < 1e-9);
        assert_eq!(noon[&7], noon[&9]);
    }

    #[test]
    fn test_day_night_model() {
        assert_eq!(day_night_intensity(3.0, 1.0), DAY_PREVIEW_NIGHT_INTENSITY);
        assert!((day_night_intensity(12.0, 0.6) - 0.6).abs() < 1e-9);
        // Right after dawn the sine is tiny, the night floor holds
        assert_eq!(day_night_intensity(6.0, 1.0), DAY_PREVIEW_NIGHT_INTENSITY);
        assert_eq!(day_night_intensity(18.0, 1.0), DAY_PREVIEW_NIGHT_INTENSITY);
    }
}
