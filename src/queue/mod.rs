//! Effect and override composition.
//!
//! [`QueueManager`] owns both queues and is the only way they are mutated.
//! Each queue sits behind its own mutex so the scheduler thread and callers
//! adding or removing entries can share one manager.
//!
//! Composition order is fixed: effects are applied to the baseline first,
//! then overrides replace whatever they target.

pub mod effects;
pub mod overrides;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use crate::common::error::LightingError;
use crate::common::utils::clamp_unit;
use crate::model::{ChannelId, IntensityMap};

pub use self::effects::{Effect, EffectKind, EffectQueue, FadeType, NewEffect};
pub use self::overrides::{NewOverride, Override, OverrideKind, OverrideQueue, PreviewAssignment};

/// Read an optional numeric parameter; present but non-numeric or non-finite
/// values are a validation error.
pub(crate) fn number_param(
    params: &Map<String, Value>,
    key: &str,
) -> Result<Option<f64>, LightingError> {
    let Some(raw) = params.get(key) else {
        return Ok(None);
    };
    let value = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(LightingError::validation(
            key,
            format!("{raw} is not a finite number"),
        )),
    }
}

pub(crate) fn validate_channels(channels: &[ChannelId]) -> Result<BTreeSet<ChannelId>, LightingError> {
    if channels.is_empty() {
        return Err(LightingError::validation("channels", "at least one channel is required"));
    }
    Ok(channels.iter().copied().collect())
}

pub(crate) fn validate_duration(duration_minutes: u32) -> Result<(), LightingError> {
    if duration_minutes == 0 {
        return Err(LightingError::validation(
            "duration_minutes",
            "must be greater than 0",
        ));
    }
    Ok(())
}

pub(crate) fn entry_window_end(start: DateTime<Utc>, duration_minutes: u32) -> DateTime<Utc> {
    start + Duration::minutes(i64::from(duration_minutes))
}

/// Number of entries removed by a cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub effects_cleaned: usize,
    pub overrides_cleaned: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.effects_cleaned + self.overrides_cleaned
    }
}

/// The override currently deciding a channel's value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverrideStatus {
    pub override_id: String,
    pub override_type: String,
    pub priority: i32,
    /// Value the override drives the channel to right now.
    pub intensity: f64,
    pub end_time: DateTime<Utc>,
}

/// Queue view of a single channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelQueueStatus {
    pub channel_id: ChannelId,
    pub active_effects: usize,
    pub active_overrides: usize,
    pub effect_ids: Vec<String>,
    pub override_status: Option<OverrideStatus>,
}

#[derive(Debug, Default)]
pub struct QueueManager {
    effects: Mutex<EffectQueue>,
    overrides: Mutex<OverrideQueue>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn effects(&self) -> MutexGuard<'_, EffectQueue> {
        self.effects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn overrides(&self) -> MutexGuard<'_, OverrideQueue> {
        self.overrides.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Effects then overrides over a baseline; every value ends in [0,1].
    pub fn process(&self, base: &IntensityMap, now: DateTime<Utc>) -> IntensityMap {
        let with_effects = self.effects().apply(base, now);
        let mut result = self.overrides().apply(&with_effects, now);
        for value in result.values_mut() {
            *value = clamp_unit(*value);
        }
        result
    }

    pub fn add_effect(&self, request: NewEffect, now: DateTime<Utc>) -> Result<String, LightingError> {
        self.effects().add(request, now)
    }

    pub fn remove_effect(&self, effect_id: &str) -> bool {
        let removed = self.effects().remove(effect_id);
        if removed {
            log_decorated!("Removed effect {effect_id}");
        }
        removed
    }

    pub fn add_override(
        &self,
        request: NewOverride,
        now: DateTime<Utc>,
    ) -> Result<String, LightingError> {
        self.overrides().add(request, now)
    }

    pub fn remove_override(&self, override_id: &str) -> bool {
        let removed = self.overrides().remove(override_id);
        if removed {
            log_decorated!("Removed override {override_id}");
        }
        removed
    }

    /// Drop every entry whose window has ended.
    pub fn cleanup_expired_entries(&self, now: DateTime<Utc>) -> CleanupReport {
        let report = CleanupReport {
            effects_cleaned: self.effects().cleanup_expired(now),
            overrides_cleaned: self.overrides().cleanup_expired(now),
        };
        if report.total() > 0 {
            log_decorated!(
                "Cleaned up {} expired effect(s) and {} expired override(s)",
                report.effects_cleaned,
                report.overrides_cleaned
            );
        }
        report
    }

    pub fn active_effects(&self, now: DateTime<Utc>) -> Vec<Effect> {
        self.effects().get_active(now).into_iter().cloned().collect()
    }

    pub fn active_overrides(&self, now: DateTime<Utc>) -> Vec<Override> {
        self.overrides().get_active(now).into_iter().cloned().collect()
    }

    pub fn get_channel_queue_status(
        &self,
        channel_id: ChannelId,
        now: DateTime<Utc>,
    ) -> ChannelQueueStatus {
        let effect_ids: Vec<String> = self
            .effects()
            .get_for_channel(channel_id, now)
            .into_iter()
            .map(|e| e.effect_id.clone())
            .collect();

        let overrides = self.overrides();
        let active = overrides.get_for_channel(channel_id, now);
        // Highest priority first, matching who wins in apply()
        let override_status = active.first().map(|o| OverrideStatus {
            override_id: o.override_id.clone(),
            override_type: o.kind.type_name().to_string(),
            priority: o.priority,
            intensity: if o.kind.is_day_preview() {
                o.day_preview_intensity(now)
            } else {
                o.get_override_intensity(now)
            },
            end_time: o.end_time(),
        });

        ChannelQueueStatus {
            channel_id,
            active_effects: effect_ids.len(),
            active_overrides: active.len(),
            effect_ids,
            override_status,
        }
    }
}
