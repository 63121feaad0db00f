//! Time-bounded cosmetic modulations of channel intensity.
//!
//! Effects compose with whatever value a channel already has: they are applied
//! highest priority first, each one reading the running value left by the
//! previous, and every update is clamped back into [0,1].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::f64::consts::PI;

use super::{entry_window_end, number_param, validate_channels, validate_duration};
use crate::common::constants::*;
use crate::common::error::{LightingError, QueueKind};
use crate::common::utils::{clamp_unit, lerp, smoothstep};
use crate::model::{ChannelId, IntensityMap};

/// Curve followed by a fade effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeType {
    Linear,
    Smooth,
    Exponential,
}

impl FadeType {
    pub fn parse(name: &str) -> Result<Self, LightingError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(FadeType::Linear),
            "smooth" => Ok(FadeType::Smooth),
            "exponential" => Ok(FadeType::Exponential),
            other => Err(LightingError::validation(
                "fade_type",
                format!("'{other}' is not one of linear, smooth, exponential"),
            )),
        }
    }

    /// Eased progress for a linear progress in [0,1].
    pub fn curve(self, progress: f64) -> f64 {
        let p = progress.clamp(0.0, 1.0);
        match self {
            FadeType::Linear => p,
            FadeType::Smooth => smoothstep(p),
            FadeType::Exponential => p * p,
        }
    }
}

/// Validated effect parameters, one variant per effect type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect_type", rename_all = "snake_case")]
pub enum EffectKind {
    Fade {
        target_intensity: f64,
        fade_type: FadeType,
    },
    Pulse {
        frequency: f64,
        amplitude: f64,
    },
    Storm {
        intensity: f64,
        frequency: f64,
    },
    Dim {
        dim_factor: f64,
    },
    Boost {
        boost_factor: f64,
    },
}

impl EffectKind {
    /// Build and validate an effect from its type name and raw parameters.
    pub fn parse(effect_type: &str, params: &Map<String, Value>) -> Result<Self, LightingError> {
        let kind = match effect_type.trim().to_ascii_lowercase().as_str() {
            "fade" => {
                let target_intensity = number_param(params, "target_intensity")?
                    .ok_or_else(|| LightingError::validation("target_intensity", "is required"))?;
                let fade_type = match params.get("fade_type") {
                    None => FadeType::Linear,
                    Some(Value::String(name)) => FadeType::parse(name)?,
                    Some(_) => {
                        return Err(LightingError::validation("fade_type", "must be a string"));
                    }
                };
                EffectKind::Fade {
                    target_intensity,
                    fade_type,
                }
            }
            "pulse" => EffectKind::Pulse {
                frequency: number_param(params, "pulse_frequency")?
                    .ok_or_else(|| LightingError::validation("pulse_frequency", "is required"))?,
                amplitude: number_param(params, "pulse_amplitude")?
                    .ok_or_else(|| LightingError::validation("pulse_amplitude", "is required"))?,
            },
            "storm" => EffectKind::Storm {
                intensity: number_param(params, "storm_intensity")?
                    .unwrap_or(DEFAULT_STORM_INTENSITY),
                frequency: number_param(params, "storm_frequency")?
                    .unwrap_or(DEFAULT_STORM_FREQUENCY),
            },
            "dim" => EffectKind::Dim {
                dim_factor: number_param(params, "dim_factor")?
                    .ok_or_else(|| LightingError::validation("dim_factor", "is required"))?,
            },
            "boost" => EffectKind::Boost {
                boost_factor: number_param(params, "boost_factor")?
                    .ok_or_else(|| LightingError::validation("boost_factor", "is required"))?,
            },
            other => {
                return Err(LightingError::validation(
                    "effect_type",
                    format!("unknown effect type '{other}'"),
                ));
            }
        };
        kind.validate()?;
        Ok(kind)
    }

    fn validate(&self) -> Result<(), LightingError> {
        fn unit(field: &str, value: f64) -> Result<(), LightingError> {
            if !(0.0..=1.0).contains(&value) {
                return Err(LightingError::validation(
                    field,
                    format!("{value} is outside [0, 1]"),
                ));
            }
            Ok(())
        }
        fn positive(field: &str, value: f64) -> Result<(), LightingError> {
            if value <= 0.0 {
                return Err(LightingError::validation(
                    field,
                    format!("{value} must be greater than 0"),
                ));
            }
            Ok(())
        }

        match *self {
            EffectKind::Fade {
                target_intensity, ..
            } => unit("target_intensity", target_intensity),
            EffectKind::Pulse {
                frequency,
                amplitude,
            } => {
                positive("pulse_frequency", frequency)?;
                unit("pulse_amplitude", amplitude)
            }
            EffectKind::Storm {
                intensity,
                frequency,
            } => {
                unit("storm_intensity", intensity)?;
                positive("storm_frequency", frequency)
            }
            EffectKind::Dim { dim_factor } => unit("dim_factor", dim_factor),
            EffectKind::Boost { boost_factor } => unit("boost_factor", boost_factor),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            EffectKind::Fade { .. } => "fade",
            EffectKind::Pulse { .. } => "pulse",
            EffectKind::Storm { .. } => "storm",
            EffectKind::Dim { .. } => "dim",
            EffectKind::Boost { .. } => "boost",
        }
    }

    /// Combine this effect with a channel's running value.
    ///
    /// `elapsed_seconds` drives the oscillating effects, `progress` the
    /// time-proportional ones.
    pub fn modulate(&self, current: f64, progress: f64, elapsed_seconds: f64) -> f64 {
        let value = match *self {
            EffectKind::Fade {
                target_intensity,
                fade_type,
            } => lerp(current, target_intensity, fade_type.curve(progress)),
            EffectKind::Pulse {
                frequency,
                amplitude,
            } => current * (1.0 + amplitude * (2.0 * PI * frequency * elapsed_seconds).sin()),
            EffectKind::Storm {
                intensity,
                frequency,
            } => {
                let base = (2.0 * PI * frequency * elapsed_seconds).sin();
                let flicker =
                    (2.0 * PI * frequency * STORM_OVERTONE_RATIO * elapsed_seconds).sin();
                let variation = (base + STORM_OVERTONE_WEIGHT * flicker)
                    / (1.0 + STORM_OVERTONE_WEIGHT);
                current + intensity * variation
            }
            EffectKind::Dim { dim_factor } => current * (1.0 - dim_factor * progress),
            EffectKind::Boost { boost_factor } => (current + boost_factor * progress).min(1.0),
        };
        clamp_unit(value)
    }
}

/// A request to create an effect.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEffect {
    pub effect_type: String,
    pub channels: Vec<ChannelId>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Defaults to the time of insertion.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub priority: i32,
}

/// An effect accepted into the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Effect {
    pub effect_id: String,
    #[serde(flatten)]
    pub kind: EffectKind,
    pub channels: BTreeSet<ChannelId>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub priority: i32,
}

impl Effect {
    pub fn end_time(&self) -> DateTime<Utc> {
        entry_window_end(self.start_time, self.duration_minutes)
    }

    /// `start_time <= now <= end_time`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now <= self.end_time()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.end_time()
    }

    /// Elapsed fraction of the window, clamped to [0,1].
    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        let total = Duration::minutes(i64::from(self.duration_minutes)).num_milliseconds();
        if total <= 0 {
            return 1.0;
        }
        let elapsed = (now - self.start_time).num_milliseconds();
        (elapsed as f64 / total as f64).clamp(0.0, 1.0)
    }

    fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.start_time).num_milliseconds() as f64 / 1000.0).max(0.0)
    }
}

/// Priority-ordered list of effects.
#[derive(Debug, Default)]
pub struct EffectQueue {
    effects: Vec<Effect>,
}

impl EffectQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert an effect, returning its id.
    ///
    /// Rejected without any change if a requested channel is claimed by an
    /// effect active at `now`.
    pub fn add(&mut self, request: NewEffect, now: DateTime<Utc>) -> Result<String, LightingError> {
        let kind = EffectKind::parse(&request.effect_type, &request.parameters)?;
        let channels = validate_channels(&request.channels)?;
        validate_duration(request.duration_minutes)?;

        if let Some((existing, channel_id)) = self.find_claim(&channels, now) {
            log_warning!(
                "Rejected {} effect: channel {channel_id} is claimed by effect {}",
                kind.type_name(),
                existing.effect_id
            );
            return Err(LightingError::Conflict {
                kind: QueueKind::Effect,
                entry_id: existing.effect_id.clone(),
                channel_id,
            });
        }

        let effect = Effect {
            effect_id: uuid::Uuid::new_v4().to_string(),
            kind,
            channels,
            start_time: request.start_time.unwrap_or(now),
            duration_minutes: request.duration_minutes,
            priority: request.priority,
        };
        log_decorated!(
            "Added {} effect {} on channels {:?} for {} min (priority {})",
            effect.kind.type_name(),
            effect.effect_id,
            effect.channels,
            effect.duration_minutes,
            effect.priority
        );
        let id = effect.effect_id.clone();
        self.effects.push(effect);
        Ok(id)
    }

    fn find_claim(
        &self,
        channels: &BTreeSet<ChannelId>,
        now: DateTime<Utc>,
    ) -> Option<(&Effect, ChannelId)> {
        self.effects
            .iter()
            .filter(|e| e.is_active(now))
            .find_map(|e| {
                e.channels
                    .intersection(channels)
                    .next()
                    .map(|channel_id| (e, *channel_id))
            })
    }

    /// Remove an effect by id. Returns whether it existed.
    pub fn remove(&mut self, effect_id: &str) -> bool {
        let before = self.effects.len();
        self.effects.retain(|e| e.effect_id != effect_id);
        before != self.effects.len()
    }

    /// Effects active at `now`, highest priority first.
    pub fn get_active(&self, now: DateTime<Utc>) -> Vec<&Effect> {
        let mut active: Vec<&Effect> = self.effects.iter().filter(|e| e.is_active(now)).collect();
        active.sort_by_key(|e| Reverse(e.priority));
        active
    }

    /// Active effects touching one channel, highest priority first.
    pub fn get_for_channel(&self, channel_id: ChannelId, now: DateTime<Utc>) -> Vec<&Effect> {
        self.get_active(now)
            .into_iter()
            .filter(|e| e.channels.contains(&channel_id))
            .collect()
    }

    /// Drop effects whose window has ended. Returns how many were removed.
    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.effects.len();
        self.effects.retain(|e| !e.is_expired(now));
        before - self.effects.len()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Apply every active effect to the channels present in `base`.
    pub fn apply(&self, base: &IntensityMap, now: DateTime<Utc>) -> IntensityMap {
        let mut result = base.clone();
        for effect in self.get_active(now) {
            let progress = effect.progress(now);
            let elapsed = effect.elapsed_seconds(now);
            for channel_id in &effect.channels {
                if let Some(value) = result.get_mut(channel_id) {
                    *value = effect.kind.modulate(*value, progress, elapsed);
                }
            }
        }
        result
    }
}
