//! Behavior and assignment data model.
//!
//! Behaviors are read-only to the engine: an external management surface
//! creates and edits them, and the engine only evaluates them. The per-kind
//! configuration is kept as a loose key/value map and read through the typed
//! accessors below, which fall back to documented defaults on missing or
//! malformed values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Logical channel identifier.
pub type ChannelId = u32;
/// Behavior identifier.
pub type BehaviorId = u64;
/// Channel group identifier.
pub type GroupId = String;
/// Logical intensity per channel, ordered by channel id.
pub type IntensityMap = std::collections::BTreeMap<ChannelId, f64>;

/// Kind of time function a behavior evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    Fixed,
    Diurnal,
    Lunar,
    Moonlight,
    Circadian,
    LocationBased,
    Override,
    Effect,
}

impl std::fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BehaviorKind::Fixed => "fixed",
            BehaviorKind::Diurnal => "diurnal",
            BehaviorKind::Lunar => "lunar",
            BehaviorKind::Moonlight => "moonlight",
            BehaviorKind::Circadian => "circadian",
            BehaviorKind::LocationBased => "location_based",
            BehaviorKind::Override => "override",
            BehaviorKind::Effect => "effect",
        };
        write!(f, "{name}")
    }
}

/// A time-function definition producing a baseline logical intensity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    pub id: BehaviorId,
    pub kind: BehaviorKind,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub weather_influence_enabled: bool,
    #[serde(default)]
    pub acclimation_days: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Behavior {
    pub fn new(id: BehaviorId, kind: BehaviorKind) -> Self {
        Self {
            id,
            kind,
            config: Map::new(),
            weather_influence_enabled: false,
            acclimation_days: None,
            enabled: true,
        }
    }

    /// Builder-style helper for setting a config entry.
    pub fn with_config(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    /// Read a numeric config value. Numeric strings are accepted; anything
    /// else, including non-finite numbers, reads as absent.
    pub fn config_f64(&self, key: &str) -> Option<f64> {
        let value = match self.config.get(key)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        value.is_finite().then_some(value)
    }

    /// Read a numeric config value with a default.
    pub fn config_f64_or(&self, key: &str, default: f64) -> f64 {
        self.config_f64(key).unwrap_or(default)
    }

    /// Read a logical intensity from config: values outside [0,1] are
    /// clamped, missing or non-numeric values fall back to the default.
    pub fn config_intensity_or(&self, key: &str, default: f64) -> f64 {
        self.config_f64(key)
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(default)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// What an assignment binds its behavior to. Exactly one is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentTarget {
    Channel(ChannelId),
    Group(GroupId),
}

/// Binds one behavior to a channel or a channel group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub behavior_id: BehaviorId,
    pub target: AssignmentTarget,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_enabled")]
    pub active: bool,
}

impl Assignment {
    pub fn for_channel(behavior_id: BehaviorId, channel_id: ChannelId) -> Self {
        Self {
            behavior_id,
            target: AssignmentTarget::Channel(channel_id),
            start_time: None,
            end_time: None,
            active: true,
        }
    }

    pub fn for_group(behavior_id: BehaviorId, group_id: impl Into<GroupId>) -> Self {
        Self {
            behavior_id,
            target: AssignmentTarget::Group(group_id.into()),
            start_time: None,
            end_time: None,
            active: true,
        }
    }

    /// Active flag set and `now` inside the optional `[start, end)` window.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        if let Some(start) = self.start_time
            && now < start
        {
            return false;
        }
        if let Some(end) = self.end_time
            && now >= end
        {
            return false;
        }
        true
    }
}
