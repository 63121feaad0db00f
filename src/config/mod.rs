//! Configuration system for lightcycle.
//!
//! Loads a TOML file describing engine timing, the weather service, channel
//! registrations and the behaviors and assignments the daemon feeds into its
//! in-memory stores.
//!
//! ## Configuration Sources
//!
//! 1. `--config <path>` on the command line
//! 2. **XDG_CONFIG_HOME**/lightcycle/lightcycle.toml (created with defaults if missing)
//!
//! ## Configuration Structure
//!
//! ```toml
//! timezone = "UTC"            # IANA zone used to evaluate behavior hours
//! update_interval = 60        # Scheduler cadence in seconds (1-3600)
//! error_backoff = 5           # Seconds to wait after a failed iteration (1-300)
//! ramp_step_interval = 50     # Default ramp step in milliseconds (10-1000)
//! write_timeout = 1000        # Hardware write timeout in milliseconds (10-30000)
//!
//! [weather]
//! enabled = true
//! api_key = "..."             # Absent means lighting is never weather-dimmed
//! cache_ttl = 10              # Minutes (1-1440)
//!
//! [[channels]]
//! id = 7
//! controller_address = 0x40
//! channel_number = 3
//! min_value = 0
//! max_value = 100
//!
//! [[behaviors]]
//! id = 1
//! kind = "diurnal"
//! config = { sunrise_hour = 7.0, sunset_hour = 19.0, peak_intensity = 0.9 }
//!
//! [[assignments]]
//! behavior_id = 1
//! channel_id = 7              # or group_id = "reef"
//!
//! [groups]
//! reef = [7, 8]
//! ```
//!
//! Every scalar is optional and falls back to the constants in
//! `common::constants`. Validation runs on load and names the offending field.

pub mod loading;
pub mod validation;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::common::constants::*;
use crate::engine::EngineSettings;
use crate::intensity::weather::WeatherSettings;
use crate::model::{Assignment, AssignmentTarget, Behavior, BehaviorId, ChannelId, GroupId};

pub use loading::{create_default_config, get_config_path, load, load_from_path, parse};

/// `[weather]` table.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct WeatherConfig {
    pub enabled: Option<bool>,
    pub api_key: Option<String>,
    pub cache_ttl: Option<u64>, // minutes
}

/// One `[[channels]]` registration.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChannelConfig {
    pub id: ChannelId,
    pub controller_address: u8,
    pub channel_number: u8,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
}

impl ChannelConfig {
    pub fn min_value(&self) -> f64 {
        self.min_value.unwrap_or(MINIMUM_PHYSICAL_PERCENT)
    }

    pub fn max_value(&self) -> f64 {
        self.max_value.unwrap_or(MAXIMUM_PHYSICAL_PERCENT)
    }
}

/// One `[[assignments]]` entry. Exactly one of `channel_id` and `group_id`
/// must be set.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AssignmentConfig {
    pub behavior_id: BehaviorId,
    pub channel_id: Option<ChannelId>,
    pub group_id: Option<GroupId>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub active: Option<bool>,
}

impl AssignmentConfig {
    pub fn to_assignment(&self) -> Result<Assignment> {
        let target = match (self.channel_id, &self.group_id) {
            (Some(channel_id), None) => AssignmentTarget::Channel(channel_id),
            (None, Some(group_id)) => AssignmentTarget::Group(group_id.clone()),
            (Some(_), Some(_)) => bail!(
                "assignment for behavior {} sets both channel_id and group_id",
                self.behavior_id
            ),
            (None, None) => bail!(
                "assignment for behavior {} needs a channel_id or a group_id",
                self.behavior_id
            ),
        };
        Ok(Assignment {
            behavior_id: self.behavior_id,
            target,
            start_time: self.start_time,
            end_time: self.end_time,
            active: self.active.unwrap_or(true),
        })
    }
}

/// Configuration structure for lightcycle, loaded from `lightcycle.toml`.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    pub timezone: Option<String>,
    pub update_interval: Option<u64>,    // seconds
    pub error_backoff: Option<u64>,      // seconds
    pub ramp_step_interval: Option<u64>, // milliseconds
    pub write_timeout: Option<u64>,      // milliseconds
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub behaviors: Vec<Behavior>,
    #[serde(default)]
    pub assignments: Vec<AssignmentConfig>,
    #[serde(default)]
    pub groups: BTreeMap<GroupId, Vec<ChannelId>>,
}

impl Config {
    /// Configured zone, or UTC. Validation has already rejected unknown names.
    pub fn timezone(&self) -> Tz {
        self.timezone
            .as_deref()
            .and_then(|name| name.parse::<Tz>().ok())
            .unwrap_or(Tz::UTC)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            update_interval: Duration::from_secs(
                self.update_interval.unwrap_or(DEFAULT_UPDATE_INTERVAL),
            ),
            error_backoff: Duration::from_secs(self.error_backoff.unwrap_or(DEFAULT_ERROR_BACKOFF)),
            ramp_step_interval_ms: self
                .ramp_step_interval
                .unwrap_or(DEFAULT_RAMP_STEP_INTERVAL),
            write_timeout: Some(Duration::from_millis(
                self.write_timeout.unwrap_or(DEFAULT_WRITE_TIMEOUT),
            )),
        }
    }

    pub fn weather_settings(&self) -> WeatherSettings {
        WeatherSettings {
            enabled: self.weather.enabled.unwrap_or(DEFAULT_WEATHER_ENABLED),
            api_key: self.weather.api_key.clone().filter(|key| !key.is_empty()),
            cache_ttl: chrono::Duration::minutes(
                self.weather.cache_ttl.unwrap_or(DEFAULT_WEATHER_CACHE_TTL) as i64,
            ),
        }
    }

    pub fn assignments(&self) -> Result<Vec<Assignment>> {
        self.assignments
            .iter()
            .map(AssignmentConfig::to_assignment)
            .collect()
    }

    pub fn log_config(&self, source: &Path) {
        log_block_start!("Loaded configuration");
        log_indented!("Source: {}", source.display());
        log_indented!("Time zone: {}", self.timezone());

        let settings = self.engine_settings();
        log_indented!(
            "Update interval: {} seconds",
            settings.update_interval.as_secs()
        );
        log_indented!("Error backoff: {} seconds", settings.error_backoff.as_secs());
        log_indented!("Ramp step: {}ms", settings.ramp_step_interval_ms);
        if let Some(timeout) = settings.write_timeout {
            log_indented!("Write timeout: {}ms", timeout.as_millis());
        }

        let weather = self.weather_settings();
        if !weather.enabled {
            log_indented!("Weather: disabled");
        } else if weather.api_key.is_some() {
            log_indented!(
                "Weather: enabled (cache {} minutes)",
                weather.cache_ttl.num_minutes()
            );
        } else {
            log_indented!("Weather: no API key, clear sky assumed");
        }

        log_indented!(
            "{} channel(s), {} behavior(s), {} assignment(s), {} group(s)",
            self.channels.len(),
            self.behaviors.len(),
            self.assignments.len(),
            self.groups.len()
        );
    }
}
