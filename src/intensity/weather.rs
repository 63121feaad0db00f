//! Weather-driven attenuation of behavior intensity.
//!
//! Cloud cover from an external provider dims lighting to at least
//! `MINIMUM_WEATHER_FACTOR` of its clear-sky value. Results are cached per
//! rounded coordinate for a fixed TTL so every channel sharing a location costs
//! one provider call per window. Any failure (no credentials, provider error,
//! bad data) yields `DEFAULT_WEATHER_FACTOR` and is not cached.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::common::constants::*;

/// Current conditions as reported by a weather provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherConditions {
    pub cloud_cover_percent: f64,
    pub status_text: String,
}

/// External weather collaborator.
#[cfg_attr(any(test, feature = "testing-support"), mockall::automock)]
pub trait WeatherProvider: Send + Sync {
    fn get_current_conditions(&self, latitude: f64, longitude: f64) -> Result<WeatherConditions>;
}

/// Map cloud cover (percent) to an intensity multiplier in [0.3, 1.0].
pub fn cloud_cover_factor(cloud_cover_percent: f64) -> f64 {
    if !cloud_cover_percent.is_finite() {
        return DEFAULT_WEATHER_FACTOR;
    }
    let cover = cloud_cover_percent.clamp(0.0, 100.0) / 100.0;
    (1.0 - cover * CLOUD_ATTENUATION).clamp(MINIMUM_WEATHER_FACTOR, 1.0)
}

/// Settings for the weather cache, usually taken from the `[weather]` config table.
#[derive(Debug, Clone)]
pub struct WeatherSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub cache_ttl: Duration,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_WEATHER_ENABLED,
            api_key: None,
            cache_ttl: Duration::minutes(DEFAULT_WEATHER_CACHE_TTL as i64),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedFactor {
    factor: f64,
    fetched_at: DateTime<Utc>,
}

type CacheKey = (i64, i64);

fn cache_key(latitude: f64, longitude: f64) -> CacheKey {
    let scale = 10f64.powi(WEATHER_CACHE_PRECISION);
    (
        (latitude * scale).round() as i64,
        (longitude * scale).round() as i64,
    )
}

/// TTL cache in front of a [`WeatherProvider`].
pub struct WeatherCache {
    provider: Option<Arc<dyn WeatherProvider>>,
    settings: WeatherSettings,
    entries: Mutex<HashMap<CacheKey, CachedFactor>>,
}

impl WeatherCache {
    pub fn new(provider: Option<Arc<dyn WeatherProvider>>, settings: WeatherSettings) -> Self {
        Self {
            provider,
            settings,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// A cache that never queries anything and always answers 1.0.
    pub fn disabled() -> Self {
        Self::new(
            None,
            WeatherSettings {
                enabled: false,
                ..WeatherSettings::default()
            },
        )
    }

    /// Weather factor for a location at `now`.
    pub fn factor(&self, latitude: f64, longitude: f64, now: DateTime<Utc>) -> f64 {
        if !self.settings.enabled {
            return DEFAULT_WEATHER_FACTOR;
        }
        let Some(provider) = self.provider.as_ref() else {
            return DEFAULT_WEATHER_FACTOR;
        };
        if self
            .settings
            .api_key
            .as_deref()
            .is_none_or(|key| key.trim().is_empty())
        {
            log_debug!("Weather API key missing; weather factor fixed at {DEFAULT_WEATHER_FACTOR}");
            return DEFAULT_WEATHER_FACTOR;
        }

        let key = cache_key(latitude, longitude);
        if let Some(cached) = self.lookup(key, now) {
            return cached;
        }

        match provider.get_current_conditions(latitude, longitude) {
            Ok(conditions) => {
                let factor = cloud_cover_factor(conditions.cloud_cover_percent);
                log_debug!(
                    "Weather at {latitude:.2}°, {longitude:.2}°: {} ({:.0}% cloud) → factor {factor:.2}",
                    conditions.status_text,
                    conditions.cloud_cover_percent
                );
                self.entries
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(
                        key,
                        CachedFactor {
                            factor,
                            fetched_at: now,
                        },
                    );
                factor
            }
            Err(e) => {
                log_debug!("Weather lookup failed ({e}); using factor {DEFAULT_WEATHER_FACTOR}");
                DEFAULT_WEATHER_FACTOR
            }
        }
    }

    fn lookup(&self, key: CacheKey, now: DateTime<Utc>) -> Option<f64> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&key)
            .filter(|cached| now - cached.fetched_at < self.settings.cache_ttl)
            .map(|cached| cached.factor)
    }

    /// Number of cached locations (including stale ones not yet refreshed).
    pub fn cached_locations(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
