//! Behavior intensity calculation.
//!
//! [`IntensityCalculator::calculate`] turns a behavior and an instant into a
//! baseline logical intensity in [0,1]. Hours in behavior configs are
//! wall-clock hours in the calculator's time zone; `now` itself is always UTC.
//!
//! ## Per-kind configuration keys
//!
//! | Kind             | Keys (defaults in `common::constants`)                                   |
//! |------------------|---------------------------------------------------------------------------|
//! | `fixed`          | `intensity`                                                               |
//! | `diurnal`        | `sunrise_hour`, `sunset_hour`, `peak_intensity`, `min_intensity`, `ramp_duration_hours` |
//! | `lunar`          | `max_intensity`                                                           |
//! | `moonlight`      | `max_intensity`, `start_hour`, `end_hour`                                 |
//! | `circadian`      | `photoperiod`, `peak_time`, `max_intensity`                               |
//! | `location_based` | `latitude`, `longitude`, plus the diurnal intensity keys                  |
//! | `override`/`effect` | `intensity` (placeholder constant)                                     |
//!
//! Any behavior may also carry `latitude`/`longitude` for weather modulation
//! and `acclimation_start` (RFC 3339) for acclimation scaling.

pub mod astronomy;
pub mod weather;

#[cfg(test)]
mod tests;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::common::constants::*;
use crate::common::utils::{
    circular_hour_distance, clamp_unit, fractional_hour, hour_in_window, lerp, smoothstep,
    wrap_hour,
};
use crate::model::{Behavior, BehaviorKind};

use self::astronomy::{daylight_hours, lunar_elevation, lunar_phase};
use self::weather::WeatherCache;

/// Parameters of a diurnal curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiurnalParams {
    pub sunrise_hour: f64,
    pub sunset_hour: f64,
    pub peak_intensity: f64,
    pub min_intensity: f64,
    pub ramp_duration_hours: f64,
}

impl DiurnalParams {
    pub fn from_behavior(behavior: &Behavior) -> Self {
        Self {
            sunrise_hour: behavior.config_f64_or("sunrise_hour", DEFAULT_SUNRISE_HOUR),
            sunset_hour: behavior.config_f64_or("sunset_hour", DEFAULT_SUNSET_HOUR),
            peak_intensity: behavior.config_intensity_or("peak_intensity", DEFAULT_PEAK_INTENSITY),
            min_intensity: behavior.config_intensity_or("min_intensity", DEFAULT_MIN_INTENSITY),
            ramp_duration_hours: behavior
                .config_f64_or("ramp_duration_hours", DEFAULT_RAMP_DURATION_HOURS)
                .max(0.0),
        }
    }

    /// Evaluate the curve at a wall-clock hour.
    ///
    /// Inside `[sunrise, sunset]` the level rises from `min` to `peak` over the
    /// first `ramp_duration_hours` and falls back over the last, following a
    /// smoothstep. A sunset earlier than sunrise means the light period spans
    /// midnight; a sunset a full day after sunrise means it never ends.
    pub fn evaluate(&self, hour: f64) -> f64 {
        let raw_span = self.sunset_hour - self.sunrise_hour;
        let span = if raw_span > 0.0 {
            raw_span.min(HOURS_PER_DAY)
        } else {
            wrap_hour(raw_span)
        };
        let offset = wrap_hour(hour - self.sunrise_hour);
        if span <= 0.0 || offset > span {
            return self.min_intensity;
        }

        let ramp = self.ramp_duration_hours.min(span / 2.0);
        if ramp > 0.0 && offset < ramp {
            lerp(self.min_intensity, self.peak_intensity, smoothstep(offset / ramp))
        } else if ramp > 0.0 && span - offset < ramp {
            lerp(
                self.min_intensity,
                self.peak_intensity,
                smoothstep((span - offset) / ramp),
            )
        } else {
            self.peak_intensity
        }
    }
}

/// Computes baseline intensities for behaviors.
pub struct IntensityCalculator {
    timezone: Tz,
    weather: WeatherCache,
}

impl IntensityCalculator {
    pub fn new(timezone: Tz, weather: WeatherCache) -> Self {
        Self { timezone, weather }
    }

    /// Calculator evaluating hours in UTC without weather modulation.
    pub fn utc() -> Self {
        Self::new(chrono_tz::UTC, WeatherCache::disabled())
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Baseline logical intensity of `behavior` at `now`, in [0,1].
    pub fn calculate(&self, behavior: &Behavior, now: DateTime<Utc>) -> f64 {
        if !behavior.enabled {
            return 0.0;
        }

        let local = now.with_timezone(&self.timezone);
        let hour = fractional_hour(&local);

        let mut intensity = match behavior.kind {
            BehaviorKind::Fixed => {
                behavior.config_intensity_or("intensity", DEFAULT_FIXED_INTENSITY)
            }
            BehaviorKind::Diurnal => DiurnalParams::from_behavior(behavior).evaluate(hour),
            BehaviorKind::Lunar => lunar_intensity(behavior, now, hour),
            BehaviorKind::Moonlight => moonlight_intensity(behavior, now, hour),
            BehaviorKind::Circadian => circadian_intensity(behavior, hour),
            BehaviorKind::LocationBased => {
                self.location_based_intensity(behavior, local.date_naive(), hour)
            }
            BehaviorKind::Override | BehaviorKind::Effect => {
                behavior.config_intensity_or("intensity", DEFAULT_PLACEHOLDER_INTENSITY)
            }
        };

        intensity *= acclimation_factor(behavior, now);

        if behavior.weather_influence_enabled {
            let latitude = behavior.config_f64_or("latitude", 0.0);
            let longitude = behavior.config_f64_or("longitude", 0.0);
            if latitude != 0.0 && longitude != 0.0 {
                intensity *= self.weather.factor(latitude, longitude, now);
            }
        }

        clamp_unit(intensity)
    }

    fn location_based_intensity(&self, behavior: &Behavior, date: NaiveDate, hour: f64) -> f64 {
        let latitude = behavior.config_f64_or("latitude", 0.0);
        let longitude = behavior.config_f64_or("longitude", 0.0);
        let daylight = daylight_hours(latitude, longitude, date, self.timezone);

        let params = DiurnalParams {
            sunrise_hour: daylight.sunrise,
            sunset_hour: daylight.sunset,
            ..DiurnalParams::from_behavior(behavior)
        };
        params.evaluate(hour)
    }
}

fn lunar_intensity(behavior: &Behavior, now: DateTime<Utc>, hour: f64) -> f64 {
    let max = behavior.config_intensity_or("max_intensity", DEFAULT_LUNAR_MAX_INTENSITY);
    max * lunar_phase(now) * lunar_elevation(now, hour)
}

fn moonlight_intensity(behavior: &Behavior, now: DateTime<Utc>, hour: f64) -> f64 {
    let start = behavior.config_f64_or("start_hour", DEFAULT_MOONLIGHT_START_HOUR);
    let end = behavior.config_f64_or("end_hour", DEFAULT_MOONLIGHT_END_HOUR);
    if !hour_in_window(hour, start, end) {
        return 0.0;
    }
    lunar_intensity(behavior, now, hour)
}

fn circadian_intensity(behavior: &Behavior, hour: f64) -> f64 {
    let photoperiod = behavior
        .config_f64_or("photoperiod", DEFAULT_PHOTOPERIOD_HOURS)
        .clamp(0.0, HOURS_PER_DAY);
    let peak_time = behavior.config_f64_or("peak_time", DEFAULT_PEAK_TIME_HOUR);
    let max = behavior.config_intensity_or("max_intensity", DEFAULT_CIRCADIAN_MAX_INTENSITY);

    let half_window = photoperiod / 2.0;
    if half_window <= 0.0 {
        return 0.0;
    }
    let distance = circular_hour_distance(hour, peak_time);
    if distance > half_window {
        return 0.0;
    }
    max * (1.0 - distance / half_window)
}

/// Scale from `ACCLIMATION_START_FACTOR` up to 1.0 over `acclimation_days`
/// counted from the behavior's `acclimation_start`.
fn acclimation_factor(behavior: &Behavior, now: DateTime<Utc>) -> f64 {
    let Some(days) = behavior.acclimation_days.filter(|d| *d > 0) else {
        return 1.0;
    };
    let Some(start) = behavior
        .config_str("acclimation_start")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    else {
        return 1.0;
    };

    let elapsed_days = (now - start.with_timezone(&Utc)).num_seconds() as f64 / 86_400.0;
    let progress = (elapsed_days / days as f64).clamp(0.0, 1.0);
    lerp(ACCLIMATION_START_FACTOR, 1.0, progress)
}
