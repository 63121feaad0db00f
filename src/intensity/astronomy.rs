//! Solar and lunar calculations for location-aware behaviors.
//!
//! Sunrise and sunset come from the `sunrise` crate's solar-position model.
//! Where that model has no answer (polar day or night, or an event landing on
//! the wrong calendar day for the configured zone) the hours fall back to a
//! constant chosen by latitude band. The moon is approximated: phase from the
//! mean synodic month, elevation as a cosine around a transit hour that slides
//! later as the moon ages.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::f64::consts::PI;

use crate::common::constants::*;
use crate::common::utils::{circular_hour_distance, fractional_hour, wrap_hour};

/// Latitude band used when the solar computation cannot produce hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatitudeBand {
    Tropical,
    Temperate,
    Polar,
}

impl LatitudeBand {
    pub fn from_latitude(latitude: f64) -> Self {
        let lat = latitude.abs();
        if lat < TROPICAL_LATITUDE_LIMIT {
            LatitudeBand::Tropical
        } else if lat < TEMPERATE_LATITUDE_LIMIT {
            LatitudeBand::Temperate
        } else {
            LatitudeBand::Polar
        }
    }

    /// Fallback (sunrise, sunset) hours for this band.
    pub fn daylight_hours(self) -> (f64, f64) {
        match self {
            LatitudeBand::Tropical => TROPICAL_DAYLIGHT_HOURS,
            LatitudeBand::Temperate => TEMPERATE_DAYLIGHT_HOURS,
            LatitudeBand::Polar => POLAR_DAYLIGHT_HOURS,
        }
    }
}

/// Where a pair of daylight hours came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaylightSource {
    Solar,
    Fallback(LatitudeBand),
}

/// Sunrise and sunset as fractional wall-clock hours in the behavior zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DaylightHours {
    pub sunrise: f64,
    pub sunset: f64,
    pub source: DaylightSource,
}

/// Sunrise/sunset hours for a location and date, never failing.
pub fn daylight_hours(latitude: f64, longitude: f64, date: NaiveDate, tz: Tz) -> DaylightHours {
    match solar_daylight_hours(latitude, longitude, date, tz) {
        Ok((sunrise, sunset)) => DaylightHours {
            sunrise,
            sunset,
            source: DaylightSource::Solar,
        },
        Err(e) => {
            let band = LatitudeBand::from_latitude(latitude);
            let (sunrise, sunset) = band.daylight_hours();
            log_debug!(
                "Solar calculation for {latitude:.4}°, {longitude:.4}° on {date} failed ({e}); using {band:?} fallback"
            );
            DaylightHours {
                sunrise,
                sunset,
                source: DaylightSource::Fallback(band),
            }
        }
    }
}

/// Solar-position sunrise/sunset converted into hours in `tz`.
pub fn solar_daylight_hours(
    latitude: f64,
    longitude: f64,
    date: NaiveDate,
    tz: Tz,
) -> Result<(f64, f64)> {
    use sunrise::{Coordinates, SolarDay, SolarEvent};

    if !latitude.is_finite() || !longitude.is_finite() {
        anyhow::bail!("coordinates are not finite");
    }

    let coord = Coordinates::new(latitude, longitude)
        .ok_or_else(|| anyhow::anyhow!("Invalid coordinates"))
        .with_context(|| format!("lat={latitude:.4}, lon={longitude:.4}"))?;
    let (sunrise_utc, sunset_utc) = std::panic::catch_unwind(|| {
        let solar_day = SolarDay::new(coord, date);
        (
            solar_day.event_time(SolarEvent::Sunrise),
            solar_day.event_time(SolarEvent::Sunset),
        )
    })
    .map_err(|_| anyhow::anyhow!("solar model has no answer for {date}"))?;

    // Without a real rise/set the model degenerates to timestamps far from the
    // requested day.
    for event in [sunrise_utc, sunset_utc] {
        let drift = (event.date_naive() - date).num_days().abs();
        if drift > 1 {
            anyhow::bail!("no sunrise/sunset on {date} (event resolved to {event})");
        }
    }
    if sunset_utc <= sunrise_utc {
        anyhow::bail!("sunset {sunset_utc} is not after sunrise {sunrise_utc}");
    }

    let sunrise = fractional_hour(&sunrise_utc.with_timezone(&tz));
    let sunset = fractional_hour(&sunset_utc.with_timezone(&tz));
    if sunset <= sunrise {
        anyhow::bail!(
            "daylight wraps midnight in {tz} (sunrise {sunrise:.2}h, sunset {sunset:.2}h)"
        );
    }

    Ok((sunrise, sunset))
}

/// Moon age as a fraction of the synodic month: 0.0 new, 0.5 full.
pub fn lunar_age_fraction(now: DateTime<Utc>) -> f64 {
    let days_since_reference =
        (now.timestamp() - REFERENCE_NEW_MOON_UNIX) as f64 / 86_400.0;
    (days_since_reference / SYNODIC_MONTH_DAYS).rem_euclid(1.0)
}

/// Illuminated fraction of the moon: 0.0 new, 1.0 full.
pub fn lunar_phase(now: DateTime<Utc>) -> f64 {
    let age = lunar_age_fraction(now);
    (1.0 - (2.0 * PI * age).cos()) / 2.0
}

/// Hour at which the moon is highest for a given lunar age.
pub fn lunar_transit_hour(now: DateTime<Utc>) -> f64 {
    wrap_hour(NEW_MOON_TRANSIT_HOUR + lunar_age_fraction(now) * HOURS_PER_DAY)
}

/// Relative moon elevation (0.0 below the horizon, 1.0 at transit) for a
/// wall-clock hour. The moon is up for six hours either side of transit.
pub fn lunar_elevation(now: DateTime<Utc>, local_hour: f64) -> f64 {
    let distance = circular_hour_distance(local_hour, lunar_transit_hour(now));
    (2.0 * PI * distance / HOURS_PER_DAY).cos().max(0.0)
}
