//! Application-wide constants and default values.
//!
//! Every default, validation limit and fallback used by the engine lives here so
//! that magic numbers never appear inline in the calculation code.

// # Configuration Defaults

pub const CONFIG_DIR_NAME: &str = "lightcycle";
pub const CONFIG_FILE_NAME: &str = "lightcycle.toml";
pub const DEFAULT_UPDATE_INTERVAL: u64 = 60; // seconds
pub const DEFAULT_ERROR_BACKOFF: u64 = 5; // seconds
pub const DEFAULT_RAMP_STEP_INTERVAL: u64 = 50; // milliseconds
pub const DEFAULT_WRITE_TIMEOUT: u64 = 1000; // milliseconds
pub const DEFAULT_WEATHER_ENABLED: bool = true;
pub const DEFAULT_WEATHER_CACHE_TTL: u64 = 10; // minutes

// # Exit Codes

pub const EXIT_FAILURE: i32 = 1;

// # Validation Limits

pub const MINIMUM_UPDATE_INTERVAL: u64 = 1;
pub const MAXIMUM_UPDATE_INTERVAL: u64 = 3600;
pub const MINIMUM_ERROR_BACKOFF: u64 = 1;
pub const MAXIMUM_ERROR_BACKOFF: u64 = 300;
pub const MINIMUM_RAMP_STEP_INTERVAL: u64 = 10;
pub const MAXIMUM_RAMP_STEP_INTERVAL: u64 = 1000;
pub const MINIMUM_WRITE_TIMEOUT: u64 = 10;
pub const MAXIMUM_WRITE_TIMEOUT: u64 = 30_000;
pub const MINIMUM_WEATHER_CACHE_TTL: u64 = 1;
pub const MAXIMUM_WEATHER_CACHE_TTL: u64 = 1440;

// # Hardware Addressing

pub const MINIMUM_CONTROLLER_ADDRESS: u8 = 0x40;
pub const MAXIMUM_CONTROLLER_ADDRESS: u8 = 0x7F;
pub const MAXIMUM_CHANNEL_NUMBER: u8 = 15;
pub const MINIMUM_PHYSICAL_PERCENT: f64 = 0.0;
pub const MAXIMUM_PHYSICAL_PERCENT: f64 = 100.0;
/// Native duty range of the actuator (16-bit PWM register).
pub const MAXIMUM_DUTY: u16 = u16::MAX;

// # Behavior Defaults

pub const DEFAULT_FIXED_INTENSITY: f64 = 0.5;
pub const DEFAULT_PLACEHOLDER_INTENSITY: f64 = 0.5;

pub const DEFAULT_SUNRISE_HOUR: f64 = 6.0;
pub const DEFAULT_SUNSET_HOUR: f64 = 18.0;
pub const DEFAULT_PEAK_INTENSITY: f64 = 1.0;
pub const DEFAULT_MIN_INTENSITY: f64 = 0.0;
pub const DEFAULT_RAMP_DURATION_HOURS: f64 = 1.0;

pub const DEFAULT_LUNAR_MAX_INTENSITY: f64 = 0.1;
pub const DEFAULT_MOONLIGHT_START_HOUR: f64 = 20.0;
pub const DEFAULT_MOONLIGHT_END_HOUR: f64 = 6.0;

pub const DEFAULT_PHOTOPERIOD_HOURS: f64 = 12.0;
pub const DEFAULT_PEAK_TIME_HOUR: f64 = 12.0;
pub const DEFAULT_CIRCADIAN_MAX_INTENSITY: f64 = 1.0;

/// Intensity multiplier on the first day of acclimation.
pub const ACCLIMATION_START_FACTOR: f64 = 0.5;

// # Astronomy

pub const HOURS_PER_DAY: f64 = 24.0;
/// Mean synodic month in days.
pub const SYNODIC_MONTH_DAYS: f64 = 29.530_588_853;
/// Reference new moon: 2000-01-06 18:14 UTC, as a Unix timestamp.
pub const REFERENCE_NEW_MOON_UNIX: i64 = 947_182_440;
/// Hour at which a new moon transits; each day of lunar age shifts it later.
pub const NEW_MOON_TRANSIT_HOUR: f64 = 12.0;

/// Latitude below which the fallback day length is tropical.
pub const TROPICAL_LATITUDE_LIMIT: f64 = 23.44;
/// Latitude below which the fallback day length is temperate; polar above.
pub const TEMPERATE_LATITUDE_LIMIT: f64 = 66.56;

/// Fallback (sunrise, sunset) hours near the equator, where the day length
/// barely changes over the year.
pub const TROPICAL_DAYLIGHT_HOURS: (f64, f64) = (6.0, 18.0);
/// Fallback (sunrise, sunset) hours for mid latitudes, an annual average.
pub const TEMPERATE_DAYLIGHT_HOURS: (f64, f64) = (6.5, 19.5);
/// Fallback (sunrise, sunset) hours inside the polar circles, where the solar
/// computation has no rise or set; a short day keeps lighting conservative.
pub const POLAR_DAYLIGHT_HOURS: (f64, f64) = (9.0, 15.0);

// # Weather

/// Weather factor used when no conditions are available. Lighting is never
/// dimmed because the weather service is unreachable.
pub const DEFAULT_WEATHER_FACTOR: f64 = 1.0;
pub const MINIMUM_WEATHER_FACTOR: f64 = 0.3;
/// Fraction of light removed at 100% cloud cover.
pub const CLOUD_ATTENUATION: f64 = 0.7;
/// Decimal places kept when rounding coordinates into a cache key.
pub const WEATHER_CACHE_PRECISION: i32 = 2;

// # Effects

pub const DEFAULT_STORM_INTENSITY: f64 = 0.5;
pub const DEFAULT_STORM_FREQUENCY: f64 = 0.2; // Hz
/// Ratio between the storm's base tone and its flicker overtone.
pub const STORM_OVERTONE_RATIO: f64 = 3.7;
pub const STORM_OVERTONE_WEIGHT: f64 = 0.3;

// # Overrides

pub const DAY_PREVIEW_TYPE: &str = "DayPreview";
/// Simulated clock hour at which a day preview begins.
pub const DAY_PREVIEW_START_HOUR: f64 = 6.0;
pub const DAY_PREVIEW_DAY_START: f64 = 6.0;
pub const DAY_PREVIEW_DAY_END: f64 = 18.0;
pub const DAY_PREVIEW_NIGHT_INTENSITY: f64 = 0.05;

// # Ramps

/// Ramps longer than this get intermediate checkpoints.
pub const RAMP_CHECKPOINT_THRESHOLD_MS: u64 = 10_000;
/// Minimum spacing between intermediate ramp checkpoints.
pub const RAMP_CHECKPOINT_INTERVAL_MS: u64 = 2_000;

// # Test Constants
