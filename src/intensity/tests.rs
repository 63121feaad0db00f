use super::weather::{MockWeatherProvider, WeatherConditions, WeatherSettings};
use super::*;
use crate::common::constants::test_constants::TEST_EPSILON;
use chrono::{Duration, TimeZone};
use std::sync::Arc;

fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, hour, minute, second)
        .unwrap()
}

fn diurnal(sunrise: f64, sunset: f64, ramp: f64) -> Behavior {
    Behavior::new(2, BehaviorKind::Diurnal)
        .with_config("sunrise_hour", sunrise)
        .with_config("sunset_hour", sunset)
        .with_config("peak_intensity", 0.9)
        .with_config("min_intensity", 0.1)
        .with_config("ramp_duration_hours", ramp)
}

#[test]
fn test_disabled_behavior_is_always_dark() {
    let calc = IntensityCalculator::utc();
    let kinds = [
        BehaviorKind::Fixed,
        BehaviorKind::Diurnal,
        BehaviorKind::Lunar,
        BehaviorKind::Moonlight,
        BehaviorKind::Circadian,
        BehaviorKind::LocationBased,
        BehaviorKind::Override,
        BehaviorKind::Effect,
    ];
    for kind in kinds {
        let mut behavior = Behavior::new(1, kind)
            .with_config("intensity", 1.0)
            .with_config("min_intensity", 0.8);
        behavior.enabled = false;
        assert_eq!(calc.calculate(&behavior, at(12, 0, 0)), 0.0, "{kind}");
    }
}

#[test]
fn test_fixed_intensity_validation() {
    let calc = IntensityCalculator::utc();
    let now = at(3, 0, 0);

    let fixed = Behavior::new(1, BehaviorKind::Fixed).with_config("intensity", 0.4);
    assert!((calc.calculate(&fixed, now) - 0.4).abs() < TEST_EPSILON);

    let too_bright = Behavior::new(1, BehaviorKind::Fixed).with_config("intensity", 1.5);
    assert_eq!(calc.calculate(&too_bright, now), 1.0);

    let garbage = Behavior::new(1, BehaviorKind::Fixed).with_config("intensity", "bright");
    assert_eq!(calc.calculate(&garbage, now), DEFAULT_FIXED_INTENSITY);

    let missing = Behavior::new(1, BehaviorKind::Fixed);
    assert_eq!(calc.calculate(&missing, now), DEFAULT_FIXED_INTENSITY);
}

#[test]
fn test_diurnal_boundary_continuity() {
    let calc = IntensityCalculator::utc();
    let behavior = diurnal(7.0, 19.0, 1.0);

    // End of the morning ramp reaches peak exactly
    assert!((calc.calculate(&behavior, at(8, 0, 0)) - 0.9).abs() < TEST_EPSILON);
    // Just before sunrise is the minimum
    assert!((calc.calculate(&behavior, at(6, 59, 59)) - 0.1).abs() < TEST_EPSILON);
    // Sunrise itself starts the ramp at the minimum
    assert!((calc.calculate(&behavior, at(7, 0, 0)) - 0.1).abs() < TEST_EPSILON);
    // Smoothstep midpoint is halfway between min and peak
    assert!((calc.calculate(&behavior, at(7, 30, 0)) - 0.5).abs() < TEST_EPSILON);
    assert!((calc.calculate(&behavior, at(13, 0, 0)) - 0.9).abs() < TEST_EPSILON);
    assert!((calc.calculate(&behavior, at(18, 30, 0)) - 0.5).abs() < TEST_EPSILON);
    assert!((calc.calculate(&behavior, at(19, 0, 0)) - 0.1).abs() < TEST_EPSILON);
    assert!((calc.calculate(&behavior, at(23, 0, 0)) - 0.1).abs() < TEST_EPSILON);
}

#[test]
fn test_diurnal_ramp_is_monotonic_through_the_morning() {
    let calc = IntensityCalculator::utc();
    let behavior = diurnal(7.0, 19.0, 2.0);
    let mut previous = 0.0;
    for minute in (0..=120).step_by(5) {
        let now = at(7, 0, 0) + Duration::minutes(minute);
        let value = calc.calculate(&behavior, now);
        assert!(value + TEST_EPSILON >= previous, "dip at +{minute}min");
        previous = value;
    }
}

#[test]
fn test_diurnal_light_period_can_span_midnight() {
    let calc = IntensityCalculator::utc();
    let behavior = diurnal(20.0, 4.0, 1.0);
    assert!((calc.calculate(&behavior, at(23, 0, 0)) - 0.9).abs() < TEST_EPSILON);
    assert!((calc.calculate(&behavior, at(12, 0, 0)) - 0.1).abs() < TEST_EPSILON);
}

#[test]
fn test_diurnal_all_day_light_period_reaches_peak() {
    let calc = IntensityCalculator::utc();
    let behavior = diurnal(0.0, 24.0, 1.0);
    assert!((calc.calculate(&behavior, at(12, 0, 0)) - 0.9).abs() < TEST_EPSILON);
    assert!((calc.calculate(&behavior, at(0, 30, 0)) - 0.5).abs() < TEST_EPSILON);
    assert!((calc.calculate(&behavior, at(23, 30, 0)) - 0.5).abs() < TEST_EPSILON);

    // Equal hours are still an empty light period
    let never = diurnal(7.0, 7.0, 1.0);
    assert!((calc.calculate(&never, at(12, 0, 0)) - 0.1).abs() < TEST_EPSILON);
}

#[test]
fn test_diurnal_hours_follow_configured_timezone() {
    let tz: Tz = "America/New_York".parse().unwrap();
    let calc = IntensityCalculator::new(tz, WeatherCache::disabled());
    let behavior = diurnal(7.0, 19.0, 1.0);
    // 12:00 UTC is 08:00 EDT: the ramp has just finished
    assert!((calc.calculate(&behavior, at(12, 0, 0)) - 0.9).abs() < TEST_EPSILON);
    // 10:30 UTC is 06:30 EDT: still night
    assert!((calc.calculate(&behavior, at(10, 30, 0)) - 0.1).abs() < TEST_EPSILON);
}

#[test]
fn test_circadian_falls_off_linearly_from_peak() {
    let calc = IntensityCalculator::utc();
    let behavior = Behavior::new(3, BehaviorKind::Circadian)
        .with_config("photoperiod", 12.0)
        .with_config("peak_time", 12.0)
        .with_config("max_intensity", 0.8);

    assert!((calc.calculate(&behavior, at(12, 0, 0)) - 0.8).abs() < TEST_EPSILON);
    assert!((calc.calculate(&behavior, at(15, 0, 0)) - 0.4).abs() < TEST_EPSILON);
    assert_eq!(calc.calculate(&behavior, at(19, 0, 0)), 0.0);
}

#[test]
fn test_circadian_window_wraps_past_midnight() {
    let calc = IntensityCalculator::utc();
    let behavior = Behavior::new(3, BehaviorKind::Circadian)
        .with_config("photoperiod", 20.0)
        .with_config("peak_time", 22.0)
        .with_config("max_intensity", 1.0);

    assert!((calc.calculate(&behavior, at(3, 0, 0)) - 0.5).abs() < TEST_EPSILON);
    assert_eq!(calc.calculate(&behavior, at(10, 0, 0)), 0.0);
}

#[test]
fn test_moonlight_is_gated_by_overnight_window() {
    let calc = IntensityCalculator::utc();
    let lunar = Behavior::new(4, BehaviorKind::Lunar).with_config("max_intensity", 0.2);
    let moonlight = Behavior::new(5, BehaviorKind::Moonlight)
        .with_config("max_intensity", 0.2)
        .with_config("start_hour", 21.0)
        .with_config("end_hour", 5.0);

    for hour in [22, 23, 0, 2, 4] {
        let now = at(hour, 0, 0);
        assert!(
            (calc.calculate(&moonlight, now) - calc.calculate(&lunar, now)).abs() < TEST_EPSILON
        );
    }
    for hour in [6, 12, 18, 20] {
        assert_eq!(calc.calculate(&moonlight, at(hour, 0, 0)), 0.0);
    }
}

#[test]
fn test_lunar_never_exceeds_configured_maximum() {
    let calc = IntensityCalculator::utc();
    let lunar = Behavior::new(4, BehaviorKind::Lunar).with_config("max_intensity", 0.3);
    let start = at(0, 0, 0);
    for step in 0..(30 * 24) {
        let value = calc.calculate(&lunar, start + Duration::hours(step));
        assert!((0.0..=0.3 + TEST_EPSILON).contains(&value));
    }
}

#[test]
fn test_location_based_uses_solar_hours() {
    let calc = IntensityCalculator::utc();
    let behavior = Behavior::new(6, BehaviorKind::LocationBased)
        .with_config("latitude", 0.5)
        .with_config("longitude", 0.5)
        .with_config("peak_intensity", 0.7)
        .with_config("min_intensity", 0.0)
        .with_config("ramp_duration_hours", 1.0);

    assert!((calc.calculate(&behavior, at(12, 0, 0)) - 0.7).abs() < TEST_EPSILON);
    assert_eq!(calc.calculate(&behavior, at(0, 0, 0)), 0.0);
}

#[test]
fn test_location_based_polar_fallback_still_produces_a_day() {
    let calc = IntensityCalculator::utc();
    let behavior = Behavior::new(6, BehaviorKind::LocationBased)
        .with_config("latitude", 80.0)
        .with_config("longitude", 15.0)
        .with_config("peak_intensity", 1.0)
        .with_config("ramp_duration_hours", 1.0);
    let winter_noon = Utc.with_ymd_and_hms(2024, 12, 21, 12, 0, 0).unwrap();
    let winter_night = Utc.with_ymd_and_hms(2024, 12, 21, 22, 0, 0).unwrap();

    assert!((calc.calculate(&behavior, winter_noon) - 1.0).abs() < TEST_EPSILON);
    assert_eq!(calc.calculate(&behavior, winter_night), 0.0);
}

#[test]
fn test_placeholder_kinds_return_configured_constant() {
    let calc = IntensityCalculator::utc();
    let behavior = Behavior::new(7, BehaviorKind::Override).with_config("intensity", 0.35);
    assert!((calc.calculate(&behavior, at(9, 0, 0)) - 0.35).abs() < TEST_EPSILON);
    let effect = Behavior::new(8, BehaviorKind::Effect);
    assert_eq!(calc.calculate(&effect, at(9, 0, 0)), DEFAULT_PLACEHOLDER_INTENSITY);
}

#[test]
fn test_weather_modulation_applies_only_with_coordinates() {
    let mut provider = MockWeatherProvider::new();
    provider
        .expect_get_current_conditions()
        .times(1)
        .returning(|_, _| {
            Ok(WeatherConditions {
                cloud_cover_percent: 100.0,
                status_text: "Rain".to_string(),
            })
        });
    let settings = WeatherSettings {
        enabled: true,
        api_key: Some("key".to_string()),
        cache_ttl: Duration::minutes(10),
    };
    let calc = IntensityCalculator::new(
        chrono_tz::UTC,
        WeatherCache::new(Some(Arc::new(provider)), settings),
    );

    let mut cloudy = Behavior::new(9, BehaviorKind::Fixed)
        .with_config("intensity", 1.0)
        .with_config("latitude", 52.0)
        .with_config("longitude", 4.0);
    cloudy.weather_influence_enabled = true;
    assert!((calc.calculate(&cloudy, at(12, 0, 0)) - 0.3).abs() < TEST_EPSILON);

    let mut no_location = Behavior::new(10, BehaviorKind::Fixed).with_config("intensity", 1.0);
    no_location.weather_influence_enabled = true;
    assert_eq!(calc.calculate(&no_location, at(12, 0, 0)), 1.0);
}

#[test]
fn test_acclimation_scales_toward_full_intensity() {
    let calc = IntensityCalculator::utc();
    let now = at(12, 0, 0);
    let start = (now - Duration::days(5)).to_rfc3339();
    let mut behavior = Behavior::new(11, BehaviorKind::Fixed)
        .with_config("intensity", 0.8)
        .with_config("acclimation_start", start);
    behavior.acclimation_days = Some(10);

    // Halfway through acclimation: 0.5 → 1.0 gives 0.75
    assert!((calc.calculate(&behavior, now) - 0.6).abs() < TEST_EPSILON);
    assert!((calc.calculate(&behavior, now + Duration::days(30)) - 0.8).abs() < TEST_EPSILON);
}
