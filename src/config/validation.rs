//! Configuration validation functionality.
//!
//! Rejects out-of-range timing values, unknown time zones, malformed channel
//! registrations and assignments pointing at nothing.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::collections::HashSet;

use super::Config;
use crate::common::constants::*;
use crate::hardware::ChannelRegistration;

fn validate_range(field: &str, value: u64, min: u64, max: u64, unit: &str) -> Result<()> {
    if !(min..=max).contains(&value) {
        anyhow::bail!("{field} ({value} {unit}) must be between {min} and {max} {unit}");
    }
    Ok(())
}

/// Validate a parsed configuration.
pub fn validate_config(config: &Config) -> Result<()> {
    if let Some(name) = config.timezone.as_deref()
        && name.parse::<Tz>().is_err()
    {
        anyhow::bail!("timezone '{name}' is not a known IANA time zone");
    }

    if let Some(interval) = config.update_interval {
        validate_range(
            "update_interval",
            interval,
            MINIMUM_UPDATE_INTERVAL,
            MAXIMUM_UPDATE_INTERVAL,
            "seconds",
        )?;
    }
    if let Some(backoff) = config.error_backoff {
        validate_range(
            "error_backoff",
            backoff,
            MINIMUM_ERROR_BACKOFF,
            MAXIMUM_ERROR_BACKOFF,
            "seconds",
        )?;
    }
    if let Some(step) = config.ramp_step_interval {
        validate_range(
            "ramp_step_interval",
            step,
            MINIMUM_RAMP_STEP_INTERVAL,
            MAXIMUM_RAMP_STEP_INTERVAL,
            "milliseconds",
        )?;
    }
    if let Some(timeout) = config.write_timeout {
        validate_range(
            "write_timeout",
            timeout,
            MINIMUM_WRITE_TIMEOUT,
            MAXIMUM_WRITE_TIMEOUT,
            "milliseconds",
        )?;
    }
    if let Some(ttl) = config.weather.cache_ttl {
        validate_range(
            "weather.cache_ttl",
            ttl,
            MINIMUM_WEATHER_CACHE_TTL,
            MAXIMUM_WEATHER_CACHE_TTL,
            "minutes",
        )?;
    }

    validate_channels(config)?;
    validate_behaviors_and_assignments(config)?;
    Ok(())
}

fn validate_channels(config: &Config) -> Result<()> {
    let mut ids = HashSet::new();
    let mut outputs = HashSet::new();
    for channel in &config.channels {
        ChannelRegistration::new(
            channel.id,
            channel.controller_address,
            channel.channel_number,
            channel.min_value(),
            channel.max_value(),
        )
        .with_context(|| format!("channels: channel {} is invalid", channel.id))?;

        if !ids.insert(channel.id) {
            anyhow::bail!("channels: channel {} is defined more than once", channel.id);
        }
        if !outputs.insert((channel.controller_address, channel.channel_number)) {
            anyhow::bail!(
                "channels: controller {:#04x} channel {} is used by more than one channel",
                channel.controller_address,
                channel.channel_number
            );
        }
    }
    Ok(())
}

fn validate_behaviors_and_assignments(config: &Config) -> Result<()> {
    let mut behavior_ids = HashSet::new();
    for behavior in &config.behaviors {
        if !behavior_ids.insert(behavior.id) {
            anyhow::bail!("behaviors: behavior {} is defined more than once", behavior.id);
        }
    }

    for assignment in &config.assignments {
        let resolved = assignment.to_assignment()?;
        if !behavior_ids.contains(&assignment.behavior_id) {
            anyhow::bail!(
                "assignments: behavior {} is not defined in [[behaviors]]",
                assignment.behavior_id
            );
        }
        if let Some(group_id) = assignment.group_id.as_deref()
            && !config.groups.contains_key(group_id)
        {
            anyhow::bail!("assignments: group '{group_id}' is not defined in [groups]");
        }
        if let (Some(start), Some(end)) = (resolved.start_time, resolved.end_time)
            && end <= start
        {
            anyhow::bail!(
                "assignments: behavior {} ends ({end}) before it starts ({start})",
                assignment.behavior_id
            );
        }
    }
    Ok(())
}
