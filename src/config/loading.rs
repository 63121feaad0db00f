//! Configuration loading functionality.
//!
//! Resolves the configuration path, creates a commented default file when
//! none exists and parses and validates TOML content.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::Config;
use super::validation::validate_config;
use crate::common::constants::*;

const DEFAULT_CONFIG_TEMPLATE: &str = r#"#[Engine]
timezone = "UTC"          # IANA zone used to evaluate behavior hours
update_interval = 60      # Scheduler cadence in seconds (1-3600)
error_backoff = 5         # Seconds to wait after a failed iteration (1-300)
ramp_step_interval = 50   # Default ramp step in milliseconds (10-1000)
write_timeout = 1000      # Hardware write timeout in milliseconds (10-30000)

#[Weather]
[weather]
enabled = true
# api_key = ""            # Without a key lighting is never weather-dimmed
cache_ttl = 10            # Minutes (1-1440)

#[Channels]
# [[channels]]
# id = 1
# controller_address = 0x40
# channel_number = 0
# min_value = 0
# max_value = 100

#[Behaviors]
# [[behaviors]]
# id = 1
# kind = "diurnal"
# config = { sunrise_hour = 7.0, sunset_hour = 19.0, peak_intensity = 1.0 }

#[Assignments]
# [[assignments]]
# behavior_id = 1
# channel_id = 1
"#;

/// Default configuration file location.
pub fn get_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load the configuration from the default location, creating a default file
/// on first run.
pub fn load() -> Result<(Config, PathBuf)> {
    let config_path = get_config_path()?;
    if !config_path.exists() {
        create_default_config(&config_path)
            .context("Failed to create default config during load")?;
    }
    let config = load_from_path(&config_path)?;
    Ok((config, config_path))
}

/// Load configuration from a specific path. A missing file is an error.
pub fn load_from_path(path: &Path) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!("Configuration file not found at {}", path.display());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
}

/// Parse and validate TOML content.
pub fn parse(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Write the commented default configuration to `path`.
pub fn create_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create config directory {}", parent.display())
        })?;
    }
    fs::write(path, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write default config to {}", path.display()))?;

    log_block_start!("Created default configuration");
    log_indented!("{}", path.display());
    Ok(())
}
