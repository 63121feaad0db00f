//! Daemon entry point.
//!
//! 1. Parse arguments and exit early for help/version
//! 2. Set up logging (debug switch, optional log file)
//! 3. Load and log the configuration
//! 4. Build the engine around the simulated actuator and register channels
//! 5. Either run one iteration and print it as JSON (`--once`), or run the
//!    scheduler until SIGINT/SIGTERM and shut down cleanly

use anyhow::{Context, Result};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use lightcycle::args::{CliAction, ParsedArgs, RunOptions, display_help, display_version_info};
use lightcycle::common::clock::SystemClock;
use lightcycle::common::constants::EXIT_FAILURE;
use lightcycle::common::logger::Log;
use lightcycle::config;
use lightcycle::hardware::SimulatedActuator;
use lightcycle::signals::setup_signal_handler;
use lightcycle::{
    LightingEngine, log_block_start, log_debug, log_decorated, log_end, log_error_exit,
    log_indented, log_version,
};

fn main() {
    let parsed = ParsedArgs::from_env();
    match parsed.action {
        CliAction::ShowVersion => display_version_info(),
        CliAction::ShowHelp => display_help(),
        CliAction::ShowHelpDueToError => {
            display_help();
            std::process::exit(EXIT_FAILURE);
        }
        CliAction::Run(options) => {
            if let Err(e) = run(options) {
                Log::set_enabled(true);
                log_error_exit!("{e:#}");
                std::process::exit(EXIT_FAILURE);
            }
        }
    }
}

fn run(options: RunOptions) -> Result<()> {
    Log::set_debug(options.debug_enabled);
    // stdout carries the JSON result in single-iteration mode
    Log::set_enabled(!options.once);
    Log::set_timestamps(!options.once);
    let _log_guard = match options.log_file {
        Some(path) => Some(Log::start_file_logging(path).context("Failed to open log file")?),
        None => None,
    };

    log_version!();

    let (config, config_path) = match options.config_path {
        Some(path) => {
            let path = PathBuf::from(path);
            (config::load_from_path(&path)?, path)
        }
        None => config::load()?,
    };
    config.log_config(&config_path);

    let actuator = Arc::new(SimulatedActuator::new());
    let engine = LightingEngine::from_config(&config, actuator, None, Arc::new(SystemClock))?;

    if options.once {
        let intensities = engine.run_iteration_now()?;
        let output = json!({
            "timestamp": engine.now(),
            "intensities": intensities,
            "channels": engine.hardware_status(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let signals = setup_signal_handler()?;
    engine.start_scheduler()?;
    log_block_start!("Engine running");
    log_indented!("Press Ctrl+C to stop");

    let received = signals.wait();
    log_debug!("Shutdown requested by signal {received:?}");

    engine.shutdown();
    let stats = engine.scheduler_stats();
    log_decorated!(
        "Stopped after {} iteration(s), {} error(s)",
        stats.iteration_count,
        stats.error_count
    );
    log_end!();
    Ok(())
}
