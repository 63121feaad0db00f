//! # Lightcycle Library
//!
//! Behavior-driven lighting engine for PWM-controlled channels.
//!
//! This library holds the whole engine; `main.rs` only parses arguments,
//! loads the configuration and drives a [`engine::LightingEngine`].
//!
//! ## Architecture
//!
//! - **Data**: `model` (behaviors, assignments) and `stores` (collaborator traits
//!   with in-memory implementations)
//! - **Calculation**: `intensity` turns a behavior into a baseline logical
//!   intensity, with astronomy and weather fallbacks
//! - **Modulation**: `queue` applies timed effects and then overrides
//! - **Output**: `hardware` maps logical intensity onto controller channels
//! - **Execution**: `runner` performs one iteration, `scheduler` repeats it,
//!   `ramp` runs point-to-point transitions
//! - **Wiring**: `engine` builds everything from explicit collaborators;
//!   `config`, `args` and `signals` serve the daemon binary

// Import macros from logger module for use in all submodules
#[macro_use]
pub mod common;

pub mod args;
pub mod config;
pub mod engine;
pub mod hardware;
pub mod intensity;
pub mod model;
pub mod queue;
pub mod ramp;
pub mod runner;
pub mod scheduler;
pub mod signals;
pub mod stores;

pub use engine::{EngineParams, EngineSettings, EngineStatus, LightingEngine};
