//! Shutdown signal handling for the daemon.
//!
//! A background thread listens for SIGINT and SIGTERM and forwards the first
//! one it sees over a channel. The main thread blocks on that channel while the
//! scheduler runs on its own thread.

use anyhow::{Context, Result};
use signal_hook::{
    consts::signal::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::sync::mpsc::{self, Receiver};
use std::thread;

/// Receiving end of the signal thread.
pub struct ShutdownSignal {
    receiver: Receiver<i32>,
}

impl ShutdownSignal {
    /// Block until SIGINT or SIGTERM arrives. Returns the signal number, or
    /// `None` if the signal thread went away.
    pub fn wait(&self) -> Option<i32> {
        self.receiver.recv().ok()
    }
}

/// Register the handlers and spawn the forwarding thread.
pub fn setup_signal_handler() -> Result<ShutdownSignal> {
    let (sender, receiver) = mpsc::channel();
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to register signal handlers")?;

    thread::Builder::new()
        .name("lightcycle-signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                let name = match sig {
                    SIGINT => "SIGINT",
                    SIGTERM => "SIGTERM",
                    _ => "signal",
                };
                log_pipe!();
                log_info!("Received {name}, shutting down");
                if sender.send(sig).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn signal handler thread")?;

    Ok(ShutdownSignal { receiver })
}
