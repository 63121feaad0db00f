//! Structured logging system with visual formatting.
//!
//! This module provides the boxed-pipe log style used throughout lightcycle.
//! It includes different log levels and special formatting functions for creating
//! structured output with Unicode box drawing characters.
//!
//! The logger supports runtime enable/disable functionality for quiet operation
//! during tests or `--once` runs whose stdout is consumed by another program.

use std::fmt;
use std::io::Write;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, channel};

static LOGGING_ENABLED: AtomicBool = AtomicBool::new(true);
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static TIMESTAMPS_ENABLED: AtomicBool = AtomicBool::new(false);

// Channel for routing output to file when --log is active
static LOG_CHANNEL: OnceLock<Option<Sender<LogMessage>>> = OnceLock::new();

enum LogMessage {
    Formatted(String),
    Shutdown,
}

/// Main logging interface providing structured output formatting.
///
/// ## Logging Conventions
///
/// - **`log_block_start!`**: opens a new conceptual block (scheduler started,
///   configuration loaded, ramp started). Prints an empty pipe `┃` followed by
///   `┣ message`.
/// - **`log_decorated!`**: continues a block with `┣ message`.
/// - **`log_indented!`**: nested details under a block, printed as `┃   message`.
/// - **`log_pipe!`**: a single empty `┃` line for vertical spacing before a
///   semantic message that starts its own block.
/// - **`log_version!`** / **`log_end!`**: startup header and final marker.
/// - **`log_info!`, `log_warning!`, `log_error!`, `log_critical!`, `log_debug!`**:
///   semantic messages with a `[LEVEL]` prefix. `log_debug!` only prints while
///   debug output is enabled with [`Log::set_debug`].
pub struct Log;

impl Log {
    /// Enable or disable logging temporarily.
    pub fn set_enabled(enabled: bool) {
        LOGGING_ENABLED.store(enabled, Ordering::SeqCst);
    }

    /// Check if logging is currently enabled.
    pub fn is_enabled() -> bool {
        LOGGING_ENABLED.load(Ordering::SeqCst)
    }

    /// Enable or disable `log_debug!` output.
    pub fn set_debug(enabled: bool) {
        DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    }

    /// Check if debug output is enabled.
    pub fn is_debug() -> bool {
        DEBUG_ENABLED.load(Ordering::SeqCst)
    }

    /// Prefix every line with a UTC wall-clock stamp.
    pub fn set_timestamps(enabled: bool) {
        TIMESTAMPS_ENABLED.store(enabled, Ordering::SeqCst);
    }

    /// Start file logging to the specified path.
    pub fn start_file_logging(file_path: String) -> anyhow::Result<LoggerGuard> {
        let (tx, rx) = channel();

        LOG_CHANNEL
            .set(Some(tx.clone()))
            .map_err(|_| anyhow::anyhow!("Logger channel already initialized"))?;

        let handle = std::thread::spawn(move || {
            let mut file = std::fs::File::create(&file_path)?;

            loop {
                match rx.recv() {
                    Ok(LogMessage::Formatted(text)) => {
                        file.write_all(text.as_bytes())?;
                    }
                    Ok(LogMessage::Shutdown) | Err(_) => {
                        file.flush()?;
                        break;
                    }
                }
            }

            Ok::<(), anyhow::Error>(())
        });

        Ok(LoggerGuard {
            tx,
            handle: Some(handle),
        })
    }

    /// Timestamp prefix for the current line, empty unless timestamps are on.
    pub fn get_timestamp_prefix() -> String {
        if TIMESTAMPS_ENABLED.load(Ordering::SeqCst) {
            format!("[{}] ", chrono::Utc::now().format("%H:%M:%S"))
        } else {
            String::new()
        }
    }
}

/// Guard for file logging that ensures clean shutdown.
pub struct LoggerGuard {
    tx: Sender<LogMessage>,
    handle: Option<std::thread::JoinHandle<anyhow::Result<()>>>,
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(LogMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        // LOG_CHANNEL stays set; OnceLock can only be written once per process
    }
}

fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                for ch in chars.by_ref() {
                    if ch == 'm' {
                        break;
                    }
                }
            } else {
                result.push(ch);
            }
        } else {
            result.push(ch);
        }
    }

    result
}

// Public function that routes output (needed by macros)
pub fn write_output(text: &str) {
    if let Some(Some(tx)) = LOG_CHANNEL.get() {
        let clean_text = strip_ansi_codes(text);
        let _ = tx.send(LogMessage::Formatted(clean_text));
    } else {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}

/// Kind of line a logging macro produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Version,
    BlockStart,
    Decorated,
    Indented,
    Pipe,
    End,
    Info,
    Warning,
    Error,
    ErrorExit,
    Critical,
    Debug,
}

impl Line {
    /// Color escape and label for semantic lines.
    fn level(self) -> Option<(&'static str, &'static str)> {
        match self {
            Line::Info => Some(("\x1b[32m", "INFO")),
            Line::Debug => Some(("\x1b[32m", "DEBUG")),
            Line::Warning => Some(("\x1b[33m", "WARNING")),
            Line::Error | Line::ErrorExit => Some(("\x1b[31m", "ERROR")),
            Line::Critical => Some(("\x1b[31m", "CRITICAL")),
            _ => None,
        }
    }
}

/// Format one log line, or `None` when output is off for this kind of line.
pub fn render(line: Line, message: fmt::Arguments<'_>) -> Option<String> {
    if !Log::is_enabled() || (line == Line::Debug && !Log::is_debug()) {
        return None;
    }
    let prefix = Log::get_timestamp_prefix();
    let text = match (line, line.level()) {
        (Line::Version, _) => format!("{prefix}┏ lightcycle v{message} ━━╸\n"),
        (Line::BlockStart, _) => format!("{prefix}┃\n{prefix}┣ {message}\n"),
        (Line::Decorated, _) => format!("{prefix}┣ {message}\n"),
        (Line::Indented, _) => format!("{prefix}┃   {message}\n"),
        (Line::Pipe, _) => format!("{prefix}┃\n"),
        (Line::End, _) => format!("{prefix}╹\n"),
        (Line::ErrorExit, Some((color, label))) => {
            format!("{prefix}┃\n{prefix}┗[{color}{label}\x1b[0m] {message}\n")
        }
        (_, Some((color, label))) => format!("{prefix}┣[{color}{label}\x1b[0m] {message}\n"),
        (_, None) => format!("{prefix}┣ {message}\n"),
    };
    Some(text)
}

// Entry point for every logging macro
pub fn emit(line: Line, message: fmt::Arguments<'_>) {
    if let Some(text) = render(line, message) {
        write_output(&text);
    }
}

// # Logging Macros

#[doc(hidden)]
#[macro_export]
macro_rules! __log_line {
    ($line:ident) => {
        $crate::common::logger::emit($crate::common::logger::Line::$line, format_args!(""))
    };
    ($line:ident, $fmt:literal $($arg:tt)*) => {
        $crate::common::logger::emit(
            $crate::common::logger::Line::$line,
            format_args!($fmt $($arg)*),
        )
    };
    ($line:ident, $expr:expr) => {
        $crate::common::logger::emit($crate::common::logger::Line::$line, format_args!("{}", $expr))
    };
}

/// Log a decorated message, typically as part of an existing block.
#[macro_export]
macro_rules! log_decorated {
    ($($arg:tt)+) => { $crate::__log_line!(Decorated, $($arg)+) };
}

/// Log an indented message for sub-items or details within a block.
#[macro_export]
macro_rules! log_indented {
    ($($arg:tt)+) => { $crate::__log_line!(Indented, $($arg)+) };
}

/// Log a visual pipe separator for vertical spacing.
#[macro_export]
macro_rules! log_pipe {
    () => { $crate::__log_line!(Pipe) };
}

/// Log a block start message, initiating a new conceptual block of information.
#[macro_export]
macro_rules! log_block_start {
    ($($arg:tt)+) => { $crate::__log_line!(BlockStart, $($arg)+) };
}

/// Log the application version header.
#[macro_export]
macro_rules! log_version {
    () => { $crate::__log_line!(Version, "{}", env!("CARGO_PKG_VERSION")) };
}

/// Log the final termination marker.
#[macro_export]
macro_rules! log_end {
    () => { $crate::__log_line!(End) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)+) => { $crate::__log_line!(Info, $($arg)+) };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)+) => { $crate::__log_line!(Warning, $($arg)+) };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)+) => { $crate::__log_line!(Error, $($arg)+) };
}

/// Log an error that terminates the current flow, closing the pipe.
#[macro_export]
macro_rules! log_error_exit {
    ($($arg:tt)+) => { $crate::__log_line!(ErrorExit, $($arg)+) };
}

#[macro_export]
macro_rules! log_critical {
    ($($arg:tt)+) => { $crate::__log_line!(Critical, $($arg)+) };
}

/// Log a debug message. Printed only while [`Log::is_debug`] is true.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)+) => { $crate::__log_line!(Debug, $($arg)+) };
}
