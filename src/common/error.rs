//! Error taxonomy shared by the engine components.
//!
//! Validation and conflict failures are returned synchronously to whoever
//! called an add/register operation. Hardware failures are caught by the
//! runner per channel and by the ramp executor per step. Calculation failures
//! never surface here at all; they are replaced by fallback constants.

use std::fmt;

use thiserror::Error;

use crate::model::ChannelId;

/// Which queue rejected a conflicting entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Effect,
    Override,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Effect => write!(f, "effect"),
            QueueKind::Override => write!(f, "override"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LightingError {
    /// Bad parameters or configuration; nothing was applied.
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// The channel is already claimed by an active entry; nothing was applied.
    #[error("channel {channel_id} is already claimed by active {kind} {entry_id}")]
    Conflict {
        kind: QueueKind,
        entry_id: String,
        channel_id: ChannelId,
    },

    #[error("channel {0} is not registered")]
    UnregisteredChannel(ChannelId),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,
}

impl LightingError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        LightingError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failures at the actuation boundary. All variants count as "write failed".
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HardwareError {
    #[error("write to controller {address:#04x} channel {channel} failed: {reason}")]
    WriteFailed {
        address: u8,
        channel: u8,
        reason: String,
    },

    #[error("read from controller {address:#04x} channel {channel} failed: {reason}")]
    ReadFailed {
        address: u8,
        channel: u8,
        reason: String,
    },

    #[error("controller {address:#04x} did not answer within {timeout_ms} ms")]
    Timeout { address: u8, timeout_ms: u64 },

    #[error("controller {address:#04x} is unavailable")]
    Unavailable { address: u8 },

    /// An earlier call to this controller timed out and has not returned yet.
    #[error("controller {address:#04x} is still busy with a timed-out call")]
    Busy { address: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_channel_and_entry() {
        let err = LightingError::Conflict {
            kind: QueueKind::Effect,
            entry_id: "abc".to_string(),
            channel_id: 3,
        };
        assert_eq!(
            err.to_string(),
            "channel 3 is already claimed by active effect abc"
        );
    }

    #[test]
    fn test_hardware_error_formats_address_as_hex() {
        let err = HardwareError::Timeout {
            address: 0x41,
            timeout_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "controller 0x41 did not answer within 250 ms"
        );
    }
}
