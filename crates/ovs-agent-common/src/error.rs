//! Error types for Open vSwitch agent operations.
//!
//! Every failure the agent surfaces falls into one of four families:
//! flow validation errors (raised before any command runs), command
//! failures (non-zero exit from `ovs-vsctl`/`ovs-ofctl`), malformed
//! responses, and local configuration/IO problems. All errors implement
//! `std::error::Error` via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for agent operations.
pub type OvsResult<T> = Result<T, OvsError>;

/// Errors that can occur while driving the switch.
#[derive(Debug, Error)]
pub enum OvsError {
    /// Failed to start a command (spawn or pipe error).
    #[error("Failed to execute command '{command}': {source}")]
    Spawn {
        /// The command line that could not be started.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Command returned a non-zero exit code.
    #[error("Command failed: '{command}' (exit code {exit_code}): {stderr}")]
    CommandFailed {
        /// The command line that failed.
        command: String,
        /// The exit code (-1 when terminated by a signal).
        exit_code: i32,
        /// Captured stderr.
        stderr: String,
    },

    /// A flow rule was rejected before anything was sent to the switch.
    #[error("Invalid flow: {message}")]
    InvalidFlow {
        /// Why the rule was rejected.
        message: String,
    },

    /// The switch answered with something that could not be decoded.
    #[error("Malformed response from '{command}': {message}")]
    MalformedResponse {
        /// The command whose output was being decoded.
        command: String,
        /// Decoder message.
        message: String,
    },

    /// The hardware address of a device could not be determined.
    #[error("Unable to determine mac address for {device}")]
    MacNotFound {
        /// Device name.
        device: String,
    },

    /// Configuration validation error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// IO error outside command execution (config files).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl OvsError {
    /// Creates a flow validation error.
    pub fn invalid_flow(message: impl Into<String>) -> Self {
        Self::InvalidFlow {
            message: message.into(),
        }
    }

    /// Creates a malformed response error.
    pub fn malformed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns the exit code when this error is a failed command.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            OvsError::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    /// Returns true for errors raised while validating input, before any
    /// command was issued. These are never worth retrying.
    pub fn is_validation(&self) -> bool {
        matches!(self, OvsError::InvalidFlow { .. })
    }

    /// Returns true if the switch CLI ran and reported failure.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, OvsError::CommandFailed { .. })
    }
}
