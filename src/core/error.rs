//! Error types for board access and sample processing.

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Error running command \"{cmd}\":\n\t{output}")]
    Command { cmd: String, output: String },

    #[error("Command \"{cmd}\" timed out after {secs} seconds")]
    Timeout { cmd: String, secs: u64 },

    #[error("Error running command \"{cmd}\":\n\tUnsupported shell syntax in ADB runner.")]
    UnsupportedSyntax { cmd: String },

    #[error("Invalid board address format: expected ADB device ID or IPv4 address, got '{address}'")]
    InvalidAddress { address: String },

    #[error("Failed to parse board statistics: {reason}")]
    Parse { reason: String },

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl MonitorError {
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse { reason: reason.into() }
    }
}
