//! CLI error type and exit codes.

use thiserror::Error;
use updraft::config::ConfigError;
use updraft::logging::LoggingError;
use updraft::update::UpdateError;

/// Process exit codes.
pub mod exit_code {
    /// Update applied, or nothing to update.
    pub const SUCCESS: i32 = 0;
    /// Check-only run found updates.
    pub const UPDATES_AVAILABLE: i32 = 1;
    /// The run was cancelled.
    pub const CANCELLED: i32 = 2;
    pub const ERROR: i32 = 3;
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("Failed to initialize logging: {0}")]
    Logging(#[from] LoggingError),

    #[error("Failed to set signal handler: {0}")]
    SignalHandler(#[from] ctrlc::Error),

    #[error("Update failed: {0}")]
    Update(#[from] UpdateError),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Update(e) if e.is_cancelled() => exit_code::CANCELLED,
            _ => exit_code::ERROR,
        }
    }
}
