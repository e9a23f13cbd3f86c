//! Configuration for update runs.
//!
//! Two layers are provided:
//!
//! - [`RunConfig`]: the in-memory value handed to the orchestrator and the
//!   fetcher. It is built once before a run starts and treated as read-only
//!   for the run's duration.
//! - [`ConfigFile`]: an optional INI file (`config.ini`) that the command-line
//!   updater reads to seed a `RunConfig`. Command-line flags take precedence.

mod file;
mod run;

pub use file::{ConfigError, ConfigFile, CredentialsSection, UpdaterSection};
pub use run::{
    Credentials, RunConfig, DEFAULT_RETRY_BUDGET, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT,
};
