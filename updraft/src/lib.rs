//! Updraft - self-update runtime for desktop applications
//!
//! This library retrieves an update feed, downloads payloads with resume
//! and integrity checks, and applies them as an ordered list of reversible
//! tasks:
//!
//! - [`fetch`]: resumable, abortable HTTP(S)/FTP/file transfers
//! - [`feed`]: feed decoding and task ordering
//! - [`task`]: the update task contract, built-in tasks and the registry
//! - [`update`]: the orchestrator driving check, prepare, apply and rollback
//!
//! ```no_run
//! use updraft::config::RunConfig;
//! use updraft::update::UpdateManager;
//!
//! let config = RunConfig::new("/opt/myapp");
//! let mut manager = UpdateManager::new(config, "https://updates.example.com/feed.json")?;
//! if manager.check_for_updates()? > 0 {
//!     manager.prepare_updates()?;
//!     let outcome = manager.apply_updates(false, true, true)?;
//!     if outcome.cold_run_required {
//!         manager.apply_updates(true, true, true)?;
//!     }
//! }
//! # Ok::<(), updraft::update::UpdateError>(())
//! ```

pub mod config;
pub mod feed;
pub mod fetch;
pub mod logging;
pub mod task;
pub mod update;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use fetch::{FetchError, Fetcher, ResumableFetcher};
pub use task::{ExecutionStatus, TaskRegistry, UpdateTask};
pub use update::{UpdateError, UpdateManager, UpdateState};
