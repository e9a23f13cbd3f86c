//! Update orchestration.
//!
//! [`UpdateManager`] turns a feed into an ordered list of tasks and drives
//! them through the run:
//!
//! ```text
//! check_for_updates ──► prepare_updates ──► apply_updates(hot) ──► apply_updates(cold)
//!   fetch feed            stage payloads       execute tasks          deferred tasks
//!   decode + order        (app dir untouched)        │
//!   count needed                                      └─ on failure: rollback, newest first
//! ```
//!
//! Transient transport failures anywhere in the run draw on one shared
//! [`RetryBudget`]. An [`AbortHandle`] cancels the run from another thread.

mod error;
mod manager;
mod retry;
mod state;

pub use error::{ErrorKind, RollbackFailure, RollbackReport, UpdateError, UpdateResult};
pub use manager::{AbortHandle, ApplyOutcome, ProgressHandler, UpdateManager};
pub use retry::{RetryBudget, RetryingFetcher};
pub use state::UpdateState;
