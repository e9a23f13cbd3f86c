//! The update orchestrator.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::error::{RollbackFailure, RollbackReport, UpdateError, UpdateResult};
use super::retry::{RetryBudget, RetryingFetcher};
use super::state::UpdateState;
use crate::config::RunConfig;
use crate::feed::{plan, FeedReader, JsonFeedReader, TaskPlan};
use crate::fetch::{AbortSignal, DownloadProgress, FetchError, Fetcher, ResumableFetcher};
use crate::task::{
    BackupStore, ExecuteContext, ExecutionStatus, TaskContext, TaskError, TaskRegistry,
    UpdateTask,
};

/// Progress observer for payload downloads.
pub type ProgressHandler = Box<dyn Fn(&DownloadProgress) + Send + Sync>;

/// Result of one apply pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Tasks that completed successfully in this pass.
    pub executed: usize,
    /// Some tasks deferred to a cold pass.
    pub cold_run_required: bool,
}

/// Cancels a run from another thread.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    signal: AbortSignal,
    state: Arc<Mutex<UpdateState>>,
}

impl AbortHandle {
    /// Request cancellation of the in-flight check or fetch.
    ///
    /// A run that has not finished moves to `Aborted`. With `wait`, blocks
    /// until the active network operation has observed the request.
    pub fn abort(&self, wait: bool) {
        {
            let mut state = self.state.lock();
            if !state.is_terminal() {
                info!(from = %*state, "Aborting update run");
                *state = UpdateState::Aborted;
            }
        }
        self.signal.request();
        if wait {
            self.signal.wait_idle();
        }
    }

    pub fn is_aborted(&self) -> bool {
        *self.state.lock() == UpdateState::Aborted
    }
}

struct TaskSlot {
    task: Box<dyn UpdateTask>,
    status: Option<ExecutionStatus>,
}

/// Drives one update run: check, prepare, apply and, on failure, rollback.
///
/// Tasks run strictly in sequence. Operations take `&mut self`, so one
/// manager never runs two operations at once; use [`AbortHandle`] to cancel
/// from elsewhere.
pub struct UpdateManager {
    config: RunConfig,
    fetcher: Box<dyn Fetcher>,
    reader: Box<dyn FeedReader>,
    registry: TaskRegistry,
    signal: AbortSignal,
    state: Arc<Mutex<UpdateState>>,
    budget: RetryBudget,
    on_progress: Option<ProgressHandler>,

    base_url: Option<String>,
    tasks: Vec<TaskSlot>,
    updates_available: usize,
    cold_run_required: bool,
    /// Indices of successfully executed tasks, in execution order.
    executed: Vec<usize>,
    backup: Option<BackupStore>,
}

impl UpdateManager {
    /// Manager for the JSON feed at `feed_url`, with the built-in tasks.
    pub fn new(config: RunConfig, feed_url: &str) -> UpdateResult<Self> {
        let signal = AbortSignal::new();
        let fetcher = ResumableFetcher::with_abort_signal(feed_url, &config, signal.clone())
            .map_err(UpdateError::Setup)?;
        Ok(Self::with_components(
            config,
            Box::new(fetcher),
            Box::new(JsonFeedReader),
            TaskRegistry::with_builtin_tasks(),
            signal,
        ))
    }

    /// Manager over caller-supplied components.
    ///
    /// `signal` must be the signal the fetcher observes, or abort will not
    /// reach in-flight transfers.
    pub fn with_components(
        config: RunConfig,
        fetcher: Box<dyn Fetcher>,
        reader: Box<dyn FeedReader>,
        registry: TaskRegistry,
        signal: AbortSignal,
    ) -> Self {
        let budget = RetryBudget::new(config.retry_budget, config.retry_delay, signal.clone());
        Self {
            config,
            fetcher,
            reader,
            registry,
            signal,
            state: Arc::new(Mutex::new(UpdateState::Idle)),
            budget,
            on_progress: None,
            base_url: None,
            tasks: Vec::new(),
            updates_available: 0,
            cold_run_required: false,
            executed: Vec::new(),
            backup: None,
        }
    }

    pub fn set_progress_handler(&mut self, handler: impl Fn(&DownloadProgress) + Send + Sync + 'static) {
        self.on_progress = Some(Box::new(handler));
    }

    pub fn state(&self) -> UpdateState {
        *self.state.lock()
    }

    /// Number of updates found by the last check.
    pub fn updates_available(&self) -> usize {
        self.updates_available
    }

    /// Whether the last apply pass deferred tasks to a cold pass.
    pub fn cold_run_required(&self) -> bool {
        self.cold_run_required
    }

    /// Task descriptions in execution order.
    pub fn task_descriptions(&self) -> Vec<String> {
        self.tasks.iter().map(|slot| slot.task.description()).collect()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            signal: self.signal.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// See [`AbortHandle::abort`].
    pub fn abort(&self, wait: bool) {
        self.abort_handle().abort(wait);
    }

    /// Retrieve and decode the feed, and count the updates it carries.
    ///
    /// An update is an anchored task whose conditions say the installed
    /// application needs it. Tasks placed around an unneeded anchor are
    /// dropped with it. Pinned tasks run only when there is at least one
    /// update.
    pub fn check_for_updates(&mut self) -> UpdateResult<usize> {
        self.ensure_not_aborted()?;
        self.reset_run();
        self.set_state(UpdateState::Checking);

        let result = self.load_feed();
        match result {
            Ok(count) => {
                let next = if count == 0 {
                    UpdateState::NoUpdates
                } else {
                    UpdateState::UpdatesAvailable
                };
                info!(updates = count, tasks = self.tasks.len(), "Update check complete");
                self.set_state(next);
                Ok(count)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn load_feed(&mut self) -> UpdateResult<usize> {
        let retrying = RetryingFetcher::new(self.fetcher.as_ref(), &self.budget);
        let text = retrying.fetch_feed().map_err(check_error)?;
        let feed = self.reader.read(&text)?;
        debug!(tasks = feed.tasks.len(), base_url = ?feed.base_url, "Feed decoded");

        let registry = &self.registry;
        let planned: TaskPlan<Box<dyn UpdateTask>> = plan(feed.tasks)?.try_map(|descriptor| {
            registry
                .create(&descriptor)
                .map_err(|source| UpdateError::Load {
                    alias: descriptor.alias.clone(),
                    source,
                })
        })?;

        let app_dir = &self.config.app_dir;
        let mut groups = Vec::with_capacity(planned.groups.len());
        for group in planned.groups {
            let needed = group
                .anchor
                .is_needed(app_dir)
                .map_err(|source| UpdateError::Load {
                    alias: group.anchor.alias().to_string(),
                    source,
                })?;
            if needed {
                groups.push(group);
            } else {
                debug!(task = %group.anchor.description(), "Not needed");
            }
        }

        let count = groups.len();
        if count == 0 {
            return Ok(0);
        }

        let ordered = TaskPlan {
            at_start: planned.at_start,
            groups,
            at_end: planned.at_end,
        }
        .flatten();

        self.tasks = ordered
            .into_iter()
            .map(|task| TaskSlot { task, status: None })
            .collect();
        self.base_url = feed.base_url;
        self.updates_available = count;
        Ok(count)
    }

    /// Stage every task's payload. Nothing under the application directory
    /// changes; a failure here leaves the installation untouched.
    pub fn prepare_updates(&mut self) -> UpdateResult<()> {
        self.ensure_not_aborted()?;
        self.ensure_state("prepare updates", &[UpdateState::UpdatesAvailable, UpdateState::Prepared])?;
        self.set_state(UpdateState::Preparing);

        let retrying = RetryingFetcher::new(self.fetcher.as_ref(), &self.budget);
        let on_progress = self
            .on_progress
            .as_deref()
            .map(|handler| handler as &dyn Fn(&DownloadProgress));
        let ctx = TaskContext {
            fetcher: &retrying,
            app_dir: &self.config.app_dir,
            base_url: self.base_url.as_deref(),
            on_progress,
        };

        let mut failure = None;
        for slot in &mut self.tasks {
            debug!(task = %slot.task.description(), "Preparing");
            if let Err(source) = slot.task.prepare(&ctx) {
                failure = Some(if source.is_cancelled() {
                    UpdateError::Cancelled
                } else {
                    UpdateError::Prepare {
                        task: slot.task.description(),
                        source,
                    }
                });
                break;
            }
        }

        match failure {
            Some(e) => Err(self.fail(e)),
            None => {
                info!(tasks = self.tasks.len(), "Updates prepared");
                self.set_state(UpdateState::Prepared);
                Ok(())
            }
        }
    }

    /// Execute prepared tasks in order.
    ///
    /// A hot pass (`cold_run == false`) runs while the application is alive;
    /// tasks that conflict with it report `RequiresAppRestart` and are
    /// retried by a later cold pass. Tasks that already succeeded are not
    /// executed again. On failure, already-executed tasks are rolled back in
    /// reverse order unless `with_backup` is false.
    pub fn apply_updates(
        &mut self,
        cold_run: bool,
        with_logging: bool,
        with_backup: bool,
    ) -> UpdateResult<ApplyOutcome> {
        self.ensure_not_aborted()?;
        let state = self.state();
        let cold_pass_pending = state == UpdateState::Applied && self.cold_run_required;
        if state != UpdateState::Prepared && !cold_pass_pending {
            return Err(UpdateError::InvalidState {
                operation: "apply updates",
                state,
            });
        }

        if with_backup && self.backup.is_none() {
            let dir = self
                .config
                .backup_dir()
                .join(format!("run-{:016x}", rand::random::<u64>()));
            let store = BackupStore::new(dir).map_err(|cause| UpdateError::Apply {
                task: "backup".to_string(),
                cause,
                rollback: RollbackReport::default(),
            })?;
            self.backup = Some(store);
        }

        self.set_state(UpdateState::Applying);
        self.cold_run_required = false;
        let ctx = ExecuteContext {
            app_dir: &self.config.app_dir,
            cold_run,
            backup: if with_backup { self.backup.as_ref() } else { None },
        };

        let mut executed = 0;
        let mut failure = None;
        for (index, slot) in self.tasks.iter_mut().enumerate() {
            if slot.status == Some(ExecutionStatus::Successful) {
                continue;
            }
            let description = slot.task.description();
            let result = slot.task.execute(&ctx);
            log_outcome(with_logging, &description, cold_run, &result);

            match result {
                Ok(ExecutionStatus::Successful) => {
                    slot.status = Some(ExecutionStatus::Successful);
                    self.executed.push(index);
                    executed += 1;
                }
                Ok(ExecutionStatus::RequiresAppRestart) => {
                    slot.status = Some(ExecutionStatus::RequiresAppRestart);
                    self.cold_run_required = true;
                }
                Ok(ExecutionStatus::Failed) => {
                    slot.status = Some(ExecutionStatus::Failed);
                    failure = Some((
                        description,
                        TaskError::execution(slot.task.alias(), "task reported failure"),
                    ));
                    break;
                }
                Err(cause) => {
                    slot.status = Some(ExecutionStatus::Failed);
                    failure = Some((description, cause));
                    break;
                }
            }
        }

        if let Some((task, cause)) = failure {
            self.set_state(UpdateState::Failed);
            let rollback = if with_backup {
                self.rollback_executed()
            } else {
                warn!("Rollback disabled; leaving executed tasks in place");
                RollbackReport::skipped()
            };
            if rollback.is_complete() {
                self.set_state(UpdateState::RolledBack);
            }
            return Err(UpdateError::Apply {
                task,
                cause,
                rollback,
            });
        }

        info!(
            executed,
            cold_run,
            cold_run_required = self.cold_run_required,
            "Updates applied"
        );
        self.set_state(UpdateState::Applied);
        Ok(ApplyOutcome {
            executed,
            cold_run_required: self.cold_run_required,
        })
    }

    /// Undo every task executed in this run, newest first.
    ///
    /// Calling it again, or on a run with nothing executed, does nothing.
    pub fn rollback_updates(&mut self) -> UpdateResult<RollbackReport> {
        if self.executed.is_empty() {
            debug!("Nothing to roll back");
            return Ok(RollbackReport::default());
        }
        let report = self.rollback_executed();
        if report.failures.is_empty() {
            self.set_state(UpdateState::RolledBack);
            Ok(report)
        } else {
            self.set_state(UpdateState::Failed);
            Err(UpdateError::Rollback(report))
        }
    }

    /// Delete backup copies kept for rollback.
    pub fn discard_backups(&mut self) -> UpdateResult<()> {
        if let Some(store) = self.backup.take() {
            store.clear().map_err(|cause| UpdateError::Apply {
                task: "backup".to_string(),
                cause,
                rollback: RollbackReport::default(),
            })?;
        }
        Ok(())
    }

    fn rollback_executed(&mut self) -> RollbackReport {
        let mut report = RollbackReport::default();
        for index in self.executed.drain(..).rev() {
            let Some(slot) = self.tasks.get_mut(index) else {
                continue;
            };
            let description = slot.task.description();
            match slot.task.rollback() {
                Ok(()) => {
                    info!(task = %description, "Rolled back");
                    slot.status = None;
                    report.rolled_back.push(description);
                }
                Err(error) => {
                    warn!(task = %description, error = %error, "Rollback failed");
                    report.failures.push(RollbackFailure {
                        task: description,
                        error,
                    });
                }
            }
        }
        report
    }

    fn reset_run(&mut self) {
        self.tasks.clear();
        self.executed.clear();
        self.base_url = None;
        self.updates_available = 0;
        self.cold_run_required = false;
        self.budget.reset(self.config.retry_budget);
    }

    fn ensure_not_aborted(&self) -> UpdateResult<()> {
        if self.signal.is_requested() || self.state() == UpdateState::Aborted {
            return Err(UpdateError::Cancelled);
        }
        Ok(())
    }

    fn ensure_state(&self, operation: &'static str, allowed: &[UpdateState]) -> UpdateResult<()> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(UpdateError::InvalidState { operation, state })
        }
    }

    /// Move to `next` unless the run has been aborted.
    fn set_state(&self, next: UpdateState) {
        let mut state = self.state.lock();
        if *state != UpdateState::Aborted {
            debug!(from = %*state, to = %next, "State change");
            *state = next;
        }
    }

    /// Record a failed operation and hand back its error.
    fn fail(&self, error: UpdateError) -> UpdateError {
        if error.is_cancelled() {
            *self.state.lock() = UpdateState::Aborted;
            return UpdateError::Cancelled;
        }
        self.set_state(UpdateState::Failed);
        error
    }
}

fn check_error(error: FetchError) -> UpdateError {
    if error.is_cancelled() {
        UpdateError::Cancelled
    } else {
        UpdateError::Check(error)
    }
}

fn log_outcome(
    with_logging: bool,
    task: &str,
    cold_run: bool,
    result: &Result<ExecutionStatus, TaskError>,
) {
    match (result, with_logging) {
        (Ok(status), true) => info!(task, cold_run, status = %status, "Task executed"),
        (Ok(status), false) => debug!(task, cold_run, status = %status, "Task executed"),
        (Err(e), _) => warn!(task, cold_run, error = %e, "Task failed"),
    }
}
