//! One updater run: configure, check, prepare and apply.

use std::path::PathBuf;

use console::style;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use updraft::config::{ConfigFile, Credentials, RunConfig};
use updraft::logging::{init_logging, LoggingGuard};
use updraft::update::{UpdateError, UpdateManager};

use crate::args::Args;
use crate::error::{exit_code, CliError};
use crate::progress::DownloadBar;

/// How a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    NoUpdates,
    /// Check-only run.
    UpdatesAvailable(usize),
    Updated {
        count: usize,
        /// Deferred tasks left for a later cold pass.
        cold_pass_pending: bool,
    },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::UpdatesAvailable(_) => exit_code::UPDATES_AVAILABLE,
            RunOutcome::NoUpdates | RunOutcome::Updated { .. } => exit_code::SUCCESS,
        }
    }
}

/// Work directory name derived from the feed URL, so an interrupted
/// download for the same feed resumes on the next run.
pub fn work_dir_name(feed: &str) -> String {
    let digest = Sha256::digest(feed.trim().as_bytes());
    let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("feed-{}", hex)
}

/// Build the run configuration: defaults, then the config file, then flags.
pub fn build_config(args: &Args, file: &ConfigFile) -> Result<RunConfig, CliError> {
    let mut config = file.to_run_config();
    if let Some(dir) = &args.temp_dir {
        config.temp_root = dir.clone();
    }
    if let Some(dir) = &args.app_dir {
        config.app_dir = dir.clone();
    }
    if let Some(retries) = args.retries {
        config.retry_budget = retries;
    }
    if let Some(proxy) = &args.proxy {
        config.proxy = Some(proxy.clone());
    }
    if let Some(username) = &args.username {
        let password = args.password.clone().unwrap_or_default();
        config.credentials = Some(Credentials::new(username.clone(), password));
    }
    if !config.app_dir.is_dir() {
        return Err(CliError::Config(format!(
            "application directory {} does not exist",
            config.app_dir.display()
        )));
    }
    Ok(config.with_work_dir_name(work_dir_name(&args.feed)))
}

pub struct CliRunner {
    args: Args,
    config: RunConfig,
    _logging: LoggingGuard,
}

impl CliRunner {
    pub fn new(args: Args) -> Result<Self, CliError> {
        let file = match &args.config {
            Some(path) => ConfigFile::load_from(path)?,
            None => ConfigFile::load()?,
        };
        let config = build_config(&args, &file)?;
        let log_dir: Option<PathBuf> = args.log.then(|| config.temp_root.join("logs"));
        let logging = init_logging(args.verbose, log_dir.as_deref())?;
        Ok(Self {
            args,
            config,
            _logging: logging,
        })
    }

    pub fn run(self) -> Result<RunOutcome, CliError> {
        let args = &self.args;
        info!(
            version = updraft::VERSION,
            feed = %args.feed,
            app_dir = %self.config.app_dir.display(),
            "Starting update run"
        );

        let mut manager = UpdateManager::new(self.config.clone(), &args.feed)?;
        let bar = DownloadBar::new();
        let handler_bar = bar.clone();
        manager.set_progress_handler(move |progress| handler_bar.update(progress));

        let abort = manager.abort_handle();
        ctrlc::set_handler(move || {
            eprintln!();
            eprintln!("Cancelling update...");
            abort.abort(true);
        })?;

        let count = manager.check_for_updates()?;
        if count == 0 {
            println!("{}", style("No updates available.").green());
            return Ok(RunOutcome::NoUpdates);
        }

        println!("{} update(s) available:", style(count).bold());
        for task in manager.task_descriptions() {
            println!("  {}", task);
        }
        if !args.update {
            return Ok(RunOutcome::UpdatesAvailable(count));
        }

        let with_backup = !args.no_rollback;
        let result = apply(&mut manager, args.log, with_backup, args.hot_only);
        bar.clear();
        let cold_pass_pending = result?;

        if let Err(e) = manager.discard_backups() {
            warn!(error = %e, "Could not remove backups");
        }
        if cold_pass_pending {
            println!(
                "{}",
                style("Updates applied; some tasks wait for the application to stop.").yellow()
            );
        } else {
            println!("{}", style("Updates applied.").green());
        }
        Ok(RunOutcome::Updated {
            count,
            cold_pass_pending,
        })
    }
}

/// Prepare and apply, with a cold pass for deferred tasks unless `hot_only`.
/// Returns whether deferred tasks remain.
fn apply(
    manager: &mut UpdateManager,
    with_logging: bool,
    with_backup: bool,
    hot_only: bool,
) -> Result<bool, UpdateError> {
    manager.prepare_updates()?;
    let hot = manager.apply_updates(false, with_logging, with_backup)?;
    if !hot.cold_run_required || hot_only {
        return Ok(hot.cold_run_required);
    }
    info!("Running cold pass");
    let cold = manager.apply_updates(true, with_logging, with_backup)?;
    Ok(cold.cold_run_required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;
    use updraft::config::UpdaterSection;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["updraft", "-f", "https://example.com/feed.json"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_work_dir_name_is_stable_per_feed() {
        let a = work_dir_name("https://example.com/feed.json");
        assert_eq!(a, work_dir_name(" https://example.com/feed.json "));
        assert_ne!(a, work_dir_name("https://example.com/other.json"));
        assert!(a.starts_with("feed-"));
        assert_eq!(a.len(), "feed-".len() + 16);
    }

    #[test]
    fn test_flags_override_config_file() {
        let app = TempDir::new().unwrap();
        let file = ConfigFile {
            updater: UpdaterSection {
                retries: Some(7),
                proxy: Some("http://file-proxy:3128".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let app_dir = app.path().to_string_lossy().to_string();
        let args = args(&[
            "--app-dir",
            &app_dir,
            "--proxy",
            "http://flag-proxy:8080",
            "--username",
            "deploy",
        ]);

        let config = build_config(&args, &file).unwrap();
        assert_eq!(config.retry_budget, 7);
        assert_eq!(config.proxy.as_deref(), Some("http://flag-proxy:8080"));
        assert_eq!(config.app_dir, app.path());
        assert!(config.credentials.is_some());
        assert_eq!(
            config.work_dir_name.as_deref(),
            Some(work_dir_name("https://example.com/feed.json").as_str())
        );
    }

    #[test]
    fn test_missing_app_dir_is_rejected() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope").to_string_lossy().to_string();
        let result = build_config(&args(&["--app-dir", &missing]), &ConfigFile::default());
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_work_dir_name_is_one_safe_path_component(feed in ".{0,200}") {
                let name = work_dir_name(&feed);
                prop_assert_eq!(name.len(), 21);
                prop_assert!(name["feed-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
                prop_assert_eq!(std::path::Path::new(&name).components().count(), 1);
            }
        }
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(RunOutcome::NoUpdates.exit_code(), 0);
        assert_eq!(RunOutcome::UpdatesAvailable(2).exit_code(), 1);
        assert_eq!(
            RunOutcome::Updated {
                count: 1,
                cold_pass_pending: true
            }
            .exit_code(),
            0
        );
    }
}
