//! `fileUpdate`: replace one file under the application directory.

use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use super::backup::BackupStore;
use super::condition::{filetime_to_system_time, parse_conditions, update_needed, Condition};
use super::error::{TaskError, TaskResult};
use super::{ExecuteContext, ExecutionStatus, TaskContext, UpdateTask};
use crate::feed::TaskDescriptor;
use crate::fetch::{FetchError, FetchRequest};

/// Replaces `<app dir>/<localPath>` (or `updateTo`) with a fetched payload.
///
/// Prepare decides from the conditions whether the installed file needs
/// replacing and, if so, stages the payload. Execute backs up the current
/// file and moves the payload into place.
#[derive(Debug)]
pub struct FileUpdateTask {
    local_path: PathBuf,
    update_to: Option<PathBuf>,
    url: String,
    last_modified: Option<u64>,
    file_size: Option<u64>,
    version: Option<String>,
    checksum: Option<String>,
    signature: Option<String>,
    hot_swap: bool,
    conditions: Vec<Condition>,

    destination: Option<PathBuf>,
    staged: Option<PathBuf>,
    up_to_date: bool,
    applied: Option<Applied>,
}

/// What execute changed, for rollback.
#[derive(Debug)]
struct Applied {
    destination: PathBuf,
    backup: Option<PathBuf>,
    created: bool,
}

impl FileUpdateTask {
    pub const ALIAS: &'static str = "fileUpdate";

    /// Update `local_path` (relative to the application directory) from the
    /// payload of the same relative name.
    pub fn new(local_path: impl Into<PathBuf>) -> TaskResult<Self> {
        let local_path = relative_path("localPath", local_path.into())?;
        let url = local_path.to_string_lossy().replace('\\', "/");
        Ok(Self {
            local_path,
            update_to: None,
            url,
            last_modified: None,
            file_size: None,
            version: None,
            checksum: None,
            signature: None,
            hot_swap: true,
            conditions: Vec::new(),
            destination: None,
            staged: None,
            up_to_date: false,
            applied: None,
        })
    }

    pub fn from_descriptor(descriptor: &TaskDescriptor) -> TaskResult<Self> {
        let mut task = Self::new(descriptor.require("localPath")?)?;
        if let Some(update_to) = descriptor.field("updateTo") {
            task.update_to = Some(relative_path("updateTo", PathBuf::from(update_to))?);
        }
        if let Some(url) = descriptor.field("url") {
            task.url = url.to_string();
        }
        task.last_modified = descriptor.parse_field("lastModified")?;
        task.file_size = descriptor.parse_field("fileSize")?;
        task.version = descriptor.field("version").map(str::to_string);
        task.checksum = descriptor.field("checksum").map(str::to_string);
        task.signature = descriptor.field("signature").map(str::to_string);
        task.hot_swap = descriptor.flag("hotSwap", true)?;
        task.conditions = parse_conditions(&descriptor.conditions)?;
        Ok(task)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_hot_swap(mut self, hot_swap: bool) -> Self {
        self.hot_swap = hot_swap;
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Installed location, relative to the application directory.
    pub fn install_path(&self) -> &Path {
        self.update_to.as_deref().unwrap_or(&self.local_path)
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Staged payload, once prepared.
    pub fn staged_path(&self) -> Option<&Path> {
        self.staged.as_deref()
    }

    fn install(&self, staged: &Path, destination: &Path) -> TaskResult<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| TaskError::io(Self::ALIAS, parent, e))?;
        }
        if fs::rename(staged, destination).is_err() {
            fs::copy(staged, destination)
                .map_err(|e| TaskError::io(Self::ALIAS, destination, e))?;
        }
        if let Some(filetime) = self.last_modified {
            File::options()
                .write(true)
                .open(destination)
                .and_then(|file| file.set_modified(filetime_to_system_time(filetime)))
                .map_err(|e| TaskError::io(Self::ALIAS, destination, e))?;
        }
        Ok(())
    }
}

impl UpdateTask for FileUpdateTask {
    fn alias(&self) -> &'static str {
        Self::ALIAS
    }

    fn description(&self) -> String {
        match &self.version {
            Some(version) => format!("update {} to {}", self.install_path().display(), version),
            None => format!("update {}", self.install_path().display()),
        }
    }

    fn is_needed(&self, app_dir: &Path) -> TaskResult<bool> {
        update_needed(&self.conditions, &app_dir.join(self.install_path()))
    }

    fn prepare(&mut self, ctx: &TaskContext<'_>) -> TaskResult<()> {
        let destination = ctx.app_dir.join(self.install_path());
        if !update_needed(&self.conditions, &destination)? {
            debug!(path = %destination.display(), "File is up to date");
            self.up_to_date = true;
            self.destination = Some(destination);
            return Ok(());
        }

        let mut request = FetchRequest::new(&self.url).with_base_url(ctx.base_url);
        if let Some(checksum) = &self.checksum {
            request = request.with_checksum(checksum);
        }
        if let Some(signature) = &self.signature {
            request = request.with_signature(signature);
        }
        let staged = ctx.fetcher.fetch_data(&request, ctx.on_progress)?;

        if let Some(expected) = self.file_size {
            let actual = fs::metadata(&staged)
                .map_err(|e| TaskError::io(Self::ALIAS, &staged, e))?
                .len();
            if actual != expected {
                return Err(FetchError::Integrity {
                    filename: self.url.clone(),
                    reason: format!("expected {} bytes, downloaded {}", expected, actual),
                }
                .into());
            }
        }

        debug!(url = %self.url, staged = %staged.display(), "Payload staged");
        self.up_to_date = false;
        self.staged = Some(staged);
        self.destination = Some(destination);
        Ok(())
    }

    fn execute(&mut self, ctx: &ExecuteContext<'_>) -> TaskResult<ExecutionStatus> {
        if self.up_to_date {
            return Ok(ExecutionStatus::Successful);
        }
        let (Some(staged), Some(destination)) = (self.staged.clone(), self.destination.clone())
        else {
            return Err(TaskError::execution(
                Self::ALIAS,
                format!("{} was not prepared", self.install_path().display()),
            ));
        };

        if !ctx.cold_run && !self.hot_swap {
            debug!(path = %destination.display(), "File cannot be replaced while running");
            return Ok(ExecutionStatus::RequiresAppRestart);
        }

        let created = !destination.exists();
        let backup = match ctx.backup {
            Some(store) => store.save(&destination)?,
            None => None,
        };

        self.install(&staged, &destination)?;
        info!(path = %destination.display(), "File updated");

        self.applied = Some(Applied {
            destination,
            backup,
            created,
        });
        Ok(ExecutionStatus::Successful)
    }

    fn rollback(&mut self) -> TaskResult<()> {
        let Some(applied) = self.applied.take() else {
            return Ok(());
        };

        let result = match (&applied.backup, applied.created) {
            (Some(copy), _) => BackupStore::restore(copy, &applied.destination),
            (None, true) => fs::remove_file(&applied.destination)
                .map_err(|e| TaskError::io(Self::ALIAS, &applied.destination, e)),
            (None, false) => Err(TaskError::execution(
                Self::ALIAS,
                format!(
                    "no backup of {} to restore",
                    applied.destination.display()
                ),
            )),
        };

        match result {
            Ok(()) => {
                info!(path = %applied.destination.display(), "File rolled back");
                Ok(())
            }
            Err(e) => {
                self.applied = Some(applied);
                Err(e)
            }
        }
    }
}

/// Accept only relative paths that stay inside the application directory.
fn relative_path(field: &str, path: PathBuf) -> TaskResult<PathBuf> {
    let normalized = PathBuf::from(path.to_string_lossy().replace('\\', "/"));
    let escapes = normalized
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || normalized.as_os_str().is_empty() {
        return Err(TaskError::Configuration(format!(
            "{} must be a relative path inside the application directory: {}",
            field,
            path.display()
        )));
    }
    Ok(normalized)
}
