//! Run configuration shared by the orchestrator, fetcher and tasks.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default number of transient transport retries allowed per run.
pub const DEFAULT_RETRY_BUDGET: u32 = 100;

/// Default pause between transport retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default timeout for a single network request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport credentials (HTTP basic auth or FTP login).
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for one update run.
///
/// Set once before the run begins. The proxy override lives here rather than
/// in any process-wide state, so two runs with different proxies can coexist.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root directory for staged payloads, partial downloads and backups.
    pub temp_root: PathBuf,

    /// Installation directory of the application being updated.
    ///
    /// Task paths (`localPath`, process executables) are relative to it.
    pub app_dir: PathBuf,

    /// Optional credentials applied to every transport request.
    pub credentials: Option<Credentials>,

    /// Optional proxy URL. When set, a failed proxied attempt is retried
    /// once without it.
    pub proxy: Option<String>,

    /// Number of transient transport failures tolerated across the run.
    pub retry_budget: u32,

    /// Pause between transport retries.
    pub retry_delay: Duration,

    /// Timeout for a single network request.
    pub timeout: Duration,

    /// Base64 SEC1 P-256 public key. When set, every payload must carry a
    /// valid signature.
    pub verification_key: Option<String>,

    /// Name of the fetcher's work directory under `temp_root`.
    ///
    /// `None` gives each fetcher a fresh random directory. Pin a stable name
    /// to let a later run resume partial downloads.
    pub work_dir_name: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir().join("updraft"),
            app_dir: PathBuf::from("."),
            credentials: None,
            proxy: None,
            retry_budget: DEFAULT_RETRY_BUDGET,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
            verification_key: None,
            work_dir_name: None,
        }
    }
}

impl RunConfig {
    /// Create a configuration for the application installed at `app_dir`.
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
            ..Default::default()
        }
    }

    /// Set the temp root.
    pub fn with_temp_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.temp_root = path.into();
        self
    }

    /// Set transport credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Route requests through a proxy.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Set the retry budget.
    pub fn with_retry_budget(mut self, retries: u32) -> Self {
        self.retry_budget = retries;
        self
    }

    /// Set the pause between retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Require payload signatures verified against this key.
    pub fn with_verification_key(mut self, key: impl Into<String>) -> Self {
        self.verification_key = Some(key.into());
        self
    }

    /// Pin the fetcher work directory name.
    pub fn with_work_dir_name(mut self, name: impl Into<String>) -> Self {
        self.work_dir_name = Some(name.into());
        self
    }

    /// Directory used for pre-apply backups.
    pub fn backup_dir(&self) -> PathBuf {
        self.temp_root.join("backup")
    }
}
