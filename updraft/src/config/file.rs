//! INI configuration file support.
//!
//! ```ini
//! [updater]
//! temp_dir = /var/tmp/myapp-update
//! app_dir = /opt/myapp
//! retries = 100
//! retry_delay_ms = 500
//! timeout_secs = 30
//! proxy = http://proxy.corp:3128
//! verification_key = BASE64...
//!
//! [credentials]
//! username = deploy
//! password = secret
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::run::{Credentials, RunConfig};

const UPDATER_SECTION: &str = "updater";
const CREDENTIALS_SECTION: &str = "credentials";

/// Errors raised while loading `config.ini`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("invalid value for [{section}] {key}: '{value}'")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },

    #[error("could not determine the user configuration directory")]
    NoConfigDir,
}

/// `[updater]` section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdaterSection {
    pub temp_dir: Option<PathBuf>,
    pub app_dir: Option<PathBuf>,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub timeout: Option<Duration>,
    pub proxy: Option<String>,
    pub verification_key: Option<String>,
}

/// `[credentials]` section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialsSection {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Parsed `config.ini`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub updater: UpdaterSection,
    pub credentials: CredentialsSection,
}

impl ConfigFile {
    /// Default location: `<user config dir>/updraft/config.ini`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("updraft").join("config.ini"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let get = |section: &str, key: &str| {
            ini.section(Some(section))
                .and_then(|props| props.get(key))
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let updater = UpdaterSection {
            temp_dir: get(UPDATER_SECTION, "temp_dir").map(PathBuf::from),
            app_dir: get(UPDATER_SECTION, "app_dir").map(PathBuf::from),
            retries: parse(UPDATER_SECTION, "retries", get(UPDATER_SECTION, "retries"))?,
            retry_delay: parse::<u64>(
                UPDATER_SECTION,
                "retry_delay_ms",
                get(UPDATER_SECTION, "retry_delay_ms"),
            )?
            .map(Duration::from_millis),
            timeout: parse::<u64>(
                UPDATER_SECTION,
                "timeout_secs",
                get(UPDATER_SECTION, "timeout_secs"),
            )?
            .map(Duration::from_secs),
            proxy: get(UPDATER_SECTION, "proxy"),
            verification_key: get(UPDATER_SECTION, "verification_key"),
        };

        let credentials = CredentialsSection {
            username: get(CREDENTIALS_SECTION, "username"),
            password: get(CREDENTIALS_SECTION, "password"),
        };

        Ok(Self {
            updater,
            credentials,
        })
    }

    /// Build a [`RunConfig`] from the file's values, falling back to defaults.
    pub fn to_run_config(&self) -> RunConfig {
        let mut config = RunConfig::default();
        if let Some(dir) = &self.updater.temp_dir {
            config.temp_root = dir.clone();
        }
        if let Some(dir) = &self.updater.app_dir {
            config.app_dir = dir.clone();
        }
        if let Some(retries) = self.updater.retries {
            config.retry_budget = retries;
        }
        if let Some(delay) = self.updater.retry_delay {
            config.retry_delay = delay;
        }
        if let Some(timeout) = self.updater.timeout {
            config.timeout = timeout;
        }
        config.proxy = self.updater.proxy.clone();
        config.verification_key = self.updater.verification_key.clone();
        if let Some(username) = &self.credentials.username {
            let password = self.credentials.password.clone().unwrap_or_default();
            config.credentials = Some(Credentials::new(username.clone(), password));
        }
        config
    }
}

fn parse<T: FromStr>(
    section: &'static str,
    key: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue {
                section,
                key,
                value,
            })
    })
    .transpose()
}
