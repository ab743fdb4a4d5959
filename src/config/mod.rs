//! Remote connection settings.
//!
//! Settings come from the process environment first and from a dotenv file
//! second. The file is read into memory only; nothing is exported into the
//! process environment.
//!
//! | Key | Meaning |
//! |---|---|
//! | `GOPM_SSH_MODE` | `login+password`, `key` or `local` |
//! | `GOPM_SSH_LOGIN`, `GOPM_SSH_HOST`, `GOPM_SSH_PORT` | ssh destination (port defaults to 22) |
//! | `GOPM_SSH_PASSWORD` | password for `login+password` |
//! | `GOPM_SSH_KEY_PATH` (or `SSH_KEY_PATH`) | private key for `key` |
//! | `GOPM_REMOTE_DIR` | mounted repository directory for `local` |
//! | `GOPM_REMOTE_ROOT`, `GOPM_REMOTE_STAGING`, `GOPM_REMOTE_TMP` | remote layout |
//! | `GOPM_COMMAND_TIMEOUT_SECS`, `GOPM_LOCK_TIMEOUT_SECS`, `GOPM_LOCK_POLL_MS` | timing |
//! | `GOPM_ARCHIVE_FORMAT` | `tar.gz` or `zip` |

use anyhow::Result;
use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::archive::ArchiveFormat;
use crate::runtime::Runtime;
use crate::sync::{LockPolicy, RemoteLayout};

pub const ENV_FILE_NAME: &str = ".env";

const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LOCK_POLL_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("env file {0:?} does not exist")]
    EnvFileNotFound(PathBuf),
    #[error("failed to read env file {path:?}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("{0} is not set (in the environment or an .env file)")]
    Missing(&'static str),
    #[error("invalid {key} '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("ssh key file {0:?} does not exist")]
    KeyFileNotFound(PathBuf),
}

/// How to reach the remote repository.
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionMode {
    Password {
        login: String,
        host: String,
        port: u16,
        password: String,
    },
    Key {
        login: String,
        host: String,
        port: u16,
        key_path: PathBuf,
    },
    /// The repository is a directory mounted on this machine.
    Local { dir: PathBuf },
}

impl fmt::Debug for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Password {
                login, host, port, ..
            } => f
                .debug_struct("Password")
                .field("login", login)
                .field("host", host)
                .field("port", port)
                .field("password", &"<redacted>")
                .finish(),
            ConnectionMode::Key {
                login,
                host,
                port,
                key_path,
            } => f
                .debug_struct("Key")
                .field("login", login)
                .field("host", host)
                .field("port", port)
                .field("key_path", key_path)
                .finish(),
            ConnectionMode::Local { dir } => f.debug_struct("Local").field("dir", dir).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub mode: ConnectionMode,
    pub layout: RemoteLayout,
    pub command_timeout: Duration,
    pub lock_policy: LockPolicy,
    pub archive_format: ArchiveFormat,
}

/// Key lookup: process environment, then the dotenv file.
struct Settings<'a, R: Runtime> {
    runtime: &'a R,
    file: HashMap<String, String>,
}

impl<R: Runtime> Settings<'_, R> {
    fn get(&self, key: &str) -> Option<String> {
        self.runtime
            .env_var(key)
            .ok()
            .or_else(|| self.file.get(key).cloned())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }
}

impl RemoteConfig {
    /// Load settings. An explicit `env_file` must exist; without one
    /// `./.env` and then `../.env` are tried.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, env_file: Option<&Path>) -> Result<Self> {
        let file = match find_env_file(runtime, env_file)? {
            Some(path) => read_env_file(runtime, &path)?,
            None => HashMap::new(),
        };
        let settings = Settings { runtime, file };
        Ok(Self::from_settings(&settings)?)
    }

    fn from_settings<R: Runtime>(settings: &Settings<'_, R>) -> Result<Self, ConfigError> {
        let mode = match settings.require("GOPM_SSH_MODE")?.as_str() {
            "login+password" => ConnectionMode::Password {
                login: settings.require("GOPM_SSH_LOGIN")?,
                host: settings.require("GOPM_SSH_HOST")?,
                port: settings.parsed("GOPM_SSH_PORT", DEFAULT_SSH_PORT)?,
                password: settings.require("GOPM_SSH_PASSWORD")?,
            },
            "key" => {
                let key_path = settings
                    .get("GOPM_SSH_KEY_PATH")
                    .or_else(|| settings.get("SSH_KEY_PATH"))
                    .map(PathBuf::from)
                    .ok_or(ConfigError::Missing("GOPM_SSH_KEY_PATH"))?;
                if !settings.runtime.exists(&key_path) {
                    return Err(ConfigError::KeyFileNotFound(key_path));
                }
                ConnectionMode::Key {
                    login: settings.require("GOPM_SSH_LOGIN")?,
                    host: settings.require("GOPM_SSH_HOST")?,
                    port: settings.parsed("GOPM_SSH_PORT", DEFAULT_SSH_PORT)?,
                    key_path,
                }
            }
            "local" => ConnectionMode::Local {
                dir: PathBuf::from(settings.require("GOPM_REMOTE_DIR")?),
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "GOPM_SSH_MODE",
                    value: other.to_string(),
                    reason: "expected login+password, key or local".to_string(),
                });
            }
        };

        let defaults = RemoteLayout::default();
        let layout = RemoteLayout {
            root: settings.get("GOPM_REMOTE_ROOT").unwrap_or(defaults.root),
            staging: settings.get("GOPM_REMOTE_STAGING").unwrap_or(defaults.staging),
            tmp: settings.get("GOPM_REMOTE_TMP").unwrap_or(defaults.tmp),
        };

        let command_timeout = Duration::from_secs(
            settings.parsed("GOPM_COMMAND_TIMEOUT_SECS", DEFAULT_COMMAND_TIMEOUT_SECS)?,
        );
        let lock_policy = LockPolicy::new(
            Duration::from_millis(settings.parsed("GOPM_LOCK_POLL_MS", DEFAULT_LOCK_POLL_MS)?),
            Duration::from_secs(settings.parsed("GOPM_LOCK_TIMEOUT_SECS", DEFAULT_LOCK_TIMEOUT_SECS)?),
        );
        let archive_format = settings.parsed("GOPM_ARCHIVE_FORMAT", ArchiveFormat::default())?;

        let config = RemoteConfig {
            mode,
            layout,
            command_timeout,
            lock_policy,
            archive_format,
        };
        debug!("Remote configuration: {:?}", config);
        Ok(config)
    }
}

fn find_env_file<R: Runtime>(runtime: &R, explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !runtime.exists(path) {
            return Err(ConfigError::EnvFileNotFound(path.to_path_buf()).into());
        }
        return Ok(Some(path.to_path_buf()));
    }

    let cwd = runtime.current_dir()?;
    let mut candidates = vec![cwd.join(ENV_FILE_NAME)];
    if let Some(parent) = cwd.parent() {
        candidates.push(parent.join(ENV_FILE_NAME));
    }
    Ok(candidates.into_iter().find(|p| runtime.exists(p)))
}

fn read_env_file<R: Runtime>(runtime: &R, path: &Path) -> Result<HashMap<String, String>> {
    debug!("Reading settings from {:?}", path);
    let reader = runtime.open(path)?;
    let mut values = HashMap::new();
    for item in dotenvy::from_read_iter(reader) {
        let (key, value) = item.map_err(|source| ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        })?;
        values.insert(key, value);
    }
    Ok(values)
}
