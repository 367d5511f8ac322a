use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DbError;

/// `wait_lock_tries` value that turns row locking off entirely.
pub const RECORD_LOCK_DISABLED: i32 = -1;

/// Per-session settings, usually read from a TOML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Extra attempts made when a row lock is held elsewhere;
    /// [`RECORD_LOCK_DISABLED`] skips locking and re-fetch.
    pub wait_lock_tries: i32,
    /// Directory for the warning and error logs; none disables file logs.
    pub log_dir: Option<PathBuf>,
    /// File name of the out-of-transaction warning log.
    pub warn_log_name: String,
    /// File name of the open-failure error log.
    pub err_log_name: String,
    /// Whether writes outside a transaction are reported.
    pub out_of_transaction_logging: bool,
    /// Directory temporary tables are created in.
    pub temp_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wait_lock_tries: 0,
            log_dir: None,
            warn_log_name: "dbwarn.log".to_string(),
            err_log_name: "dberr.log".to_string(),
            out_of_transaction_logging: true,
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl SessionConfig {
    /// Parses TOML text; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: None,
            source,
        })
    }

    /// Reads a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })
    }

    /// Writes the config as pretty TOML.
    pub fn persist(&self, path: &Path) -> Result<(), ConfigError> {
        let text =
            toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })?;
        fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Returns true when row locking is turned off.
    pub fn locking_disabled(&self) -> bool {
        self.wait_lock_tries == RECORD_LOCK_DISABLED
    }

    /// Full path of the warning log, if file logging is configured.
    pub fn warn_log_path(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join(&self.warn_log_name))
    }

    /// Full path of the error log, if file logging is configured.
    pub fn err_log_path(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join(&self.err_log_name))
    }
}

/// Failure loading or saving a [`SessionConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read session config {path}: {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Text is not valid config TOML.
    #[error("failed to parse session config: {source}")]
    Parse {
        /// Config path, when read from a file.
        path: Option<PathBuf>,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// Config could not be rendered.
    #[error("failed to serialize session config: {source}")]
    Serialize {
        /// Underlying error.
        source: toml::ser::Error,
    },
    /// File could not be written.
    #[error("failed to write session config {path}: {source}")]
    Write {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

impl From<ConfigError> for DbError {
    fn from(err: ConfigError) -> Self {
        DbError::Config(err.to_string())
    }
}
