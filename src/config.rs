// src/config.rs

//! Workspace configuration.
//!
//! Everything the crate touches on disk lives under a single workspace root:
//!
//! ```text
//! <root>/tasks/            task files (TOML metadata block + body)
//! <root>/.workdag/locks/   one lock file per claimed task
//! ```
//!
//! The root comes from (highest priority first):
//! 1. the `root` key of a loaded config file
//! 2. the `WORKDAG_ROOT` environment variable
//! 3. the current directory

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::Result;

/// Crate configuration, deserialized from a small TOML file.
///
/// All fields are optional and have defaults, so an empty file (or no file
/// at all) is valid.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Workspace root directory.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Subdirectory of `root` holding task files.
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: String,

    /// Subdirectory of `root` holding lock files.
    #[serde(default = "default_locks_dir")]
    pub locks_dir: String,

    /// Per-check timeout for external wait-condition queries, in seconds.
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,

    /// Default lock timeout used by callers that don't pass one explicitly.
    #[serde(default = "default_lock_timeout_hours")]
    pub default_lock_timeout_hours: f64,
}

fn default_root() -> PathBuf {
    std::env::var_os("WORKDAG_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_tasks_dir() -> String {
    "tasks".to_string()
}

fn default_locks_dir() -> String {
    ".workdag/locks".to_string()
}

fn default_check_timeout_secs() -> u64 {
    30
}

fn default_lock_timeout_hours() -> f64 {
    4.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            tasks_dir: default_tasks_dir(),
            locks_dir: default_locks_dir(),
            check_timeout_secs: default_check_timeout_secs(),
            default_lock_timeout_hours: default_lock_timeout_hours(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Configuration rooted at an explicit directory, everything else default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Absolute-ish path of the task file directory.
    pub fn tasks_path(&self) -> PathBuf {
        self.root.join(&self.tasks_dir)
    }

    /// Absolute-ish path of the lock file directory.
    pub fn locks_path(&self) -> PathBuf {
        self.root.join(&self.locks_dir)
    }
}
