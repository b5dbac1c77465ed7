//! Configuration management for home-backup.
//!
//! Loads configuration from a TOML file. Every section except `[home]` and
//! `[storage]` may be omitted.

use crate::daemon::WorkerSettings;
use crate::scope::{CustomScope, DefaultScope, MultiScope, Scope};
use crate::storage::{GcsStorage, LocalFileStorage, Storage};
use crate::utils::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub home: HomeConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeConfig {
    /// Home directory to back up and restore into
    pub root: PathBuf,

    /// Working directory for containers in flight (default: `<root>/backup-tmp`)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Run the periodic worker
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_full_interval_hours")]
    pub full_interval_hours: u64,

    #[serde(default = "default_incremental_interval_minutes")]
    pub incremental_interval_minutes: u64,

    /// How often the worker checks its triggers
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<ScopeConfig>,
}

/// One sub-scope of the backup. Its name prefixes the entries it adds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScopeConfig {
    /// The whole home directory minus the built-in exclusions
    Default,
    Custom {
        name: String,
        /// Relative to the home directory
        path: PathBuf,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

impl ScopeConfig {
    pub fn name(&self) -> &str {
        match self {
            ScopeConfig::Default => DefaultScope::NAME,
            ScopeConfig::Custom { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Restore the latest backup before the worker starts
    #[serde(default)]
    pub auto_restore: bool,

    /// Replace files already present in the home directory
    #[serde(default)]
    pub overwrite: bool,

    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    Local {
        directory: PathBuf,
    },
    Gcs {
        bucket: String,
        /// Command used to reach the bucket, e.g. `gsutil -q`
        #[serde(default = "default_gcs_command")]
        command: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write the log of the `run` command to `<root>/backup-worker.log`
    #[serde(default = "default_true")]
    pub worker_log: bool,
}

// Default values
fn default_true() -> bool {
    true
}

fn default_full_interval_hours() -> u64 {
    1
}

fn default_incremental_interval_minutes() -> u64 {
    3
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_scopes() -> Vec<ScopeConfig> {
    vec![ScopeConfig::Default]
}

fn default_max_concurrent_fetches() -> usize {
    crate::executor::DEFAULT_MAX_CONCURRENT_FETCHES
}

fn default_gcs_command() -> String {
    crate::storage::gcs::DEFAULT_COMMAND.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            full_interval_hours: default_full_interval_hours(),
            incremental_interval_minutes: default_incremental_interval_minutes(),
            check_interval_secs: default_check_interval_secs(),
            scopes: default_scopes(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            auto_restore: false,
            overwrite: false,
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            worker_log: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            home: HomeConfig {
                root: PathBuf::from("/var/lib/home"),
                scratch_dir: None,
            },
            backup: BackupConfig::default(),
            restore: RestoreConfig::default(),
            storage: StorageConfig::Local {
                directory: PathBuf::from("/var/lib/home-backup"),
            },
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| BackupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(BackupError::Config(message.to_string()));

        if self.backup.full_interval_hours == 0 {
            return invalid("backup.full_interval_hours must be positive");
        }
        if self.backup.incremental_interval_minutes == 0 {
            return invalid("backup.incremental_interval_minutes must be positive");
        }
        if self.backup.check_interval_secs == 0 {
            return invalid("backup.check_interval_secs must be positive");
        }
        if self.restore.max_concurrent_fetches == 0 {
            return invalid("restore.max_concurrent_fetches must be positive");
        }
        if self.backup.scopes.is_empty() {
            return invalid("backup.scopes must not be empty");
        }

        let mut names = HashSet::new();
        for scope in &self.backup.scopes {
            let name = scope.name();
            if name.is_empty() || name.contains('/') {
                return Err(BackupError::Config(format!("invalid scope name '{}'", name)));
            }
            if !names.insert(name) {
                return Err(BackupError::Config(format!("duplicate scope name '{}'", name)));
            }
        }

        if let StorageConfig::Gcs { bucket, command } = &self.storage {
            if bucket.trim().is_empty() {
                return invalid("storage.bucket must not be empty");
            }
            if command.trim().is_empty() {
                return invalid("storage.command must not be empty");
            }
        }

        Ok(())
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.home
            .scratch_dir
            .clone()
            .unwrap_or_else(|| self.home.root.join("backup-tmp"))
    }

    /// All configured scopes, each under its own name.
    pub fn build_scope(&self) -> Result<Arc<dyn Scope>> {
        let mut multi = MultiScope::new();
        for scope in &self.backup.scopes {
            let sub: Arc<dyn Scope> = match scope {
                ScopeConfig::Default => Arc::new(DefaultScope::new()?),
                ScopeConfig::Custom {
                    name,
                    path,
                    exclude,
                } => Arc::new(CustomScope::new(name, path, exclude)?),
            };
            multi.add_sub_scope(scope.name(), sub);
        }
        Ok(Arc::new(multi))
    }

    pub fn build_storage(&self) -> Arc<dyn Storage> {
        match &self.storage {
            StorageConfig::Local { directory } => Arc::new(LocalFileStorage::new(directory)),
            StorageConfig::Gcs { bucket, command } => {
                Arc::new(GcsStorage::with_command(bucket, command))
            }
        }
    }

    pub fn worker_settings(&self) -> Result<WorkerSettings> {
        let interval = |secs: u64| {
            chrono::Duration::from_std(Duration::from_secs(secs))
                .map_err(|e| BackupError::Config(format!("interval out of range: {}", e)))
        };

        let mut settings = WorkerSettings::new(&self.home.root);
        settings.scratch_dir = self.scratch_dir();
        settings.full_interval = interval(self.backup.full_interval_hours.saturating_mul(3600))?;
        settings.incremental_interval =
            interval(self.backup.incremental_interval_minutes.saturating_mul(60))?;
        settings.check_interval = Duration::from_secs(self.backup.check_interval_secs);
        settings.overwrite = self.restore.overwrite;
        settings.max_concurrent_fetches = self.restore.max_concurrent_fetches;
        Ok(settings)
    }
}
