//! Sync engine configuration
//!
//! Every backoff and cooldown the producer loop uses is a named policy value
//! here. Values are whole seconds so they read naturally in a TOML file:
//!
//! ```toml
//! primary_backoff_secs = 1
//! stale_veto_secs = 600
//! thread_name = "tailsync-producer"
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Producer loop policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Recheck interval while the local node is primary
    pub primary_backoff_secs: u64,
    /// Recheck interval while the local node is starting up or fatal
    pub not_ready_backoff_secs: u64,
    /// Recheck interval while no replica-set configuration is known
    pub unconfigured_backoff_secs: u64,
    /// Backoff after a selection round found no usable target
    pub no_target_backoff_secs: u64,
    /// Backoff after the node was transitioned to stale
    pub stale_backoff_secs: u64,
    /// Veto applied to a candidate that has discarded history we need
    pub stale_veto_secs: u64,
    /// Backoff after a transient network/store failure
    pub transient_error_backoff_secs: u64,
    /// Backoff after any other failure
    pub unexpected_error_backoff_secs: u64,
    /// Name of the producer thread
    pub thread_name: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            primary_backoff_secs: 1,
            not_ready_backoff_secs: 5,
            unconfigured_backoff_secs: 20,
            no_target_backoff_secs: 1,
            stale_backoff_secs: 120,
            stale_veto_secs: 600,
            transient_error_backoff_secs: 10,
            unexpected_error_backoff_secs: 60,
            thread_name: "tailsync-producer".to_string(),
        }
    }
}

impl SyncConfig {
    /// Parse a configuration from TOML; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!("Loaded sync configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration from an optional file, then apply `TAILSYNC_*`
    /// environment overrides.
    /// Priority: Environment variables > config file > defaults
    pub fn from_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                tracing::debug!("Sync config file not found: {:?}", path);
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let fields: [(&str, &mut u64); 8] = [
            ("TAILSYNC_PRIMARY_BACKOFF_SECS", &mut self.primary_backoff_secs),
            ("TAILSYNC_NOT_READY_BACKOFF_SECS", &mut self.not_ready_backoff_secs),
            ("TAILSYNC_UNCONFIGURED_BACKOFF_SECS", &mut self.unconfigured_backoff_secs),
            ("TAILSYNC_NO_TARGET_BACKOFF_SECS", &mut self.no_target_backoff_secs),
            ("TAILSYNC_STALE_BACKOFF_SECS", &mut self.stale_backoff_secs),
            ("TAILSYNC_STALE_VETO_SECS", &mut self.stale_veto_secs),
            ("TAILSYNC_TRANSIENT_ERROR_BACKOFF_SECS", &mut self.transient_error_backoff_secs),
            ("TAILSYNC_UNEXPECTED_ERROR_BACKOFF_SECS", &mut self.unexpected_error_backoff_secs),
        ];
        for (key, slot) in fields {
            if let Some(value) = lookup(key) {
                *slot = value
                    .trim()
                    .parse()
                    .map_err(|e| Error::config(format!("{}={:?}: {}", key, value, e)))?;
            }
        }
        if let Some(name) = lookup("TAILSYNC_THREAD_NAME") {
            self.thread_name = name;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.stale_veto_secs == 0 {
            return Err(Error::config("stale_veto_secs must be at least 1"));
        }
        // A zero backoff on these paths turns the producer into a busy loop.
        for (name, value) in [
            ("primary_backoff_secs", self.primary_backoff_secs),
            ("not_ready_backoff_secs", self.not_ready_backoff_secs),
            ("no_target_backoff_secs", self.no_target_backoff_secs),
            ("transient_error_backoff_secs", self.transient_error_backoff_secs),
            ("unexpected_error_backoff_secs", self.unexpected_error_backoff_secs),
        ] {
            if value == 0 {
                return Err(Error::config(format!("{} must be at least 1", name)));
            }
        }
        if self.thread_name.trim().is_empty() {
            return Err(Error::config("thread_name must not be empty"));
        }
        Ok(())
    }

    /// Recheck interval while primary
    pub fn primary_backoff(&self) -> Duration {
        Duration::from_secs(self.primary_backoff_secs)
    }

    /// Recheck interval while starting up or fatal
    pub fn not_ready_backoff(&self) -> Duration {
        Duration::from_secs(self.not_ready_backoff_secs)
    }

    /// Recheck interval while unconfigured
    pub fn unconfigured_backoff(&self) -> Duration {
        Duration::from_secs(self.unconfigured_backoff_secs)
    }

    /// Backoff when no target was found
    pub fn no_target_backoff(&self) -> Duration {
        Duration::from_secs(self.no_target_backoff_secs)
    }

    /// Backoff after going stale
    pub fn stale_backoff(&self) -> Duration {
        Duration::from_secs(self.stale_backoff_secs)
    }

    /// Veto cooldown for stale candidates
    pub fn stale_veto(&self) -> Duration {
        Duration::from_secs(self.stale_veto_secs)
    }

    /// Backoff after a transient failure
    pub fn transient_error_backoff(&self) -> Duration {
        Duration::from_secs(self.transient_error_backoff_secs)
    }

    /// Backoff after an unexpected failure
    pub fn unexpected_error_backoff(&self) -> Duration {
        Duration::from_secs(self.unexpected_error_backoff_secs)
    }
}
