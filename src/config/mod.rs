//! # CropCycle Configuration
//!
//! Layered configuration: `config/cropcycle.toml`, then `config/cropcycle.<env>.toml`,
//! then `CROPCYCLE__*` environment variables. Every section has defaults so an empty
//! configuration directory still yields a usable setup.
//!
//! ```rust,no_run
//! use cropcycle_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let ratio = manager.config().validation.minimum_duration_ratio;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{
    DEFAULT_EARLY_WARNING_RATIO, DEFAULT_MINIMUM_DURATION_RATIO, DEFAULT_SOAK_WARNING_HOUR,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CropCycleConfig {
    pub database: DatabaseConfig,
    pub validation: ValidationConfig,
    pub scheduler: SchedulerConfig,
    pub dispatcher: DispatcherConfig,
    pub logging: LoggingConfig,
}

impl CropCycleConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.database.validate()?;
        self.validation.validate()?;
        self.scheduler.validate()?;
        self.dispatcher.validate()?;
        Ok(())
    }
}

/// Postgres connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 30,
            run_migrations: false,
        }
    }
}

impl DatabaseConfig {
    /// Explicit URL, falling back to `DATABASE_URL`
    pub fn database_url(&self) -> ConfigResult<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .ok_or_else(|| ConfigurationError::Missing("database.url or DATABASE_URL".to_string()))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                self.max_connections,
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Transition validation thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Share of the expected stage duration below which an advance is rejected
    pub minimum_duration_ratio: f64,
    /// Share of the expected stage duration below which an advance is flagged
    pub early_warning_ratio: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            minimum_duration_ratio: DEFAULT_MINIMUM_DURATION_RATIO,
            early_warning_ratio: DEFAULT_EARLY_WARNING_RATIO,
        }
    }
}

impl ValidationConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("validation.minimum_duration_ratio", self.minimum_duration_ratio),
            ("validation.early_warning_ratio", self.early_warning_ratio),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "must be within (0, 1]",
                ));
            }
        }
        Ok(())
    }
}

/// Task scheduling settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Skip task creation when resident memory exceeds this many megabytes
    pub memory_ceiling_mb: Option<u64>,
    /// Hour of the soak completion day (UTC) when the warning fires
    pub soak_warning_hour: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            memory_ceiling_mb: None,
            soak_warning_hour: DEFAULT_SOAK_WARNING_HOUR,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.soak_warning_hour >= 24 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.soak_warning_hour",
                self.soak_warning_hour,
                "must be an hour of the day (0-23)",
            ));
        }
        if self.memory_ceiling_mb == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "scheduler.memory_ceiling_mb",
                0,
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }
}

/// Due-task dispatch settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum due tasks fetched per dispatch run
    pub batch_limit: i64,
    /// Role group receiving transition and soak alerts
    pub recipients: String,
    /// Base URL for crop links in notifications, e.g. `https://farm.example/crops`
    pub link_base_url: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            recipients: crate::constants::notifications::GROWER_RECIPIENTS.to_string(),
            link_base_url: None,
        }
    }
}

impl DispatcherConfig {
    pub fn crop_link(&self, crop_id: i64) -> Option<String> {
        self.link_base_url
            .as_ref()
            .map(|base| format!("{}/{crop_id}", base.trim_end_matches('/')))
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.batch_limit <= 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatcher.batch_limit",
                self.batch_limit,
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Log output settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: Option<String>,
    pub json: bool,
}
