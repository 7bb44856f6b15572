//! Configuration Loader
//!
//! Environment-aware loading: base file, environment overlay, then environment
//! variables. Missing files are skipped; defaults fill the gaps.

use super::error::ConfigResult;
use super::CropCycleConfig;
use crate::constants::{CONFIG_FILE_STEM, ENV_PREFIX};
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Loaded configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: CropCycleConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for tests that must not touch process environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = environment,
            database_configured = config.database.url.is_some(),
            minimum_duration_ratio = config.validation.minimum_duration_ratio,
            dispatch_batch_limit = config.dispatcher.batch_limit,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build(directory: &Path, environment: &str) -> ConfigResult<CropCycleConfig> {
        let base = directory.join(format!("{CONFIG_FILE_STEM}.toml"));
        let overlay = directory.join(format!("{CONFIG_FILE_STEM}.{environment}.toml"));

        let config = Config::builder()
            .add_source(File::from(base).required(false))
            .add_source(File::from(overlay).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn config(&self) -> &CropCycleConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect environment from `CROPCYCLE_ENV`, then `APP_ENV`
    pub fn detect_environment() -> String {
        env::var("CROPCYCLE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("CROPCYCLE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
