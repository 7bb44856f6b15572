//! # Structured Logging
//!
//! Environment-aware `tracing` setup. Console output is human readable by default and
//! switches to JSON lines when `logging.json` is set. `RUST_LOG` always wins over the
//! configured level.

use crate::config::LoggingConfig;
use crate::models::{StageCode, TransitionKind};
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let level = config
            .level
            .clone()
            .unwrap_or_else(|| default_log_level(&environment).to_string());
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

        let layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // Another subscriber may already be installed (tests, embedding applications)
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            environment = %environment,
            level = %level,
            json = config.json,
            "Structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("CROPCYCLE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for a completed stage transition
pub fn log_transition_operation(
    kind: TransitionKind,
    batch: &str,
    from_stage: StageCode,
    to_stage: StageCode,
    succeeded: usize,
    failed: usize,
) {
    tracing::info!(
        operation = %kind,
        batch = %batch,
        from_stage = %from_stage,
        to_stage = %to_stage,
        succeeded = succeeded,
        failed = failed,
        "STAGE_TRANSITION"
    );
}

/// Log structured data for a dispatched task
pub fn log_task_dispatch(task_id: i64, task_name: &str, outcome: &str, details: Option<&str>) {
    tracing::info!(
        task_id = task_id,
        task_name = %task_name,
        outcome = %outcome,
        details = details,
        "TASK_DISPATCH"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_levels() {
        assert_eq!(default_log_level("production"), "info");
        assert_eq!(default_log_level("test"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_structured_logging(&config);
        init_structured_logging(&config);
    }
}
