//! Shared constants for the crop lifecycle core.

/// `resource_type` stamped on every scheduled task
pub const TASK_RESOURCE_TYPE: &str = "crops";

/// Actor recorded on transitions executed by the task dispatcher
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// Transitions earlier than this share of the expected stage duration are rejected
pub const DEFAULT_MINIMUM_DURATION_RATIO: f64 = 0.9;

/// Transitions earlier than this share of the expected stage duration raise a warning
pub const DEFAULT_EARLY_WARNING_RATIO: f64 = 0.75;

/// Hour of the completion day (UTC) when the soak-completion warning fires
pub const DEFAULT_SOAK_WARNING_HOUR: u32 = 6;

/// Configuration file stem looked up in the config directory
pub const CONFIG_FILE_STEM: &str = "cropcycle";

/// Prefix for environment variable overrides, e.g. `CROPCYCLE__DATABASE__URL`
pub const ENV_PREFIX: &str = "CROPCYCLE";

pub mod notifications {
    /// Role group notified about stage transitions and soak warnings
    pub const GROWER_RECIPIENTS: &str = "growers";
}
