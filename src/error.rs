use crate::config::ConfigurationError;
use crate::store::{StoreError, ACTIVE_TRAY_INDEX};
use thiserror::Error;

/// Top-level error for crop lifecycle operations
///
/// Blocking failures (`Validation`, `NotFound`) are always raised before any write.
/// Per-crop failures inside an otherwise valid batch transition are reported in
/// the transition result instead. A tray collision caught by the store while writing
/// surfaces as `Validation`; the transaction is rolled back.
#[derive(Error, Debug)]
pub enum CropCycleError {
    #[error("Validation failed: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Stale task: {reason}")]
    StaleTask { reason: String },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Seed inventory error: {0}")]
    SeedInventory(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CropCycleError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            errors: vec![message.into()],
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn stale(reason: impl Into<String>) -> Self {
        Self::StaleTask {
            reason: reason.into(),
        }
    }

    /// Validation messages, empty for other variants
    pub fn validation_errors(&self) -> &[String] {
        match self {
            Self::Validation { errors } => errors,
            _ => &[],
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

impl From<StoreError> for CropCycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { constraint, detail } if constraint == ACTIVE_TRAY_INDEX => {
                Self::Validation {
                    errors: vec![detail],
                }
            }
            other => Self::Store(other),
        }
    }
}

impl From<sqlx::Error> for CropCycleError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

pub type Result<T> = std::result::Result<T, CropCycleError>;
