//! Batch identity.
//!
//! Crops planted together transition together. Grouping is either an explicit
//! `crop_batch_id` or the implicit `(recipe, germination time, stage)` key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Implicit grouping of crops that share recipe, germination time and stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchKey {
    pub recipe_id: i64,
    pub germination_at: Option<DateTime<Utc>>,
    pub stage_id: i64,
}

/// Reference to a batch of crops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchRef {
    Explicit(i64),
    Implicit(BatchKey),
}

impl BatchRef {
    /// Stable string form stored on audit rows and task conditions
    pub fn identifier(&self) -> String {
        match self {
            Self::Explicit(batch_id) => format!("batch:{batch_id}"),
            Self::Implicit(key) => format!(
                "implicit:{}:{}:{}",
                key.recipe_id,
                key.germination_at
                    .map(|ts| ts.timestamp_micros().to_string())
                    .unwrap_or_else(|| "none".to_string()),
                key.stage_id
            ),
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }
}

impl fmt::Display for BatchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

/// What a transition call is aimed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionTarget {
    /// A crop; its whole batch moves with it
    Crop(i64),
    Batch(BatchRef),
}

impl fmt::Display for TransitionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crop(crop_id) => write!(f, "crop:{crop_id}"),
            Self::Batch(batch) => write!(f, "{batch}"),
        }
    }
}
