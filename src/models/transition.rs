use super::stage::StageCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of stage transition recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Advance,
    Revert,
    BulkAdvance,
    BulkRevert,
}

impl TransitionKind {
    pub fn advance(batch_size: usize) -> Self {
        if batch_size > 1 {
            Self::BulkAdvance
        } else {
            Self::Advance
        }
    }

    pub fn revert(batch_size: usize) -> Self {
        if batch_size > 1 {
            Self::BulkRevert
        } else {
            Self::Revert
        }
    }

    pub fn is_advance(&self) -> bool {
        matches!(self, Self::Advance | Self::BulkAdvance)
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Advance => write!(f, "advance"),
            Self::Revert => write!(f, "revert"),
            Self::BulkAdvance => write!(f, "bulk_advance"),
            Self::BulkRevert => write!(f, "bulk_revert"),
        }
    }
}

impl std::str::FromStr for TransitionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advance" => Ok(Self::Advance),
            "revert" => Ok(Self::Revert),
            "bulk_advance" => Ok(Self::BulkAdvance),
            "bulk_revert" => Ok(Self::BulkRevert),
            _ => Err(format!("Invalid transition kind: {s}")),
        }
    }
}

/// Who initiated a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOrigin {
    Manual,
    Scheduled,
}

impl fmt::Display for TransitionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Scheduled => write!(f, "scheduled"),
        }
    }
}

/// Per-crop failure detail kept on the summary record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCrop {
    pub crop_id: i64,
    pub reason: String,
}

/// Immutable summary row written once per transition call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransitionRecord {
    pub id: i64,
    pub kind: TransitionKind,
    pub origin: TransitionOrigin,
    pub batch_id: String,
    pub from_stage_id: i64,
    pub to_stage_id: i64,
    pub transition_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub succeeded_count: i32,
    pub failed_count: i32,
    pub failed_crops: Vec<FailedCrop>,
    pub reason: Option<String>,
    pub actor: Option<String>,
}

/// Summary row before insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStageTransitionRecord {
    pub kind: TransitionKind,
    pub origin: TransitionOrigin,
    pub batch_id: String,
    pub from_stage_id: i64,
    pub to_stage_id: i64,
    pub transition_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub succeeded_count: i32,
    pub failed_count: i32,
    pub failed_crops: Vec<FailedCrop>,
    pub reason: Option<String>,
    pub actor: Option<String>,
}

impl NewStageTransitionRecord {
    pub fn into_record(self, id: i64) -> StageTransitionRecord {
        StageTransitionRecord {
            id,
            kind: self.kind,
            origin: self.origin,
            batch_id: self.batch_id,
            from_stage_id: self.from_stage_id,
            to_stage_id: self.to_stage_id,
            transition_at: self.transition_at,
            recorded_at: self.recorded_at,
            succeeded_count: self.succeeded_count,
            failed_count: self.failed_count,
            failed_crops: self.failed_crops,
            reason: self.reason,
            actor: self.actor,
        }
    }
}

/// History entry appended for every crop a transition mutates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropTransitionEntry {
    pub record_id: i64,
    pub crop_id: i64,
    pub from_stage: StageCode,
    pub to_stage: StageCode,
    pub transition_at: DateTime<Utc>,
    pub tray_number: Option<String>,
}
