use super::batch::BatchRef;
use super::stage::StageCode;
use crate::constants::TASK_RESOURCE_TYPE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of deferred work the scheduler creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskName {
    AdvanceToGermination,
    AdvanceToBlackout,
    AdvanceToLight,
    AdvanceToHarvested,
    SoakingCompletionWarning,
    SuspendWatering,
}

impl TaskName {
    /// Advance task for a target stage. Soaking is never a target.
    pub fn advance_to(stage: StageCode) -> Option<Self> {
        match stage {
            StageCode::Soaking => None,
            StageCode::Germination => Some(Self::AdvanceToGermination),
            StageCode::Blackout => Some(Self::AdvanceToBlackout),
            StageCode::Light => Some(Self::AdvanceToLight),
            StageCode::Harvested => Some(Self::AdvanceToHarvested),
        }
    }

    /// Target stage of an advance task
    pub fn target_stage(&self) -> Option<StageCode> {
        match self {
            Self::AdvanceToGermination => Some(StageCode::Germination),
            Self::AdvanceToBlackout => Some(StageCode::Blackout),
            Self::AdvanceToLight => Some(StageCode::Light),
            Self::AdvanceToHarvested => Some(StageCode::Harvested),
            Self::SoakingCompletionWarning | Self::SuspendWatering => None,
        }
    }

    pub fn is_advance(&self) -> bool {
        self.target_stage().is_some()
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdvanceToGermination => write!(f, "advance_to_germination"),
            Self::AdvanceToBlackout => write!(f, "advance_to_blackout"),
            Self::AdvanceToLight => write!(f, "advance_to_light"),
            Self::AdvanceToHarvested => write!(f, "advance_to_harvested"),
            Self::SoakingCompletionWarning => write!(f, "soaking_completion_warning"),
            Self::SuspendWatering => write!(f, "suspend_watering"),
        }
    }
}

impl std::str::FromStr for TaskName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advance_to_germination" => Ok(Self::AdvanceToGermination),
            "advance_to_blackout" => Ok(Self::AdvanceToBlackout),
            "advance_to_light" => Ok(Self::AdvanceToLight),
            "advance_to_harvested" => Ok(Self::AdvanceToHarvested),
            "soaking_completion_warning" => Ok(Self::SoakingCompletionWarning),
            "suspend_watering" => Ok(Self::SuspendWatering),
            _ => Err(format!("Invalid task name: {s}")),
        }
    }
}

/// Payload describing what a task acts on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConditions {
    /// Anchor crop of the batch at scheduling time
    pub crop_id: i64,
    /// Every batch member at scheduling time
    pub crop_ids: Vec<i64>,
    /// Set for explicit batches; single-crop tasks resolve their batch from `crop_id`
    pub batch: Option<BatchRef>,
    /// Identifier of the batch the task was scheduled for
    pub batch_identifier: String,
    pub target_stage: Option<StageCode>,
    pub tray_numbers: Vec<String>,
    pub variety: String,
}

impl TaskConditions {
    pub fn references_any(&self, crop_ids: &[i64], batch_identifiers: &[String]) -> bool {
        crop_ids.contains(&self.crop_id)
            || self.crop_ids.iter().any(|id| crop_ids.contains(id))
            || batch_identifiers.contains(&self.batch_identifier)
    }
}

/// A persisted one-shot deferred action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub resource_type: String,
    pub task_name: TaskName,
    pub conditions: TaskConditions,
    pub due_at: DateTime<Utc>,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.due_at <= now
    }
}

/// Task row before insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScheduledTask {
    pub resource_type: String,
    pub task_name: TaskName,
    pub conditions: TaskConditions,
    pub due_at: DateTime<Utc>,
}

impl NewScheduledTask {
    pub fn new(task_name: TaskName, conditions: TaskConditions, due_at: DateTime<Utc>) -> Self {
        Self {
            resource_type: TASK_RESOURCE_TYPE.to_string(),
            task_name,
            conditions,
            due_at,
        }
    }

    pub fn into_task(self, id: i64) -> ScheduledTask {
        ScheduledTask {
            id,
            resource_type: self.resource_type,
            task_name: self.task_name,
            conditions: self.conditions,
            due_at: self.due_at,
            is_active: true,
            last_run_at: None,
        }
    }
}
