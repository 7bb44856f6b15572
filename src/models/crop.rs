use super::batch::{BatchKey, BatchRef};
use super::stage::StageCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One physical tray moving through the growth stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Crop {
    pub id: i64,
    pub recipe_id: i64,
    pub current_stage_id: i64,
    pub tray_number: Option<String>,
    pub soaking_at: Option<DateTime<Utc>>,
    pub germination_at: Option<DateTime<Utc>>,
    pub blackout_at: Option<DateTime<Utc>>,
    pub light_at: Option<DateTime<Utc>>,
    pub harvested_at: Option<DateTime<Utc>>,
    pub requires_soaking: bool,
    pub watering_suspended_at: Option<DateTime<Utc>>,
    pub crop_batch_id: Option<i64>,
}

impl Crop {
    /// Entry timestamp recorded for a stage
    pub fn stage_timestamp(&self, stage: StageCode) -> Option<DateTime<Utc>> {
        match stage {
            StageCode::Soaking => self.soaking_at,
            StageCode::Germination => self.germination_at,
            StageCode::Blackout => self.blackout_at,
            StageCode::Light => self.light_at,
            StageCode::Harvested => self.harvested_at,
        }
    }

    pub fn set_stage_timestamp(&mut self, stage: StageCode, value: Option<DateTime<Utc>>) {
        let slot = match stage {
            StageCode::Soaking => &mut self.soaking_at,
            StageCode::Germination => &mut self.germination_at,
            StageCode::Blackout => &mut self.blackout_at,
            StageCode::Light => &mut self.light_at,
            StageCode::Harvested => &mut self.harvested_at,
        };
        *slot = value;
    }

    /// Every populated stage timestamp in stage order
    pub fn populated_timestamps(&self) -> Vec<(StageCode, DateTime<Utc>)> {
        StageCode::ALL
            .iter()
            .filter_map(|code| self.stage_timestamp(*code).map(|ts| (*code, ts)))
            .collect()
    }

    /// The timestamp every downstream due time is computed from
    pub fn anchor_timestamp(&self) -> Option<DateTime<Utc>> {
        if self.requires_soaking {
            self.soaking_at
        } else {
            self.germination_at
        }
    }

    pub fn batch_key(&self) -> BatchKey {
        BatchKey {
            recipe_id: self.recipe_id,
            germination_at: self.germination_at,
            stage_id: self.current_stage_id,
        }
    }

    /// Explicit batch when one is assigned, otherwise the implicit key
    pub fn batch_ref(&self) -> BatchRef {
        match self.crop_batch_id {
            Some(batch_id) => BatchRef::Explicit(batch_id),
            None => BatchRef::Implicit(self.batch_key()),
        }
    }

    /// Tray label used in logs and alerts
    pub fn tray_label(&self) -> String {
        self.tray_number
            .clone()
            .unwrap_or_else(|| format!("crop #{}", self.id))
    }
}
