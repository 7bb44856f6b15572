use crate::models::{
    BatchRef, Crop, CropTransitionEntry, NewScheduledTask, NewStageTransitionRecord, Recipe,
    ScheduledTask, Stage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by storage backends
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Row not found: {entity} {id}")]
    RowNotFound { entity: &'static str, id: i64 },

    #[error("Constraint violation on {constraint}: {detail}")]
    Conflict { constraint: String, detail: String },

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Unique index allowing one non-harvested crop per tray number
pub const ACTIVE_TRAY_INDEX: &str = "uq_crops_active_tray";

impl StoreError {
    pub fn tray_conflict(tray_number: &str) -> Self {
        Self::Conflict {
            constraint: ACTIVE_TRAY_INDEX.to_string(),
            detail: format!("tray {tray_number} is already in use by another growing crop"),
        }
    }

    pub fn is_tray_conflict(&self) -> bool {
        matches!(self, Self::Conflict { constraint, .. } if constraint == ACTIVE_TRAY_INDEX)
    }
}

/// Crop row before insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewCropRow {
    pub recipe_id: i64,
    pub current_stage_id: i64,
    pub tray_number: Option<String>,
    pub soaking_at: Option<DateTime<Utc>>,
    pub germination_at: Option<DateTime<Utc>>,
    pub requires_soaking: bool,
    pub crop_batch_id: Option<i64>,
}

/// Relational storage providing transactions and row locking
#[async_trait]
pub trait CropStore: Send + Sync + 'static {
    type Tx: CropTransaction;

    /// Open a transaction. Dropping it without `commit` rolls back.
    async fn begin(&self) -> StoreResult<Self::Tx>;
}

/// Operations available inside one store transaction
///
/// Methods taking `lock: bool` acquire pessimistic row locks held until commit or
/// rollback when `lock` is set.
#[async_trait]
pub trait CropTransaction: Send + Sized {
    /// Stage catalog, ordered by sort order
    async fn stages(&mut self) -> StoreResult<Vec<Stage>>;

    async fn find_recipe(&mut self, recipe_id: i64) -> StoreResult<Option<Recipe>>;

    async fn find_crop(&mut self, crop_id: i64, lock: bool) -> StoreResult<Option<Crop>>;

    /// Members of a batch ordered by id. Implicit batches exclude crops that carry
    /// an explicit batch id.
    async fn crops_in_batch(&mut self, batch: &BatchRef, lock: bool) -> StoreResult<Vec<Crop>>;

    async fn insert_crop(&mut self, crop: NewCropRow) -> StoreResult<Crop>;

    async fn update_crop(&mut self, crop: &Crop) -> StoreResult<()>;

    /// Tray numbers held by non-harvested crops, keyed by tray number, excluding
    /// the given crop ids
    async fn tray_numbers_in_use(&mut self, exclude: &[i64]) -> StoreResult<HashMap<String, i64>>;

    /// Number of harvest records written for a crop
    async fn harvest_count(&mut self, crop_id: i64) -> StoreResult<i64>;

    async fn insert_transition_record(
        &mut self,
        record: NewStageTransitionRecord,
    ) -> StoreResult<i64>;

    async fn insert_crop_entry(&mut self, entry: &CropTransitionEntry) -> StoreResult<()>;

    /// Active tasks whose conditions reference any of the crops or batch identifiers
    async fn active_tasks_for(
        &mut self,
        crop_ids: &[i64],
        batch_identifiers: &[String],
    ) -> StoreResult<Vec<ScheduledTask>>;

    /// Delete active tasks referencing any of the crops or batch identifiers
    async fn delete_active_tasks_for(
        &mut self,
        crop_ids: &[i64],
        batch_identifiers: &[String],
    ) -> StoreResult<u64>;

    async fn insert_task(&mut self, task: NewScheduledTask) -> StoreResult<ScheduledTask>;

    /// Read a task and lock its row
    async fn lock_task(&mut self, task_id: i64) -> StoreResult<Option<ScheduledTask>>;

    async fn deactivate_task(&mut self, task_id: i64, ran_at: DateTime<Utc>) -> StoreResult<()>;

    /// Active tasks due at or before `now`, oldest first
    async fn due_tasks(&mut self, now: DateTime<Utc>, limit: i64)
        -> StoreResult<Vec<ScheduledTask>>;

    async fn commit(self) -> StoreResult<()>;
}
