//! In-process store.
//!
//! A transaction holds the store mutex for its whole lifetime and works on a copy of
//! the state, so transactions are fully serialized and a dropped transaction leaves
//! no trace. Used by tests and by callers that embed the core without Postgres.

use super::traits::{CropStore, CropTransaction, NewCropRow, StoreError, StoreResult};
use crate::models::{
    BatchRef, Crop, CropTransitionEntry, NewScheduledTask, NewStageTransitionRecord, Recipe,
    ScheduledTask, Stage, StageCode, StageTransitionRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    stages: Vec<Stage>,
    recipes: HashMap<i64, Recipe>,
    crops: BTreeMap<i64, Crop>,
    harvests: HashMap<i64, i64>,
    tasks: BTreeMap<i64, ScheduledTask>,
    records: Vec<StageTransitionRecord>,
    entries: Vec<CropTransitionEntry>,
    next_crop_id: i64,
    next_task_id: i64,
    next_record_id: i64,
}

impl MemoryState {
    /// Mirrors the partial unique index on growing trays
    fn check_tray(
        &self,
        crop_id: i64,
        tray_number: Option<&str>,
        harvested: bool,
    ) -> StoreResult<()> {
        let (Some(tray), false) = (tray_number, harvested) else {
            return Ok(());
        };
        let taken = self.crops.values().any(|other| {
            other.id != crop_id
                && other.harvested_at.is_none()
                && other.tray_number.as_deref() == Some(tray)
        });
        if taken {
            return Err(StoreError::tray_conflict(tray));
        }
        Ok(())
    }

    fn harvested_stage_id(&self) -> Option<i64> {
        self.stages
            .iter()
            .find(|stage| stage.code == StageCode::Harvested)
            .map(|stage| stage.id)
    }
}

/// Store backed by process memory
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new(stages: Vec<Stage>) -> Self {
        let state = MemoryState {
            stages,
            next_crop_id: 1,
            next_task_id: 1,
            next_record_id: 1,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Store seeded with the default stage catalog
    pub fn with_default_stages() -> Self {
        Self::new(Stage::default_catalog())
    }

    pub async fn insert_recipe(&self, recipe: Recipe) {
        self.state.lock().await.recipes.insert(recipe.id, recipe);
    }

    /// Insert a crop as-is; its id is kept and the id sequence moves past it
    pub async fn insert_crop(&self, crop: Crop) {
        let mut state = self.state.lock().await;
        state.next_crop_id = state.next_crop_id.max(crop.id + 1);
        state.crops.insert(crop.id, crop);
    }

    pub async fn record_harvest(&self, crop_id: i64) {
        *self.state.lock().await.harvests.entry(crop_id).or_insert(0) += 1;
    }

    /// Insert a task directly, bypassing the scheduler
    pub async fn insert_task(&self, task: NewScheduledTask) -> ScheduledTask {
        let mut state = self.state.lock().await;
        let id = state.next_task_id;
        state.next_task_id += 1;
        let task = task.into_task(id);
        state.tasks.insert(id, task.clone());
        task
    }

    pub async fn crop(&self, crop_id: i64) -> Option<Crop> {
        self.state.lock().await.crops.get(&crop_id).cloned()
    }

    pub async fn crops(&self) -> Vec<Crop> {
        self.state.lock().await.crops.values().cloned().collect()
    }

    pub async fn tasks(&self) -> Vec<ScheduledTask> {
        self.state.lock().await.tasks.values().cloned().collect()
    }

    pub async fn active_tasks(&self) -> Vec<ScheduledTask> {
        self.state
            .lock()
            .await
            .tasks
            .values()
            .filter(|task| task.is_active)
            .cloned()
            .collect()
    }

    pub async fn transition_records(&self) -> Vec<StageTransitionRecord> {
        self.state.lock().await.records.clone()
    }

    pub async fn crop_entries(&self) -> Vec<CropTransitionEntry> {
        self.state.lock().await.entries.clone()
    }
}

#[async_trait]
impl CropStore for InMemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> StoreResult<MemoryTransaction> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(MemoryTransaction { guard, working })
    }
}

/// Transaction over [`InMemoryStore`]
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

fn in_batch(crop: &Crop, batch: &BatchRef) -> bool {
    match batch {
        BatchRef::Explicit(batch_id) => crop.crop_batch_id == Some(*batch_id),
        BatchRef::Implicit(key) => crop.crop_batch_id.is_none() && crop.batch_key() == *key,
    }
}

#[async_trait]
impl CropTransaction for MemoryTransaction {
    async fn stages(&mut self) -> StoreResult<Vec<Stage>> {
        let mut stages = self.working.stages.clone();
        stages.sort_by_key(|stage| stage.sort_order);
        Ok(stages)
    }

    async fn find_recipe(&mut self, recipe_id: i64) -> StoreResult<Option<Recipe>> {
        Ok(self.working.recipes.get(&recipe_id).cloned())
    }

    async fn find_crop(&mut self, crop_id: i64, _lock: bool) -> StoreResult<Option<Crop>> {
        Ok(self.working.crops.get(&crop_id).cloned())
    }

    async fn crops_in_batch(&mut self, batch: &BatchRef, _lock: bool) -> StoreResult<Vec<Crop>> {
        Ok(self
            .working
            .crops
            .values()
            .filter(|crop| in_batch(crop, batch))
            .cloned()
            .collect())
    }

    async fn insert_crop(&mut self, crop: NewCropRow) -> StoreResult<Crop> {
        let id = self.working.next_crop_id;
        self.working.check_tray(id, crop.tray_number.as_deref(), false)?;
        self.working.next_crop_id += 1;
        let crop = Crop {
            id,
            recipe_id: crop.recipe_id,
            current_stage_id: crop.current_stage_id,
            tray_number: crop.tray_number,
            soaking_at: crop.soaking_at,
            germination_at: crop.germination_at,
            blackout_at: None,
            light_at: None,
            harvested_at: None,
            requires_soaking: crop.requires_soaking,
            watering_suspended_at: None,
            crop_batch_id: crop.crop_batch_id,
        };
        self.working.crops.insert(id, crop.clone());
        Ok(crop)
    }

    async fn update_crop(&mut self, crop: &Crop) -> StoreResult<()> {
        self.working.check_tray(
            crop.id,
            crop.tray_number.as_deref(),
            crop.harvested_at.is_some(),
        )?;
        match self.working.crops.get_mut(&crop.id) {
            Some(existing) => {
                *existing = crop.clone();
                Ok(())
            }
            None => Err(StoreError::RowNotFound {
                entity: "crop",
                id: crop.id,
            }),
        }
    }

    async fn tray_numbers_in_use(&mut self, exclude: &[i64]) -> StoreResult<HashMap<String, i64>> {
        let harvested = self.working.harvested_stage_id();
        Ok(self
            .working
            .crops
            .values()
            .filter(|crop| !exclude.contains(&crop.id))
            .filter(|crop| Some(crop.current_stage_id) != harvested)
            .filter_map(|crop| crop.tray_number.clone().map(|tray| (tray, crop.id)))
            .collect())
    }

    async fn harvest_count(&mut self, crop_id: i64) -> StoreResult<i64> {
        Ok(self.working.harvests.get(&crop_id).copied().unwrap_or(0))
    }

    async fn insert_transition_record(
        &mut self,
        record: NewStageTransitionRecord,
    ) -> StoreResult<i64> {
        let id = self.working.next_record_id;
        self.working.next_record_id += 1;
        self.working.records.push(record.into_record(id));
        Ok(id)
    }

    async fn insert_crop_entry(&mut self, entry: &CropTransitionEntry) -> StoreResult<()> {
        self.working.entries.push(entry.clone());
        Ok(())
    }

    async fn active_tasks_for(
        &mut self,
        crop_ids: &[i64],
        batch_identifiers: &[String],
    ) -> StoreResult<Vec<ScheduledTask>> {
        Ok(self
            .working
            .tasks
            .values()
            .filter(|task| task.is_active)
            .filter(|task| task.conditions.references_any(crop_ids, batch_identifiers))
            .cloned()
            .collect())
    }

    async fn delete_active_tasks_for(
        &mut self,
        crop_ids: &[i64],
        batch_identifiers: &[String],
    ) -> StoreResult<u64> {
        let before = self.working.tasks.len();
        self.working.tasks.retain(|_, task| {
            !(task.is_active && task.conditions.references_any(crop_ids, batch_identifiers))
        });
        Ok((before - self.working.tasks.len()) as u64)
    }

    async fn insert_task(&mut self, task: NewScheduledTask) -> StoreResult<ScheduledTask> {
        let id = self.working.next_task_id;
        self.working.next_task_id += 1;
        let task = task.into_task(id);
        self.working.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn lock_task(&mut self, task_id: i64) -> StoreResult<Option<ScheduledTask>> {
        Ok(self.working.tasks.get(&task_id).cloned())
    }

    async fn deactivate_task(&mut self, task_id: i64, ran_at: DateTime<Utc>) -> StoreResult<()> {
        let task = self
            .working
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::RowNotFound {
                entity: "task",
                id: task_id,
            })?;
        task.is_active = false;
        task.last_run_at = Some(ran_at);
        Ok(())
    }

    async fn due_tasks(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ScheduledTask>> {
        let mut due: Vec<ScheduledTask> = self
            .working
            .tasks
            .values()
            .filter(|task| task.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|task| (task.due_at, task.id));
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn commit(self) -> StoreResult<()> {
        let MemoryTransaction { mut guard, working } = self;
        *guard = working;
        Ok(())
    }
}
