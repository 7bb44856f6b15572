//! Crop creation.
//!
//! Plants new crops in their starting stage, schedules their tasks and deducts seed
//! stock once the rows are committed.

use super::seed_inventory::SeedInventory;
use crate::clock::Clock;
use crate::error::{CropCycleError, Result};
use crate::models::{Crop, Recipe, StageCode};
use crate::scheduling::TaskScheduler;
use crate::state_machine::{StageGraph, ValidationResult};
use crate::store::{CropStore, CropTransaction, NewCropRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// How follow-up work is batched when several crops are planted at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationMode {
    /// Deduct seed and schedule per crop
    Single,
    /// Deduct seed once for the set and schedule once per batch
    Bulk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCrop {
    pub recipe_id: i64,
    pub tray_number: Option<String>,
    pub crop_batch_id: Option<i64>,
    /// Defaults to now
    pub planted_at: Option<DateTime<Utc>>,
}

impl NewCrop {
    pub fn new(recipe_id: i64) -> Self {
        Self {
            recipe_id,
            tray_number: None,
            crop_batch_id: None,
            planted_at: None,
        }
    }

    pub fn with_tray(mut self, tray_number: impl Into<String>) -> Self {
        self.tray_number = Some(tray_number.into());
        self
    }

    pub fn in_batch(mut self, crop_batch_id: i64) -> Self {
        self.crop_batch_id = Some(crop_batch_id);
        self
    }

    pub fn planted_at(mut self, at: DateTime<Utc>) -> Self {
        self.planted_at = Some(at);
        self
    }
}

pub struct CropPlanting<S: CropStore> {
    store: Arc<S>,
    scheduler: Arc<TaskScheduler<S>>,
    inventory: Arc<dyn SeedInventory>,
    clock: Arc<dyn Clock>,
}

impl<S: CropStore> CropPlanting<S> {
    pub fn new(
        store: Arc<S>,
        scheduler: Arc<TaskScheduler<S>>,
        inventory: Arc<dyn SeedInventory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheduler,
            inventory,
            clock,
        }
    }

    /// Create crops, schedule them and deduct seed. Every row is validated before
    /// any insert; a rejected request creates nothing.
    #[instrument(skip(self, new_crops), fields(count = new_crops.len()))]
    pub async fn plant(&self, new_crops: Vec<NewCrop>, mode: CreationMode) -> Result<Vec<Crop>> {
        if new_crops.is_empty() {
            return Err(CropCycleError::validation("no crops to plant"));
        }
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let graph = StageGraph::new(tx.stages().await?);

        let mut recipes: HashMap<i64, Recipe> = HashMap::new();
        for new_crop in &new_crops {
            if recipes.contains_key(&new_crop.recipe_id) {
                continue;
            }
            let recipe = tx.find_recipe(new_crop.recipe_id).await?.ok_or_else(|| {
                CropCycleError::not_found(format!("recipe {}", new_crop.recipe_id))
            })?;
            recipes.insert(recipe.id, recipe);
        }

        let in_use = tx.tray_numbers_in_use(&[]).await?;
        validate_new_crops(&new_crops, &in_use, now).into_result()?;

        let soaking_id = graph.require(StageCode::Soaking)?.id;
        let germination_id = graph.require(StageCode::Germination)?.id;
        let mut created = Vec::with_capacity(new_crops.len());
        for new_crop in new_crops {
            let requires_soaking = recipes
                .get(&new_crop.recipe_id)
                .is_some_and(Recipe::requires_soaking);
            let planted_at = new_crop.planted_at.unwrap_or(now);
            let row = NewCropRow {
                recipe_id: new_crop.recipe_id,
                current_stage_id: if requires_soaking {
                    soaking_id
                } else {
                    germination_id
                },
                tray_number: new_crop.tray_number.map(|t| t.trim().to_string()),
                soaking_at: requires_soaking.then_some(planted_at),
                germination_at: (!requires_soaking).then_some(planted_at),
                requires_soaking,
                crop_batch_id: new_crop.crop_batch_id,
            };
            created.push(tx.insert_crop(row).await?);
        }

        match mode {
            CreationMode::Single => {
                for crop in &created {
                    self.scheduler
                        .reschedule_in(&mut tx, std::slice::from_ref(crop), &[], now)
                        .await?;
                }
            }
            CreationMode::Bulk => {
                self.scheduler
                    .reschedule_in(&mut tx, &created, &[], now)
                    .await?;
            }
        }
        tx.commit().await?;

        match mode {
            CreationMode::Single => {
                for crop in &created {
                    self.deduct_seed(std::slice::from_ref(crop)).await;
                }
            }
            CreationMode::Bulk => self.deduct_seed(&created).await,
        }

        info!(count = created.len(), mode = ?mode, "Crops planted");
        Ok(created)
    }

    async fn deduct_seed(&self, crops: &[Crop]) {
        if let Err(err) = self.inventory.deduct(crops).await {
            warn!(
                crops = crops.len(),
                error = %err,
                "Seed deduction failed; crops were planted"
            );
        }
    }
}

fn validate_new_crops(
    new_crops: &[NewCrop],
    in_use: &HashMap<String, i64>,
    now: DateTime<Utc>,
) -> ValidationResult {
    let mut result = ValidationResult::ok();
    let mut seen = HashMap::new();
    for (index, new_crop) in new_crops.iter().enumerate() {
        if new_crop.planted_at.is_some_and(|at| at > now) {
            result.error(format!("crop #{} is planted in the future", index + 1));
        }
        let Some(tray) = new_crop
            .tray_number
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        else {
            continue;
        };
        if let Some(first) = seen.insert(tray.to_string(), index) {
            result.error(format!(
                "tray {tray} is requested for crop #{} and crop #{}",
                first + 1,
                index + 1
            ));
        }
        if let Some(holder) = in_use.get(tray) {
            result.error(format!("tray {tray} is already in use by crop {holder}"));
        }
    }
    result
}
