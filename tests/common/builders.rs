//! Builders for recipes and crops.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use cropcycle_core::models::{Crop, Recipe, StageCode};
use cropcycle_core::InMemoryStore;

pub struct RecipeBuilder {
    recipe: Recipe,
}

impl RecipeBuilder {
    /// Recipe without soaking: 3 days germination, no blackout, 5 days light
    pub fn new(id: i64) -> Self {
        Self {
            recipe: Recipe {
                id,
                name: format!("Variety {id}"),
                seed_soak_hours: 0.0,
                germination_days: 3.0,
                blackout_days: 0.0,
                light_days: 5.0,
                suspend_water_hours: 0.0,
            },
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.recipe.name = name.to_string();
        self
    }

    pub fn soak_hours(mut self, hours: f64) -> Self {
        self.recipe.seed_soak_hours = hours;
        self
    }

    pub fn durations(mut self, germination: f64, blackout: f64, light: f64) -> Self {
        self.recipe.germination_days = germination;
        self.recipe.blackout_days = blackout;
        self.recipe.light_days = light;
        self
    }

    pub fn suspend_water_hours(mut self, hours: f64) -> Self {
        self.recipe.suspend_water_hours = hours;
        self
    }

    pub fn build(self) -> Recipe {
        self.recipe
    }

    pub async fn insert(self, store: &InMemoryStore) -> Recipe {
        let recipe = self.recipe;
        store.insert_recipe(recipe.clone()).await;
        recipe
    }
}

pub struct CropBuilder {
    crop: Crop,
}

impl CropBuilder {
    pub fn new(id: i64, recipe_id: i64) -> Self {
        Self {
            crop: Crop {
                id,
                recipe_id,
                current_stage_id: i64::from(StageCode::Germination.default_sort_order()),
                tray_number: None,
                soaking_at: None,
                germination_at: None,
                blackout_at: None,
                light_at: None,
                harvested_at: None,
                requires_soaking: false,
                watering_suspended_at: None,
                crop_batch_id: None,
            },
        }
    }

    /// Move to `stage` and stamp its timestamp
    pub fn at_stage(mut self, stage: StageCode, at: DateTime<Utc>) -> Self {
        self.crop.current_stage_id = i64::from(stage.default_sort_order());
        self.crop.set_stage_timestamp(stage, Some(at));
        self
    }

    /// Stamp a stage the crop already passed through
    pub fn stamped(mut self, stage: StageCode, at: DateTime<Utc>) -> Self {
        self.crop.set_stage_timestamp(stage, Some(at));
        self
    }

    pub fn soaking(mut self, at: DateTime<Utc>) -> Self {
        self.crop.requires_soaking = true;
        self.at_stage(StageCode::Soaking, at)
    }

    pub fn tray(mut self, tray: &str) -> Self {
        self.crop.tray_number = Some(tray.to_string());
        self
    }

    pub fn batch(mut self, batch_id: i64) -> Self {
        self.crop.crop_batch_id = Some(batch_id);
        self
    }

    pub fn build(self) -> Crop {
        self.crop
    }

    pub async fn insert(self, store: &InMemoryStore) -> Crop {
        let crop = self.crop;
        store.insert_crop(crop.clone()).await;
        crop
    }
}
