//! # Stage Graph
//!
//! Ordered stage catalog plus the fixed adjacency table that decides which
//! transitions are legal. Ordering comes from `sort_order` among active stages;
//! legality comes from [`StageCode::forward_targets`] and
//! [`StageCode::backward_targets`], so germination may jump straight to light and
//! light may fall back to germination when blackout never happened.

use crate::error::{CropCycleError, Result};
use crate::models::{Crop, Recipe, Stage, StageCode};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct StageGraph {
    /// Active stages in sort order
    active: Vec<Stage>,
    by_id: HashMap<i64, Stage>,
    by_code: HashMap<StageCode, Stage>,
}

impl StageGraph {
    pub fn new(mut stages: Vec<Stage>) -> Self {
        stages.sort_by_key(|stage| stage.sort_order);
        let by_id = stages.iter().map(|s| (s.id, s.clone())).collect();
        let by_code = stages.iter().map(|s| (s.code, s.clone())).collect();
        let active = stages.into_iter().filter(|s| s.is_active).collect();
        Self {
            active,
            by_id,
            by_code,
        }
    }

    /// Graph over the default catalog
    pub fn standard() -> Self {
        Self::new(Stage::default_catalog())
    }

    pub fn stage(&self, code: StageCode) -> Option<&Stage> {
        self.by_code.get(&code)
    }

    pub fn stage_by_id(&self, id: i64) -> Option<&Stage> {
        self.by_id.get(&id)
    }

    /// Stage for a code, or `NotFound` when the catalog lacks it
    pub fn require(&self, code: StageCode) -> Result<&Stage> {
        self.stage(code)
            .ok_or_else(|| CropCycleError::not_found(format!("stage '{code}' is not in the catalog")))
    }

    /// Current stage of a crop, or `NotFound` for an unknown stage id
    pub fn current_stage(&self, crop: &Crop) -> Result<&Stage> {
        self.stage_by_id(crop.current_stage_id).ok_or_else(|| {
            CropCycleError::not_found(format!(
                "crop {} references unknown stage id {}",
                crop.id, crop.current_stage_id
            ))
        })
    }

    pub fn is_active(&self, code: StageCode) -> bool {
        self.stage(code).is_some_and(|s| s.is_active)
    }

    pub fn sort_order(&self, code: StageCode) -> Option<i32> {
        self.stage(code).map(|s| s.sort_order)
    }

    /// Next active stage by sort order
    pub fn next_stage(&self, code: StageCode) -> Option<&Stage> {
        let order = self.sort_order(code)?;
        self.active.iter().find(|s| s.sort_order > order)
    }

    /// Previous active stage by sort order
    pub fn previous_stage(&self, code: StageCode) -> Option<&Stage> {
        let order = self.sort_order(code)?;
        self.active.iter().rev().find(|s| s.sort_order < order)
    }

    /// Next stage for a crop following this recipe; blackout is skipped when the
    /// recipe has no blackout period
    pub fn next_stage_for(&self, code: StageCode, recipe: &Recipe) -> Option<&Stage> {
        let mut next = self.next_stage(code)?;
        if next.code == StageCode::Blackout && recipe.skips_blackout() {
            next = self.next_stage(StageCode::Blackout)?;
        }
        Some(next)
    }

    /// Revert target for a crop. A missing blackout timestamp is the only signal that
    /// light should fall back to germination; germination reverts to soaking only for
    /// crops that soak.
    pub fn previous_stage_for(&self, crop: &Crop, code: StageCode) -> Option<&Stage> {
        let previous = match code {
            StageCode::Soaking => return None,
            StageCode::Germination if !crop.requires_soaking => return None,
            StageCode::Light if crop.blackout_at.is_none() => self.stage(StageCode::Germination),
            _ => self.previous_stage(code),
        }?;
        previous.is_active.then_some(previous)
    }

    pub fn is_forward_legal(&self, from: StageCode, to: StageCode) -> bool {
        from.forward_targets().contains(&to) && self.is_active(from) && self.is_active(to)
    }

    pub fn is_backward_legal(&self, from: StageCode, to: StageCode) -> bool {
        from.backward_targets().contains(&to) && self.is_active(from) && self.is_active(to)
    }

    /// Hops of a multi-stage advance, excluding `from` and including `to`.
    /// `None` when `to` is not reachable by legal forward hops for this recipe.
    pub fn path_between(
        &self,
        from: StageCode,
        to: StageCode,
        recipe: &Recipe,
    ) -> Option<Vec<StageCode>> {
        let mut path = Vec::new();
        let mut current = from;
        while current != to {
            let next = self.next_stage_for(current, recipe)?.code;
            if !self.is_forward_legal(current, next) {
                return None;
            }
            path.push(next);
            current = next;
        }
        (!path.is_empty()).then_some(path)
    }

    /// Expected time in a stage for a recipe; zero for inactive stages
    pub fn expected_duration_hours(&self, code: StageCode, recipe: &Recipe) -> f64 {
        if self.is_active(code) {
            recipe.stage_duration_hours(code)
        } else {
            0.0
        }
    }

    /// Stages strictly after `code` in sort order, active or not
    pub fn stages_after(&self, code: StageCode) -> Vec<StageCode> {
        let Some(order) = self.sort_order(code) else {
            return Vec::new();
        };
        let mut after: Vec<&Stage> = self.by_code.values().filter(|s| s.sort_order > order).collect();
        after.sort_by_key(|s| s.sort_order);
        after.into_iter().map(|s| s.code).collect()
    }
}
