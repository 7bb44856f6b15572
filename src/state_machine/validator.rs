//! # Transition Validator
//!
//! Pure checks over crop state, recipe and stage graph. Nothing here touches the
//! store; callers gather the inputs (tray usage, harvest counts, due tasks) inside
//! their transaction and pass them in.

use super::stage_graph::StageGraph;
use crate::config::ValidationConfig;
use crate::error::{CropCycleError, Result};
use crate::models::recipe::duration_to_hours;
use crate::models::{Crop, Recipe, ScheduledTask, StageCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of a validation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Joined error messages for a crop left behind by a batch transition
    pub fn rejection(self) -> Option<String> {
        (!self.valid).then(|| self.errors.join("; "))
    }

    /// Warnings when valid, otherwise a `Validation` error carrying every message
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.valid {
            Ok(self.warnings)
        } else {
            Err(CropCycleError::Validation {
                errors: self.errors,
            })
        }
    }
}

/// Facts about a crop that only the store knows, needed to judge a revert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevertContext {
    pub harvest_records: i64,
    pub critical_tasks: usize,
}

/// Active advance tasks already due. Reverting under them would race the dispatcher.
pub fn count_critical_tasks(tasks: &[ScheduledTask], now: DateTime<Utc>) -> usize {
    tasks
        .iter()
        .filter(|task| task.task_name.is_advance() && task.is_due(now))
        .count()
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionValidator<'a> {
    graph: &'a StageGraph,
    config: &'a ValidationConfig,
}

impl<'a> TransitionValidator<'a> {
    pub fn new(graph: &'a StageGraph, config: &'a ValidationConfig) -> Self {
        Self { graph, config }
    }

    /// Single-hop advance of one crop to `target` at `when`
    pub fn can_advance(
        &self,
        crop: &Crop,
        recipe: &Recipe,
        target: StageCode,
        when: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let mut result = ValidationResult::ok();
        let current = match self.graph.current_stage(crop) {
            Ok(stage) => stage.code,
            Err(err) => {
                result.error(err.to_string());
                return result;
            }
        };

        if !self.graph.is_forward_legal(current, target) {
            result.error(format!("cannot advance from {current} to {target}"));
        }
        self.check_required_fields(crop, current, &mut result);
        self.check_duration(crop, recipe, current, when, &mut result);
        self.check_chronology(crop, target, when, &mut result);
        check_recipe_rule(recipe, current, target, &mut result);
        check_not_future(when, now, &mut result);

        if crop.watering_suspended_at.is_some() {
            result.warn(format!("watering is suspended for {}", crop.tray_label()));
        }
        result
    }

    /// Multi-hop advance along `path` (excluding the current stage). Hop durations are
    /// not re-checked; the scheduler already timed them.
    pub fn can_fast_forward(
        &self,
        crop: &Crop,
        recipe: &Recipe,
        path: &[StageCode],
        when: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let mut result = ValidationResult::ok();
        let current = match self.graph.current_stage(crop) {
            Ok(stage) => stage.code,
            Err(err) => {
                result.error(err.to_string());
                return result;
            }
        };
        let Some(&target) = path.last() else {
            result.error(format!("no stage to advance to from {current}"));
            return result;
        };

        let mut from = current;
        for &hop in path {
            if !self.graph.is_forward_legal(from, hop) {
                result.error(format!("cannot advance from {from} to {hop}"));
            }
            check_recipe_rule(recipe, from, hop, &mut result);
            from = hop;
        }
        self.check_required_fields(crop, current, &mut result);
        self.check_chronology(crop, target, when, &mut result);
        check_not_future(when, now, &mut result);
        result
    }

    /// Reversion of one crop to `target`
    pub fn can_revert(
        &self,
        crop: &Crop,
        target: StageCode,
        context: &RevertContext,
    ) -> ValidationResult {
        let mut result = ValidationResult::ok();
        let current = match self.graph.current_stage(crop) {
            Ok(stage) => stage.code,
            Err(err) => {
                result.error(err.to_string());
                return result;
            }
        };

        if !self.graph.is_backward_legal(current, target) {
            result.error(format!("cannot revert from {current} to {target}"));
        }
        if current == StageCode::Harvested && context.harvest_records > 0 {
            result.error("cannot revert crops with harvest records");
        }
        if context.critical_tasks > 0 {
            result.error(format!(
                "{} scheduled transition(s) are already due for {}",
                context.critical_tasks,
                crop.tray_label()
            ));
        }
        result
    }

    /// Every member of a batch must share stage and recipe
    pub fn validate_batch_consistency(&self, crops: &[Crop]) -> ValidationResult {
        let mut result = ValidationResult::ok();
        let Some(first) = crops.first() else {
            return result;
        };
        let stage_mismatch = crops
            .iter()
            .filter(|c| c.current_stage_id != first.current_stage_id)
            .count();
        let recipe_mismatch = crops
            .iter()
            .filter(|c| c.recipe_id != first.recipe_id)
            .count();
        if stage_mismatch > 0 {
            result.error(format!(
                "stage_mismatch: {stage_mismatch} crop(s) are not at the batch stage"
            ));
        }
        if recipe_mismatch > 0 {
            result.error(format!(
                "recipe_mismatch: {recipe_mismatch} crop(s) use a different recipe"
            ));
        }
        result
    }

    /// Tray numbers for crops leaving soaking. Each crop takes its assigned number,
    /// falling back to the one it already has. `in_use` maps tray numbers held by
    /// non-harvested crops outside the batch to the holding crop.
    pub fn validate_tray_assignment(
        &self,
        crops: &[Crop],
        assignments: &HashMap<i64, String>,
        in_use: &HashMap<String, i64>,
    ) -> ValidationResult {
        let mut result = ValidationResult::ok();
        let mut seen: HashMap<String, i64> = HashMap::new();

        for crop in crops {
            let number = assignments
                .get(&crop.id)
                .or(crop.tray_number.as_ref())
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty());
            let Some(number) = number else {
                result.error(format!("crop {} has no tray number assigned", crop.id));
                continue;
            };
            if let Some(other) = seen.get(&number) {
                result.error(format!(
                    "tray {number} is assigned to both crop {other} and crop {}",
                    crop.id
                ));
                continue;
            }
            if let Some(holder) = in_use.get(&number).filter(|holder| **holder != crop.id) {
                result.error(format!(
                    "tray {number} for crop {} is already in use by crop {holder}",
                    crop.id
                ));
            }
            seen.insert(number, crop.id);
        }
        result
    }

    fn check_required_fields(&self, crop: &Crop, current: StageCode, result: &mut ValidationResult) {
        let missing: Vec<&str> = current
            .required_timestamps()
            .iter()
            .filter(|code| crop.stage_timestamp(**code).is_none())
            .map(|code| code.timestamp_field())
            .collect();
        if !missing.is_empty() {
            result.error(format!("missing required fields: {}", missing.join(", ")));
        }
    }

    fn check_duration(
        &self,
        crop: &Crop,
        recipe: &Recipe,
        current: StageCode,
        when: DateTime<Utc>,
        result: &mut ValidationResult,
    ) {
        let expected = self.graph.expected_duration_hours(current, recipe);
        if expected <= 0.0 {
            return;
        }
        let Some(entered) = crop.stage_timestamp(current) else {
            return;
        };
        let elapsed = duration_to_hours(when - entered);
        if elapsed < expected * self.config.minimum_duration_ratio {
            result.error(format!(
                "minimum duration not met: {current} needs at least {:.1}h of {expected:.1}h, {elapsed:.1}h elapsed",
                expected * self.config.minimum_duration_ratio
            ));
        } else if elapsed < expected * self.config.early_warning_ratio {
            result.warn(format!(
                "{current} ended early: {elapsed:.1}h of {expected:.1}h expected"
            ));
        }
    }

    fn check_chronology(
        &self,
        crop: &Crop,
        target: StageCode,
        when: DateTime<Utc>,
        result: &mut ValidationResult,
    ) {
        let Some(target_order) = self.graph.sort_order(target) else {
            return;
        };
        for (code, stamped) in crop.populated_timestamps() {
            let Some(order) = self.graph.sort_order(code) else {
                continue;
            };
            if order < target_order && when < stamped {
                result.error(format!(
                    "transition time {when} is before {} ({stamped})",
                    code.timestamp_field()
                ));
            } else if order > target_order && when > stamped {
                result.error(format!(
                    "transition time {when} is after {} ({stamped})",
                    code.timestamp_field()
                ));
            }
        }
    }
}

fn check_recipe_rule(recipe: &Recipe, from: StageCode, to: StageCode, result: &mut ValidationResult) {
    if to == StageCode::Blackout && recipe.skips_blackout() {
        result.error(format!("recipe '{}' has no blackout period", recipe.name));
    }
    if from == StageCode::Germination && to == StageCode::Light && !recipe.skips_blackout() {
        result.error(format!(
            "recipe '{}' requires blackout before light",
            recipe.name
        ));
    }
}

fn check_not_future(when: DateTime<Utc>, now: DateTime<Utc>, result: &mut ValidationResult) {
    if when > now {
        result.error(format!("transition time {when} is in the future"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewScheduledTask, TaskConditions, TaskName};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap()
    }

    fn recipe(blackout_days: f64) -> Recipe {
        Recipe {
            id: 1,
            name: "Radish".to_string(),
            seed_soak_hours: 0.0,
            germination_days: 3.0,
            blackout_days,
            light_days: 5.0,
            suspend_water_hours: 0.0,
        }
    }

    fn germinating_crop() -> Crop {
        Crop {
            id: 1,
            recipe_id: 1,
            current_stage_id: 2,
            tray_number: Some("1".to_string()),
            soaking_at: None,
            germination_at: Some(t0()),
            blackout_at: None,
            light_at: None,
            harvested_at: None,
            requires_soaking: false,
            watering_suspended_at: None,
            crop_batch_id: None,
        }
    }

    fn check<F: FnOnce(TransitionValidator<'_>) -> ValidationResult>(f: F) -> ValidationResult {
        let graph = StageGraph::standard();
        let config = ValidationConfig::default();
        f(TransitionValidator::new(&graph, &config))
    }

    #[test]
    fn test_full_duration_is_accepted() {
        let when = t0() + Duration::days(3);
        let result =
            check(|v| v.can_advance(&germinating_crop(), &recipe(0.0), StageCode::Light, when, when));
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_short_duration_is_rejected() {
        let when = t0() + Duration::days(2);
        let result =
            check(|v| v.can_advance(&germinating_crop(), &recipe(0.0), StageCode::Light, when, when));
        assert!(!result.valid);
        assert!(result.errors[0].starts_with("minimum duration not met"));
    }

    #[test]
    fn test_recipe_forbids_skipping_blackout() {
        let when = t0() + Duration::days(3);
        let result =
            check(|v| v.can_advance(&germinating_crop(), &recipe(2.0), StageCode::Light, when, when));
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("requires blackout before light")));

        let result = check(|v| {
            v.can_advance(&germinating_crop(), &recipe(0.0), StageCode::Blackout, when, when)
        });
        assert!(result.errors.iter().any(|e| e.contains("no blackout period")));
    }

    #[test]
    fn test_future_and_backdated_times_are_rejected() {
        let when = t0() + Duration::days(3);
        let result = check(|v| {
            v.can_advance(
                &germinating_crop(),
                &recipe(0.0),
                StageCode::Light,
                when,
                when - Duration::hours(1),
            )
        });
        assert!(result.errors.iter().any(|e| e.contains("in the future")));

        let backdated = t0() - Duration::hours(1);
        let result = check(|v| {
            v.can_advance(&germinating_crop(), &recipe(0.0), StageCode::Light, backdated, when)
        });
        assert!(result.errors.iter().any(|e| e.contains("is before germination_at")));
    }

    #[test]
    fn test_missing_required_fields() {
        let mut crop = germinating_crop();
        crop.germination_at = None;
        let when = t0();
        let result = check(|v| v.can_advance(&crop, &recipe(0.0), StageCode::Light, when, when));
        assert!(result
            .errors
            .contains(&"missing required fields: germination_at".to_string()));
    }

    #[test]
    fn test_early_advance_warns() {
        let config = ValidationConfig {
            minimum_duration_ratio: 0.5,
            early_warning_ratio: 0.75,
        };
        let graph = StageGraph::standard();
        let validator = TransitionValidator::new(&graph, &config);
        let mut crop = germinating_crop();
        crop.watering_suspended_at = Some(t0());
        let when = t0() + Duration::days(2);
        let result = validator.can_advance(&crop, &recipe(0.0), StageCode::Light, when, when);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[0].starts_with("germination ended early"));
    }

    #[test]
    fn test_fast_forward_skips_duration_checks() {
        let when = t0() + Duration::hours(1);
        let result = check(|v| {
            v.can_fast_forward(
                &germinating_crop(),
                &recipe(0.0),
                &[StageCode::Light, StageCode::Harvested],
                when,
                when,
            )
        });
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn test_revert_rules() {
        let mut crop = germinating_crop();
        crop.current_stage_id = 5;
        crop.light_at = Some(t0() + Duration::days(3));
        crop.harvested_at = Some(t0() + Duration::days(8));

        let harvested = RevertContext {
            harvest_records: 1,
            critical_tasks: 0,
        };
        let result = check(|v| v.can_revert(&crop, StageCode::Light, &harvested));
        assert!(result
            .errors
            .contains(&"cannot revert crops with harvest records".to_string()));

        assert_eq!(
            result.rejection().as_deref(),
            Some("cannot revert crops with harvest records")
        );

        let result = check(|v| v.can_revert(&crop, StageCode::Light, &RevertContext::default()));
        assert!(result.valid);
        assert_eq!(result.rejection(), None);

        let result =
            check(|v| v.can_revert(&crop, StageCode::Germination, &RevertContext::default()));
        assert!(!result.valid);
    }

    #[test]
    fn test_critical_tasks() {
        let conditions = TaskConditions {
            crop_id: 1,
            crop_ids: vec![1],
            batch: None,
            batch_identifier: "implicit:1:none:2".to_string(),
            target_stage: Some(StageCode::Light),
            tray_numbers: vec![],
            variety: "Radish".to_string(),
        };
        let due = NewScheduledTask::new(TaskName::AdvanceToLight, conditions.clone(), t0())
            .into_task(1);
        let later = NewScheduledTask::new(
            TaskName::AdvanceToHarvested,
            conditions.clone(),
            t0() + Duration::days(1),
        )
        .into_task(2);
        let warning =
            NewScheduledTask::new(TaskName::SuspendWatering, conditions, t0()).into_task(3);
        assert_eq!(count_critical_tasks(&[due, later, warning], t0()), 1);
    }

    #[test]
    fn test_batch_consistency_counts() {
        let first = germinating_crop();
        let mut second = germinating_crop();
        second.id = 2;
        second.current_stage_id = 4;
        let mut third = germinating_crop();
        third.id = 3;
        third.recipe_id = 9;
        let result = check(|v| v.validate_batch_consistency(&[first, second, third]));
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].starts_with("stage_mismatch: 1"));
        assert!(result.errors[1].starts_with("recipe_mismatch: 1"));
    }

    #[test]
    fn test_tray_assignment_conflicts() {
        let crops: Vec<Crop> = (1..=3)
            .map(|id| Crop {
                id,
                tray_number: None,
                ..germinating_crop()
            })
            .collect();
        let assignments: HashMap<i64, String> = [(1, "5"), (2, "6"), (3, "7")]
            .into_iter()
            .map(|(id, n)| (id, n.to_string()))
            .collect();
        let in_use: HashMap<String, i64> = [("6".to_string(), 42)].into_iter().collect();

        let result = check(|v| v.validate_tray_assignment(&crops, &assignments, &in_use));
        assert!(!result.valid);
        assert_eq!(
            result.errors,
            vec!["tray 6 for crop 2 is already in use by crop 42".to_string()]
        );

        let mut duplicated = assignments.clone();
        duplicated.insert(3, "5".to_string());
        duplicated.remove(&2);
        let result = check(|v| v.validate_tray_assignment(&crops, &duplicated, &HashMap::new()));
        assert_eq!(result.errors.len(), 2);
    }
}
