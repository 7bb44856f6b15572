//! # Task Scheduler
//!
//! Turns recipe timing into one-shot tasks. Every call purges the active tasks of the
//! affected crops and batches and rebuilds them from the batch anchor, so the task
//! table always reflects the current stage of each batch.

use super::memory_guard::MemoryGuard;
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::models::recipe::hours_to_duration;
use crate::models::{
    BatchRef, Crop, NewScheduledTask, Recipe, StageCode, TaskConditions, TaskName,
    TransitionTarget,
};
use crate::state_machine::{BatchResolver, StageGraph};
use crate::store::{CropStore, CropTransaction};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Due times of every stage a crop enters, computed from its anchor timestamp
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageSchedule {
    anchor: Option<DateTime<Utc>>,
    entries: Vec<(StageCode, DateTime<Utc>)>,
}

impl StageSchedule {
    /// Chain for a crop: germination after soaking (when the crop soaks), blackout
    /// after germination unless the recipe skips it, then light and harvest. Empty when
    /// the crop has no anchor or the recipe durations overflow the calendar.
    pub fn for_crop(crop: &Crop, recipe: &Recipe) -> Self {
        let Some(anchor) = crop.anchor_timestamp() else {
            return Self::default();
        };
        match chain_from(anchor, crop.requires_soaking, recipe) {
            Some(entries) => Self {
                anchor: Some(anchor),
                entries,
            },
            None => {
                warn!(
                    crop_id = crop.id,
                    recipe_id = recipe.id,
                    "Recipe durations are out of range; crop left unscheduled"
                );
                Self::default()
            }
        }
    }

    pub fn anchor(&self) -> Option<DateTime<Utc>> {
        self.anchor
    }

    pub fn due_at(&self, stage: StageCode) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .find(|(code, _)| *code == stage)
            .map(|(_, at)| *at)
    }

    pub fn entries(&self) -> &[(StageCode, DateTime<Utc>)] {
        &self.entries
    }
}

fn chain_from(
    anchor: DateTime<Utc>,
    requires_soaking: bool,
    recipe: &Recipe,
) -> Option<Vec<(StageCode, DateTime<Utc>)>> {
    let after = |start: DateTime<Utc>, stage: StageCode| {
        recipe
            .stage_duration(stage)
            .and_then(|duration| start.checked_add_signed(duration))
    };

    let mut entries = Vec::with_capacity(4);
    let germination = if requires_soaking {
        let at = after(anchor, StageCode::Soaking)?;
        entries.push((StageCode::Germination, at));
        at
    } else {
        anchor
    };

    let germination_end = after(germination, StageCode::Germination)?;
    let light = if recipe.skips_blackout() {
        germination_end
    } else {
        entries.push((StageCode::Blackout, germination_end));
        after(germination_end, StageCode::Blackout)?
    };
    entries.push((StageCode::Light, light));
    entries.push((StageCode::Harvested, after(light, StageCode::Light)?));
    Some(entries)
}

/// Tasks for one batch, given its members (anchor first) and the reference time.
/// Only transitions due strictly after `reference` are produced.
pub fn plan_batch_tasks(
    graph: &StageGraph,
    members: &[Crop],
    batch: &BatchRef,
    recipe: &Recipe,
    reference: DateTime<Utc>,
    soak_warning_hour: u32,
) -> Vec<NewScheduledTask> {
    let Some(anchor_crop) = members.first() else {
        return Vec::new();
    };
    let Ok(current) = graph.current_stage(anchor_crop) else {
        return Vec::new();
    };
    let schedule = StageSchedule::for_crop(anchor_crop, recipe);
    let Some(anchor) = schedule.anchor() else {
        return Vec::new();
    };

    let conditions = |target_stage: Option<StageCode>| TaskConditions {
        crop_id: anchor_crop.id,
        crop_ids: members.iter().map(|c| c.id).collect(),
        batch: batch.is_explicit().then_some(*batch),
        batch_identifier: batch.identifier(),
        target_stage,
        tray_numbers: members.iter().filter_map(|c| c.tray_number.clone()).collect(),
        variety: recipe.name.clone(),
    };

    let mut tasks = Vec::new();
    for &(stage, due_at) in schedule.entries() {
        let ahead = graph
            .sort_order(stage)
            .is_some_and(|order| order > current.sort_order);
        if !ahead || !graph.is_active(stage) || due_at <= reference {
            continue;
        }
        if let Some(name) = TaskName::advance_to(stage) {
            tasks.push(NewScheduledTask::new(name, conditions(Some(stage)), due_at));
        }
    }

    if current.code == StageCode::Soaking {
        if let Some(soak_done) = schedule
            .due_at(StageCode::Germination)
            .filter(|done| *done > reference)
        {
            let warn_at = soak_done
                .date_naive()
                .and_hms_opt(soak_warning_hour, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive))
                .unwrap_or(soak_done)
                .min(soak_done)
                .max(reference);
            tasks.push(NewScheduledTask::new(
                TaskName::SoakingCompletionWarning,
                conditions(Some(StageCode::Soaking)),
                warn_at,
            ));
        }
    }

    if recipe.suspend_water_hours > 0.0
        && current.code != StageCode::Harvested
        && anchor_crop.watering_suspended_at.is_none()
    {
        let suspend_at = schedule.due_at(StageCode::Harvested).and_then(|harvest| {
            hours_to_duration(recipe.suspend_water_hours)
                .and_then(|lead| harvest.checked_sub_signed(lead))
        });
        if let Some(suspend_at) = suspend_at {
            if suspend_at > anchor && suspend_at > reference {
                tasks.push(NewScheduledTask::new(
                    TaskName::SuspendWatering,
                    conditions(None),
                    suspend_at,
                ));
            }
        }
    }

    tasks
}

/// Creates and purges tasks for batches
pub struct TaskScheduler<S: CropStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    memory_guard: MemoryGuard,
}

impl<S: CropStore> TaskScheduler<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        let memory_guard = MemoryGuard::new(config.memory_ceiling_mb);
        Self {
            store,
            clock,
            config,
            memory_guard,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Rebuild the schedule of the batch containing `crop_id` in its own transaction
    #[instrument(skip(self))]
    pub async fn schedule_all(&self, crop_id: i64) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let resolved = BatchResolver::resolve(&mut tx, TransitionTarget::Crop(crop_id)).await?;
        let created = self
            .reschedule_in(&mut tx, &resolved.crops, &[], self.clock.now())
            .await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Purge every active task referencing `crops`, their current batches, or
    /// `previous_batches`, then regenerate tasks for each batch the crops now belong
    /// to. Runs inside the caller's transaction. Returns the number of tasks created.
    #[instrument(skip(self, tx, crops, previous_batches), fields(crops = crops.len()))]
    pub async fn reschedule_in<T: CropTransaction>(
        &self,
        tx: &mut T,
        crops: &[Crop],
        previous_batches: &[String],
        reference: DateTime<Utc>,
    ) -> Result<usize> {
        let crop_ids: Vec<i64> = crops.iter().map(|c| c.id).collect();
        let mut batches: Vec<BatchRef> = Vec::new();
        for crop in crops {
            let batch = crop.batch_ref();
            if !batches.contains(&batch) {
                batches.push(batch);
            }
        }
        let mut identifiers: Vec<String> = previous_batches.to_vec();
        for batch in &batches {
            let identifier = batch.identifier();
            if !identifiers.contains(&identifier) {
                identifiers.push(identifier);
            }
        }

        let purged = tx.delete_active_tasks_for(&crop_ids, &identifiers).await?;
        debug!(purged, batches = batches.len(), "Purged active tasks");

        if self.memory_guard.is_over_ceiling() {
            warn!(
                batches = batches.len(),
                "Skipping task generation while over the memory ceiling"
            );
            return Ok(0);
        }

        let graph = StageGraph::new(tx.stages().await?);
        let mut created = 0;
        for batch in batches {
            let members = tx.crops_in_batch(&batch, false).await?;
            let Some(anchor) = members.first() else {
                continue;
            };
            let Some(recipe) = tx.find_recipe(anchor.recipe_id).await? else {
                warn!(batch = %batch, recipe_id = anchor.recipe_id, "Recipe missing, batch not scheduled");
                continue;
            };
            let tasks = plan_batch_tasks(
                &graph,
                &members,
                &batch,
                &recipe,
                reference,
                self.config.soak_warning_hour,
            );
            for task in tasks {
                debug!(
                    batch = %batch,
                    task_name = %task.task_name,
                    due_at = %task.due_at,
                    "Scheduling task"
                );
                tx.insert_task(task).await?;
                created += 1;
            }
        }
        Ok(created)
    }
}
