//! # Transition Executor
//!
//! The single entry point that mutates crop stages. Each call runs in one store
//! transaction: resolve and lock the batch, validate everything, then write crops,
//! audit history and the regenerated schedule before committing.

use super::batch_resolver::{BatchResolver, ResolvedBatch};
use super::stage_graph::StageGraph;
use super::validator::{count_critical_tasks, RevertContext, TransitionValidator};
use crate::clock::Clock;
use crate::config::ValidationConfig;
use crate::error::{CropCycleError, Result};
use crate::logging::log_transition_operation;
use crate::models::{
    Crop, CropTransitionEntry, FailedCrop, NewStageTransitionRecord, Recipe, StageCode,
    TransitionKind, TransitionOrigin, TransitionTarget,
};
use crate::scheduling::{StageSchedule, TaskScheduler};
use crate::store::{CropStore, CropTransaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct AdvanceOptions {
    /// Tray number per crop id, applied when crops leave soaking
    pub tray_numbers: HashMap<i64, String>,
    pub actor: Option<String>,
    /// Explicit destination; defaults to the recipe-aware next stage
    pub target_stage: Option<StageCode>,
    /// Pass through intermediate stages, stamping their scheduled times
    pub fast_forward: bool,
    pub origin: TransitionOrigin,
}

impl Default for AdvanceOptions {
    fn default() -> Self {
        Self {
            tray_numbers: HashMap::new(),
            actor: None,
            target_stage: None,
            fast_forward: false,
            origin: TransitionOrigin::Manual,
        }
    }
}

impl AdvanceOptions {
    pub fn with_tray_numbers<I, K>(mut self, trays: I) -> Self
    where
        I: IntoIterator<Item = (i64, K)>,
        K: Into<String>,
    {
        self.tray_numbers = trays.into_iter().map(|(id, n)| (id, n.into())).collect();
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Options used by the dispatcher to replay a scheduled advance
    pub fn scheduled(target: StageCode, actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            target_stage: Some(target),
            fast_forward: true,
            origin: TransitionOrigin::Scheduled,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevertOptions {
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropStatus {
    Advanced,
    Reverted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropOutcome {
    pub id: i64,
    pub tray_number: Option<String>,
    pub status: CropStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one executed transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionResult {
    pub kind: TransitionKind,
    pub from_stage: StageCode,
    pub to_stage: StageCode,
    pub succeeded: usize,
    pub failed: usize,
    pub warnings: Vec<String>,
    pub crops: Vec<CropOutcome>,
    pub record_id: i64,
}

/// Per-crop change computed before any write
struct CropChange {
    original: Crop,
    outcome: std::result::Result<Crop, String>,
}

/// Everything needed to persist one validated transition
struct TransitionPlan<'a> {
    resolved: &'a ResolvedBatch,
    changes: Vec<CropChange>,
    kind: TransitionKind,
    from: StageCode,
    to: StageCode,
    when: DateTime<Utc>,
    origin: TransitionOrigin,
    actor: Option<String>,
    reason: Option<String>,
    /// Tasks are regenerated only for transitions due after this instant
    reference: DateTime<Utc>,
    warnings: Vec<String>,
}

pub struct TransitionExecutor<S: CropStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    validation: ValidationConfig,
    scheduler: Arc<TaskScheduler<S>>,
}

impl<S: CropStore> TransitionExecutor<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        validation: ValidationConfig,
        scheduler: Arc<TaskScheduler<S>>,
    ) -> Self {
        Self {
            store,
            clock,
            validation,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler<S>> {
        &self.scheduler
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Advance a crop's batch (or an explicit batch) to its next stage. `when`
    /// defaults to now.
    #[instrument(skip(self, options), fields(target = %target, origin = %options.origin))]
    pub async fn advance(
        &self,
        target: TransitionTarget,
        when: Option<DateTime<Utc>>,
        options: AdvanceOptions,
    ) -> Result<TransitionResult> {
        let now = self.clock.now();
        let when = when.unwrap_or(now);
        let mut tx = self.store.begin().await?;

        let graph = StageGraph::new(tx.stages().await?);
        let validator = TransitionValidator::new(&graph, &self.validation);
        let resolved = BatchResolver::resolve_for_update(&mut tx, target).await?;
        validator
            .validate_batch_consistency(&resolved.crops)
            .into_result()?;

        let representative = resolved.representative();
        let recipe = self.recipe_for(&mut tx, representative).await?;
        let from = graph.current_stage(representative)?.code;
        let to = match options.target_stage {
            Some(stage) => stage,
            None => {
                graph
                    .next_stage_for(from, &recipe)
                    .ok_or_else(|| {
                        CropCycleError::validation(format!("{from} is the final stage"))
                    })?
                    .code
            }
        };

        if options.origin == TransitionOrigin::Scheduled
            && graph.sort_order(from) >= graph.sort_order(to)
        {
            return Err(CropCycleError::stale(format!(
                "{} is already at {from}, not before {to}",
                resolved.batch
            )));
        }

        let path = if options.fast_forward {
            graph.path_between(from, to, &recipe).ok_or_else(|| {
                CropCycleError::validation(format!("{to} is not reachable from {from}"))
            })?
        } else {
            vec![to]
        };

        let check = |crop: &Crop| {
            if options.fast_forward {
                validator.can_fast_forward(crop, &recipe, &path, when, now)
            } else {
                validator.can_advance(crop, &recipe, to, when, now)
            }
        };

        let mut validation = check(representative);
        let leaving_soaking = from == StageCode::Soaking;
        if leaving_soaking {
            let in_use = tx.tray_numbers_in_use(&resolved.crop_ids()).await?;
            validation.merge(validator.validate_tray_assignment(
                &resolved.crops,
                &options.tray_numbers,
                &in_use,
            ));
        }
        let warnings = validation.into_result()?;

        let to_stage_id = graph.require(to)?.id;
        let changes = resolved
            .crops
            .iter()
            .map(|crop| {
                let checked = if crop.id == representative.id {
                    Ok(())
                } else {
                    check(crop).rejection().map_or(Ok(()), Err)
                };
                let tray = options
                    .tray_numbers
                    .get(&crop.id)
                    .filter(|_| leaving_soaking);
                CropChange {
                    original: crop.clone(),
                    outcome: checked
                        .map(|()| apply_advance(crop, &recipe, &path, when, to_stage_id, tray)),
                }
            })
            .collect();

        let reference = match options.origin {
            TransitionOrigin::Manual => now,
            TransitionOrigin::Scheduled => when,
        };
        let plan = TransitionPlan {
            resolved: &resolved,
            changes,
            kind: TransitionKind::advance(resolved.len()),
            from,
            to,
            when,
            origin: options.origin,
            actor: options.actor.clone(),
            reason: None,
            reference,
            warnings,
        };
        self.write_transition(tx, &graph, plan, now).await
    }

    /// Revert a crop's batch (or an explicit batch) to its previous stage
    #[instrument(skip(self, options), fields(target = %target))]
    pub async fn revert(
        &self,
        target: TransitionTarget,
        reason: Option<String>,
        options: RevertOptions,
    ) -> Result<TransitionResult> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let graph = StageGraph::new(tx.stages().await?);
        let validator = TransitionValidator::new(&graph, &self.validation);
        let resolved = BatchResolver::resolve_for_update(&mut tx, target).await?;
        validator
            .validate_batch_consistency(&resolved.crops)
            .into_result()?;

        let representative = resolved.representative();
        let from = graph.current_stage(representative)?.code;
        let to = graph
            .previous_stage_for(representative, from)
            .ok_or_else(|| CropCycleError::validation(format!("cannot revert from {from}")))?
            .code;

        let tasks = tx
            .active_tasks_for(&resolved.crop_ids(), &[resolved.batch.identifier()])
            .await?;
        let critical_tasks = count_critical_tasks(&tasks, now);

        let mut contexts = HashMap::with_capacity(resolved.len());
        for crop in &resolved.crops {
            let harvest_records = tx.harvest_count(crop.id).await?;
            contexts.insert(
                crop.id,
                RevertContext {
                    harvest_records,
                    critical_tasks,
                },
            );
        }
        let context_for = |crop: &Crop| contexts.get(&crop.id).copied().unwrap_or_default();

        let warnings = validator
            .can_revert(representative, to, &context_for(representative))
            .into_result()?;

        let to_stage_id = graph.require(to)?.id;
        let cleared = graph.stages_after(to);
        let changes = resolved
            .crops
            .iter()
            .map(|crop| {
                let checked = if crop.id == representative.id {
                    Ok(())
                } else {
                    validator
                        .can_revert(crop, to, &context_for(crop))
                        .rejection()
                        .map_or(Ok(()), Err)
                };
                CropChange {
                    original: crop.clone(),
                    outcome: checked.map(|()| apply_revert(crop, &cleared, to_stage_id)),
                }
            })
            .collect();

        let plan = TransitionPlan {
            resolved: &resolved,
            changes,
            kind: TransitionKind::revert(resolved.len()),
            from,
            to,
            when: now,
            origin: TransitionOrigin::Manual,
            actor: options.actor,
            reason,
            reference: now,
            warnings,
        };
        self.write_transition(tx, &graph, plan, now).await
    }

    async fn recipe_for(&self, tx: &mut S::Tx, crop: &Crop) -> Result<Recipe> {
        tx.find_recipe(crop.recipe_id).await?.ok_or_else(|| {
            CropCycleError::not_found(format!("recipe {} for crop {}", crop.recipe_id, crop.id))
        })
    }

    /// Persist planned changes, the audit record and the regenerated schedule, then
    /// commit.
    ///
    /// Per-crop failures are decided before this point and only recorded here. A store
    /// error on any write aborts the whole call: the transaction is dropped, so no crop,
    /// record or task change survives. A tray taken by a concurrent writer surfaces as
    /// [`CropCycleError::Validation`] through the same path.
    async fn write_transition(
        &self,
        mut tx: S::Tx,
        graph: &StageGraph,
        plan: TransitionPlan<'_>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult> {
        let TransitionPlan {
            resolved,
            changes,
            kind,
            from,
            to,
            when,
            origin,
            actor,
            reason,
            reference,
            mut warnings,
        } = plan;
        let success_status = if kind.is_advance() {
            CropStatus::Advanced
        } else {
            CropStatus::Reverted
        };

        let mut outcomes = Vec::with_capacity(changes.len());
        let mut failed_crops = Vec::new();
        let mut resulting = Vec::with_capacity(changes.len());
        let mut updated = Vec::new();

        for change in changes {
            match change.outcome {
                Ok(crop) => {
                    // Postgres aborts the transaction on a failed statement
                    tx.update_crop(&crop).await?;
                    outcomes.push(CropOutcome {
                        id: crop.id,
                        tray_number: crop.tray_number.clone(),
                        status: success_status,
                        error: None,
                    });
                    updated.push(crop.clone());
                    resulting.push(crop);
                }
                Err(reason) => {
                    warn!(crop_id = change.original.id, error = %reason, "Crop left unchanged");
                    warnings.push(format!("crop {}: {reason}", change.original.id));
                    outcomes.push(CropOutcome {
                        id: change.original.id,
                        tray_number: change.original.tray_number.clone(),
                        status: CropStatus::Failed,
                        error: Some(reason.clone()),
                    });
                    failed_crops.push(FailedCrop {
                        crop_id: change.original.id,
                        reason,
                    });
                    resulting.push(change.original);
                }
            }
        }

        let batch_identifier = resolved.batch.identifier();
        let record_id = tx
            .insert_transition_record(NewStageTransitionRecord {
                kind,
                origin,
                batch_id: batch_identifier.clone(),
                from_stage_id: graph.require(from)?.id,
                to_stage_id: graph.require(to)?.id,
                transition_at: when,
                recorded_at: now,
                succeeded_count: updated.len() as i32,
                failed_count: failed_crops.len() as i32,
                failed_crops: failed_crops.clone(),
                reason,
                actor,
            })
            .await?;

        for crop in &updated {
            tx.insert_crop_entry(&CropTransitionEntry {
                record_id,
                crop_id: crop.id,
                from_stage: from,
                to_stage: to,
                transition_at: when,
                tray_number: crop.tray_number.clone(),
            })
            .await?;
        }

        let created = self
            .scheduler
            .reschedule_in(&mut tx, &resulting, &[batch_identifier.clone()], reference)
            .await?;
        tx.commit().await?;

        debug!(record_id, tasks_created = created, "Transition committed");
        log_transition_operation(
            kind,
            &batch_identifier,
            from,
            to,
            updated.len(),
            failed_crops.len(),
        );

        Ok(TransitionResult {
            kind,
            from_stage: from,
            to_stage: to,
            succeeded: updated.len(),
            failed: failed_crops.len(),
            warnings,
            crops: outcomes,
            record_id,
        })
    }
}

/// Crop after advancing along `path`. Intermediate stages get their scheduled time,
/// held between the previous stamp and `when`; the final stage gets `when`. A tray
/// number is only passed for crops leaving soaking.
fn apply_advance(
    crop: &Crop,
    recipe: &Recipe,
    path: &[StageCode],
    when: DateTime<Utc>,
    to_stage_id: i64,
    tray_number: Option<&String>,
) -> Crop {
    let mut updated = crop.clone();
    if let Some(tray) = tray_number {
        updated.tray_number = Some(tray.trim().to_string());
    }

    let schedule = StageSchedule::for_crop(crop, recipe);
    let mut floor = crop
        .populated_timestamps()
        .into_iter()
        .map(|(_, at)| at)
        .max();
    let last = path.len().saturating_sub(1);
    for (index, &stage) in path.iter().enumerate() {
        let stamp = if index == last {
            when
        } else {
            let scheduled = schedule.due_at(stage).unwrap_or(when).min(when);
            floor.map_or(scheduled, |f| scheduled.max(f))
        };
        updated.set_stage_timestamp(stage, Some(stamp));
        floor = Some(stamp);
    }
    updated.current_stage_id = to_stage_id;
    updated
}

/// Crop after reverting: every timestamp in `cleared` is nulled
fn apply_revert(crop: &Crop, cleared: &[StageCode], to_stage_id: i64) -> Crop {
    let mut updated = crop.clone();
    for &stage in cleared {
        updated.set_stage_timestamp(stage, None);
    }
    updated.current_stage_id = to_stage_id;
    updated
}
