//! # Task Dispatcher
//!
//! Executes due tasks at most once. A task is locked, deactivated and committed
//! before its effect runs, so a second dispatcher (or a retry) finds it inactive and
//! does nothing. Effects whose premise no longer holds are discarded as stale.

use crate::clock::Clock;
use crate::config::DispatcherConfig;
use crate::constants::SCHEDULER_ACTOR;
use crate::error::{CropCycleError, Result};
use crate::logging::log_task_dispatch;
use crate::models::{ScheduledTask, StageCode, TaskName, TransitionTarget};
use crate::services::Notifier;
use crate::state_machine::{AdvanceOptions, BatchResolver, StageGraph, TransitionExecutor};
use crate::store::{CropStore, CropTransaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Executed,
    /// Premise no longer held; the task was consumed without effect
    Stale,
    /// A task for a later stage of the same batch ran instead
    Superseded,
    /// Another dispatch already consumed the task
    AlreadyProcessed,
    NotDue,
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executed => write!(f, "executed"),
            Self::Stale => write!(f, "stale"),
            Self::Superseded => write!(f, "superseded"),
            Self::AlreadyProcessed => write!(f, "already_processed"),
            Self::NotDue => write!(f, "not_due"),
        }
    }
}

/// Counts from one `process_due_tasks` run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub executed: usize,
    pub stale: usize,
    pub superseded: usize,
    pub failed: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Executed => self.executed += 1,
            DispatchOutcome::Stale => self.stale += 1,
            DispatchOutcome::Superseded => self.superseded += 1,
            DispatchOutcome::AlreadyProcessed | DispatchOutcome::NotDue => {}
        }
    }

    pub fn total(&self) -> usize {
        self.executed + self.stale + self.superseded + self.failed
    }
}

enum Claim {
    Claimed(ScheduledTask),
    Inactive,
    NotDue,
}

pub struct TaskDispatcher<S: CropStore> {
    store: Arc<S>,
    executor: Arc<TransitionExecutor<S>>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
}

impl<S: CropStore> TaskDispatcher<S> {
    pub fn new(
        store: Arc<S>,
        executor: Arc<TransitionExecutor<S>>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            executor,
            notifier,
            clock,
            config,
        }
    }

    /// Consume one task. Effect failures surface as errors after the task has
    /// already been deactivated.
    #[instrument(skip(self))]
    pub async fn process_due(&self, task_id: i64) -> Result<DispatchOutcome> {
        let task = match self.claim(task_id).await? {
            Claim::Claimed(task) => task,
            Claim::Inactive => return Ok(DispatchOutcome::AlreadyProcessed),
            Claim::NotDue => return Ok(DispatchOutcome::NotDue),
        };

        let task_name = task.task_name.to_string();
        match self.execute(&task).await {
            Ok(()) => {
                log_task_dispatch(task.id, &task_name, "executed", None);
                Ok(DispatchOutcome::Executed)
            }
            Err(CropCycleError::StaleTask { reason }) => {
                log_task_dispatch(task.id, &task_name, "stale", Some(&reason));
                Ok(DispatchOutcome::Stale)
            }
            Err(err) => {
                log_task_dispatch(task.id, &task_name, "failed", Some(&err.to_string()));
                Err(err)
            }
        }
    }

    /// Run every due task once. Side-effect tasks go first; advance tasks are
    /// collapsed per batch so only the one with the furthest target runs.
    #[instrument(skip(self), fields(run_id = %Uuid::new_v4()))]
    pub async fn process_due_tasks(&self, limit: i64) -> Result<DispatchSummary> {
        let now = self.clock.now();
        let due = {
            let mut tx = self.store.begin().await?;
            let due = tx.due_tasks(now, limit).await?;
            tx.commit().await?;
            due
        };
        info!(due = due.len(), "Dispatching due tasks");

        let (advances, side_effects): (Vec<ScheduledTask>, Vec<ScheduledTask>) = due
            .into_iter()
            .partition(|task| task.task_name.is_advance());

        let mut summary = DispatchSummary::default();
        for task in &side_effects {
            self.dispatch_into(task.id, &mut summary).await;
        }

        let (winners, superseded) = collapse_advances(advances);
        for task in &superseded {
            match self.supersede(task).await {
                Ok(true) => summary.record(DispatchOutcome::Superseded),
                Ok(false) => {}
                Err(err) => {
                    error!(task_id = task.id, error = %err, "Failed to supersede task");
                    summary.failed += 1;
                }
            }
        }
        for task in &winners {
            self.dispatch_into(task.id, &mut summary).await;
        }

        info!(
            executed = summary.executed,
            stale = summary.stale,
            superseded = summary.superseded,
            failed = summary.failed,
            "Dispatch run complete"
        );
        Ok(summary)
    }

    async fn dispatch_into(&self, task_id: i64, summary: &mut DispatchSummary) {
        match self.process_due(task_id).await {
            Ok(outcome) => summary.record(outcome),
            Err(err) => {
                error!(task_id, error = %err, "Task failed");
                summary.failed += 1;
            }
        }
    }

    /// Lock the task and, when it is active and due, deactivate it in a committed
    /// transaction
    async fn claim(&self, task_id: i64) -> Result<Claim> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let task = tx
            .lock_task(task_id)
            .await?
            .ok_or_else(|| CropCycleError::not_found(format!("task {task_id}")))?;
        if !task.is_active {
            debug!(task_id, "Task already processed");
            return Ok(Claim::Inactive);
        }
        if task.due_at > now {
            return Ok(Claim::NotDue);
        }
        tx.deactivate_task(task.id, now).await?;
        tx.commit().await?;
        Ok(Claim::Claimed(task))
    }

    async fn supersede(&self, task: &ScheduledTask) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let active = tx
            .lock_task(task.id)
            .await?
            .is_some_and(|locked| locked.is_active);
        if !active {
            return Ok(false);
        }
        tx.deactivate_task(task.id, self.clock.now()).await?;
        tx.commit().await?;
        log_task_dispatch(
            task.id,
            &task.task_name.to_string(),
            "superseded",
            Some(&task.conditions.batch_identifier),
        );
        Ok(true)
    }

    async fn execute(&self, task: &ScheduledTask) -> Result<()> {
        match task.task_name {
            TaskName::SoakingCompletionWarning => self.warn_soak_completion(task).await,
            TaskName::SuspendWatering => self.suspend_watering(task).await,
            name => match name.target_stage() {
                Some(target) => self.advance(task, target).await,
                None => Err(CropCycleError::Internal(format!(
                    "task {} has no handler",
                    task.id
                ))),
            },
        }
    }

    async fn warn_soak_completion(&self, task: &ScheduledTask) -> Result<()> {
        let crop_id = task.conditions.crop_id;
        let (crop, graph) = {
            let mut tx = self.store.begin().await?;
            let crop = tx.find_crop(crop_id, false).await?;
            let graph = StageGraph::new(tx.stages().await?);
            tx.commit().await?;
            (crop, graph)
        };
        let crop = crop.ok_or_else(|| CropCycleError::stale(format!("crop {crop_id} is gone")))?;
        if graph.current_stage(&crop)?.code != StageCode::Soaking {
            return Err(CropCycleError::stale(format!(
                "crop {crop_id} is no longer soaking"
            )));
        }

        let subject = format!("{} finishes soaking soon", task.conditions.variety);
        let body = format!(
            "{} crop(s) of {} finish soaking today. Assign trays before moving them to germination.",
            task.conditions.crop_ids.len().max(1),
            task.conditions.variety
        );
        self.send(&subject, &body, crop_id).await;
        Ok(())
    }

    async fn suspend_watering(&self, task: &ScheduledTask) -> Result<()> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let graph = StageGraph::new(tx.stages().await?);
        let resolved = match BatchResolver::resolve_for_update(&mut tx, task_target(task)).await {
            Err(CropCycleError::NotFound(reason)) => return Err(CropCycleError::stale(reason)),
            other => other?,
        };
        let harvested_order = graph.require(StageCode::Harvested)?.sort_order;

        let mut suspended = Vec::new();
        for crop in &resolved.crops {
            let growing = graph
                .stage_by_id(crop.current_stage_id)
                .is_some_and(|stage| stage.sort_order < harvested_order);
            if growing && crop.watering_suspended_at.is_none() {
                let mut updated = crop.clone();
                updated.watering_suspended_at = Some(now);
                tx.update_crop(&updated).await?;
                suspended.push(updated.tray_label());
            }
        }
        tx.commit().await?;

        if suspended.is_empty() {
            return Err(CropCycleError::stale(format!(
                "nothing to suspend in {}",
                resolved.batch
            )));
        }
        info!(batch = %resolved.batch, crops = suspended.len(), "Watering suspended");

        let subject = format!("Stop watering {}", task.conditions.variety);
        let body = format!(
            "Watering suspended ahead of harvest for trays: {}",
            suspended.join(", ")
        );
        self.send(&subject, &body, task.conditions.crop_id).await;
        Ok(())
    }

    async fn advance(&self, task: &ScheduledTask, target: StageCode) -> Result<()> {
        let target_ref = task_target(task);
        let (resolved, graph) = {
            let mut tx = self.store.begin().await?;
            let graph = StageGraph::new(tx.stages().await?);
            let resolved = match BatchResolver::resolve(&mut tx, target_ref).await {
                Err(CropCycleError::NotFound(reason)) => {
                    return Err(CropCycleError::stale(reason))
                }
                other => other?,
            };
            tx.commit().await?;
            (resolved, graph)
        };
        let current = graph.current_stage(resolved.representative())?;
        let target_order = graph.require(target)?.sort_order;
        if current.sort_order >= target_order {
            return Err(CropCycleError::stale(format!(
                "{} is at {}, not before {target}",
                resolved.batch, current.code
            )));
        }

        let subject = format!("{} moving to {target}", task.conditions.variety);
        let body = format!(
            "{} crop(s) of {} are scheduled to move from {} to {target}.",
            resolved.len(),
            task.conditions.variety,
            current.code
        );
        self.send(&subject, &body, resolved.representative().id)
            .await;

        let result = self
            .executor
            .advance(
                target_ref,
                Some(task.due_at),
                AdvanceOptions::scheduled(target, SCHEDULER_ACTOR),
            )
            .await?;
        if result.failed > 0 {
            warn!(
                task_id = task.id,
                failed = result.failed,
                "Scheduled advance left crops behind"
            );
        }
        Ok(())
    }

    /// Notification failures never undo a dispatched task
    async fn send(&self, subject: &str, body: &str, crop_id: i64) {
        let link = self.config.crop_link(crop_id);
        if let Err(err) = self
            .notifier
            .notify(&self.config.recipients, subject, body, link.as_deref())
            .await
        {
            warn!(crop_id, error = %err, "Notification failed");
        }
    }
}

/// Explicit batches are addressed directly; otherwise the batch is re-resolved from
/// the anchor crop
fn task_target(task: &ScheduledTask) -> TransitionTarget {
    match task.conditions.batch {
        Some(batch) => TransitionTarget::Batch(batch),
        None => TransitionTarget::Crop(task.conditions.crop_id),
    }
}

/// Split advance tasks into the ones to run (furthest target per batch, oldest
/// batch first) and the ones they supersede
fn collapse_advances(tasks: Vec<ScheduledTask>) -> (Vec<ScheduledTask>, Vec<ScheduledTask>) {
    let mut by_batch: HashMap<String, Vec<ScheduledTask>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for task in tasks {
        let key = task.conditions.batch_identifier.clone();
        if !by_batch.contains_key(&key) {
            order.push(key.clone());
        }
        by_batch.entry(key).or_default().push(task);
    }

    let mut winners = Vec::new();
    let mut superseded = Vec::new();
    for key in order {
        let Some(mut group) = by_batch.remove(&key) else {
            continue;
        };
        group.sort_by_key(|task| {
            (
                task.task_name
                    .target_stage()
                    .map(|stage| stage.default_sort_order()),
                task.due_at,
            )
        });
        if let Some(winner) = group.pop() {
            winners.push(winner);
        }
        superseded.extend(group);
    }
    (winners, superseded)
}
