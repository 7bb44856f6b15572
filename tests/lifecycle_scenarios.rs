//! End-to-end transition scenarios against the in-memory store.

mod common;

use common::builders::{CropBuilder, RecipeBuilder};
use common::{days, hours, t0, Harness};
use cropcycle_core::models::{FailedCrop, StageCode, TaskName, TransitionKind};
use cropcycle_core::services::{CreationMode, NewCrop};
use cropcycle_core::state_machine::CropStatus;
use cropcycle_core::{
    AdvanceOptions, BatchRef, CropCycleError, RevertOptions, TransitionTarget,
};

fn stage_id(stage: StageCode) -> i64 {
    i64::from(stage.default_sort_order())
}

#[tokio::test]
async fn test_tray_conflict_rejects_whole_batch() {
    let h = Harness::new(t0() + hours(12.0));
    RecipeBuilder::new(1)
        .soak_hours(12.0)
        .insert(&h.store)
        .await;
    for id in 1..=3 {
        CropBuilder::new(id, 1)
            .soaking(t0())
            .batch(1)
            .insert(&h.store)
            .await;
    }
    CropBuilder::new(10, 1)
        .at_stage(StageCode::Germination, t0())
        .tray("6")
        .insert(&h.store)
        .await;

    let err = h
        .core
        .executor
        .advance(
            TransitionTarget::Batch(BatchRef::Explicit(1)),
            None,
            AdvanceOptions::default().with_tray_numbers([(1, "5"), (2, "6"), (3, "7")]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CropCycleError::Validation { .. }));
    assert!(err
        .validation_errors()
        .iter()
        .any(|e| e == "tray 6 for crop 2 is already in use by crop 10"));
    for id in 1..=3 {
        let crop = h.store.crop(id).await.unwrap();
        assert_eq!(crop.current_stage_id, stage_id(StageCode::Soaking));
        assert_eq!(crop.tray_number, None);
        assert_eq!(crop.germination_at, None);
    }
    assert!(h.store.transition_records().await.is_empty());
    assert!(h.store.crop_entries().await.is_empty());
}

#[tokio::test]
async fn test_leaving_soaking_assigns_trays() {
    let h = Harness::new(t0() + hours(12.0));
    RecipeBuilder::new(1)
        .soak_hours(12.0)
        .insert(&h.store)
        .await;
    for id in 1..=3 {
        CropBuilder::new(id, 1)
            .soaking(t0())
            .batch(1)
            .insert(&h.store)
            .await;
    }

    let result = h
        .core
        .executor
        .advance(
            TransitionTarget::Crop(2),
            None,
            AdvanceOptions::default().with_tray_numbers([(1, "5"), (2, "6"), (3, "7")]),
        )
        .await
        .unwrap();

    assert_eq!(result.succeeded, 3);
    assert_eq!(result.to_stage, StageCode::Germination);
    let trays: Vec<Option<String>> = h
        .store
        .crops()
        .await
        .into_iter()
        .map(|c| c.tray_number)
        .collect();
    assert_eq!(
        trays,
        vec![
            Some("5".to_string()),
            Some("6".to_string()),
            Some("7".to_string())
        ]
    );
}

#[tokio::test]
async fn test_light_duration_floor() {
    let light_at = t0() + days(3.0);

    let h = Harness::new(light_at + days(5.0 * 0.95));
    RecipeBuilder::new(1).insert(&h.store).await;
    CropBuilder::new(1, 1)
        .stamped(StageCode::Germination, t0())
        .at_stage(StageCode::Light, light_at)
        .insert(&h.store)
        .await;
    let result = h
        .core
        .executor
        .advance(TransitionTarget::Crop(1), None, AdvanceOptions::default())
        .await
        .unwrap();
    assert_eq!(result.to_stage, StageCode::Harvested);
    assert!(result.warnings.is_empty());
    let crop = h.store.crop(1).await.unwrap();
    assert_eq!(crop.current_stage_id, stage_id(StageCode::Harvested));
    assert_eq!(crop.harvested_at, Some(light_at + days(5.0 * 0.95)));

    let h = Harness::new(light_at + days(5.0 * 0.5));
    RecipeBuilder::new(1).insert(&h.store).await;
    CropBuilder::new(1, 1)
        .stamped(StageCode::Germination, t0())
        .at_stage(StageCode::Light, light_at)
        .insert(&h.store)
        .await;
    let err = h
        .core
        .executor
        .advance(TransitionTarget::Crop(1), None, AdvanceOptions::default())
        .await
        .unwrap_err();
    assert!(err.validation_errors()[0].starts_with("minimum duration not met"));
    assert_eq!(
        h.store.crop(1).await.unwrap().current_stage_id,
        stage_id(StageCode::Light)
    );
}

#[tokio::test]
async fn test_planting_schedules_recipe_timing() {
    let h = Harness::new(t0());
    RecipeBuilder::new(1).insert(&h.store).await;

    let created = h
        .core
        .planting
        .plant(vec![NewCrop::new(1).with_tray("A1")], CreationMode::Single)
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].germination_at, Some(t0()));
    assert_eq!(created[0].current_stage_id, stage_id(StageCode::Germination));

    let mut tasks = h.store.active_tasks().await;
    tasks.sort_by_key(|t| t.due_at);
    let schedule: Vec<_> = tasks.iter().map(|t| (t.task_name, t.due_at)).collect();
    assert_eq!(
        schedule,
        vec![
            (TaskName::AdvanceToLight, t0() + days(3.0)),
            (TaskName::AdvanceToHarvested, t0() + days(8.0)),
        ]
    );
    assert_eq!(h.inventory.calls(), vec![vec![created[0].id]]);
}

#[tokio::test]
async fn test_bulk_planting_schedules_batch_once() {
    let h = Harness::new(t0());
    RecipeBuilder::new(1).insert(&h.store).await;

    let created = h
        .core
        .planting
        .plant(
            vec![
                NewCrop::new(1).with_tray("1"),
                NewCrop::new(1).with_tray("2"),
                NewCrop::new(1).with_tray("3"),
            ],
            CreationMode::Bulk,
        )
        .await
        .unwrap();
    let ids: Vec<i64> = created.iter().map(|c| c.id).collect();

    let tasks = h.store.active_tasks().await;
    assert_eq!(tasks.len(), 2);
    for task in &tasks {
        assert_eq!(task.conditions.crop_ids, ids);
    }
    assert_eq!(h.inventory.calls(), vec![ids]);
}

#[tokio::test]
async fn test_single_planting_deducts_per_crop() {
    let h = Harness::new(t0());
    RecipeBuilder::new(1).insert(&h.store).await;

    h.core
        .planting
        .plant(
            vec![NewCrop::new(1).with_tray("1"), NewCrop::new(1).with_tray("2")],
            CreationMode::Single,
        )
        .await
        .unwrap();

    assert_eq!(h.inventory.calls().len(), 2);
    // Both crops share one implicit batch, so its schedule is not duplicated
    assert_eq!(h.store.active_tasks().await.len(), 2);
}

#[tokio::test]
async fn test_planting_rejects_tray_in_use() {
    let h = Harness::new(t0());
    RecipeBuilder::new(1).insert(&h.store).await;
    CropBuilder::new(1, 1)
        .at_stage(StageCode::Germination, t0())
        .tray("9")
        .insert(&h.store)
        .await;

    let err = h
        .core
        .planting
        .plant(
            vec![NewCrop::new(1).with_tray("8"), NewCrop::new(1).with_tray("9")],
            CreationMode::Bulk,
        )
        .await
        .unwrap_err();

    assert_eq!(
        err.validation_errors(),
        ["tray 9 is already in use by crop 1".to_string()]
    );
    assert_eq!(h.store.crops().await.len(), 1);
    assert!(h.inventory.calls().is_empty());
}

#[tokio::test]
async fn test_batch_advance_records_every_crop() {
    let h = Harness::new(t0());
    RecipeBuilder::new(1)
        .durations(3.0, 2.0, 5.0)
        .insert(&h.store)
        .await;
    for id in 1..=4 {
        CropBuilder::new(id, 1)
            .at_stage(StageCode::Germination, t0())
            .tray(&id.to_string())
            .insert(&h.store)
            .await;
    }
    h.core.scheduler.schedule_all(1).await.unwrap();
    assert_eq!(h.store.active_tasks().await.len(), 3);

    h.set_now(t0() + days(3.0));
    let result = h
        .core
        .executor
        .advance(
            TransitionTarget::Crop(3),
            None,
            AdvanceOptions::default().with_actor("grower"),
        )
        .await
        .unwrap();

    assert_eq!(result.kind, TransitionKind::BulkAdvance);
    assert_eq!(result.succeeded, 4);
    assert_eq!(result.failed, 0);
    assert!(result
        .crops
        .iter()
        .all(|c| c.status == CropStatus::Advanced));

    let records = h.store.transition_records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].succeeded_count, 4);
    assert_eq!(records[0].actor.as_deref(), Some("grower"));
    let entries = h.store.crop_entries().await;
    assert_eq!(entries.len(), 4);
    assert!(entries
        .iter()
        .all(|e| e.from_stage == StageCode::Germination && e.to_stage == StageCode::Blackout));

    for crop in h.store.crops().await {
        assert_eq!(crop.current_stage_id, stage_id(StageCode::Blackout));
        assert_eq!(crop.blackout_at, Some(t0() + days(3.0)));
    }

    let tasks = h.active_tasks_named(TaskName::AdvanceToBlackout).await;
    assert!(tasks.is_empty());
    let light = h.active_tasks_named(TaskName::AdvanceToLight).await;
    assert_eq!(light.len(), 1);
    assert_eq!(light[0].due_at, t0() + days(5.0));
    assert_eq!(light[0].conditions.crop_ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_revert_clears_timestamps_and_reschedules() {
    let h = Harness::new(t0() + days(3.5));
    RecipeBuilder::new(1)
        .durations(3.0, 2.0, 5.0)
        .insert(&h.store)
        .await;
    CropBuilder::new(1, 1)
        .stamped(StageCode::Germination, t0())
        .at_stage(StageCode::Blackout, t0() + days(3.0))
        .tray("1")
        .insert(&h.store)
        .await;
    h.core.scheduler.schedule_all(1).await.unwrap();
    let before = h.store.crop(1).await.unwrap().batch_ref().identifier();
    assert!(h
        .store
        .active_tasks()
        .await
        .iter()
        .all(|t| t.conditions.batch_identifier == before));

    let result = h
        .core
        .executor
        .revert(
            TransitionTarget::Crop(1),
            Some("moved too early".to_string()),
            RevertOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.kind, TransitionKind::Revert);
    assert_eq!(result.to_stage, StageCode::Germination);
    let crop = h.store.crop(1).await.unwrap();
    assert_eq!(crop.current_stage_id, stage_id(StageCode::Germination));
    assert_eq!(crop.blackout_at, None);
    assert_eq!(crop.germination_at, Some(t0()));

    let after = crop.batch_ref().identifier();
    let tasks = h.store.active_tasks().await;
    assert!(!tasks.is_empty());
    assert!(tasks.iter().all(|t| t.conditions.batch_identifier == after));
    assert_eq!(
        h.store.transition_records().await[0].reason.as_deref(),
        Some("moved too early")
    );
}

#[tokio::test]
async fn test_revert_blocked_by_harvest_records() {
    let h = Harness::new(t0() + days(9.0));
    RecipeBuilder::new(1).insert(&h.store).await;
    for id in [1, 2] {
        CropBuilder::new(id, 1)
            .stamped(StageCode::Germination, t0() + hours(id as f64))
            .stamped(StageCode::Light, t0() + days(3.0))
            .at_stage(StageCode::Harvested, t0() + days(8.0))
            .insert(&h.store)
            .await;
    }
    h.store.record_harvest(1).await;

    let err = h
        .core
        .executor
        .revert(TransitionTarget::Crop(1), None, RevertOptions::default())
        .await
        .unwrap_err();
    assert_eq!(
        err.validation_errors(),
        ["cannot revert crops with harvest records".to_string()]
    );
    assert!(h.store.crop(1).await.unwrap().harvested_at.is_some());

    let result = h
        .core
        .executor
        .revert(TransitionTarget::Crop(2), None, RevertOptions::default())
        .await
        .unwrap();
    assert_eq!(result.to_stage, StageCode::Light);
    let crop = h.store.crop(2).await.unwrap();
    assert_eq!(crop.harvested_at, None);
    assert_eq!(crop.current_stage_id, stage_id(StageCode::Light));
}

#[tokio::test]
async fn test_batch_advance_leaves_short_crop_behind() {
    let h = Harness::new(t0() + days(3.0));
    RecipeBuilder::new(1).insert(&h.store).await;
    CropBuilder::new(1, 1)
        .at_stage(StageCode::Germination, t0())
        .tray("1")
        .batch(1)
        .insert(&h.store)
        .await;
    CropBuilder::new(2, 1)
        .at_stage(StageCode::Germination, t0() + days(2.0))
        .tray("2")
        .batch(1)
        .insert(&h.store)
        .await;
    let untouched = h.store.crop(2).await.unwrap();

    let result = h
        .core
        .executor
        .advance(
            TransitionTarget::Batch(BatchRef::Explicit(1)),
            None,
            AdvanceOptions::default(),
        )
        .await
        .unwrap();

    let reason =
        "minimum duration not met: germination needs at least 64.8h of 72.0h, 24.0h elapsed";
    assert_eq!(result.to_stage, StageCode::Light);
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 1);
    let outcome = result.crops.iter().find(|c| c.id == 2).unwrap();
    assert_eq!(outcome.status, CropStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some(reason));
    assert!(result.warnings.iter().any(|w| w == &format!("crop 2: {reason}")));

    let records = h.store.transition_records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].succeeded_count, 1);
    assert_eq!(records[0].failed_count, 1);
    assert_eq!(
        records[0].failed_crops,
        vec![FailedCrop {
            crop_id: 2,
            reason: reason.to_string(),
        }]
    );
    let entries = h.store.crop_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].crop_id, 1);

    assert_eq!(
        h.store.crop(1).await.unwrap().current_stage_id,
        stage_id(StageCode::Light)
    );
    assert_eq!(h.store.crop(2).await.unwrap(), untouched);
}

#[tokio::test]
async fn test_batch_revert_skips_harvested_sibling() {
    let h = Harness::new(t0() + days(9.0));
    RecipeBuilder::new(1).insert(&h.store).await;
    for id in [1, 2] {
        CropBuilder::new(id, 1)
            .stamped(StageCode::Germination, t0())
            .stamped(StageCode::Light, t0() + days(3.0))
            .at_stage(StageCode::Harvested, t0() + days(8.0))
            .tray(&id.to_string())
            .batch(7)
            .insert(&h.store)
            .await;
    }
    h.store.record_harvest(2).await;
    let untouched = h.store.crop(2).await.unwrap();

    let result = h
        .core
        .executor
        .revert(
            TransitionTarget::Batch(BatchRef::Explicit(7)),
            None,
            RevertOptions::default(),
        )
        .await
        .unwrap();

    let reason = "cannot revert crops with harvest records";
    assert_eq!(result.to_stage, StageCode::Light);
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 1);
    let outcome = result.crops.iter().find(|c| c.id == 2).unwrap();
    assert_eq!(outcome.status, CropStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some(reason));

    let records = h.store.transition_records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, TransitionKind::BulkRevert);
    assert_eq!(records[0].failed_crops.len(), 1);
    assert_eq!(records[0].failed_crops[0].crop_id, 2);
    assert_eq!(records[0].failed_crops[0].reason, reason);
    let entries = h.store.crop_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].crop_id, 1);
    assert_eq!(entries[0].to_stage, StageCode::Light);

    let reverted = h.store.crop(1).await.unwrap();
    assert_eq!(reverted.current_stage_id, stage_id(StageCode::Light));
    assert_eq!(reverted.harvested_at, None);
    let kept = h.store.crop(2).await.unwrap();
    assert_eq!(kept, untouched);
    assert_eq!(kept.harvested_at, Some(t0() + days(8.0)));
}

#[tokio::test]
async fn test_concurrent_batches_cannot_share_a_tray() {
    let h = Harness::new(t0() + hours(12.0));
    RecipeBuilder::new(1)
        .soak_hours(12.0)
        .insert(&h.store)
        .await;
    for id in [1, 2] {
        CropBuilder::new(id, 1)
            .soaking(t0())
            .batch(id)
            .insert(&h.store)
            .await;
    }

    let executor = h.core.executor.clone();
    let (first, second) = tokio::join!(
        executor.advance(
            TransitionTarget::Batch(BatchRef::Explicit(1)),
            None,
            AdvanceOptions::default().with_tray_numbers([(1, "6")]),
        ),
        executor.advance(
            TransitionTarget::Batch(BatchRef::Explicit(2)),
            None,
            AdvanceOptions::default().with_tray_numbers([(2, "6")]),
        ),
    );

    let (won, lost) = match (first, second) {
        (Ok(won), Err(lost)) => (won, lost),
        (Err(lost), Ok(won)) => (won, lost),
        other => panic!("expected exactly one advance to win, got {other:?}"),
    };
    assert_eq!(won.succeeded, 1);
    assert!(lost.is_validation());
    assert!(lost.validation_errors()[0].contains("tray 6"));

    let holders: Vec<i64> = h
        .store
        .crops()
        .await
        .into_iter()
        .filter(|c| c.tray_number.as_deref() == Some("6"))
        .map(|c| c.id)
        .collect();
    assert_eq!(holders.len(), 1);
    assert_eq!(h.store.transition_records().await.len(), 1);
}

#[tokio::test]
async fn test_revert_blocked_by_due_transition() {
    let h = Harness::new(t0());
    RecipeBuilder::new(1)
        .durations(3.0, 2.0, 5.0)
        .insert(&h.store)
        .await;
    CropBuilder::new(1, 1)
        .stamped(StageCode::Germination, t0() - days(4.0))
        .at_stage(StageCode::Blackout, t0() - days(1.0))
        .insert(&h.store)
        .await;
    h.core.scheduler.schedule_all(1).await.unwrap();
    h.set_now(t0() + days(1.5));

    let err = h
        .core
        .executor
        .revert(TransitionTarget::Crop(1), None, RevertOptions::default())
        .await
        .unwrap_err();
    assert!(err.validation_errors()[0].contains("already due"));
}

#[tokio::test]
async fn test_concurrent_advances_apply_once() {
    let h = Harness::new(t0() + days(3.0));
    RecipeBuilder::new(1).insert(&h.store).await;
    CropBuilder::new(1, 1)
        .at_stage(StageCode::Germination, t0())
        .insert(&h.store)
        .await;

    let executor = h.core.executor.clone();
    let (first, second) = tokio::join!(
        executor.advance(TransitionTarget::Crop(1), None, AdvanceOptions::default()),
        executor.advance(TransitionTarget::Crop(1), None, AdvanceOptions::default()),
    );

    let succeeded = [first.is_ok(), second.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(h.store.transition_records().await.len(), 1);
    assert_eq!(
        h.store.crop(1).await.unwrap().current_stage_id,
        stage_id(StageCode::Light)
    );
}

#[tokio::test]
async fn test_unknown_crop_is_not_found() {
    let h = Harness::new(t0());
    let err = h
        .core
        .executor
        .advance(TransitionTarget::Crop(99), None, AdvanceOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CropCycleError::NotFound(_)));
}
