//! # Postgres Store
//!
//! `sqlx` implementation of the store traits. Every mutation runs inside the
//! transaction handed out by [`PgCropStore::begin`]; row locks are taken with
//! `SELECT ... FOR UPDATE` and released on commit or rollback.
//!
//! Queries use the runtime-checked `sqlx::query`/`query_as` forms so the crate builds
//! without a live database.

use super::traits::{
    CropStore, CropTransaction, NewCropRow, StoreError, StoreResult, ACTIVE_TRAY_INDEX,
};
use crate::config::DatabaseConfig;
use crate::error::{CropCycleError, Result};
use crate::models::{
    BatchRef, Crop, CropTransitionEntry, NewScheduledTask, NewStageTransitionRecord, Recipe,
    ScheduledTask, Stage, TaskConditions,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{debug, info};

const CROP_COLUMNS: &str = "id, recipe_id, current_stage_id, tray_number, soaking_at, \
     germination_at, blackout_at, light_at, harvested_at, requires_soaking, \
     watering_suspended_at, crop_batch_id";

const TASK_COLUMNS: &str =
    "id, resource_type, task_name, conditions, due_at, is_active, last_run_at";

/// Matches task rows whose conditions reference `$1` crop ids or `$2` batch identifiers
const TASK_REFERENCE_FILTER: &str = "is_active = true AND ( \
        (conditions->>'crop_id')::BIGINT = ANY($1) \
        OR EXISTS ( \
            SELECT 1 FROM jsonb_array_elements_text(conditions->'crop_ids') AS member(id) \
            WHERE member.id::BIGINT = ANY($1) \
        ) \
        OR conditions->>'batch_identifier' = ANY($2) \
    )";

#[derive(Debug, FromRow)]
struct StageRow {
    id: i64,
    code: String,
    sort_order: i32,
    is_active: bool,
}

impl TryFrom<StageRow> for Stage {
    type Error = StoreError;

    fn try_from(row: StageRow) -> StoreResult<Self> {
        Ok(Stage {
            id: row.id,
            code: row.code.parse().map_err(StoreError::InvalidData)?,
            sort_order: row.sort_order,
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, FromRow)]
struct TaskRow {
    id: i64,
    resource_type: String,
    task_name: String,
    conditions: Json<TaskConditions>,
    due_at: DateTime<Utc>,
    is_active: bool,
    last_run_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for ScheduledTask {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> StoreResult<Self> {
        Ok(ScheduledTask {
            id: row.id,
            resource_type: row.resource_type,
            task_name: row.task_name.parse().map_err(StoreError::InvalidData)?,
            conditions: row.conditions.0,
            due_at: row.due_at,
            is_active: row.is_active,
            last_run_at: row.last_run_at,
        })
    }
}

fn tasks_from_rows(rows: Vec<TaskRow>) -> StoreResult<Vec<ScheduledTask>> {
    rows.into_iter().map(ScheduledTask::try_from).collect()
}

/// Postgres-backed store
#[derive(Debug, Clone)]
pub struct PgCropStore {
    pool: PgPool,
}

impl PgCropStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using database configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.database_url()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&url)
            .await
            .map_err(|e| CropCycleError::Store(StoreError::Database(e)))?;

        info!(
            max_connections = config.max_connections,
            "Connected to crop lifecycle database"
        );

        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CropCycleError::Store(StoreError::Database(e.into())))?;
        debug!("Crop lifecycle migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CropStore for PgCropStore {
    type Tx = PgCropTransaction;

    async fn begin(&self) -> StoreResult<PgCropTransaction> {
        Ok(PgCropTransaction {
            tx: self.pool.begin().await?,
        })
    }
}

/// Transaction over [`PgCropStore`]
pub struct PgCropTransaction {
    tx: Transaction<'static, Postgres>,
}

/// Unique violations on the active-tray index become tray conflicts
fn crop_write_error(err: sqlx::Error, tray_number: Option<&str>) -> StoreError {
    let tray_conflict = err.as_database_error().is_some_and(|db| {
        db.is_unique_violation() && db.constraint() == Some(ACTIVE_TRAY_INDEX)
    });
    match tray_number {
        Some(tray) if tray_conflict => StoreError::tray_conflict(tray),
        _ => StoreError::Database(err),
    }
}

fn lock_clause(lock: bool) -> &'static str {
    if lock {
        " FOR UPDATE"
    } else {
        ""
    }
}

#[async_trait]
impl CropTransaction for PgCropTransaction {
    async fn stages(&mut self) -> StoreResult<Vec<Stage>> {
        let rows = sqlx::query_as::<_, StageRow>(
            "SELECT id, code, sort_order, is_active FROM crop_stages ORDER BY sort_order",
        )
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(Stage::try_from).collect()
    }

    async fn find_recipe(&mut self, recipe_id: i64) -> StoreResult<Option<Recipe>> {
        let recipe = sqlx::query_as::<_, Recipe>(
            r#"
            SELECT id, name, seed_soak_hours, germination_days, blackout_days,
                   light_days, suspend_water_hours
            FROM recipes
            WHERE id = $1
            "#,
        )
        .bind(recipe_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(recipe)
    }

    async fn find_crop(&mut self, crop_id: i64, lock: bool) -> StoreResult<Option<Crop>> {
        let query = format!(
            "SELECT {CROP_COLUMNS} FROM crops WHERE id = $1{}",
            lock_clause(lock)
        );
        let crop = sqlx::query_as::<_, Crop>(&query)
            .bind(crop_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(crop)
    }

    async fn crops_in_batch(&mut self, batch: &BatchRef, lock: bool) -> StoreResult<Vec<Crop>> {
        let crops = match batch {
            BatchRef::Explicit(batch_id) => {
                let query = format!(
                    "SELECT {CROP_COLUMNS} FROM crops WHERE crop_batch_id = $1 ORDER BY id{}",
                    lock_clause(lock)
                );
                sqlx::query_as::<_, Crop>(&query)
                    .bind(batch_id)
                    .fetch_all(&mut *self.tx)
                    .await?
            }
            BatchRef::Implicit(key) => {
                let query = format!(
                    "SELECT {CROP_COLUMNS} FROM crops \
                     WHERE crop_batch_id IS NULL \
                       AND recipe_id = $1 \
                       AND germination_at IS NOT DISTINCT FROM $2 \
                       AND current_stage_id = $3 \
                     ORDER BY id{}",
                    lock_clause(lock)
                );
                sqlx::query_as::<_, Crop>(&query)
                    .bind(key.recipe_id)
                    .bind(key.germination_at)
                    .bind(key.stage_id)
                    .fetch_all(&mut *self.tx)
                    .await?
            }
        };

        Ok(crops)
    }

    async fn insert_crop(&mut self, crop: NewCropRow) -> StoreResult<Crop> {
        let query = format!(
            "INSERT INTO crops \
                (recipe_id, current_stage_id, tray_number, soaking_at, germination_at, \
                 requires_soaking, crop_batch_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {CROP_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Crop>(&query)
            .bind(crop.recipe_id)
            .bind(crop.current_stage_id)
            .bind(&crop.tray_number)
            .bind(crop.soaking_at)
            .bind(crop.germination_at)
            .bind(crop.requires_soaking)
            .bind(crop.crop_batch_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| crop_write_error(e, crop.tray_number.as_deref()))?;

        Ok(created)
    }

    async fn update_crop(&mut self, crop: &Crop) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE crops
            SET current_stage_id = $2,
                tray_number = $3,
                soaking_at = $4,
                germination_at = $5,
                blackout_at = $6,
                light_at = $7,
                harvested_at = $8,
                watering_suspended_at = $9,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(crop.id)
        .bind(crop.current_stage_id)
        .bind(&crop.tray_number)
        .bind(crop.soaking_at)
        .bind(crop.germination_at)
        .bind(crop.blackout_at)
        .bind(crop.light_at)
        .bind(crop.harvested_at)
        .bind(crop.watering_suspended_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| crop_write_error(e, crop.tray_number.as_deref()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                entity: "crop",
                id: crop.id,
            });
        }
        Ok(())
    }

    async fn tray_numbers_in_use(&mut self, exclude: &[i64]) -> StoreResult<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT c.tray_number, c.id
            FROM crops c
            INNER JOIN crop_stages s ON s.id = c.current_stage_id
            WHERE c.tray_number IS NOT NULL
              AND s.code <> 'harvested'
              AND NOT (c.id = ANY($1))
            "#,
        )
        .bind(exclude)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn harvest_count(&mut self, crop_id: i64) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM harvests WHERE crop_id = $1")
            .bind(crop_id)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(count)
    }

    async fn insert_transition_record(
        &mut self,
        record: NewStageTransitionRecord,
    ) -> StoreResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO stage_transition_records
                (kind, origin, batch_id, from_stage_id, to_stage_id, transition_at,
                 recorded_at, succeeded_count, failed_count, failed_crops, reason, actor)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(record.kind.to_string())
        .bind(record.origin.to_string())
        .bind(&record.batch_id)
        .bind(record.from_stage_id)
        .bind(record.to_stage_id)
        .bind(record.transition_at)
        .bind(record.recorded_at)
        .bind(record.succeeded_count)
        .bind(record.failed_count)
        .bind(Json(&record.failed_crops))
        .bind(&record.reason)
        .bind(&record.actor)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn insert_crop_entry(&mut self, entry: &CropTransitionEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO crop_stage_history
                (record_id, crop_id, from_stage, to_stage, transition_at, tray_number)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.record_id)
        .bind(entry.crop_id)
        .bind(entry.from_stage.to_string())
        .bind(entry.to_stage.to_string())
        .bind(entry.transition_at)
        .bind(&entry.tray_number)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn active_tasks_for(
        &mut self,
        crop_ids: &[i64],
        batch_identifiers: &[String],
    ) -> StoreResult<Vec<ScheduledTask>> {
        let query =
            format!("SELECT {TASK_COLUMNS} FROM crop_tasks WHERE {TASK_REFERENCE_FILTER} ORDER BY due_at");
        let rows = sqlx::query_as::<_, TaskRow>(&query)
            .bind(crop_ids)
            .bind(batch_identifiers)
            .fetch_all(&mut *self.tx)
            .await?;

        tasks_from_rows(rows)
    }

    async fn delete_active_tasks_for(
        &mut self,
        crop_ids: &[i64],
        batch_identifiers: &[String],
    ) -> StoreResult<u64> {
        let query = format!("DELETE FROM crop_tasks WHERE {TASK_REFERENCE_FILTER}");
        let result = sqlx::query(&query)
            .bind(crop_ids)
            .bind(batch_identifiers)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert_task(&mut self, task: NewScheduledTask) -> StoreResult<ScheduledTask> {
        let query = format!(
            "INSERT INTO crop_tasks (resource_type, task_name, conditions, due_at, is_active) \
             VALUES ($1, $2, $3, $4, true) \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(&task.resource_type)
            .bind(task.task_name.to_string())
            .bind(Json(&task.conditions))
            .bind(task.due_at)
            .fetch_one(&mut *self.tx)
            .await?;

        ScheduledTask::try_from(row)
    }

    async fn lock_task(&mut self, task_id: i64) -> StoreResult<Option<ScheduledTask>> {
        let query = format!("SELECT {TASK_COLUMNS} FROM crop_tasks WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(task_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(ScheduledTask::try_from).transpose()
    }

    async fn deactivate_task(&mut self, task_id: i64, ran_at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE crop_tasks SET is_active = false, last_run_at = $2 WHERE id = $1",
        )
        .bind(task_id)
        .bind(ran_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                entity: "task",
                id: task_id,
            });
        }
        Ok(())
    }

    async fn due_tasks(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ScheduledTask>> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM crop_tasks \
             WHERE is_active = true AND due_at <= $1 \
             ORDER BY due_at, id \
             LIMIT $2"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;

        tasks_from_rows(rows)
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_row_conversion() {
        let row = StageRow {
            id: 3,
            code: "blackout".to_string(),
            sort_order: 3,
            is_active: false,
        };
        let stage = Stage::try_from(row).unwrap();
        assert_eq!(stage.code, crate::models::StageCode::Blackout);
        assert!(!stage.is_active);

        let bad = StageRow {
            id: 9,
            code: "sprouting".to_string(),
            sort_order: 9,
            is_active: true,
        };
        assert!(matches!(
            Stage::try_from(bad),
            Err(StoreError::InvalidData(_))
        ));
    }

    #[test]
    fn test_lock_clause() {
        assert_eq!(lock_clause(true), " FOR UPDATE");
        assert_eq!(lock_clause(false), "");
    }
}
