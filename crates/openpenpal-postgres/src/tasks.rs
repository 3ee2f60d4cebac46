//! Courier-task adapter. `cas_update` is the optimistic lock: the whole
//! row is rewritten only when the stored status still matches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openpenpal_core::error::CoreError;
use openpenpal_core::opcode::Prefix;
use openpenpal_core::ports::{Result, TaskStore};
use openpenpal_core::task::{CourierTask, TaskStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db_err;
use crate::sqlx_types::{row_err, PgTaskRow};

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_TASK: &str =
    "SELECT id, courier_id, letter_code, pickup_op_code, delivery_op_code, status, priority, \
     attempts, max_attempts, created_at, assigned_at, completed_at, updated_at FROM courier_tasks";

fn rows_to_tasks(rows: Vec<PgTaskRow>) -> Result<Vec<CourierTask>> {
    rows.into_iter()
        .map(|r| CourierTask::try_from(r).map_err(row_err))
        .collect()
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create_task(&self, task: &CourierTask) -> Result<()> {
        sqlx::query(
            "INSERT INTO courier_tasks (id, courier_id, letter_code, pickup_op_code, \
             delivery_op_code, status, priority, attempts, max_attempts, created_at, \
             assigned_at, completed_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(task.id)
        .bind(task.courier_id)
        .bind(&task.letter_code)
        .bind(task.pickup_op_code.as_str())
        .bind(task.delivery_op_code.as_str())
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(task.attempts)
        .bind(task.max_attempts)
        .bind(task.created_at)
        .bind(task.assigned_at)
        .bind(task.completed_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<CourierTask> {
        let row = sqlx::query_as::<_, PgTaskRow>(&format!("{SELECT_TASK} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::NotFound(format!("task {id}")))?;
        CourierTask::try_from(row).map_err(row_err)
    }

    async fn cas_update(
        &self,
        id: Uuid,
        expected: TaskStatus,
        updated: &CourierTask,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE courier_tasks SET courier_id = $3, status = $4, priority = $5, \
             attempts = $6, assigned_at = $7, completed_at = $8, updated_at = $9 \
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(updated.courier_id)
        .bind(updated.status.as_str())
        .bind(updated.priority.as_str())
        .bind(updated.attempts)
        .bind(updated.assigned_at)
        .bind(updated.completed_at)
        .bind(updated.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM courier_tasks WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            return Err(match exists {
                Some(_) => CoreError::StaleTransition(format!(
                    "task {id} no longer {}",
                    expected.as_str()
                )),
                None => CoreError::NotFound(format!("task {id}")),
            });
        }
        Ok(())
    }

    async fn find_active_by_letter_code(&self, code: &str) -> Result<Option<CourierTask>> {
        let row = sqlx::query_as::<_, PgTaskRow>(&format!(
            "{SELECT_TASK} WHERE letter_code = $1 \
             AND status NOT IN ('delivered', 'failed', 'cancelled') LIMIT 1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| CourierTask::try_from(r).map_err(row_err))
            .transpose()
    }

    async fn list_pending(&self) -> Result<Vec<CourierTask>> {
        let rows =
            sqlx::query_as::<_, PgTaskRow>(&format!("{SELECT_TASK} WHERE status = 'pending'"))
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        rows_to_tasks(rows)
    }

    async fn list_assigned_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<CourierTask>> {
        let rows = sqlx::query_as::<_, PgTaskRow>(&format!(
            "{SELECT_TASK} WHERE status = 'assigned' AND assigned_at <= $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows_to_tasks(rows)
    }

    async fn list_for_couriers(&self, courier_ids: &[Uuid]) -> Result<Vec<CourierTask>> {
        let rows = sqlx::query_as::<_, PgTaskRow>(&format!(
            "{SELECT_TASK} WHERE courier_id = ANY($1)"
        ))
        .bind(courier_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows_to_tasks(rows)
    }

    async fn list_pending_matching(&self, prefix: &Prefix) -> Result<Vec<CourierTask>> {
        let rows = sqlx::query_as::<_, PgTaskRow>(&format!(
            "{SELECT_TASK} WHERE status = 'pending' AND pickup_op_code LIKE $1 || '%'"
        ))
        .bind(prefix.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows_to_tasks(rows)
    }
}
