//! Credit-task queue adapter. `claim_next_due` is the cross-process
//! at-most-one-worker guarantee: the row is selected with
//! `FOR UPDATE SKIP LOCKED` and flipped to `executing` in one statement.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use openpenpal_core::credit::{CreditBatch, CreditTask};
use openpenpal_core::error::CoreError;
use openpenpal_core::ports::{CreditTaskStore, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db_err;
use crate::sqlx_types::{row_err, PgCreditTaskRow};

pub struct PgCreditTaskStore {
    pool: PgPool,
}

impl PgCreditTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_task(
        executor: impl sqlx::PgExecutor<'_>,
        task: &CreditTask,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO credit_tasks (id, user_id, task_type, points, description, reference, \
             status, priority, attempts, max_attempts, scheduled_at, created_at, completed_at, \
             failed_at, error, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(task.id)
        .bind(task.user_id)
        .bind(&task.task_type)
        .bind(task.points)
        .bind(&task.description)
        .bind(&task.reference)
        .bind(task.status.as_str())
        .bind(task.priority)
        .bind(task.attempts)
        .bind(task.max_attempts)
        .bind(task.scheduled_at)
        .bind(task.created_at)
        .bind(task.completed_at)
        .bind(task.failed_at)
        .bind(&task.error)
        .bind(&task.metadata)
        .execute(executor)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

const SELECT_CREDIT_TASK: &str =
    "SELECT id, user_id, task_type, points, description, reference, status, priority, \
     attempts, max_attempts, scheduled_at, created_at, completed_at, failed_at, error, \
     metadata FROM credit_tasks";

#[async_trait]
impl CreditTaskStore for PgCreditTaskStore {
    async fn enqueue(&self, task: &CreditTask) -> Result<()> {
        Self::insert_task(&self.pool, task).await
    }

    async fn enqueue_batch(&self, batch: &CreditBatch, tasks: &[CreditTask]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            "INSERT INTO credit_batches (id, name, task_type, user_count, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(batch.id)
        .bind(&batch.name)
        .bind(&batch.task_type)
        .bind(batch.user_count)
        .bind(batch.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        for task in tasks {
            Self::insert_task(&mut *tx, task).await?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_credit_task(&self, id: Uuid) -> Result<CreditTask> {
        let row =
            sqlx::query_as::<_, PgCreditTaskRow>(&format!("{SELECT_CREDIT_TASK} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .ok_or_else(|| CoreError::NotFound(format!("credit task {id}")))?;
        CreditTask::try_from(row).map_err(row_err)
    }

    async fn claim_next_due(&self, now: DateTime<Utc>) -> Result<Option<CreditTask>> {
        let row = sqlx::query_as::<_, PgCreditTaskRow>(
            "UPDATE credit_tasks SET status = 'executing', attempts = attempts + 1 \
             WHERE id = ( \
                 SELECT id FROM credit_tasks \
                 WHERE status IN ('pending', 'scheduled') \
                   AND (scheduled_at IS NULL OR scheduled_at <= $1) \
                 ORDER BY priority DESC, created_at ASC \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1) \
             RETURNING id, user_id, task_type, points, description, reference, status, \
                       priority, attempts, max_attempts, scheduled_at, created_at, \
                       completed_at, failed_at, error, metadata",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| CreditTask::try_from(r).map_err(row_err))
            .transpose()
    }

    async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE credit_tasks SET status = 'completed', completed_at = $2, error = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("credit task {id}")));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE credit_tasks SET status = 'failed', failed_at = $2, error = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("credit task {id}")));
        }
        Ok(())
    }

    async fn release(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE credit_tasks \
             SET status = 'pending', attempts = GREATEST(attempts - 1, 0) \
             WHERE id = $1 AND status = 'executing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn retry_failed(&self, now: DateTime<Utc>, max_age: Duration) -> Result<u64> {
        let oldest = now - max_age;
        let result = sqlx::query(
            "UPDATE credit_tasks SET status = 'pending' \
             WHERE status = 'failed' AND attempts < max_attempts AND created_at >= $1",
        )
        .bind(oldest)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn list_credit_tasks(&self, user_id: Uuid) -> Result<Vec<CreditTask>> {
        let rows = sqlx::query_as::<_, PgCreditTaskRow>(&format!(
            "{SELECT_CREDIT_TASK} WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter()
            .map(|r| CreditTask::try_from(r).map_err(row_err))
            .collect()
    }
}
