use async_trait::async_trait;
use openpenpal_core::courier::{Courier, CourierStatus};
use openpenpal_core::error::CoreError;
use openpenpal_core::opcode::{OpCode, Prefix};
use openpenpal_core::ports::{CourierStore, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db_err;
use crate::sqlx_types::{row_err, PgCourierRow};

pub struct PgCourierStore {
    pool: PgPool,
}

impl PgCourierStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COURIER: &str = "SELECT id, user_id, level, managed_prefix, status, task_count, \
                              points, created_at, updated_at FROM couriers";

fn rows_to_couriers(rows: Vec<PgCourierRow>) -> Result<Vec<Courier>> {
    rows.into_iter()
        .map(|r| Courier::try_from(r).map_err(row_err))
        .collect()
}

#[async_trait]
impl CourierStore for PgCourierStore {
    async fn create_courier(&self, courier: &Courier) -> Result<()> {
        sqlx::query(
            "INSERT INTO couriers (id, user_id, level, managed_prefix, status, task_count, \
             points, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(courier.id)
        .bind(courier.user_id)
        .bind(courier.level as i16)
        .bind(courier.managed_prefix.as_str())
        .bind(courier.status.as_str())
        .bind(courier.task_count)
        .bind(courier.points)
        .bind(courier.created_at)
        .bind(courier.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_courier(&self, id: Uuid) -> Result<Courier> {
        let row = sqlx::query_as::<_, PgCourierRow>(&format!("{SELECT_COURIER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::NotFound(format!("courier {id}")))?;
        Courier::try_from(row).map_err(row_err)
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Courier>> {
        let row =
            sqlx::query_as::<_, PgCourierRow>(&format!("{SELECT_COURIER} WHERE user_id = $1"))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        row.map(|r| Courier::try_from(r).map_err(row_err))
            .transpose()
    }

    async fn update_status(&self, id: Uuid, status: CourierStatus) -> Result<()> {
        let result =
            sqlx::query("UPDATE couriers SET status = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("courier {id}")));
        }
        Ok(())
    }

    async fn list_subordinates(&self, parent_prefix: &Prefix, level: u8) -> Result<Vec<Courier>> {
        let rows = sqlx::query_as::<_, PgCourierRow>(&format!(
            "{SELECT_COURIER} WHERE level = $1 AND managed_prefix LIKE $2 || '%' \
             AND length(managed_prefix) > length($2)"
        ))
        .bind(level as i16)
        .bind(parent_prefix.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows_to_couriers(rows)
    }

    async fn list_candidates(&self, op_code: &OpCode, min_level: u8) -> Result<Vec<Courier>> {
        let rows = sqlx::query_as::<_, PgCourierRow>(&format!(
            "{SELECT_COURIER} WHERE status = 'approved' AND level >= $1 \
             AND $2 LIKE managed_prefix || '%'"
        ))
        .bind(min_level as i16)
        .bind(op_code.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows_to_couriers(rows)
    }

    async fn record_task_result(&self, id: Uuid, points: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE couriers SET task_count = task_count + 1, points = points + $2, \
             updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(points)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("courier {id}")));
        }
        Ok(())
    }
}
