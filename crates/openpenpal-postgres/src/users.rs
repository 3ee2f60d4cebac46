use async_trait::async_trait;
use openpenpal_core::error::CoreError;
use openpenpal_core::ports::{Result, UserStore};
use openpenpal_core::user::{User, UserRole};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db_err;
use crate::sqlx_types::{row_err, PgUserRow};

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional(&self, sql: &str, value: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, PgUserRow>(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| User::try_from(r).map_err(row_err)).transpose()
    }
}

const SELECT_USER: &str = "SELECT id, username, email, password_hash, role, school_code, \
                           is_active, created_at, updated_at FROM users";

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, role, school_code, \
             is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.school_code)
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<User> {
        let row = sqlx::query_as::<_, PgUserRow>(&format!("{SELECT_USER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::NotFound(format!("user {id}")))?;
        User::try_from(row).map_err(row_err)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        self.fetch_optional(&format!("{SELECT_USER} WHERE username = $1"), username)
            .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.fetch_optional(&format!("{SELECT_USER} WHERE email = $1"), email)
            .await
    }

    async fn update_role(&self, id: Uuid, role: UserRole) -> Result<()> {
        let result = sqlx::query("UPDATE users SET role = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE users SET is_active = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(active)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }
}
