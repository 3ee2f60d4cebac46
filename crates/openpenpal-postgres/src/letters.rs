use async_trait::async_trait;
use openpenpal_core::error::CoreError;
use openpenpal_core::letter::{Letter, LetterStatus, LetterVisibility};
use openpenpal_core::ports::{LetterStore, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db_err;
use crate::sqlx_types::{row_err, PgLetterRow};

pub struct PgLetterStore {
    pool: PgPool,
}

impl PgLetterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_LETTER: &str =
    "SELECT id, user_id, title, content, style, status, visibility, sender_op_code, \
     recipient_op_code, like_count, share_count, view_count, created_at, updated_at FROM letters";

fn visibility_str(v: LetterVisibility) -> &'static str {
    match v {
        LetterVisibility::Private => "private",
        LetterVisibility::Public => "public",
    }
}

#[async_trait]
impl LetterStore for PgLetterStore {
    async fn create_letter(&self, letter: &Letter) -> Result<()> {
        sqlx::query(
            "INSERT INTO letters (id, user_id, title, content, style, status, visibility, \
             sender_op_code, recipient_op_code, like_count, share_count, view_count, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(letter.id)
        .bind(letter.user_id)
        .bind(&letter.title)
        .bind(&letter.content)
        .bind(&letter.style)
        .bind(letter.status.as_str())
        .bind(visibility_str(letter.visibility))
        .bind(letter.sender_op_code.as_ref().map(|c| c.as_str().to_string()))
        .bind(
            letter
                .recipient_op_code
                .as_ref()
                .map(|c| c.as_str().to_string()),
        )
        .bind(letter.like_count)
        .bind(letter.share_count)
        .bind(letter.view_count)
        .bind(letter.created_at)
        .bind(letter.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_letter(&self, id: Uuid) -> Result<Letter> {
        let row = sqlx::query_as::<_, PgLetterRow>(&format!("{SELECT_LETTER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::NotFound(format!("letter {id}")))?;
        Letter::try_from(row).map_err(row_err)
    }

    async fn list_by_owner(&self, user_id: Uuid) -> Result<Vec<Letter>> {
        let rows = sqlx::query_as::<_, PgLetterRow>(&format!(
            "{SELECT_LETTER} WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter()
            .map(|r| Letter::try_from(r).map_err(row_err))
            .collect()
    }

    async fn update_letter_status(&self, id: Uuid, status: LetterStatus) -> Result<()> {
        let result =
            sqlx::query("UPDATE letters SET status = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("letter {id}")));
        }
        Ok(())
    }
}
