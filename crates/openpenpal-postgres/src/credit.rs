//! Credit ledger adapter. `apply` locks the account row
//! (`SELECT ... FOR UPDATE`) for the whole mutation: balance check,
//! transaction append, and account update commit together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openpenpal_core::credit::{CreditAccount, CreditTransaction};
use openpenpal_core::error::CoreError;
use openpenpal_core::ports::{CreditStore, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db_err;
use crate::sqlx_types::{PgAccountRow, PgTransactionRow};

pub struct PgCreditStore {
    pool: PgPool,
}

impl PgCreditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_ACCOUNT: &str =
    "SELECT user_id, balance, lifetime_earned, level, updated_at FROM credit_accounts";
const SELECT_TX: &str = "SELECT id, user_id, amount, tx_type, reference, balance_after, \
                         created_at, expires_at FROM credit_transactions";

#[async_trait]
impl CreditStore for PgCreditStore {
    async fn get_account(&self, user_id: Uuid) -> Result<Option<CreditAccount>> {
        let row =
            sqlx::query_as::<_, PgAccountRow>(&format!("{SELECT_ACCOUNT} WHERE user_id = $1"))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(CreditAccount::from))
    }

    async fn apply(
        &self,
        user_id: Uuid,
        amount: i64,
        tx_type: &str,
        reference: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<CreditTransaction> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO credit_accounts (user_id, balance, lifetime_earned, level, updated_at) \
             VALUES ($1, 0, 0, 1, $2) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let account = sqlx::query_as::<_, PgAccountRow>(&format!(
            "{SELECT_ACCOUNT} WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let new_balance = account.balance + amount;
        if new_balance < 0 {
            return Err(CoreError::InsufficientCredit {
                balance: account.balance,
                requested: -amount,
            });
        }
        let lifetime = if amount > 0 {
            account.lifetime_earned + amount
        } else {
            account.lifetime_earned
        };

        let record = CreditTransaction {
            id: Uuid::new_v4(),
            user_id,
            amount,
            tx_type: tx_type.to_string(),
            reference: reference.to_string(),
            balance_after: new_balance,
            created_at: now,
            expires_at,
        };
        sqlx::query(
            "INSERT INTO credit_transactions (id, user_id, amount, tx_type, reference, \
             balance_after, created_at, expires_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.amount)
        .bind(&record.tx_type)
        .bind(&record.reference)
        .bind(record.balance_after)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "UPDATE credit_accounts SET balance = $2, lifetime_earned = $3, \
             level = $4, updated_at = $5 WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(new_balance)
        .bind(lifetime)
        .bind(CreditAccount::level_for(lifetime))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(record)
    }

    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>> {
        let rows = sqlx::query_as::<_, PgTransactionRow>(&format!(
            "{SELECT_TX} WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(CreditTransaction::from).collect())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<CreditTransaction>> {
        let row = sqlx::query_as::<_, PgTransactionRow>(&format!(
            "{SELECT_TX} WHERE reference = $1 LIMIT 1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(CreditTransaction::from))
    }

    async fn list_expired_unreversed(&self, now: DateTime<Utc>) -> Result<Vec<CreditTransaction>> {
        let rows = sqlx::query_as::<_, PgTransactionRow>(
            "SELECT t.id, t.user_id, t.amount, t.tx_type, t.reference, t.balance_after, \
             t.created_at, t.expires_at \
             FROM credit_transactions t \
             WHERE t.amount > 0 AND t.tx_type <> 'expired' \
               AND t.expires_at IS NOT NULL AND t.expires_at <= $1 \
               AND NOT EXISTS (SELECT 1 FROM credit_transactions r \
                               WHERE r.reference = 'expired:' || t.id::text)",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(CreditTransaction::from).collect())
    }
}
