//! Barcode adapter. `bind_barcode` and `record_scan` are single database
//! transactions: the status CAS, the scan-event append and the letter
//! projection commit together or not at all.

use async_trait::async_trait;
use openpenpal_core::error::CoreError;
use openpenpal_core::letter::{Envelope, LetterCode, LetterStatus};
use openpenpal_core::opcode::OpCode;
use openpenpal_core::ports::{BarcodeStore, Result};
use openpenpal_core::scan::ScanEvent;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db_err;
use crate::sqlx_types::{row_err, PgBarcodeRow, PgEnvelopeRow, PgScanRow};

pub struct PgBarcodeStore {
    pool: PgPool,
}

impl PgBarcodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_BARCODE: &str = "SELECT code, letter_id, envelope_id, recipient_op_code, status, \
                              seq, created_at, updated_at FROM letter_codes";

async fn insert_scan(tx: &mut Transaction<'_, Postgres>, event: &ScanEvent) -> Result<()> {
    sqlx::query(
        "INSERT INTO scan_events (id, barcode, seq, scanned_by, scan_type, op_code, \
         old_status, new_status, location, note, device, ip, scanned_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(event.id)
    .bind(&event.barcode)
    .bind(event.seq)
    .bind(event.scanned_by)
    .bind(event.scan_type.as_str())
    .bind(event.op_code.as_ref().map(|c| c.as_str().to_string()))
    .bind(event.old_status.as_str())
    .bind(event.new_status.as_str())
    .bind(&event.location)
    .bind(&event.note)
    .bind(&event.device)
    .bind(&event.ip)
    .bind(event.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn project_letter(
    tx: &mut Transaction<'_, Postgres>,
    letter_id: Uuid,
    status: LetterStatus,
) -> Result<()> {
    sqlx::query("UPDATE letters SET status = $2, updated_at = now() WHERE id = $1")
        .bind(letter_id)
        .bind(status.as_str())
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl BarcodeStore for PgBarcodeStore {
    async fn create_barcode(&self, barcode: &LetterCode) -> Result<()> {
        sqlx::query(
            "INSERT INTO letter_codes (code, letter_id, envelope_id, recipient_op_code, \
             status, seq, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&barcode.code)
        .bind(barcode.letter_id)
        .bind(barcode.envelope_id)
        .bind(
            barcode
                .recipient_op_code
                .as_ref()
                .map(|c| c.as_str().to_string()),
        )
        .bind(barcode.status.as_str())
        .bind(barcode.seq)
        .bind(barcode.created_at)
        .bind(barcode.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_barcode(&self, code: &str) -> Result<LetterCode> {
        let row = sqlx::query_as::<_, PgBarcodeRow>(&format!("{SELECT_BARCODE} WHERE code = $1"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::NotFound(format!("barcode {code}")))?;
        LetterCode::try_from(row).map_err(row_err)
    }

    async fn bind_barcode(
        &self,
        code: &str,
        letter_id: Uuid,
        recipient: &OpCode,
        envelope_id: Option<Uuid>,
        event: &ScanEvent,
    ) -> Result<LetterCode> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if let Some(env_id) = envelope_id {
            let updated = sqlx::query(
                "UPDATE envelopes SET used_by_code = $2 \
                 WHERE id = $1 AND used_by_code IS NULL",
            )
            .bind(env_id)
            .bind(code)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            if updated.rows_affected() == 0 {
                let exists = sqlx::query("SELECT 1 FROM envelopes WHERE id = $1")
                    .bind(env_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
                return Err(match exists {
                    Some(_) => CoreError::Conflict(format!("envelope {env_id} already used")),
                    None => CoreError::NotFound(format!("envelope {env_id}")),
                });
            }
        }

        let updated = sqlx::query(
            "UPDATE letter_codes SET status = $2, seq = $3, letter_id = $4, envelope_id = $5, \
             recipient_op_code = $6, updated_at = $7 \
             WHERE code = $1 AND status = 'unused'",
        )
        .bind(code)
        .bind(event.new_status.as_str())
        .bind(event.seq)
        .bind(letter_id)
        .bind(envelope_id)
        .bind(recipient.as_str())
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if updated.rows_affected() == 0 {
            let row =
                sqlx::query_as::<_, PgBarcodeRow>(&format!("{SELECT_BARCODE} WHERE code = $1"))
                    .bind(code)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
            return Err(match row {
                Some(r) => CoreError::AlreadyBound(format!("barcode {code} is {}", r.status)),
                None => CoreError::NotFound(format!("barcode {code}")),
            });
        }

        insert_scan(&mut tx, event).await?;
        sqlx::query(
            "UPDATE letters SET status = $2, recipient_op_code = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(letter_id)
        .bind(LetterStatus::from_barcode(event.new_status).as_str())
        .bind(recipient.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        self.get_barcode(code).await
    }

    async fn record_scan(
        &self,
        event: &ScanEvent,
        letter_update: Option<(Uuid, LetterStatus)>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let updated = sqlx::query(
            "UPDATE letter_codes SET status = $2, seq = $3, updated_at = $4 \
             WHERE code = $1 AND status = $5 AND seq = $6",
        )
        .bind(&event.barcode)
        .bind(event.new_status.as_str())
        .bind(event.seq)
        .bind(event.timestamp)
        .bind(event.old_status.as_str())
        .bind(event.seq - 1)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if updated.rows_affected() == 0 {
            let row =
                sqlx::query_as::<_, PgBarcodeRow>(&format!("{SELECT_BARCODE} WHERE code = $1"))
                    .bind(&event.barcode)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
            return Err(match row {
                Some(r) => CoreError::StaleTransition(format!(
                    "barcode {} moved to {} seq {} under us",
                    event.barcode, r.status, r.seq
                )),
                None => CoreError::NotFound(format!("barcode {}", event.barcode)),
            });
        }

        insert_scan(&mut tx, event).await?;
        if let Some((letter_id, status)) = letter_update {
            project_letter(&mut tx, letter_id, status).await?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn timeline(&self, code: &str) -> Result<Vec<ScanEvent>> {
        let rows = sqlx::query_as::<_, PgScanRow>(
            "SELECT id, barcode, seq, scanned_by, scan_type, op_code, old_status, new_status, \
             location, note, device, ip, scanned_at \
             FROM scan_events WHERE barcode = $1 ORDER BY seq ASC",
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter()
            .map(|r| ScanEvent::try_from(r).map_err(row_err))
            .collect()
    }

    async fn create_envelope(&self, envelope: &Envelope) -> Result<()> {
        sqlx::query(
            "INSERT INTO envelopes (id, user_id, design, used_by_code, purchased_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(envelope.id)
        .bind(envelope.user_id)
        .bind(&envelope.design)
        .bind(&envelope.used_by_code)
        .bind(envelope.purchased_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_envelope(&self, id: Uuid) -> Result<Envelope> {
        let row = sqlx::query_as::<_, PgEnvelopeRow>(
            "SELECT id, user_id, design, used_by_code, purchased_at FROM envelopes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::NotFound(format!("envelope {id}")))?;
        Ok(Envelope::from(row))
    }
}
