//! Row structs and their conversions into core domain types. Enum
//! columns come back as text; a bad value in the database is an internal
//! error, not a panic.

use chrono::{DateTime, Utc};
use openpenpal_core::courier::{Courier, CourierStatus};
use openpenpal_core::credit::{CreditAccount, CreditTask, CreditTaskStatus, CreditTransaction};
use openpenpal_core::letter::{
    BarcodeStatus, Envelope, Letter, LetterCode, LetterStatus, LetterVisibility,
};
use openpenpal_core::opcode::{OpCode, Prefix};
use openpenpal_core::scan::{ScanEvent, ScanType};
use openpenpal_core::task::{CourierTask, TaskPriority, TaskStatus};
use openpenpal_core::user::{User, UserRole};
use uuid::Uuid;

fn bad(column: &str, value: &str) -> String {
    format!("unexpected {column} in database: {value}")
}

#[derive(sqlx::FromRow)]
pub struct PgUserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub school_code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgUserRow> for User {
    type Error = String;

    fn try_from(r: PgUserRow) -> Result<Self, String> {
        Ok(User {
            id: r.id,
            username: r.username,
            email: r.email,
            password_hash: r.password_hash,
            role: UserRole::from_str(&r.role).ok_or_else(|| bad("role", &r.role))?,
            school_code: r.school_code,
            is_active: r.is_active,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub struct PgCourierRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub level: i16,
    pub managed_prefix: String,
    pub status: String,
    pub task_count: i64,
    pub points: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgCourierRow> for Courier {
    type Error = String;

    fn try_from(r: PgCourierRow) -> Result<Self, String> {
        Ok(Courier {
            id: r.id,
            user_id: r.user_id,
            level: r.level as u8,
            managed_prefix: Prefix::parse(&r.managed_prefix)
                .map_err(|_| bad("managed_prefix", &r.managed_prefix))?,
            status: CourierStatus::from_str(&r.status).ok_or_else(|| bad("status", &r.status))?,
            task_count: r.task_count,
            points: r.points,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub struct PgLetterRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub content: String,
    pub style: Option<String>,
    pub status: String,
    pub visibility: String,
    pub sender_op_code: Option<String>,
    pub recipient_op_code: Option<String>,
    pub like_count: i64,
    pub share_count: i64,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn opt_op_code(column: &str, value: Option<String>) -> Result<Option<OpCode>, String> {
    value
        .map(|s| OpCode::parse(&s).map_err(|_| bad(column, &s)))
        .transpose()
}

impl TryFrom<PgLetterRow> for Letter {
    type Error = String;

    fn try_from(r: PgLetterRow) -> Result<Self, String> {
        let visibility = match r.visibility.as_str() {
            "private" => LetterVisibility::Private,
            "public" => LetterVisibility::Public,
            other => return Err(bad("visibility", other)),
        };
        Ok(Letter {
            id: r.id,
            user_id: r.user_id,
            title: r.title,
            content: r.content,
            style: r.style,
            status: LetterStatus::from_str(&r.status).ok_or_else(|| bad("status", &r.status))?,
            visibility,
            sender_op_code: opt_op_code("sender_op_code", r.sender_op_code)?,
            recipient_op_code: opt_op_code("recipient_op_code", r.recipient_op_code)?,
            like_count: r.like_count,
            share_count: r.share_count,
            view_count: r.view_count,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub struct PgBarcodeRow {
    pub code: String,
    pub letter_id: Option<Uuid>,
    pub envelope_id: Option<Uuid>,
    pub recipient_op_code: Option<String>,
    pub status: String,
    pub seq: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgBarcodeRow> for LetterCode {
    type Error = String;

    fn try_from(r: PgBarcodeRow) -> Result<Self, String> {
        Ok(LetterCode {
            code: r.code,
            letter_id: r.letter_id,
            envelope_id: r.envelope_id,
            recipient_op_code: opt_op_code("recipient_op_code", r.recipient_op_code)?,
            status: BarcodeStatus::from_str(&r.status).ok_or_else(|| bad("status", &r.status))?,
            seq: r.seq,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub struct PgEnvelopeRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub design: String,
    pub used_by_code: Option<String>,
    pub purchased_at: DateTime<Utc>,
}

impl From<PgEnvelopeRow> for Envelope {
    fn from(r: PgEnvelopeRow) -> Self {
        Envelope {
            id: r.id,
            user_id: r.user_id,
            design: r.design,
            used_by_code: r.used_by_code,
            purchased_at: r.purchased_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub struct PgScanRow {
    pub id: Uuid,
    pub barcode: String,
    pub seq: i32,
    pub scanned_by: Uuid,
    pub scan_type: String,
    pub op_code: Option<String>,
    pub old_status: String,
    pub new_status: String,
    pub location: Option<String>,
    pub note: Option<String>,
    pub device: Option<String>,
    pub ip: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

impl TryFrom<PgScanRow> for ScanEvent {
    type Error = String;

    fn try_from(r: PgScanRow) -> Result<Self, String> {
        Ok(ScanEvent {
            id: r.id,
            barcode: r.barcode,
            seq: r.seq,
            scanned_by: r.scanned_by,
            scan_type: ScanType::from_str(&r.scan_type)
                .ok_or_else(|| bad("scan_type", &r.scan_type))?,
            op_code: opt_op_code("op_code", r.op_code)?,
            old_status: BarcodeStatus::from_str(&r.old_status)
                .ok_or_else(|| bad("old_status", &r.old_status))?,
            new_status: BarcodeStatus::from_str(&r.new_status)
                .ok_or_else(|| bad("new_status", &r.new_status))?,
            location: r.location,
            note: r.note,
            device: r.device,
            ip: r.ip,
            timestamp: r.scanned_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub struct PgTaskRow {
    pub id: Uuid,
    pub courier_id: Option<Uuid>,
    pub letter_code: String,
    pub pickup_op_code: String,
    pub delivery_op_code: String,
    pub status: String,
    pub priority: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgTaskRow> for CourierTask {
    type Error = String;

    fn try_from(r: PgTaskRow) -> Result<Self, String> {
        Ok(CourierTask {
            id: r.id,
            courier_id: r.courier_id,
            letter_code: r.letter_code,
            pickup_op_code: OpCode::parse(&r.pickup_op_code)
                .map_err(|_| bad("pickup_op_code", &r.pickup_op_code))?,
            delivery_op_code: OpCode::parse(&r.delivery_op_code)
                .map_err(|_| bad("delivery_op_code", &r.delivery_op_code))?,
            status: TaskStatus::from_str(&r.status).ok_or_else(|| bad("status", &r.status))?,
            priority: TaskPriority::from_str(&r.priority)
                .ok_or_else(|| bad("priority", &r.priority))?,
            attempts: r.attempts,
            max_attempts: r.max_attempts,
            created_at: r.created_at,
            assigned_at: r.assigned_at,
            completed_at: r.completed_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub struct PgAccountRow {
    pub user_id: Uuid,
    pub balance: i64,
    pub lifetime_earned: i64,
    pub level: i32,
    pub updated_at: DateTime<Utc>,
}

impl From<PgAccountRow> for CreditAccount {
    fn from(r: PgAccountRow) -> Self {
        CreditAccount {
            user_id: r.user_id,
            balance: r.balance,
            lifetime_earned: r.lifetime_earned,
            level: r.level,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub struct PgTransactionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub tx_type: String,
    pub reference: String,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<PgTransactionRow> for CreditTransaction {
    fn from(r: PgTransactionRow) -> Self {
        CreditTransaction {
            id: r.id,
            user_id: r.user_id,
            amount: r.amount,
            tx_type: r.tx_type,
            reference: r.reference,
            balance_after: r.balance_after,
            created_at: r.created_at,
            expires_at: r.expires_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub struct PgCreditTaskRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_type: String,
    pub points: i64,
    pub description: String,
    pub reference: String,
    pub status: String,
    pub priority: i16,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl TryFrom<PgCreditTaskRow> for CreditTask {
    type Error = String;

    fn try_from(r: PgCreditTaskRow) -> Result<Self, String> {
        Ok(CreditTask {
            id: r.id,
            user_id: r.user_id,
            task_type: r.task_type,
            points: r.points,
            description: r.description,
            reference: r.reference,
            status: CreditTaskStatus::from_str(&r.status)
                .ok_or_else(|| bad("status", &r.status))?,
            priority: r.priority,
            attempts: r.attempts,
            max_attempts: r.max_attempts,
            scheduled_at: r.scheduled_at,
            created_at: r.created_at,
            completed_at: r.completed_at,
            failed_at: r.failed_at,
            error: r.error,
            metadata: r.metadata,
        })
    }
}

pub(crate) fn row_err(e: String) -> openpenpal_core::error::CoreError {
    openpenpal_core::error::CoreError::Internal(anyhow::anyhow!(e))
}
