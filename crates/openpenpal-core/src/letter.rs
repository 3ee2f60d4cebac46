//! Letter, barcode (LetterCode) and envelope entities.
//!
//! A Letter owns at most one LetterCode; the LetterCode owns the scan
//! timeline and carries the physical object's status. `Letter.status` is a
//! denormalized projection of the latest scan.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::opcode::OpCode;

pub const BARCODE_PREFIX: &str = "OP";
pub const BARCODE_SUFFIX_LEN: usize = 10;

// ── Letter ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LetterStatus {
    Draft,
    Generated,
    InTransit,
    Delivered,
    Read,
    Archived,
}

impl LetterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Generated => "generated",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "generated" => Some(Self::Generated),
            "in_transit" => Some(Self::InTransit),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Projection of a barcode state onto the letter lifecycle. Failed and
    /// cancelled physical objects park the letter in its archived branch.
    pub fn from_barcode(status: BarcodeStatus) -> Self {
        match status {
            BarcodeStatus::Unused => Self::Draft,
            BarcodeStatus::Bound => Self::Generated,
            BarcodeStatus::Picked | BarcodeStatus::InTransit => Self::InTransit,
            BarcodeStatus::Delivered => Self::Delivered,
            BarcodeStatus::Failed | BarcodeStatus::Cancelled => Self::Archived,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LetterVisibility {
    Private,
    Public,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Letter {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub content: String,
    pub style: Option<String>,
    pub status: LetterStatus,
    pub visibility: LetterVisibility,
    pub sender_op_code: Option<OpCode>,
    pub recipient_op_code: Option<OpCode>,
    pub like_count: i64,
    pub share_count: i64,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Barcode (LetterCode) ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeStatus {
    Unused,
    Bound,
    Picked,
    InTransit,
    Delivered,
    Failed,
    Cancelled,
}

impl BarcodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unused => "unused",
            Self::Bound => "bound",
            Self::Picked => "picked",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unused" => Some(Self::Unused),
            "bound" => Some(Self::Bound),
            "picked" => Some(Self::Picked),
            "in_transit" => Some(Self::InTransit),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Cancelled)
    }
}

/// Barcode row. `seq` is the per-barcode scan sequence; every transition
/// CASes on (status, seq) so concurrent scans serialize and the loser gets
/// `StaleTransition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetterCode {
    pub code: String,
    pub letter_id: Option<Uuid>,
    pub envelope_id: Option<Uuid>,
    pub recipient_op_code: Option<OpCode>,
    pub status: BarcodeStatus,
    pub seq: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LetterCode {
    pub fn fresh(code: String, now: DateTime<Utc>) -> Result<Self, CoreError> {
        validate_barcode(&code)?;
        Ok(Self {
            code,
            letter_id: None,
            envelope_id: None,
            recipient_op_code: None,
            status: BarcodeStatus::Unused,
            seq: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Barcode wire format: `OP` + 10 chars `[A-Z0-9]`, case-sensitive.
pub fn validate_barcode(code: &str) -> Result<(), CoreError> {
    let suffix = code.strip_prefix(BARCODE_PREFIX).ok_or_else(|| {
        CoreError::Validation(format!("barcode must start with {BARCODE_PREFIX}: {code}"))
    })?;
    if suffix.len() != BARCODE_SUFFIX_LEN {
        return Err(CoreError::Validation(format!(
            "barcode must be {} characters, got {}",
            BARCODE_PREFIX.len() + BARCODE_SUFFIX_LEN,
            code.len()
        )));
    }
    if !suffix
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(CoreError::Validation(format!(
            "barcode contains characters outside [A-Z0-9]: {code}"
        )));
    }
    Ok(())
}

/// Mint a new barcode string. Uniqueness is enforced by the store on insert.
pub fn generate_barcode<R: Rng>(rng: &mut R) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let suffix: String = (0..BARCODE_SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{BARCODE_PREFIX}{suffix}")
}

// ── Envelope ──────────────────────────────────────────────────

/// A physical envelope, purchased once, usable exactly once: it binds to
/// exactly one LetterCode on use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub user_id: Uuid,
    pub design: String,
    pub used_by_code: Option<String>,
    pub purchased_at: DateTime<Utc>,
}

impl Envelope {
    pub fn is_used(&self) -> bool {
        self.used_by_code.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barcode_format() {
        assert!(validate_barcode("OPABCDEFGH12").is_ok());
        assert!(validate_barcode("XXABCDEFGH12").is_err());
        assert!(validate_barcode("OPABCDEFGH1").is_err());
        assert!(validate_barcode("OPabcdefgh12").is_err());
    }

    #[test]
    fn generated_codes_validate() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let code = generate_barcode(&mut rng);
            validate_barcode(&code).unwrap();
        }
    }

    #[test]
    fn letter_projection_of_barcode_states() {
        assert_eq!(
            LetterStatus::from_barcode(BarcodeStatus::Bound),
            LetterStatus::Generated
        );
        assert_eq!(
            LetterStatus::from_barcode(BarcodeStatus::Picked),
            LetterStatus::InTransit
        );
        assert_eq!(
            LetterStatus::from_barcode(BarcodeStatus::Delivered),
            LetterStatus::Delivered
        );
        assert_eq!(
            LetterStatus::from_barcode(BarcodeStatus::Cancelled),
            LetterStatus::Archived
        );
    }
}
