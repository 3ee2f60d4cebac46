//! Courier entity: a user promoted into the four-level territorial
//! hierarchy, owning a managed OP-Code prefix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::opcode::{OpCode, Prefix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourierStatus {
    Pending,
    Approved,
    Suspended,
}

impl CourierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Suspended => "suspended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// Courier row, exclusive 1-1 with a `courier_level_N` user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub user_id: Uuid,
    pub level: u8,
    pub managed_prefix: Prefix,
    pub status: CourierStatus,
    pub task_count: i64,
    pub points: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    /// A courier may only act on codes inside its managed prefix.
    /// Suspended and pending couriers may act on nothing.
    pub fn can_act_on(&self, op_code: &OpCode) -> bool {
        self.status == CourierStatus::Approved && op_code.matches_prefix(&self.managed_prefix)
    }

    pub fn require_scope(&self, op_code: &OpCode) -> Result<(), CoreError> {
        if self.can_act_on(op_code) {
            Ok(())
        } else {
            Err(CoreError::ScopeViolation(format!(
                "courier {} (prefix {}) cannot act on {op_code}",
                self.id, self.managed_prefix
            )))
        }
    }
}

/// Courier facts carried inside the bearer token so the edge can gate
/// without a store round-trip. The authoritative record stays in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierClaims {
    pub courier_id: Uuid,
    pub level: u8,
    pub managed_prefix: Prefix,
}

impl From<&Courier> for CourierClaims {
    fn from(c: &Courier) -> Self {
        Self {
            courier_id: c.id,
            level: c.level,
            managed_prefix: c.managed_prefix.clone(),
        }
    }
}

/// Aggregate read model for `GET /courier/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierStats {
    pub courier_id: Uuid,
    pub level: u8,
    pub managed_prefix: Prefix,
    pub status: CourierStatus,
    pub task_count: i64,
    pub points: i64,
    pub active_tasks: i64,
    pub delivered_tasks: i64,
}
