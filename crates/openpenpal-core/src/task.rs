//! Courier delivery tasks.
//!
//! A task moves one barcoded letter from pickup to delivery. Tasks
//! reference the barcode by value (the code string) so they survive
//! soft-deletes of the letter row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::opcode::OpCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Accepted,
    Collected,
    InTransit,
    Delivered,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Accepted => "accepted",
            Self::Collected => "collected",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "accepted" => Some(Self::Accepted),
            "collected" => Some(Self::Collected),
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

    /// Task state machine. `timeout` (assigned → pending) and the letter
    /// projection (collected/in_transit → delivered/failed) are driven by
    /// the dispatcher; this table is the single legality check.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Cancelled)
                | (Assigned, Accepted)
                | (Assigned, Pending)
                | (Assigned, Cancelled)
                | (Accepted, Collected)
                | (Accepted, Cancelled)
                | (Collected, InTransit)
                | (Collected, Delivered)
                | (Collected, Failed)
                | (InTransit, Delivered)
                | (InTransit, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::Urgent => "urgent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    /// Listing order: urgent > normal > low.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Urgent => 2,
            Self::Normal => 1,
            Self::Low => 0,
        }
    }
}

/// Invariant: `courier_id` is set iff status is not pending/cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierTask {
    pub id: Uuid,
    pub courier_id: Option<Uuid>,
    pub letter_code: String,
    pub pickup_op_code: OpCode,
    pub delivery_op_code: OpCode,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CourierTask {
    pub fn require_transition(&self, next: TaskStatus) -> Result<(), CoreError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "task {} cannot move {} -> {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )))
        }
    }
}

/// Sort key for task listings: urgent first, then FIFO by creation.
pub fn listing_order(a: &CourierTask, b: &CourierTask) -> std::cmp::Ordering {
    b.priority
        .rank()
        .cmp(&a.priority.rank())
        .then(a.created_at.cmp(&b.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: TaskStatus, priority: TaskPriority, created: DateTime<Utc>) -> CourierTask {
        CourierTask {
            id: Uuid::new_v4(),
            courier_id: None,
            letter_code: "OPABCDEFGH12".into(),
            pickup_op_code: OpCode::parse("PK5F01").unwrap(),
            delivery_op_code: OpCode::parse("PK5F3D").unwrap(),
            status,
            priority,
            attempts: 0,
            max_attempts: 3,
            created_at: created,
            assigned_at: None,
            completed_at: None,
            updated_at: created,
        }
    }

    #[test]
    fn lifecycle_edges() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(Pending)); // reaper timeout
        assert!(Assigned.can_transition_to(Accepted));
        assert!(Accepted.can_transition_to(Collected));
        assert!(Collected.can_transition_to(Delivered));
        assert!(InTransit.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Accepted));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Accepted.can_transition_to(Assigned));
    }

    #[test]
    fn listing_orders_urgent_then_fifo() {
        let t0 = Utc::now();
        let old_normal = task(TaskStatus::Pending, TaskPriority::Normal, t0);
        let new_urgent = task(
            TaskStatus::Pending,
            TaskPriority::Urgent,
            t0 + chrono::Duration::minutes(5),
        );
        let mut tasks = vec![old_normal.clone(), new_urgent.clone()];
        tasks.sort_by(listing_order);
        assert_eq!(tasks[0].id, new_urgent.id);
        assert_eq!(tasks[1].id, old_normal.id);
    }
}
