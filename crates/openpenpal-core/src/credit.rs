//! Credit ledger rows and the asynchronous reward task queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Ledger ────────────────────────────────────────────────────

/// Account levels by lifetime earned points.
const LEVEL_THRESHOLDS: [i64; 4] = [100, 500, 1500, 5000];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAccount {
    pub user_id: Uuid,
    pub balance: i64,
    pub lifetime_earned: i64,
    pub level: i32,
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    pub fn fresh(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: 0,
            lifetime_earned: 0,
            level: 1,
            updated_at: now,
        }
    }

    pub fn level_for(lifetime_earned: i64) -> i32 {
        1 + LEVEL_THRESHOLDS
            .iter()
            .filter(|&&t| lifetime_earned >= t)
            .count() as i32
    }
}

/// Append-only ledger entry. `balance_after` snapshots the account at
/// write time; the sum of amounts for a user always equals the balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub tx_type: String,
    pub reference: String,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Transaction type written by the expiry sweeper's reversal entries.
pub const TX_TYPE_EXPIRED: &str = "expired";

/// Reference written for the reversal of an expiring transaction.
pub fn expiry_reference(original: Uuid) -> String {
    format!("expired:{original}")
}

// ── Reward task queue ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditTaskStatus {
    Pending,
    Scheduled,
    Executing,
    Completed,
    Failed,
}

impl CreditTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "scheduled" => Some(Self::Scheduled),
            "executing" => Some(Self::Executing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Queued reward. A completed task has produced exactly one
/// CreditTransaction whose reference matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_type: String,
    pub points: i64,
    pub description: String,
    pub reference: String,
    pub status: CreditTaskStatus,
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

impl CreditTask {
    pub fn can_retry(&self) -> bool {
        self.status == CreditTaskStatus::Failed && self.attempts < self.max_attempts
    }

    /// Ready for a worker: pending/scheduled and past any schedule time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            CreditTaskStatus::Pending | CreditTaskStatus::Scheduled
        ) && self.scheduled_at.map(|at| at <= now).unwrap_or(true)
    }
}

/// One batch-enqueue record: one row, one task per member user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditBatch {
    pub id: Uuid,
    pub name: String,
    pub task_type: String,
    pub user_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Canonical priority table for reward actions. Unknown actions sink to
/// the bottom of the queue.
pub fn priority_for_action(action: &str) -> i16 {
    match action {
        "courier_delivery" => 8,
        "letter_delivered" => 7,
        "letter_read" => 6,
        "letter_created" | "receive_letter" => 5,
        "public_letter_like" | "ai_interaction" => 4,
        a if a.starts_with("museum_") => 3,
        "writing_challenge" | "opcode_approval" => 2,
        "community_badge" | "admin_reward" => 1,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_table() {
        assert_eq!(priority_for_action("courier_delivery"), 8);
        assert_eq!(priority_for_action("letter_delivered"), 7);
        assert_eq!(priority_for_action("letter_read"), 6);
        assert_eq!(priority_for_action("letter_created"), 5);
        assert_eq!(priority_for_action("receive_letter"), 5);
        assert_eq!(priority_for_action("public_letter_like"), 4);
        assert_eq!(priority_for_action("museum_submit"), 3);
        assert_eq!(priority_for_action("museum_like"), 3);
        assert_eq!(priority_for_action("writing_challenge"), 2);
        assert_eq!(priority_for_action("admin_reward"), 1);
        assert_eq!(priority_for_action("something_else"), 1);
    }

    #[test]
    fn account_levels() {
        assert_eq!(CreditAccount::level_for(0), 1);
        assert_eq!(CreditAccount::level_for(99), 1);
        assert_eq!(CreditAccount::level_for(100), 2);
        assert_eq!(CreditAccount::level_for(500), 3);
        assert_eq!(CreditAccount::level_for(1500), 4);
        assert_eq!(CreditAccount::level_for(5000), 5);
    }

    #[test]
    fn due_and_retry_predicates() {
        let now = Utc::now();
        let mut task = CreditTask {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            task_type: "letter_created".into(),
            points: 5,
            description: String::new(),
            reference: "r1".into(),
            status: CreditTaskStatus::Pending,
            priority: 5,
            attempts: 0,
            max_attempts: 3,
            scheduled_at: None,
            created_at: now,
            completed_at: None,
            failed_at: None,
            error: None,
            metadata: None,
        };
        assert!(task.is_due(now));

        task.scheduled_at = Some(now + chrono::Duration::minutes(10));
        assert!(!task.is_due(now));
        assert!(task.is_due(now + chrono::Duration::minutes(10)));

        task.status = CreditTaskStatus::Failed;
        task.attempts = 2;
        assert!(task.can_retry());
        task.attempts = 3;
        assert!(!task.can_retry());
    }
}
