//! Domain events published on the in-process bus.
//!
//! Delivery is best-effort, at-least-once within the process lifetime;
//! subscribers must be idempotent. Events raised inside a logical
//! transaction are buffered and emitted only after commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::letter::BarcodeStatus;
use crate::opcode::OpCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    LetterStatusChanged,
    TaskCreated,
    TaskCompleted,
    TaskFailed,
    CreditApplied,
    CourierApproved,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LetterStatusChanged => "letter.status.changed",
            Self::TaskCreated => "task.created",
            Self::TaskCompleted => "task.completed",
            Self::TaskFailed => "task.failed",
            Self::CreditApplied => "credit.applied",
            Self::CourierApproved => "courier.approved",
        }
    }

    pub const ALL: [Topic; 6] = [
        Topic::LetterStatusChanged,
        Topic::TaskCreated,
        Topic::TaskCompleted,
        Topic::TaskFailed,
        Topic::CreditApplied,
        Topic::CourierApproved,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    LetterStatusChanged {
        barcode: String,
        letter_id: Option<Uuid>,
        old_status: BarcodeStatus,
        new_status: BarcodeStatus,
        actor: Uuid,
        op_code: Option<OpCode>,
        location: Option<String>,
        at: DateTime<Utc>,
    },
    TaskCreated {
        task_id: Uuid,
        letter_code: String,
        at: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: Uuid,
        courier_id: Option<Uuid>,
        letter_code: String,
        at: DateTime<Utc>,
    },
    TaskFailed {
        task_id: Uuid,
        courier_id: Option<Uuid>,
        letter_code: String,
        at: DateTime<Utc>,
    },
    CreditApplied {
        user_id: Uuid,
        amount: i64,
        balance: i64,
        reference: String,
        at: DateTime<Utc>,
    },
    CourierApproved {
        courier_id: Uuid,
        user_id: Uuid,
        level: u8,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Self::LetterStatusChanged { .. } => Topic::LetterStatusChanged,
            Self::TaskCreated { .. } => Topic::TaskCreated,
            Self::TaskCompleted { .. } => Topic::TaskCompleted,
            Self::TaskFailed { .. } => Topic::TaskFailed,
            Self::CreditApplied { .. } => Topic::CreditApplied,
            Self::CourierApproved { .. } => Topic::CourierApproved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names() {
        assert_eq!(Topic::LetterStatusChanged.as_str(), "letter.status.changed");
        assert_eq!(Topic::CreditApplied.as_str(), "credit.applied");
        assert_eq!(Topic::ALL.len(), 6);
    }

    #[test]
    fn event_routes_to_topic() {
        let e = Event::TaskCreated {
            task_id: Uuid::new_v4(),
            letter_code: "OPABCDEFGH12".into(),
            at: Utc::now(),
        };
        assert_eq!(e.topic(), Topic::TaskCreated);
    }
}
