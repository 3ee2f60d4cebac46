//! Storage port traits. Engines depend only on these; the Postgres adapter
//! and the in-memory store implement them.
//!
//! Composite methods (`bind_barcode`, `record_scan`, `apply`,
//! `claim_next_due`, `cas_update`) are deliberately coarse: each is one
//! logical transaction in the adapter, which is where the atomicity the
//! state machines rely on has to live.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::courier::{Courier, CourierStatus};
use crate::credit::{CreditAccount, CreditBatch, CreditTask, CreditTransaction};
use crate::error::CoreError;
use crate::letter::{Envelope, Letter, LetterCode, LetterStatus};
use crate::opcode::{OpCode, Prefix};
use crate::scan::ScanEvent;
use crate::task::{CourierTask, TaskStatus};
use crate::user::{User, UserRole};

pub type Result<T> = std::result::Result<T, CoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<()>;
    async fn get_user(&self, id: Uuid) -> Result<User>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn update_role(&self, id: Uuid, role: UserRole) -> Result<()>;
    async fn set_active(&self, id: Uuid, active: bool) -> Result<()>;
}

#[async_trait]
pub trait CourierStore: Send + Sync {
    async fn create_courier(&self, courier: &Courier) -> Result<()>;
    async fn get_courier(&self, id: Uuid) -> Result<Courier>;
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Courier>>;
    async fn update_status(&self, id: Uuid, status: CourierStatus) -> Result<()>;

    /// Couriers whose prefix strictly extends `parent_prefix`, at exactly
    /// `level`.
    async fn list_subordinates(&self, parent_prefix: &Prefix, level: u8) -> Result<Vec<Courier>>;

    /// Approved couriers whose managed prefix contains `op_code`, at
    /// `min_level` or above. Candidate pool for task assignment.
    async fn list_candidates(&self, op_code: &OpCode, min_level: u8) -> Result<Vec<Courier>>;

    /// Bump the aggregate counters after a completed delivery.
    async fn record_task_result(&self, id: Uuid, points: i64) -> Result<()>;
}

#[async_trait]
pub trait LetterStore: Send + Sync {
    async fn create_letter(&self, letter: &Letter) -> Result<()>;
    async fn get_letter(&self, id: Uuid) -> Result<Letter>;
    async fn list_by_owner(&self, user_id: Uuid) -> Result<Vec<Letter>>;
    async fn update_letter_status(&self, id: Uuid, status: LetterStatus) -> Result<()>;
}

#[async_trait]
pub trait BarcodeStore: Send + Sync {
    async fn create_barcode(&self, barcode: &LetterCode) -> Result<()>;
    async fn get_barcode(&self, code: &str) -> Result<LetterCode>;

    /// CAS `unused` → `bound`, attach letter/recipient/envelope, consume
    /// the envelope, append the bind scan event, and project the letter,
    /// all in one logical transaction. `AlreadyBound` if the code is not
    /// unused; `Conflict` if the envelope was already used.
    async fn bind_barcode(
        &self,
        code: &str,
        letter_id: Uuid,
        recipient: &OpCode,
        envelope_id: Option<Uuid>,
        event: &ScanEvent,
    ) -> Result<LetterCode>;

    /// CAS the barcode from `(event.old_status, event.seq - 1)` to
    /// `(event.new_status, event.seq)`, append the event, and project the
    /// letter status in the same logical transaction. `StaleTransition`
    /// when a concurrent scan won the race.
    async fn record_scan(
        &self,
        event: &ScanEvent,
        letter_update: Option<(Uuid, LetterStatus)>,
    ) -> Result<()>;

    /// The ordered, append-only timeline for a barcode.
    async fn timeline(&self, code: &str) -> Result<Vec<ScanEvent>>;

    async fn create_envelope(&self, envelope: &Envelope) -> Result<()>;
    async fn get_envelope(&self, id: Uuid) -> Result<Envelope>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &CourierTask) -> Result<()>;
    async fn get_task(&self, id: Uuid) -> Result<CourierTask>;

    /// Optimistic update: write `updated` only if the stored status still
    /// equals `expected`. `StaleTransition` otherwise.
    async fn cas_update(
        &self,
        id: Uuid,
        expected: TaskStatus,
        updated: &CourierTask,
    ) -> Result<()>;

    /// The non-terminal task moving this barcode, if any.
    async fn find_active_by_letter_code(&self, code: &str) -> Result<Option<CourierTask>>;

    async fn list_pending(&self) -> Result<Vec<CourierTask>>;
    async fn list_assigned_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<CourierTask>>;
    async fn list_for_couriers(&self, courier_ids: &[Uuid]) -> Result<Vec<CourierTask>>;
    async fn list_pending_matching(&self, prefix: &Prefix) -> Result<Vec<CourierTask>>;
}

#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn get_account(&self, user_id: Uuid) -> Result<Option<CreditAccount>>;

    /// Serialized per-account mutation: load for update, check the new
    /// balance, append the transaction with `balance_after`, write the
    /// account. `InsufficientCredit` instead of a negative balance.
    async fn apply(
        &self,
        user_id: Uuid,
        amount: i64,
        tx_type: &str,
        reference: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<CreditTransaction>;

    async fn list_transactions(&self, user_id: Uuid, limit: i64)
        -> Result<Vec<CreditTransaction>>;
    async fn find_by_reference(&self, reference: &str) -> Result<Option<CreditTransaction>>;

    /// Positive transactions past `expires_at` whose expiry reversal has
    /// not been written yet.
    async fn list_expired_unreversed(&self, now: DateTime<Utc>) -> Result<Vec<CreditTransaction>>;
}

#[async_trait]
pub trait CreditTaskStore: Send + Sync {
    async fn enqueue(&self, task: &CreditTask) -> Result<()>;

    /// One batch record plus one task per user, atomically.
    async fn enqueue_batch(&self, batch: &CreditBatch, tasks: &[CreditTask]) -> Result<()>;

    async fn get_credit_task(&self, id: Uuid) -> Result<CreditTask>;

    /// Claim the highest-priority due task: CAS pending/scheduled →
    /// executing (attempts + 1) so at most one worker holds it, ordered by
    /// priority DESC then created_at ASC.
    async fn claim_next_due(&self, now: DateTime<Utc>) -> Result<Option<CreditTask>>;

    async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;
    async fn mark_failed(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<()>;

    /// Roll an `executing` claim back to `pending` (cancellation before
    /// the ledger committed).
    async fn release(&self, id: Uuid) -> Result<()>;

    /// Reset retryable failed tasks to pending, skipping tasks older than
    /// `max_age`. Returns the number reset.
    async fn retry_failed(&self, now: DateTime<Utc>, max_age: Duration) -> Result<u64>;

    async fn list_credit_tasks(&self, user_id: Uuid) -> Result<Vec<CreditTask>>;
}

/// Convenience: a store that implements every port. The in-memory store
/// and the Postgres adapter both satisfy this.
pub trait Store:
    UserStore + CourierStore + LetterStore + BarcodeStore + TaskStore + CreditStore + CreditTaskStore
{
}

impl<T> Store for T where
    T: UserStore
        + CourierStore
        + LetterStore
        + BarcodeStore
        + TaskStore
        + CreditStore
        + CreditTaskStore
{
}

/// One trait-object handle per port; adapters hand this to the engines.
#[derive(Clone)]
pub struct Stores {
    pub users: std::sync::Arc<dyn UserStore>,
    pub couriers: std::sync::Arc<dyn CourierStore>,
    pub letters: std::sync::Arc<dyn LetterStore>,
    pub barcodes: std::sync::Arc<dyn BarcodeStore>,
    pub tasks: std::sync::Arc<dyn TaskStore>,
    pub credit: std::sync::Arc<dyn CreditStore>,
    pub credit_tasks: std::sync::Arc<dyn CreditTaskStore>,
}

impl Stores {
    /// Fan one all-ports store out into per-port handles.
    pub fn from_store<S: Store + 'static>(store: std::sync::Arc<S>) -> Self {
        use std::sync::Arc;
        Self {
            users: Arc::clone(&store) as Arc<dyn UserStore>,
            couriers: Arc::clone(&store) as Arc<dyn CourierStore>,
            letters: Arc::clone(&store) as Arc<dyn LetterStore>,
            barcodes: Arc::clone(&store) as Arc<dyn BarcodeStore>,
            tasks: Arc::clone(&store) as Arc<dyn TaskStore>,
            credit: Arc::clone(&store) as Arc<dyn CreditStore>,
            credit_tasks: store as Arc<dyn CreditTaskStore>,
        }
    }
}
