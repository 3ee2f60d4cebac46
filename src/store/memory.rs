//! In-memory implementation of every storage port.
//!
//! Backs the test suite and `OPENPENPAL_STORE=memory` dev mode. Each
//! collection sits behind its own lock; the composite operations take
//! their locks in a fixed order (envelopes → barcodes → scans → letters)
//! so they serialize exactly like the row locks in the Postgres adapter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use openpenpal_core::clock::Clock;
use openpenpal_core::courier::{Courier, CourierStatus};
use openpenpal_core::credit::{
    expiry_reference, CreditAccount, CreditBatch, CreditTask, CreditTaskStatus, CreditTransaction,
    TX_TYPE_EXPIRED,
};
use openpenpal_core::error::CoreError;
use openpenpal_core::letter::{Envelope, Letter, LetterCode, LetterStatus};
use openpenpal_core::opcode::{OpCode, Prefix};
use openpenpal_core::ports::{
    BarcodeStore, CourierStore, CreditStore, CreditTaskStore, LetterStore, Result, TaskStore,
    UserStore,
};
use openpenpal_core::scan::ScanEvent;
use openpenpal_core::task::{CourierTask, TaskStatus};
use openpenpal_core::user::{User, UserRole};
use uuid::Uuid;

#[derive(Default)]
struct CreditState {
    accounts: HashMap<Uuid, CreditAccount>,
    transactions: Vec<CreditTransaction>,
}

#[derive(Default)]
struct CreditQueue {
    tasks: HashMap<Uuid, CreditTask>,
    batches: HashMap<Uuid, CreditBatch>,
}

pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    users: RwLock<HashMap<Uuid, User>>,
    couriers: RwLock<HashMap<Uuid, Courier>>,
    letters: RwLock<HashMap<Uuid, Letter>>,
    envelopes: RwLock<HashMap<Uuid, Envelope>>,
    barcodes: RwLock<HashMap<String, LetterCode>>,
    scans: RwLock<HashMap<String, Vec<ScanEvent>>>,
    tasks: RwLock<HashMap<Uuid, CourierTask>>,
    // One lock over accounts + ledger: `apply` is the serialized
    // single-writer section the invariants depend on.
    credit: Mutex<CreditState>,
    queue: Mutex<CreditQueue>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            users: RwLock::new(HashMap::new()),
            couriers: RwLock::new(HashMap::new()),
            letters: RwLock::new(HashMap::new()),
            envelopes: RwLock::new(HashMap::new()),
            barcodes: RwLock::new(HashMap::new()),
            scans: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            credit: Mutex::new(CreditState::default()),
            queue: Mutex::new(CreditQueue::default()),
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().expect("users poisoned");
        if users.values().any(|u| u.username == user.username) {
            return Err(CoreError::Conflict(format!(
                "username taken: {}",
                user.username
            )));
        }
        if users.values().any(|u| u.email == user.email) {
            return Err(CoreError::Conflict(format!("email taken: {}", user.email)));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<User> {
        self.users
            .read()
            .expect("users poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("user {id}")))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .expect("users poisoned")
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .expect("users poisoned")
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_role(&self, id: Uuid, role: UserRole) -> Result<()> {
        let mut users = self.users.write().expect("users poisoned");
        let user = users
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("user {id}")))?;
        user.role = role;
        user.updated_at = self.clock.now();
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        let mut users = self.users.write().expect("users poisoned");
        let user = users
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("user {id}")))?;
        user.is_active = active;
        user.updated_at = self.clock.now();
        Ok(())
    }
}

#[async_trait]
impl CourierStore for MemoryStore {
    async fn create_courier(&self, courier: &Courier) -> Result<()> {
        let mut couriers = self.couriers.write().expect("couriers poisoned");
        if couriers.values().any(|c| c.user_id == courier.user_id) {
            return Err(CoreError::Conflict(format!(
                "user {} already has a courier record",
                courier.user_id
            )));
        }
        couriers.insert(courier.id, courier.clone());
        Ok(())
    }

    async fn get_courier(&self, id: Uuid) -> Result<Courier> {
        self.couriers
            .read()
            .expect("couriers poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("courier {id}")))
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Courier>> {
        Ok(self
            .couriers
            .read()
            .expect("couriers poisoned")
            .values()
            .find(|c| c.user_id == user_id)
            .cloned())
    }

    async fn update_status(&self, id: Uuid, status: CourierStatus) -> Result<()> {
        let mut couriers = self.couriers.write().expect("couriers poisoned");
        let courier = couriers
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("courier {id}")))?;
        courier.status = status;
        courier.updated_at = self.clock.now();
        Ok(())
    }

    async fn list_subordinates(&self, parent_prefix: &Prefix, level: u8) -> Result<Vec<Courier>> {
        Ok(self
            .couriers
            .read()
            .expect("couriers poisoned")
            .values()
            .filter(|c| c.level == level && parent_prefix.strictly_contains(&c.managed_prefix))
            .cloned()
            .collect())
    }

    async fn list_candidates(&self, op_code: &OpCode, min_level: u8) -> Result<Vec<Courier>> {
        Ok(self
            .couriers
            .read()
            .expect("couriers poisoned")
            .values()
            .filter(|c| {
                c.status == CourierStatus::Approved
                    && c.level >= min_level
                    && op_code.matches_prefix(&c.managed_prefix)
            })
            .cloned()
            .collect())
    }

    async fn record_task_result(&self, id: Uuid, points: i64) -> Result<()> {
        let mut couriers = self.couriers.write().expect("couriers poisoned");
        let courier = couriers
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("courier {id}")))?;
        courier.task_count += 1;
        courier.points += points;
        courier.updated_at = self.clock.now();
        Ok(())
    }
}

#[async_trait]
impl LetterStore for MemoryStore {
    async fn create_letter(&self, letter: &Letter) -> Result<()> {
        self.letters
            .write()
            .expect("letters poisoned")
            .insert(letter.id, letter.clone());
        Ok(())
    }

    async fn get_letter(&self, id: Uuid) -> Result<Letter> {
        self.letters
            .read()
            .expect("letters poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("letter {id}")))
    }

    async fn list_by_owner(&self, user_id: Uuid) -> Result<Vec<Letter>> {
        let mut letters: Vec<Letter> = self
            .letters
            .read()
            .expect("letters poisoned")
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        letters.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(letters)
    }

    async fn update_letter_status(&self, id: Uuid, status: LetterStatus) -> Result<()> {
        let mut letters = self.letters.write().expect("letters poisoned");
        let letter = letters
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("letter {id}")))?;
        letter.status = status;
        letter.updated_at = self.clock.now();
        Ok(())
    }
}

#[async_trait]
impl BarcodeStore for MemoryStore {
    async fn create_barcode(&self, barcode: &LetterCode) -> Result<()> {
        let mut barcodes = self.barcodes.write().expect("barcodes poisoned");
        if barcodes.contains_key(&barcode.code) {
            return Err(CoreError::Conflict(format!(
                "barcode exists: {}",
                barcode.code
            )));
        }
        barcodes.insert(barcode.code.clone(), barcode.clone());
        Ok(())
    }

    async fn get_barcode(&self, code: &str) -> Result<LetterCode> {
        self.barcodes
            .read()
            .expect("barcodes poisoned")
            .get(code)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("barcode {code}")))
    }

    async fn bind_barcode(
        &self,
        code: &str,
        letter_id: Uuid,
        recipient: &OpCode,
        envelope_id: Option<Uuid>,
        event: &ScanEvent,
    ) -> Result<LetterCode> {
        // Both checks happen under both locks so a refused bind leaves
        // the envelope unconsumed.
        let mut envelopes = envelope_id
            .map(|_| self.envelopes.write().expect("envelopes poisoned"));
        let updated = {
            let mut barcodes = self.barcodes.write().expect("barcodes poisoned");
            let barcode = barcodes
                .get_mut(code)
                .ok_or_else(|| CoreError::NotFound(format!("barcode {code}")))?;
            if barcode.status != openpenpal_core::letter::BarcodeStatus::Unused {
                return Err(CoreError::AlreadyBound(format!(
                    "barcode {code} is {}",
                    barcode.status.as_str()
                )));
            }
            if let (Some(env_id), Some(envelopes)) = (envelope_id, envelopes.as_mut()) {
                let envelope = envelopes
                    .get_mut(&env_id)
                    .ok_or_else(|| CoreError::NotFound(format!("envelope {env_id}")))?;
                if envelope.is_used() {
                    return Err(CoreError::Conflict(format!(
                        "envelope {env_id} already used by {}",
                        envelope.used_by_code.as_deref().unwrap_or("?")
                    )));
                }
                envelope.used_by_code = Some(code.to_string());
            }
            barcode.status = event.new_status;
            barcode.seq = event.seq;
            barcode.letter_id = Some(letter_id);
            barcode.envelope_id = envelope_id;
            barcode.recipient_op_code = Some(recipient.clone());
            barcode.updated_at = event.timestamp;
            barcode.clone()
        };
        drop(envelopes);

        self.scans
            .write()
            .expect("scans poisoned")
            .entry(code.to_string())
            .or_default()
            .push(event.clone());

        let mut letters = self.letters.write().expect("letters poisoned");
        if let Some(letter) = letters.get_mut(&letter_id) {
            letter.status = LetterStatus::from_barcode(event.new_status);
            letter.recipient_op_code = Some(recipient.clone());
            letter.updated_at = event.timestamp;
        }
        Ok(updated)
    }

    async fn record_scan(
        &self,
        event: &ScanEvent,
        letter_update: Option<(Uuid, LetterStatus)>,
    ) -> Result<()> {
        {
            let mut barcodes = self.barcodes.write().expect("barcodes poisoned");
            let barcode = barcodes
                .get_mut(&event.barcode)
                .ok_or_else(|| CoreError::NotFound(format!("barcode {}", event.barcode)))?;
            if barcode.status != event.old_status || barcode.seq != event.seq - 1 {
                return Err(CoreError::StaleTransition(format!(
                    "barcode {} moved to {} seq {} under us",
                    event.barcode,
                    barcode.status.as_str(),
                    barcode.seq
                )));
            }
            barcode.status = event.new_status;
            barcode.seq = event.seq;
            barcode.updated_at = event.timestamp;
        }

        self.scans
            .write()
            .expect("scans poisoned")
            .entry(event.barcode.clone())
            .or_default()
            .push(event.clone());

        if let Some((letter_id, status)) = letter_update {
            let mut letters = self.letters.write().expect("letters poisoned");
            if let Some(letter) = letters.get_mut(&letter_id) {
                letter.status = status;
                letter.updated_at = event.timestamp;
            }
        }
        Ok(())
    }

    async fn timeline(&self, code: &str) -> Result<Vec<ScanEvent>> {
        Ok(self
            .scans
            .read()
            .expect("scans poisoned")
            .get(code)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_envelope(&self, envelope: &Envelope) -> Result<()> {
        self.envelopes
            .write()
            .expect("envelopes poisoned")
            .insert(envelope.id, envelope.clone());
        Ok(())
    }

    async fn get_envelope(&self, id: Uuid) -> Result<Envelope> {
        self.envelopes
            .read()
            .expect("envelopes poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("envelope {id}")))
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_task(&self, task: &CourierTask) -> Result<()> {
        self.tasks
            .write()
            .expect("tasks poisoned")
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<CourierTask> {
        self.tasks
            .read()
            .expect("tasks poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("task {id}")))
    }

    async fn cas_update(
        &self,
        id: Uuid,
        expected: TaskStatus,
        updated: &CourierTask,
    ) -> Result<()> {
        let mut tasks = self.tasks.write().expect("tasks poisoned");
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("task {id}")))?;
        if task.status != expected {
            return Err(CoreError::StaleTransition(format!(
                "task {id} is {}, expected {}",
                task.status.as_str(),
                expected.as_str()
            )));
        }
        *task = updated.clone();
        Ok(())
    }

    async fn find_active_by_letter_code(&self, code: &str) -> Result<Option<CourierTask>> {
        Ok(self
            .tasks
            .read()
            .expect("tasks poisoned")
            .values()
            .find(|t| t.letter_code == code && !t.status.is_terminal())
            .cloned())
    }

    async fn list_pending(&self) -> Result<Vec<CourierTask>> {
        Ok(self
            .tasks
            .read()
            .expect("tasks poisoned")
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list_assigned_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<CourierTask>> {
        Ok(self
            .tasks
            .read()
            .expect("tasks poisoned")
            .values()
            .filter(|t| {
                t.status == TaskStatus::Assigned
                    && t.assigned_at.map(|at| at <= cutoff).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn list_for_couriers(&self, courier_ids: &[Uuid]) -> Result<Vec<CourierTask>> {
        Ok(self
            .tasks
            .read()
            .expect("tasks poisoned")
            .values()
            .filter(|t| t.courier_id.map(|c| courier_ids.contains(&c)).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn list_pending_matching(&self, prefix: &Prefix) -> Result<Vec<CourierTask>> {
        Ok(self
            .tasks
            .read()
            .expect("tasks poisoned")
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.pickup_op_code.matches_prefix(prefix))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CreditStore for MemoryStore {
    async fn get_account(&self, user_id: Uuid) -> Result<Option<CreditAccount>> {
        Ok(self
            .credit
            .lock()
            .expect("credit poisoned")
            .accounts
            .get(&user_id)
            .cloned())
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
        let mut state = self.credit.lock().expect("credit poisoned");
        let account = state
            .accounts
            .entry(user_id)
            .or_insert_with(|| CreditAccount::fresh(user_id, now));
        let new_balance = account.balance + amount;
        if new_balance < 0 {
            return Err(CoreError::InsufficientCredit {
                balance: account.balance,
                requested: -amount,
            });
        }
        account.balance = new_balance;
        if amount > 0 {
            account.lifetime_earned += amount;
        }
        account.level = CreditAccount::level_for(account.lifetime_earned);
        account.updated_at = now;
        let tx = CreditTransaction {
            id: Uuid::new_v4(),
            user_id,
            amount,
            tx_type: tx_type.to_string(),
            reference: reference.to_string(),
            balance_after: new_balance,
            created_at: now,
            expires_at,
        };
        state.transactions.push(tx.clone());
        Ok(tx)
    }

    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>> {
        let state = self.credit.lock().expect("credit poisoned");
        let mut txns: Vec<CreditTransaction> = state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        txns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        txns.truncate(limit.max(0) as usize);
        Ok(txns)
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<CreditTransaction>> {
        Ok(self
            .credit
            .lock()
            .expect("credit poisoned")
            .transactions
            .iter()
            .find(|t| t.reference == reference)
            .cloned())
    }

    async fn list_expired_unreversed(&self, now: DateTime<Utc>) -> Result<Vec<CreditTransaction>> {
        let state = self.credit.lock().expect("credit poisoned");
        Ok(state
            .transactions
            .iter()
            .filter(|t| {
                t.amount > 0
                    && t.tx_type != TX_TYPE_EXPIRED
                    && t.expires_at.map(|at| at <= now).unwrap_or(false)
                    && !state
                        .transactions
                        .iter()
                        .any(|r| r.reference == expiry_reference(t.id))
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CreditTaskStore for MemoryStore {
    async fn enqueue(&self, task: &CreditTask) -> Result<()> {
        self.queue
            .lock()
            .expect("queue poisoned")
            .tasks
            .insert(task.id, task.clone());
        Ok(())
    }

    async fn enqueue_batch(&self, batch: &CreditBatch, tasks: &[CreditTask]) -> Result<()> {
        let mut queue = self.queue.lock().expect("queue poisoned");
        queue.batches.insert(batch.id, batch.clone());
        for task in tasks {
            queue.tasks.insert(task.id, task.clone());
        }
        Ok(())
    }

    async fn get_credit_task(&self, id: Uuid) -> Result<CreditTask> {
        self.queue
            .lock()
            .expect("queue poisoned")
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("credit task {id}")))
    }

    async fn claim_next_due(&self, now: DateTime<Utc>) -> Result<Option<CreditTask>> {
        let mut queue = self.queue.lock().expect("queue poisoned");
        let next = queue
            .tasks
            .values()
            .filter(|t| t.is_due(now))
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.created_at.cmp(&a.created_at))
            })
            .map(|t| t.id);
        let Some(id) = next else { return Ok(None) };
        let task = queue.tasks.get_mut(&id).expect("task vanished under lock");
        task.status = CreditTaskStatus::Executing;
        task.attempts += 1;
        Ok(Some(task.clone()))
    }

    async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut queue = self.queue.lock().expect("queue poisoned");
        let task = queue
            .tasks
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("credit task {id}")))?;
        task.status = CreditTaskStatus::Completed;
        task.completed_at = Some(now);
        task.error = None;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<()> {
        let mut queue = self.queue.lock().expect("queue poisoned");
        let task = queue
            .tasks
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("credit task {id}")))?;
        task.status = CreditTaskStatus::Failed;
        task.failed_at = Some(now);
        task.error = Some(error.to_string());
        Ok(())
    }

    async fn release(&self, id: Uuid) -> Result<()> {
        let mut queue = self.queue.lock().expect("queue poisoned");
        let task = queue
            .tasks
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("credit task {id}")))?;
        if task.status == CreditTaskStatus::Executing {
            task.status = CreditTaskStatus::Pending;
            task.attempts = (task.attempts - 1).max(0);
        }
        Ok(())
    }

    async fn retry_failed(&self, now: DateTime<Utc>, max_age: Duration) -> Result<u64> {
        let mut queue = self.queue.lock().expect("queue poisoned");
        let mut reset = 0;
        for task in queue.tasks.values_mut() {
            if task.can_retry() && now - task.created_at <= max_age {
                task.status = CreditTaskStatus::Pending;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn list_credit_tasks(&self, user_id: Uuid) -> Result<Vec<CreditTask>> {
        let queue = self.queue.lock().expect("queue poisoned");
        let mut tasks: Vec<CreditTask> = queue
            .tasks
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }
}
