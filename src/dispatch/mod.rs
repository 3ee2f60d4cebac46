//! Task dispatcher: creation, prefix-matched assignment, acceptance,
//! projection from scan events, and the two periodic loops (pending
//! sweeper, stale-assignment reaper).
//!
//! Assignment is optimistic: every status move CASes on the previous
//! status, so the sweeper, the reaper and direct courier actions can race
//! safely; the loser sees `StaleTransition` and re-reads.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use openpenpal_core::clock::Clock;
use openpenpal_core::courier::Courier;
use openpenpal_core::error::CoreError;
use openpenpal_core::events::{Event, Topic};
use openpenpal_core::identity::Identity;
use openpenpal_core::letter::{validate_barcode, BarcodeStatus};
use openpenpal_core::opcode::OpCode;
use openpenpal_core::ports::{CourierStore, TaskStore};
use openpenpal_core::task::{listing_order, CourierTask, TaskPriority, TaskStatus};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::config::DispatchConfig;
use crate::credit::rules::default_points;

pub struct Dispatcher {
    tasks: Arc<dyn TaskStore>,
    couriers: Arc<dyn CourierStore>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
    cfg: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        couriers: Arc<dyn CourierStore>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
        cfg: DispatchConfig,
    ) -> Self {
        Self {
            tasks,
            couriers,
            clock,
            bus,
            cfg,
        }
    }

    // ── Creation & assignment ─────────────────────────────────

    pub async fn create_task(
        &self,
        letter_code: &str,
        pickup: OpCode,
        delivery: OpCode,
        priority: TaskPriority,
    ) -> Result<CourierTask, CoreError> {
        validate_barcode(letter_code)?;
        if self
            .tasks
            .find_active_by_letter_code(letter_code)
            .await?
            .is_some()
        {
            return Err(CoreError::Conflict(format!(
                "barcode {letter_code} already has an active task"
            )));
        }
        let now = self.clock.now();
        let task = CourierTask {
            id: Uuid::new_v4(),
            courier_id: None,
            letter_code: letter_code.to_string(),
            pickup_op_code: pickup,
            delivery_op_code: delivery,
            status: TaskStatus::Pending,
            priority,
            attempts: 0,
            max_attempts: self.cfg.max_reassignments,
            created_at: now,
            assigned_at: None,
            completed_at: None,
            updated_at: now,
        };
        self.tasks.create_task(&task).await?;
        self.bus.publish(Event::TaskCreated {
            task_id: task.id,
            letter_code: task.letter_code.clone(),
            at: now,
        });
        // Assign eagerly; if no candidate exists the sweeper retries.
        self.try_assign(task).await
    }

    /// Pick the best candidate and CAS pending → assigned. Past
    /// `max_attempts` reassignments the pool is restricted to the parent
    /// level (level ≥ 2), falling back to everyone if that pool is empty.
    pub async fn try_assign(&self, task: CourierTask) -> Result<CourierTask, CoreError> {
        if task.status != TaskStatus::Pending {
            return Ok(task);
        }
        let escalated = task.attempts >= task.max_attempts;
        let min_level = if escalated { 2 } else { 1 };
        let mut candidates = self
            .couriers
            .list_candidates(&task.pickup_op_code, min_level)
            .await?;
        if escalated && candidates.is_empty() {
            candidates = self
                .couriers
                .list_candidates(&task.pickup_op_code, 1)
                .await?;
        }
        let Some(best) = pick_candidate(&task, candidates) else {
            tracing::debug!(
                "task {} has no candidate courier for {}",
                task.id,
                task.pickup_op_code
            );
            return Ok(task);
        };

        let now = self.clock.now();
        let mut updated = task.clone();
        updated.status = TaskStatus::Assigned;
        updated.courier_id = Some(best.id);
        updated.assigned_at = Some(now);
        updated.updated_at = now;
        match self
            .tasks
            .cas_update(task.id, TaskStatus::Pending, &updated)
            .await
        {
            Ok(()) => {
                tracing::info!("task {} assigned to courier {}", task.id, best.id);
                Ok(updated)
            }
            // Someone else moved the task first; their assignment stands.
            Err(CoreError::StaleTransition(_)) => self.tasks.get_task(task.id).await,
            Err(e) => Err(e),
        }
    }

    // ── Courier actions ───────────────────────────────────────

    pub async fn accept(
        &self,
        courier: &Courier,
        task_id: Uuid,
    ) -> Result<CourierTask, CoreError> {
        let task = self.tasks.get_task(task_id).await?;
        task.require_transition(TaskStatus::Accepted)?;
        if task.courier_id != Some(courier.id) {
            return Err(CoreError::PermissionDenied(format!(
                "task {task_id} is not assigned to courier {}",
                courier.id
            )));
        }
        courier.require_scope(&task.pickup_op_code)?;

        let now = self.clock.now();
        let mut updated = task.clone();
        updated.status = TaskStatus::Accepted;
        // Acceptance starts the delivery clock.
        updated.assigned_at = Some(now);
        updated.updated_at = now;
        self.tasks
            .cas_update(task_id, task.status, &updated)
            .await?;
        Ok(updated)
    }

    pub async fn reject(
        &self,
        courier: &Courier,
        task_id: Uuid,
    ) -> Result<CourierTask, CoreError> {
        let task = self.tasks.get_task(task_id).await?;
        if task.status != TaskStatus::Assigned || task.courier_id != Some(courier.id) {
            return Err(CoreError::Conflict(format!(
                "task {task_id} is not awaiting courier {}",
                courier.id
            )));
        }
        let now = self.clock.now();
        let mut updated = task.clone();
        updated.status = TaskStatus::Pending;
        updated.courier_id = None;
        updated.assigned_at = None;
        updated.attempts += 1;
        updated.updated_at = now;
        self.tasks
            .cas_update(task_id, TaskStatus::Assigned, &updated)
            .await?;
        tracing::info!("task {task_id} rejected by courier {}", courier.id);
        Ok(updated)
    }

    /// Tasks visible to a courier: everything assigned to it or its
    /// subordinates, plus unassigned work inside its prefix. Urgent
    /// first, then FIFO.
    pub async fn list_visible(&self, courier: &Courier) -> Result<Vec<CourierTask>, CoreError> {
        let mut ids = vec![courier.id];
        if courier.level > 1 {
            for sub in self
                .couriers
                .list_subordinates(&courier.managed_prefix, courier.level - 1)
                .await?
            {
                ids.push(sub.id);
            }
        }
        let mut tasks = self.tasks.list_for_couriers(&ids).await?;
        for pending in self
            .tasks
            .list_pending_matching(&courier.managed_prefix)
            .await?
        {
            if !tasks.iter().any(|t| t.id == pending.id) {
                tasks.push(pending);
            }
        }
        tasks.sort_by(listing_order);
        Ok(tasks)
    }

    pub async fn get_task_for(
        &self,
        actor: &Identity,
        courier: &Courier,
        task_id: Uuid,
    ) -> Result<CourierTask, CoreError> {
        let task = self.tasks.get_task(task_id).await?;
        let visible = task.courier_id == Some(courier.id)
            || task.pickup_op_code.matches_prefix(&courier.managed_prefix)
            || actor.require_admin().is_ok();
        if visible {
            Ok(task)
        } else {
            Err(CoreError::NotFound(format!("task {task_id}")))
        }
    }

    // ── Projection from scan events ───────────────────────────

    /// Project a barcode transition onto the active task for that code.
    /// The physical world wins: a scan may fast-forward a task through
    /// accept/collect. Idempotent; replays fall out on the status CAS.
    pub async fn apply_letter_event(&self, event: &Event) -> Result<(), CoreError> {
        let Event::LetterStatusChanged {
            barcode,
            new_status,
            actor,
            ..
        } = event
        else {
            return Ok(());
        };
        let Some(task) = self.tasks.find_active_by_letter_code(barcode).await? else {
            return Ok(());
        };
        let now = self.clock.now();
        let mut updated = task.clone();
        updated.updated_at = now;

        match new_status {
            BarcodeStatus::Picked => {
                let courier = self.couriers.find_by_user(*actor).await?;
                updated.status = TaskStatus::Collected;
                if updated.courier_id.is_none() {
                    updated.courier_id = courier.map(|c| c.id);
                }
                if updated.assigned_at.is_none() {
                    updated.assigned_at = Some(now);
                }
            }
            BarcodeStatus::InTransit => updated.status = TaskStatus::InTransit,
            BarcodeStatus::Delivered => {
                updated.status = TaskStatus::Delivered;
                updated.completed_at = Some(now);
            }
            BarcodeStatus::Failed => {
                updated.status = TaskStatus::Failed;
                updated.completed_at = Some(now);
            }
            BarcodeStatus::Cancelled => {
                updated.status = TaskStatus::Cancelled;
                updated.courier_id = None;
            }
            BarcodeStatus::Unused | BarcodeStatus::Bound => return Ok(()),
        }

        match self.tasks.cas_update(task.id, task.status, &updated).await {
            Ok(()) => {}
            // A concurrent projection already advanced the task.
            Err(CoreError::StaleTransition(_)) => return Ok(()),
            Err(e) => return Err(e),
        }

        match updated.status {
            TaskStatus::Delivered => {
                if let Some(courier_id) = updated.courier_id {
                    self.couriers
                        .record_task_result(courier_id, default_points("courier_delivery"))
                        .await?;
                }
                self.bus.publish(Event::TaskCompleted {
                    task_id: updated.id,
                    courier_id: updated.courier_id,
                    letter_code: updated.letter_code.clone(),
                    at: now,
                });
            }
            TaskStatus::Failed => {
                self.bus.publish(Event::TaskFailed {
                    task_id: updated.id,
                    courier_id: updated.courier_id,
                    letter_code: updated.letter_code.clone(),
                    at: now,
                });
            }
            _ => {}
        }
        Ok(())
    }

    // ── Periodic loops ────────────────────────────────────────

    /// One pass of the pending sweeper. Returns how many tasks got
    /// assigned.
    pub async fn sweep_pending(&self) -> Result<usize, CoreError> {
        let mut pending = self.tasks.list_pending().await?;
        pending.sort_by(listing_order);
        let mut assigned = 0;
        for task in pending {
            if self.try_assign(task).await?.status == TaskStatus::Assigned {
                assigned += 1;
            }
        }
        Ok(assigned)
    }

    /// One pass of the stale-assignment reaper: assignments older than
    /// the timeout go back to pending with `attempts + 1`; at the
    /// reassignment cap the task is promoted to urgent.
    pub async fn reap_stale(&self) -> Result<usize, CoreError> {
        let now = self.clock.now();
        let cutoff = now
            - chrono::Duration::from_std(self.cfg.assignment_timeout)
                .unwrap_or_else(|_| chrono::Duration::hours(2));
        let stale = self.tasks.list_assigned_before(cutoff).await?;
        let mut reaped = 0;
        for task in stale {
            let mut updated = task.clone();
            updated.status = TaskStatus::Pending;
            updated.courier_id = None;
            updated.assigned_at = None;
            updated.attempts += 1;
            if updated.attempts >= updated.max_attempts {
                updated.priority = TaskPriority::Urgent;
            }
            updated.updated_at = now;
            match self
                .tasks
                .cas_update(task.id, TaskStatus::Assigned, &updated)
                .await
            {
                Ok(()) => {
                    tracing::warn!(
                        "task {} reclaimed from courier {:?} (attempt {})",
                        task.id,
                        task.courier_id,
                        updated.attempts
                    );
                    reaped += 1;
                }
                Err(CoreError::StaleTransition(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    pub fn spawn_sweeper(
        self: &Arc<Self>,
        shutdown: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                "pending sweeper started (interval {:?})",
                dispatcher.cfg.sweep_interval
            );
            loop {
                tokio::time::sleep(dispatcher.cfg.sweep_interval).await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match dispatcher.sweep_pending().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("sweeper assigned {n} pending tasks"),
                    Err(e) => tracing::error!("pending sweep failed: {e}"),
                }
            }
        })
    }

    pub fn spawn_reaper(
        self: &Arc<Self>,
        shutdown: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                "assignment reaper started (timeout {:?})",
                dispatcher.cfg.assignment_timeout
            );
            loop {
                tokio::time::sleep(dispatcher.cfg.reaper_interval).await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match dispatcher.reap_stale().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("reaper reclaimed {n} stale assignments"),
                    Err(e) => tracing::error!("stale reap failed: {e}"),
                }
            }
        })
    }

    /// Subscribe to `letter.status.changed` and project scans onto tasks.
    /// Handlers also project synchronously; replays are absorbed by the
    /// CAS, so double delivery is harmless.
    pub fn spawn_listener(
        self: &Arc<Self>,
        bus: &EventBus,
        shutdown: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        let mut rx = bus.subscribe(Topic::LetterStatusChanged);
        tokio::spawn(async move {
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = dispatcher.apply_letter_event(&event).await {
                            tracing::error!("task projection failed: {e}");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("task projection lagged, {n} events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Rank candidates by (level ascending, task_count ascending, stable
/// hash). The hash keeps ties deterministic without favouring insertion
/// order.
fn pick_candidate(task: &CourierTask, mut candidates: Vec<Courier>) -> Option<Courier> {
    candidates.sort_by_key(|c| (c.level, c.task_count, tie_break(task.id, c.id)));
    candidates.into_iter().next()
}

fn tie_break(task_id: Uuid, courier_id: Uuid) -> u64 {
    let mut hasher = DefaultHasher::new();
    task_id.hash(&mut hasher);
    courier_id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testutil;
    use chrono::Utc;
    use openpenpal_core::clock::ManualClock;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        bus: Arc<EventBus>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::new(Arc::clone(&clock) as Arc<dyn Clock>));
        let bus = Arc::new(EventBus::default());
        let dispatcher = Dispatcher::new(
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&bus),
            DispatchConfig {
                sweep_interval: std::time::Duration::from_secs(30),
                assignment_timeout: std::time::Duration::from_secs(7_200),
                reaper_interval: std::time::Duration::from_secs(60),
                max_reassignments: 3,
            },
        );
        Fixture {
            store,
            clock,
            bus,
            dispatcher,
        }
    }

    fn codes() -> (OpCode, OpCode) {
        (
            OpCode::parse("PK5F01").unwrap(),
            OpCode::parse("PK5F3D").unwrap(),
        )
    }

    #[tokio::test]
    async fn create_assigns_lowest_level_least_loaded() {
        let f = fixture();
        let (_, c1) = testutil::seed_courier(&f.store, "c1", 1, "PK5F").await;
        let (_, _c2) = testutil::seed_courier(&f.store, "coord", 2, "PK").await;
        let (pickup, delivery) = codes();
        let task = f
            .dispatcher
            .create_task("OPAAAAAAAA01", pickup, delivery, TaskPriority::Normal)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.courier_id, Some(c1.id));
    }

    #[tokio::test]
    async fn no_candidate_leaves_pending_until_sweep() {
        let f = fixture();
        let (pickup, delivery) = codes();
        let task = f
            .dispatcher
            .create_task("OPAAAAAAAA01", pickup, delivery, TaskPriority::Normal)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let (_, c1) = testutil::seed_courier(&f.store, "c1", 1, "PK5F").await;
        let assigned = f.dispatcher.sweep_pending().await.unwrap();
        assert_eq!(assigned, 1);
        let task = f.dispatcher.tasks.get_task(task.id).await.unwrap();
        assert_eq!(task.courier_id, Some(c1.id));
    }

    #[tokio::test]
    async fn accept_requires_assignment_and_scope() {
        let f = fixture();
        let (_, c1) = testutil::seed_courier(&f.store, "c1", 1, "PK5F").await;
        let (_, other) = testutil::seed_courier(&f.store, "other", 1, "QH3B").await;
        let (pickup, delivery) = codes();
        let task = f
            .dispatcher
            .create_task("OPAAAAAAAA01", pickup, delivery, TaskPriority::Normal)
            .await
            .unwrap();
        assert_eq!(task.courier_id, Some(c1.id));

        let err = f.dispatcher.accept(&other, task.id).await.unwrap_err();
        assert_eq!(err.http_status(), 403);

        let accepted = f.dispatcher.accept(&c1, task.id).await.unwrap();
        assert_eq!(accepted.status, TaskStatus::Accepted);
        assert!(accepted.assigned_at.is_some());
    }

    #[tokio::test]
    async fn reject_returns_task_to_pool() {
        let f = fixture();
        let (_, c1) = testutil::seed_courier(&f.store, "c1", 1, "PK5F").await;
        let (pickup, delivery) = codes();
        let task = f
            .dispatcher
            .create_task("OPAAAAAAAA01", pickup, delivery, TaskPriority::Normal)
            .await
            .unwrap();
        let rejected = f.dispatcher.reject(&c1, task.id).await.unwrap();
        assert_eq!(rejected.status, TaskStatus::Pending);
        assert_eq!(rejected.attempts, 1);
        assert_eq!(rejected.courier_id, None);
    }

    #[tokio::test]
    async fn reaper_reverts_and_escalates() {
        let f = fixture();
        let (_, c1) = testutil::seed_courier(&f.store, "c1", 1, "PK5F").await;
        let (_, coord) = testutil::seed_courier(&f.store, "coord", 2, "PK").await;
        let (pickup, delivery) = codes();
        let task = f
            .dispatcher
            .create_task("OPAAAAAAAA01", pickup, delivery, TaskPriority::Normal)
            .await
            .unwrap();
        assert_eq!(task.courier_id, Some(c1.id));

        // 2h01 later the reaper reclaims the assignment.
        f.clock.advance(chrono::Duration::minutes(121));
        assert_eq!(f.dispatcher.reap_stale().await.unwrap(), 1);
        let task1 = f.dispatcher.tasks.get_task(task.id).await.unwrap();
        assert_eq!(task1.status, TaskStatus::Pending);
        assert_eq!(task1.attempts, 1);
        assert_eq!(task1.priority, TaskPriority::Normal);

        // Two more assign/reap cycles reach the cap: urgent priority and
        // the parent-level pool.
        for _ in 0..2 {
            f.dispatcher.sweep_pending().await.unwrap();
            f.clock.advance(chrono::Duration::minutes(121));
            f.dispatcher.reap_stale().await.unwrap();
        }
        let task3 = f.dispatcher.tasks.get_task(task.id).await.unwrap();
        assert_eq!(task3.attempts, 3);
        assert_eq!(task3.priority, TaskPriority::Urgent);

        f.dispatcher.sweep_pending().await.unwrap();
        let escalated = f.dispatcher.tasks.get_task(task.id).await.unwrap();
        assert_eq!(escalated.courier_id, Some(coord.id));
    }

    #[tokio::test]
    async fn delivered_scan_completes_task_and_emits() {
        let f = fixture();
        let (c1_user, c1) = testutil::seed_courier(&f.store, "c1", 1, "PK5F").await;
        let (pickup, delivery) = codes();
        let task = f
            .dispatcher
            .create_task("OPAAAAAAAA01", pickup, delivery, TaskPriority::Normal)
            .await
            .unwrap();
        f.dispatcher.accept(&c1, task.id).await.unwrap();

        let mut done_rx = f.bus.subscribe(Topic::TaskCompleted);
        let picked = Event::LetterStatusChanged {
            barcode: "OPAAAAAAAA01".into(),
            letter_id: None,
            old_status: BarcodeStatus::Bound,
            new_status: BarcodeStatus::Picked,
            actor: c1_user.id,
            op_code: None,
            location: None,
            at: f.clock.now(),
        };
        f.dispatcher.apply_letter_event(&picked).await.unwrap();
        let delivered = Event::LetterStatusChanged {
            barcode: "OPAAAAAAAA01".into(),
            letter_id: None,
            old_status: BarcodeStatus::Picked,
            new_status: BarcodeStatus::Delivered,
            actor: c1_user.id,
            op_code: None,
            location: None,
            at: f.clock.now(),
        };
        f.dispatcher.apply_letter_event(&delivered).await.unwrap();

        let task = f.dispatcher.tasks.get_task(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Delivered);
        assert!(task.completed_at.is_some());
        assert!(done_rx.try_recv().is_ok());

        let courier = f.dispatcher.couriers.get_courier(c1.id).await.unwrap();
        assert_eq!(courier.task_count, 1);
        assert!(courier.points > 0);

        // Replaying the event is harmless: the task is terminal, no
        // active task matches the code any more.
        f.dispatcher.apply_letter_event(&delivered).await.unwrap();
    }

    #[tokio::test]
    async fn visibility_includes_subordinates_and_scope() {
        let f = fixture();
        let (_, coord) = testutil::seed_courier(&f.store, "coord", 2, "PK").await;
        let (_, c1) = testutil::seed_courier(&f.store, "c1", 1, "PK5F").await;
        let (pickup, delivery) = codes();
        let assigned = f
            .dispatcher
            .create_task("OPAAAAAAAA01", pickup.clone(), delivery.clone(), TaskPriority::Normal)
            .await
            .unwrap();
        assert_eq!(assigned.courier_id, Some(c1.id));

        // An out-of-school task is invisible to the coordinator.
        let (_, _qh) = testutil::seed_courier(&f.store, "qh", 1, "QH3B").await;
        f.dispatcher
            .create_task(
                "OPAAAAAAAA02",
                OpCode::parse("QH3B02").unwrap(),
                OpCode::parse("QH3B09").unwrap(),
                TaskPriority::Urgent,
            )
            .await
            .unwrap();

        let visible = f.dispatcher.list_visible(&coord).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, assigned.id);
    }
}
