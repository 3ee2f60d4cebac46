//! Credit task worker pool.
//!
//! N cooperative workers bounded by a semaphore plus one dispatch loop.
//! Both the loop and direct callers funnel through the store's
//! compare-and-swap claim, so a task executes at most once at a time even
//! across processes. Execution is idempotent against the ledger: a
//! pre-existing transaction with the task's reference short-circuits to
//! `completed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use openpenpal_core::clock::Clock;
use openpenpal_core::credit::{priority_for_action, CreditBatch, CreditTask, CreditTaskStatus};
use openpenpal_core::error::CoreError;
use openpenpal_core::ports::{CreditTaskStore, UserStore};
use openpenpal_core::ratelimit::ActionContext;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::credit::ledger::CreditLedger;
use crate::credit::rules;
use crate::ratelimit::RateLimiter;

pub struct EnqueueRequest {
    pub user_id: Uuid,
    pub task_type: String,
    pub points: i64,
    pub description: String,
    pub reference: String,
    pub metadata: Option<serde_json::Value>,
    pub context: ActionContext,
}

pub struct CreditWorkerPool {
    queue: Arc<dyn CreditTaskStore>,
    users: Arc<dyn UserStore>,
    ledger: Arc<CreditLedger>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    cfg: WorkerConfig,
    expiry_window: chrono::Duration,
    permits: Arc<Semaphore>,
}

impl CreditWorkerPool {
    pub fn new(
        queue: Arc<dyn CreditTaskStore>,
        users: Arc<dyn UserStore>,
        ledger: Arc<CreditLedger>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        cfg: WorkerConfig,
        expiry_window: chrono::Duration,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(cfg.pool_size.max(1)));
        Self {
            queue,
            users,
            ledger,
            limiter,
            clock,
            cfg,
            expiry_window,
            permits,
        }
    }

    // ── Enqueue ───────────────────────────────────────────────

    /// Gate and persist one reward task. Order matters: the block list
    /// overrides everything, the quota check is advisory (execution
    /// enforces), a high-severity fraud hit rejects without consuming
    /// quota.
    pub async fn enqueue_task(&self, req: EnqueueRequest) -> Result<CreditTask, CoreError> {
        let user = self.users.get_user(req.user_id).await?;
        if self.limiter.is_blocked(req.user_id) {
            return Err(CoreError::UserBlocked(format!("user {}", req.user_id)));
        }
        let decision = self
            .limiter
            .check(req.user_id, user.role, &req.task_type, req.points);
        if !decision.allowed {
            return Err(CoreError::LimitExceeded {
                period: decision.period.unwrap_or(openpenpal_core::ratelimit::RatePeriod::Daily),
                current_count: decision.current_count,
                max_count: decision.max_count,
                current_points: decision.current_points,
                max_points: decision.max_points,
            });
        }
        if let Some(hit) = self
            .limiter
            .detect_anomalous(req.user_id, &req.task_type, &req.context)
        {
            if hit.severity == openpenpal_core::ratelimit::FraudSeverity::High {
                return Err(CoreError::SuspiciousActivity {
                    severity: hit.severity,
                    reason: hit.reason,
                });
            }
        }
        rules::validate_award(&req.task_type, req.points)?;

        let now = self.clock.now();
        let task = CreditTask {
            id: Uuid::new_v4(),
            user_id: req.user_id,
            task_type: req.task_type.clone(),
            points: req.points,
            description: req.description,
            reference: req.reference,
            status: CreditTaskStatus::Pending,
            priority: priority_for_action(&req.task_type),
            attempts: 0,
            max_attempts: 3,
            scheduled_at: None,
            created_at: now,
            completed_at: None,
            failed_at: None,
            error: None,
            metadata: req.metadata,
        };
        self.queue.enqueue(&task).await?;
        tracing::debug!(
            "credit task {} queued: {} {:+} for {}",
            task.id,
            task.task_type,
            task.points,
            task.user_id
        );
        Ok(task)
    }

    /// One batch record and one task per user, in a single transaction.
    /// Admin path: the per-user gates run at execution time instead.
    pub async fn enqueue_batch(
        &self,
        name: &str,
        task_type: &str,
        user_ids: &[Uuid],
        points: i64,
        description: &str,
    ) -> Result<CreditBatch, CoreError> {
        rules::validate_award(task_type, points)?;
        let now = self.clock.now();
        let batch = CreditBatch {
            id: Uuid::new_v4(),
            name: name.to_string(),
            task_type: task_type.to_string(),
            user_count: user_ids.len() as i64,
            created_at: now,
        };
        let tasks: Vec<CreditTask> = user_ids
            .iter()
            .map(|user_id| CreditTask {
                id: Uuid::new_v4(),
                user_id: *user_id,
                task_type: task_type.to_string(),
                points,
                description: description.to_string(),
                reference: format!("batch:{}:{user_id}", batch.id),
                status: CreditTaskStatus::Pending,
                priority: priority_for_action(task_type),
                attempts: 0,
                max_attempts: 3,
                scheduled_at: None,
                created_at: now,
                completed_at: None,
                failed_at: None,
                error: None,
                metadata: None,
            })
            .collect();
        self.queue.enqueue_batch(&batch, &tasks).await?;
        tracing::info!(
            "batch {} queued {} {task_type} rewards",
            batch.name,
            tasks.len()
        );
        Ok(batch)
    }

    // ── Execution ─────────────────────────────────────────────

    /// Execute one claimed task. The caller must hold the `executing`
    /// claim from `claim_next_due`.
    pub async fn execute(&self, task: CreditTask) -> Result<(), CoreError> {
        let now = self.clock.now();

        // Idempotency: a crash after ledger commit but before the status
        // update leaves a transaction with our reference behind.
        if self.ledger.find_by_reference(&task.reference).await?.is_some() {
            tracing::info!(
                "credit task {} already applied (reference {}), completing",
                task.id,
                task.reference
            );
            return self.queue.mark_completed(task.id, now).await;
        }

        let user = match self.users.get_user(task.user_id).await {
            Ok(user) => user,
            Err(e) => {
                self.queue.mark_failed(task.id, &e.to_string(), now).await?;
                return Ok(());
            }
        };
        if self.limiter.is_blocked(task.user_id) {
            self.queue.mark_failed(task.id, "user blocked", now).await?;
            return Ok(());
        }

        // Enforcing re-check: the enqueue-time check may be stale.
        if let Err(e) = self
            .limiter
            .record(task.user_id, user.role, &task.task_type, task.points)
        {
            self.queue.mark_failed(task.id, &e.to_string(), now).await?;
            return Ok(());
        }

        let expires_at = Some(now + self.expiry_window);
        match self
            .ledger
            .apply(
                task.user_id,
                task.points,
                &task.task_type,
                &task.reference,
                expires_at,
            )
            .await
        {
            Ok(_) => self.queue.mark_completed(task.id, now).await,
            Err(e) => {
                // The quota was consumed for a grant that never landed.
                self.limiter
                    .rollback(task.user_id, &task.task_type, task.points);
                self.queue.mark_failed(task.id, &e.to_string(), now).await?;
                Ok(())
            }
        }
    }

    /// Claim and execute one due task. `Ok(None)` when the queue is dry.
    pub async fn tick(&self) -> Result<Option<Uuid>, CoreError> {
        let now = self.clock.now();
        let Some(task) = self.queue.claim_next_due(now).await? else {
            return Ok(None);
        };
        let id = task.id;
        self.execute(task).await?;
        Ok(Some(id))
    }

    /// Run the queue dry. Test and CLI helper.
    pub async fn drain(&self) -> Result<usize, CoreError> {
        let mut processed = 0;
        while self.tick().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    /// One retry-sweeper pass.
    pub async fn retry_sweep(&self) -> Result<u64, CoreError> {
        let reset = self
            .queue
            .retry_failed(self.clock.now(), self.cfg.retry_max_age)
            .await?;
        if reset > 0 {
            tracing::info!("retry sweeper reset {reset} failed credit tasks");
        }
        Ok(reset)
    }

    // ── Loops ─────────────────────────────────────────────────

    /// Dispatch loop: claim under a worker permit, execute on a spawned
    /// worker, sleep when dry.
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        shutdown: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                "credit worker pool started ({} workers, poll {:?})",
                pool.cfg.pool_size,
                pool.cfg.poll_interval
            );
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let permit = match Arc::clone(&pool.permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                match pool.queue.claim_next_due(pool.clock.now()).await {
                    Ok(Some(task)) => {
                        let worker = Arc::clone(&pool);
                        tokio::spawn(async move {
                            let id = task.id;
                            if let Err(e) = worker.execute(task).await {
                                tracing::error!("credit task {id} execution errored: {e}");
                            }
                            drop(permit);
                        });
                    }
                    Ok(None) => {
                        drop(permit);
                        tokio::time::sleep(pool.cfg.poll_interval).await;
                    }
                    Err(e) => {
                        drop(permit);
                        tracing::error!("credit task claim failed: {e}");
                        tokio::time::sleep(pool.cfg.poll_interval).await;
                    }
                }
            }
        })
    }

    pub fn spawn_retry_sweeper(
        self: &Arc<Self>,
        shutdown: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(pool.cfg.retry_interval).await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = pool.retry_sweep().await {
                    tracing::error!("credit retry sweep failed: {e}");
                }
            }
        })
    }
}
