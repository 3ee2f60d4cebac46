//! Credit ledger: single-writer balance mutation and the daily expiry
//! sweeper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use openpenpal_core::clock::Clock;
use openpenpal_core::credit::{expiry_reference, CreditAccount, CreditTransaction, TX_TYPE_EXPIRED};
use openpenpal_core::error::CoreError;
use openpenpal_core::events::Event;
use openpenpal_core::ports::CreditStore;
use uuid::Uuid;

use crate::bus::EventBus;

pub struct CreditLedger {
    store: Arc<dyn CreditStore>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn CreditStore>, clock: Arc<dyn Clock>, bus: Arc<EventBus>) -> Self {
        Self { store, clock, bus }
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<CreditAccount, CoreError> {
        Ok(self
            .store
            .get_account(user_id)
            .await?
            .unwrap_or_else(|| CreditAccount::fresh(user_id, self.clock.now())))
    }

    pub async fn transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CoreError> {
        self.store.list_transactions(user_id, limit).await
    }

    pub async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<CreditTransaction>, CoreError> {
        self.store.find_by_reference(reference).await
    }

    /// Apply a signed delta. The store serializes per account and refuses
    /// to go negative; the event fires only after the write.
    pub async fn apply(
        &self,
        user_id: Uuid,
        amount: i64,
        tx_type: &str,
        reference: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CreditTransaction, CoreError> {
        let now = self.clock.now();
        let tx = self
            .store
            .apply(user_id, amount, tx_type, reference, expires_at, now)
            .await?;
        self.bus.publish(Event::CreditApplied {
            user_id,
            amount,
            balance: tx.balance_after,
            reference: reference.to_string(),
            at: now,
        });
        tracing::debug!(
            "credit {amount:+} for {user_id} ({tx_type}, balance {})",
            tx.balance_after
        );
        Ok(tx)
    }

    /// One expiry pass: every earned transaction past its `expires_at`
    /// gets a reversal of type `expired`. The reversal is capped at the
    /// current balance so the non-negative invariant survives accounts
    /// that already spent the points.
    pub async fn expire_once(&self) -> Result<usize, CoreError> {
        let now = self.clock.now();
        let due = self.store.list_expired_unreversed(now).await?;
        let mut reversed = 0;
        for tx in due {
            let account = self.balance(tx.user_id).await?;
            let amount = tx.amount.min(account.balance);
            let result = self
                .apply(
                    tx.user_id,
                    -amount,
                    TX_TYPE_EXPIRED,
                    &expiry_reference(tx.id),
                    None,
                )
                .await;
            match result {
                Ok(_) => reversed += 1,
                Err(e) => tracing::error!("expiry reversal for tx {} failed: {e}", tx.id),
            }
        }
        if reversed > 0 {
            tracing::info!("expired {reversed} credit transactions");
        }
        Ok(reversed)
    }

    /// Daily expiry sweeper.
    pub fn spawn_expiry(
        self: &Arc<Self>,
        interval: std::time::Duration,
        shutdown: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("credit expiry sweeper started (interval {interval:?})");
            loop {
                tokio::time::sleep(interval).await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = ledger.expire_once().await {
                    tracing::error!("credit expiry sweep failed: {e}");
                }
            }
        })
    }
}
