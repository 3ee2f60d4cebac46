//! Reward listener: domain events in, queued credit tasks out.
//!
//! A delivered barcode mints `courier_delivery` points for the scanning
//! courier and `letter_delivered` points for the sender; an approved
//! courier gets the one-off approval grant. Rejections from the limiter
//! are expected traffic and only logged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use openpenpal_core::error::CoreError;
use openpenpal_core::events::{Event, Topic};
use openpenpal_core::letter::BarcodeStatus;
use openpenpal_core::ports::LetterStore;
use openpenpal_core::ratelimit::ActionContext;

use crate::bus::EventBus;
use crate::credit::rules::default_points;
use crate::credit::worker::{CreditWorkerPool, EnqueueRequest};

pub struct RewardListener {
    pool: Arc<CreditWorkerPool>,
    letters: Arc<dyn LetterStore>,
}

impl RewardListener {
    pub fn new(pool: Arc<CreditWorkerPool>, letters: Arc<dyn LetterStore>) -> Self {
        Self { pool, letters }
    }

    pub async fn handle_event(&self, event: &Event) {
        let result = match event {
            Event::LetterStatusChanged {
                barcode,
                letter_id,
                new_status: BarcodeStatus::Delivered,
                actor,
                ..
            } => self.on_delivered(barcode, *letter_id, *actor).await,
            Event::CourierApproved {
                courier_id,
                user_id,
                ..
            } => {
                self.enqueue(
                    *user_id,
                    "admin_reward",
                    "courier approval grant",
                    format!("courier:{courier_id}:approved"),
                )
                .await
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!("reward enqueue skipped: {e}");
        }
    }

    async fn on_delivered(
        &self,
        barcode: &str,
        letter_id: Option<uuid::Uuid>,
        actor: uuid::Uuid,
    ) -> Result<(), CoreError> {
        self.enqueue(
            actor,
            "courier_delivery",
            "letter delivered to recipient",
            format!("barcode:{barcode}:delivered:courier"),
        )
        .await?;
        if let Some(id) = letter_id {
            let letter = self.letters.get_letter(id).await?;
            self.enqueue(
                letter.user_id,
                "letter_delivered",
                "your letter arrived",
                format!("letter:{id}:delivered:sender"),
            )
            .await?;
        }
        Ok(())
    }

    async fn enqueue(
        &self,
        user_id: uuid::Uuid,
        action: &str,
        description: &str,
        reference: String,
    ) -> Result<(), CoreError> {
        self.pool
            .enqueue_task(EnqueueRequest {
                user_id,
                task_type: action.to_string(),
                points: default_points(action),
                description: description.to_string(),
                reference,
                metadata: None,
                context: ActionContext::default(),
            })
            .await
            .map(|_| ())
    }

    pub fn spawn(
        self: &Arc<Self>,
        bus: &EventBus,
        shutdown: Arc<AtomicBool>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        [Topic::LetterStatusChanged, Topic::CourierApproved]
            .into_iter()
            .map(|topic| {
                let listener = Arc::clone(self);
                let mut rx = bus.subscribe(topic);
                let shutdown = Arc::clone(&shutdown);
                tokio::spawn(async move {
                    loop {
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        match rx.recv().await {
                            Ok(event) => listener.handle_event(&event).await,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!("reward listener lagged, {n} events dropped");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                })
            })
            .collect()
    }
}
