//! In-process event bus.
//!
//! Bounded per-topic queues over `tokio::sync::broadcast`: delivery is
//! best-effort and at-least-once within the process lifetime, publication
//! order is preserved per topic, and a receiver that falls behind loses
//! the oldest messages first (the producer is never blocked). Events
//! raised inside a logical transaction go through [`TxEvents`] and are
//! published only after commit.

use std::collections::HashMap;

use openpenpal_core::events::{Event, Topic};
use tokio::sync::broadcast;

pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

pub struct EventBus {
    channels: HashMap<Topic, broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let mut channels = HashMap::new();
        for topic in Topic::ALL {
            let (tx, _) = broadcast::channel(capacity.max(1));
            channels.insert(topic, tx);
        }
        Self { channels }
    }

    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        let tx = self
            .channels
            .get(&topic)
            .expect("every topic has a channel");
        // Err means no live subscriber; that is fine for best-effort
        // delivery, but worth a trace since events are load-bearing for
        // task projection and rewards.
        if tx.send(event).is_err() {
            tracing::debug!("no subscribers on {}", topic.as_str());
        }
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.channels
            .get(&topic)
            .expect("every topic has a channel")
            .subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

/// Post-commit event buffer. Engines push into this while a logical
/// transaction is open; `commit` hands everything to the bus, `discard`
/// drops it on rollback.
#[derive(Default)]
pub struct TxEvents {
    buffered: Vec<Event>,
}

impl TxEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.buffered.push(event);
    }

    pub fn commit(self, bus: &EventBus) {
        for event in self.buffered {
            bus.publish(event);
        }
    }

    pub fn discard(self) {
        if !self.buffered.is_empty() {
            tracing::debug!("discarding {} uncommitted events", self.buffered.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn task_created() -> Event {
        Event::TaskCreated {
            task_id: Uuid::new_v4(),
            letter_code: "OPABCDEFGH12".into(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_subscriber_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe(Topic::TaskCreated);
        let first = task_created();
        let second = task_created();
        bus.publish(first.clone());
        bus.publish(second.clone());

        let got1 = rx.recv().await.unwrap();
        let got2 = rx.recv().await.unwrap();
        match (got1, first) {
            (Event::TaskCreated { task_id: a, .. }, Event::TaskCreated { task_id: b, .. }) => {
                assert_eq!(a, b)
            }
            _ => panic!("wrong event"),
        }
        match (got2, second) {
            (Event::TaskCreated { task_id: a, .. }, Event::TaskCreated { task_id: b, .. }) => {
                assert_eq!(a, b)
            }
            _ => panic!("wrong event"),
        }
    }

    #[tokio::test]
    async fn overflow_drops_oldest_not_producer() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe(Topic::TaskCreated);
        for _ in 0..5 {
            bus.publish(task_created());
        }
        // The receiver lagged: the first recv reports how many were
        // dropped, subsequent recvs drain what is left.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert_eq!(n, 3),
            other => panic!("expected lag, got {other:?}"),
        }
        assert!(rx.recv().await.is_ok());
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn tx_events_publish_only_on_commit() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe(Topic::TaskCreated);

        let mut tx = TxEvents::new();
        tx.push(task_created());
        tx.discard();
        assert!(rx.try_recv().is_err());

        let mut tx = TxEvents::new();
        tx.push(task_created());
        tx.commit(&bus);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(task_created());
    }
}
