//! Topic-based publish/subscribe event bus (§4.1).
//!
//! Delivery is fire-and-forget per subscriber: a slow subscriber never
//! blocks publishers or other subscribers. Each subscriber gets a bounded
//! ring buffer; once full, the oldest buffered event is dropped and the
//! drop is logged as a warning. Events from a single publisher are
//! delivered to each subscriber in publication order; there is no
//! cross-publisher ordering guarantee.

mod pattern;
mod ring;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::model::Event;
use pattern::TopicPattern;
use ring::RingQueue;

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("invalid topic pattern `{0}`")]
    InvalidPattern(String),

    #[error("unknown subscription {0}")]
    UnknownSubscription(Uuid),
}

/// An async event handler. Returning `Err` is logged as a `warn` and does
/// not unsubscribe the handler (§7 kind 6: subscriber failure).
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct EventBusConfig {
    /// Per-subscriber buffer capacity before drop-oldest kicks in.
    pub buffer_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { buffer_size: 256 }
    }
}

struct Subscription {
    pattern: TopicPattern,
    queue: Arc<RingQueue>,
    task: JoinHandle<()>,
}

/// Process-wide publish/subscribe service (§9 Global state: constructed
/// before the registry, pool, and orchestrator; torn down after them).
pub struct EventBus {
    config: EventBusConfig,
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            subscriptions: RwLock::new(HashMap::new()),
        })
    }

    /// Register a handler for every event whose topic matches `topic_pattern`
    /// (glob-style, e.g. `job.*`). Returns a subscription id usable with
    /// [`EventBus::unsubscribe`].
    pub fn subscribe(&self, topic_pattern: &str, handler: EventHandler) -> Result<Uuid> {
        let pattern = TopicPattern::compile(topic_pattern)
            .ok_or_else(|| BusError::InvalidPattern(topic_pattern.to_string()))?;
        let id = Uuid::now_v7();
        let queue = RingQueue::new(self.config.buffer_size);
        let task_queue = queue.clone();
        let task = tokio::spawn(async move {
            loop {
                let Some(event) = task_queue.recv().await else {
                    return;
                };
                if let Err(err) = handler(event).await {
                    warn!(subscription = %id, error = %err, "event bus subscriber failed");
                }
            }
        });

        self.subscriptions.write().insert(
            id,
            Subscription {
                pattern,
                queue,
                task,
            },
        );
        Ok(id)
    }

    /// Drop a subscription, aborting its dispatch task.
    pub fn unsubscribe(&self, id: Uuid) -> Result<()> {
        let sub = self
            .subscriptions
            .write()
            .remove(&id)
            .ok_or(BusError::UnknownSubscription(id))?;
        sub.task.abort();
        sub.queue.close();
        Ok(())
    }

    /// Publish an event to every matching subscriber. Never blocks on a
    /// slow subscriber: pushing into a full ring buffer drops the oldest
    /// buffered event for that subscriber and logs a warning.
    pub fn publish(&self, event: Event) {
        let subs = self.subscriptions.read();
        for (id, sub) in subs.iter() {
            if sub.pattern.matches(&event.event_type) {
                if sub.queue.push(event.clone()) {
                    warn!(
                        subscription = %id,
                        topic = %event.event_type,
                        "event bus subscriber buffer full, dropped oldest event"
                    );
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        for (_, sub) in self.subscriptions.get_mut().drain() {
            sub.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_matching_events_in_order() {
        let bus = EventBus::new(EventBusConfig::default());
        let received: Arc<parking_lot::Mutex<Vec<String>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let received2 = received.clone();

        bus.subscribe(
            "job.*",
            Arc::new(move |event| {
                let received = received2.clone();
                Box::pin(async move {
                    received.lock().push(event.event_type);
                    Ok(())
                })
            }),
        )
        .unwrap();

        bus.publish(Event::new("job.status_change", serde_json::json!({})));
        bus.publish(Event::new("document.saved", serde_json::json!({})));
        bus.publish(Event::new("job.progress", serde_json::json!({})));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            *received.lock(),
            vec!["job.status_change".to_string(), "job.progress".to_string()]
        );
    }

    #[tokio::test]
    async fn full_buffer_drops_oldest_without_blocking_publisher() {
        let bus = EventBus::new(EventBusConfig { buffer_size: 2 });
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let gate = Arc::new(tokio::sync::Notify::new());
        let gate2 = gate.clone();

        bus.subscribe(
            "job.*",
            Arc::new(move |_event| {
                let count = count2.clone();
                let gate = gate2.clone();
                Box::pin(async move {
                    gate.notified().await;
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
        .unwrap();

        for _ in 0..10 {
            bus.publish(Event::new("job.progress", serde_json::json!({})));
        }

        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(count.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(EventBusConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        let id = bus
            .subscribe(
                "job.*",
                Arc::new(move |_event| {
                    let count = count2.clone();
                    Box::pin(async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            )
            .unwrap();

        bus.unsubscribe(id).unwrap();
        bus.publish(Event::new("job.progress", serde_json::json!({})));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
