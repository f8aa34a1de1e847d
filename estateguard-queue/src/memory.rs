//! In-memory queue backend for development and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use estateguard_events::Event;

use crate::{
    topics, HandlerError, MessageHandler, MessageId, MessageQueue, QueueError, QueueHealth,
    QueueMessage, SubscriptionId,
};

#[derive(Debug, Clone)]
pub struct MemoryQueueConfig {
    /// Ring-buffer capacity per topic; publishing beyond it errors.
    pub capacity: usize,
    /// How many times a rejected message is re-enqueued before it goes to
    /// the dead-letter topic.
    pub requeue_limit: u32,
    /// Worker wake-up interval when the notify edge is missed.
    pub poll_interval: Duration,
}

impl Default for MemoryQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            requeue_limit: 1,
            poll_interval: Duration::from_millis(25),
        }
    }
}

/// Mutex-guarded ring buffers with one worker task per subscription.
/// Messages are auto-acked when the handler returns `Ok`; handler failures
/// drive a requeue or a dead-letter move. Nothing survives the process.
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

struct Inner {
    config: MemoryQueueConfig,
    connected: AtomicBool,
    buffers: Mutex<HashMap<String, VecDeque<QueueMessage>>>,
    in_flight: Mutex<HashMap<MessageId, QueueMessage>>,
    notify: Notify,
    next_message: AtomicU64,
    next_subscription: AtomicU64,
    shutdown: Mutex<CancellationToken>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl InMemoryQueue {
    pub fn new(config: MemoryQueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connected: AtomicBool::new(false),
                buffers: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                next_message: AtomicU64::new(1),
                next_subscription: AtomicU64::new(1),
                shutdown: Mutex::new(CancellationToken::new()),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(MemoryQueueConfig::default())
    }
}

impl Inner {
    fn ensure_connected(&self) -> Result<(), QueueError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(QueueError::NotConnected)
        }
    }

    fn pop(&self, topic: &str) -> Option<QueueMessage> {
        let mut buffers = self.buffers.lock();
        let message = buffers.get_mut(topic)?.pop_front()?;
        let mut message = message;
        message.delivery_count += 1;
        self.in_flight
            .lock()
            .insert(message.id.clone(), message.clone());
        Some(message)
    }

    fn enqueue(&self, topic: &str, message: QueueMessage) -> Result<(), QueueError> {
        let mut buffers = self.buffers.lock();
        let buffer = buffers.entry(topic.to_string()).or_default();
        if buffer.len() >= self.config.capacity {
            return Err(QueueError::Overflow {
                topic: topic.to_string(),
                capacity: self.config.capacity,
            });
        }
        buffer.push_back(message);
        drop(buffers);
        self.notify.notify_waiters();
        Ok(())
    }

    fn dead_letter(&self, mut message: QueueMessage) {
        if message.topic == topics::DEAD_LETTER {
            // A poisoned dead-letter consumer must not loop forever.
            warn!(message_id = %message.id, "dropping message rejected off the dead-letter topic");
            return;
        }
        debug!(message_id = %message.id, topic = %message.topic, "moving message to dead letter");
        message.topic = topics::DEAD_LETTER.to_string();
        message.delivery_count = 0;
        if let Err(err) = self.enqueue(topics::DEAD_LETTER, message) {
            warn!(error = %err, "failed to enqueue dead-letter message");
        }
    }

    async fn deliver(self: &Arc<Self>, message: QueueMessage, handler: &MessageHandler) {
        let id = message.id.clone();
        match handler(message).await {
            Ok(()) => {
                // Auto-ack; the handler may have acked explicitly already.
                let _ = self.ack_inner(&id);
            }
            Err(HandlerError::Transient(reason)) => {
                debug!(message_id = %id, %reason, "handler failed transiently, rejecting with requeue");
                if let Err(err) = self.reject_inner(&id, true) {
                    warn!(message_id = %id, error = %err, "reject failed");
                }
            }
            Err(HandlerError::Permanent(reason)) => {
                debug!(message_id = %id, %reason, "handler failed permanently, rejecting to dead letter");
                if let Err(err) = self.reject_inner(&id, false) {
                    warn!(message_id = %id, error = %err, "reject failed");
                }
            }
        }
    }

    fn ack_inner(&self, id: &MessageId) -> Result<(), QueueError> {
        self.in_flight
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownMessage(id.clone()))
    }

    fn reject_inner(&self, id: &MessageId, requeue: bool) -> Result<(), QueueError> {
        let message = self
            .in_flight
            .lock()
            .remove(id)
            .ok_or_else(|| QueueError::UnknownMessage(id.clone()))?;
        if requeue && message.delivery_count <= self.config.requeue_limit {
            let topic = message.topic.clone();
            self.enqueue(&topic, message)?;
        } else {
            self.dead_letter(message);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn connect(&self) -> Result<(), QueueError> {
        *self.inner.shutdown.lock() = CancellationToken::new();
        self.inner.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), QueueError> {
        self.inner.connected.store(false, Ordering::Release);
        self.inner.shutdown.lock().cancel();
        self.inner.notify.notify_waiters();

        let workers: Vec<JoinHandle<()>> = self.inner.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }

        // Requeue whatever was still being handled so nothing is lost on a
        // reconnect within the same process.
        let stranded: Vec<QueueMessage> = self.inner.in_flight.lock().drain().map(|(_, m)| m).collect();
        for message in stranded {
            let topic = message.topic.clone();
            let _ = self.inner.enqueue(&topic, message);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, event: Event) -> Result<MessageId, QueueError> {
        self.inner.ensure_connected()?;
        if !topics::is_known(topic) {
            return Err(QueueError::UnknownTopic(topic.to_string()));
        }
        let id = format!("mem-{}", self.inner.next_message.fetch_add(1, Ordering::Relaxed));
        let message = QueueMessage {
            id: id.clone(),
            topic: topic.to_string(),
            event,
            delivery_count: 0,
        };
        self.inner.enqueue(topic, message)?;
        Ok(id)
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, QueueError> {
        self.inner.ensure_connected()?;
        if !topics::is_known(topic) {
            return Err(QueueError::UnknownTopic(topic.to_string()));
        }
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let topic = topic.to_string();
        let token = self.inner.shutdown.lock().clone();

        let worker = tokio::spawn(async move {
            debug!(subscription = id, topic = %topic, "in-memory subscription worker started");
            loop {
                if token.is_cancelled() {
                    break;
                }
                match inner.pop(&topic) {
                    Some(message) => inner.deliver(message, &handler).await,
                    None => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = inner.notify.notified() => {}
                            _ = tokio::time::sleep(inner.config.poll_interval) => {}
                        }
                    }
                }
            }
            debug!(subscription = id, topic = %topic, "in-memory subscription worker stopped");
        });

        self.inner.workers.lock().push(worker);
        Ok(id)
    }

    async fn ack(&self, id: &MessageId) -> Result<(), QueueError> {
        self.inner.ack_inner(id)
    }

    async fn reject(&self, id: &MessageId, requeue: bool) -> Result<(), QueueError> {
        self.inner.reject_inner(id, requeue)
    }

    async fn health_check(&self) -> QueueHealth {
        let start = Instant::now();
        let _depth: usize = self.inner.buffers.lock().values().map(VecDeque::len).sum();
        QueueHealth {
            connected: self.inner.connected.load(Ordering::Acquire),
            latency: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler;
    use estateguard_events::{EventEnvelope, EventType, TraceContext};
    use std::sync::Mutex as StdMutex;

    fn event() -> Event {
        let envelope = EventEnvelope::new(EventType::RawListing, &TraceContext::generate(), 3);
        Event::new(envelope, &serde_json::json!({"n": 1})).unwrap()
    }

    async fn connected_queue() -> InMemoryQueue {
        let queue = InMemoryQueue::default();
        queue.connect().await.unwrap();
        queue
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn delivers_and_auto_acks() {
        let queue = connected_queue().await;
        let seen: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen_in_handler = Arc::clone(&seen);
        queue
            .subscribe(
                topics::LISTINGS_RAW,
                handler(move |message: QueueMessage| {
                    let seen = Arc::clone(&seen_in_handler);
                    async move {
                        seen.lock().unwrap().push(message.id);
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        let id = queue.publish(topics::LISTINGS_RAW, event()).await.unwrap();
        wait_until(|| !seen.lock().unwrap().is_empty()).await;
        assert_eq!(seen.lock().unwrap()[0], id);
        assert!(queue.inner.in_flight.lock().is_empty());
        queue.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn transient_failure_requeues_once_then_dead_letters() {
        let queue = connected_queue().await;
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&attempts);
        queue
            .subscribe(
                topics::LISTINGS_RAW,
                handler(move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(HandlerError::Transient("broker hiccup".into()))
                    }
                }),
            )
            .await
            .unwrap();

        queue.publish(topics::LISTINGS_RAW, event()).await.unwrap();
        wait_until(|| {
            queue
                .inner
                .buffers
                .lock()
                .get(topics::DEAD_LETTER)
                .map(|b| !b.is_empty())
                .unwrap_or(false)
        })
        .await;
        // First delivery plus one requeue.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        queue.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn permanent_failure_goes_straight_to_dead_letter() {
        let queue = connected_queue().await;
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&attempts);
        queue
            .subscribe(
                topics::LISTINGS_RAW,
                handler(move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(HandlerError::Permanent("schema violation".into()))
                    }
                }),
            )
            .await
            .unwrap();

        queue.publish(topics::LISTINGS_RAW, event()).await.unwrap();
        wait_until(|| {
            queue
                .inner
                .buffers
                .lock()
                .get(topics::DEAD_LETTER)
                .map(|b| !b.is_empty())
                .unwrap_or(false)
        })
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        queue.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn overflow_is_surfaced_to_the_publisher() {
        let queue = InMemoryQueue::new(MemoryQueueConfig {
            capacity: 2,
            ..MemoryQueueConfig::default()
        });
        queue.connect().await.unwrap();
        queue.publish(topics::LISTINGS_RAW, event()).await.unwrap();
        queue.publish(topics::LISTINGS_RAW, event()).await.unwrap();
        let err = queue.publish(topics::LISTINGS_RAW, event()).await.unwrap_err();
        assert!(matches!(err, QueueError::Overflow { .. }));
    }

    #[tokio::test]
    async fn rejects_unknown_topics_and_disconnected_use() {
        let queue = InMemoryQueue::default();
        assert!(matches!(
            queue.publish(topics::LISTINGS_RAW, event()).await,
            Err(QueueError::NotConnected)
        ));
        queue.connect().await.unwrap();
        assert!(matches!(
            queue.publish("listings.unknown", event()).await,
            Err(QueueError::UnknownTopic(_))
        ));
    }
}
