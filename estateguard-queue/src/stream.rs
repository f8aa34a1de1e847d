//! Durable stream queue backed by sled.
//!
//! Layout: one append-only tree per topic (`stream/{topic}`) with monotonic
//! u64 entry keys, one pending-entries tree per consumer group and topic
//! (`pending/{group}/{topic}`), and a `cursors` tree recording the last
//! entry id delivered to the group. Entries are claimed into the pending
//! tree on delivery and removed on ack; a reject either flags the entry for
//! redelivery or moves it to the dead-letter stream. Pending entries left
//! behind by a crash are redelivered when a consumer reattaches, which is
//! where the at-least-once guarantee comes from.
//!
//! The deployment runs a single consumer group per data directory; acked
//! entries are pruned from the stream so disk stays bounded.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use estateguard_events::Event;

use crate::{
    topics, HandlerError, MessageHandler, MessageId, MessageQueue, QueueError, QueueHealth,
    QueueMessage, SubscriptionId,
};

const CLAIM_BATCH: usize = 16;

#[derive(Debug, Clone)]
pub struct StreamQueueConfig {
    pub data_dir: PathBuf,
    pub consumer_group: String,
    pub consumer_name: String,
    /// How long a blocking read waits before re-checking for new entries.
    pub block_interval: Duration,
    /// Backpressure cap: a consumer with this many unacked entries stops
    /// reading new ones until it catches up.
    pub max_pending: usize,
    /// Rejected entries are redelivered this many times before moving to
    /// the dead-letter stream.
    pub requeue_limit: u32,
    /// Publishers get an overflow error once a stream holds this many
    /// unacked entries.
    pub max_stream_len: usize,
}

impl Default for StreamQueueConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/queue"),
            consumer_group: "estateguard".to_string(),
            consumer_name: "worker-1".to_string(),
            block_interval: Duration::from_millis(500),
            max_pending: 1000,
            requeue_limit: 1,
            max_stream_len: 100_000,
        }
    }
}

/// Per-delivery bookkeeping stored next to the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingEntry {
    delivery_count: u32,
    consumer: String,
    delivered_at_ms: i64,
    redeliver: bool,
}

pub struct StreamQueue {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    config: StreamQueueConfig,
    db: RwLock<Option<sled::Db>>,
    shutdown: Mutex<CancellationToken>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_subscription: AtomicU64,
    /// Entry ids this process has handed to a handler and not yet resolved,
    /// per topic. Pending entries outside this set are due for (re)delivery.
    claimed: DashMap<String, Arc<Mutex<HashSet<u64>>>>,
    /// Serializes the claim step so concurrent workers on one topic share
    /// the load instead of double-delivering.
    claim_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl StreamQueue {
    pub fn new(config: StreamQueueConfig) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                config,
                db: RwLock::new(None),
                shutdown: Mutex::new(CancellationToken::new()),
                workers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                claimed: DashMap::new(),
                claim_locks: DashMap::new(),
            }),
        }
    }
}

fn stream_tree(db: &sled::Db, topic: &str) -> Result<sled::Tree, QueueError> {
    Ok(db.open_tree(format!("stream/{topic}"))?)
}

fn message_id(topic: &str, entry: u64) -> MessageId {
    format!("{topic}@{entry}")
}

fn parse_message_id(id: &MessageId) -> Result<(String, u64), QueueError> {
    let (topic, entry) = id
        .rsplit_once('@')
        .ok_or_else(|| QueueError::MalformedMessageId(id.clone()))?;
    let entry = entry
        .parse()
        .map_err(|_| QueueError::MalformedMessageId(id.clone()))?;
    Ok((topic.to_string(), entry))
}

impl StreamInner {
    fn db(&self) -> Result<sled::Db, QueueError> {
        self.db.read().clone().ok_or(QueueError::NotConnected)
    }

    fn pending_tree(&self, db: &sled::Db, topic: &str) -> Result<sled::Tree, QueueError> {
        Ok(db.open_tree(format!("pending/{}/{topic}", self.config.consumer_group))?)
    }

    fn cursor_key(&self, topic: &str) -> String {
        format!("{}/{topic}", self.config.consumer_group)
    }

    fn claimed_set(&self, topic: &str) -> Arc<Mutex<HashSet<u64>>> {
        self.claimed
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HashSet::new())))
            .clone()
    }

    fn claim_lock(&self, topic: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.claim_locks
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn read_cursor(&self, db: &sled::Db, topic: &str) -> Result<u64, QueueError> {
        let cursors = db.open_tree("cursors")?;
        Ok(cursors
            .get(self.cursor_key(topic))?
            .map(|raw| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&raw[..8.min(raw.len())]);
                u64::from_be_bytes(bytes)
            })
            .unwrap_or(0))
    }

    fn write_cursor(&self, db: &sled::Db, topic: &str, entry: u64) -> Result<(), QueueError> {
        let cursors = db.open_tree("cursors")?;
        cursors.insert(self.cursor_key(topic), entry.to_be_bytes().to_vec())?;
        Ok(())
    }

    fn decode_event(raw: &[u8]) -> Result<Event, QueueError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Claim up to `CLAIM_BATCH` entries for delivery: due pending entries
    /// first (redelivery and crash recovery), then new entries past the
    /// group cursor.
    async fn claim_batch(&self, topic: &str) -> Result<Vec<QueueMessage>, QueueError> {
        let db = self.db()?;
        let lock = self.claim_lock(topic);
        let _guard = lock.lock().await;

        let stream = stream_tree(&db, topic)?;
        let pending = self.pending_tree(&db, topic)?;
        let claimed = self.claimed_set(topic);
        let mut batch = Vec::new();
        let now_ms = unix_millis();

        for item in pending.iter() {
            if batch.len() >= CLAIM_BATCH {
                break;
            }
            let (key, value) = item?;
            let entry_id = decode_entry_key(&key)?;
            let mut entry: PendingEntry = serde_json::from_slice(&value)?;
            let due = entry.redeliver || !claimed.lock().contains(&entry_id);
            if !due {
                continue;
            }
            let Some(raw_event) = stream.get(&key)? else {
                // Orphaned bookkeeping; drop it.
                pending.remove(&key)?;
                claimed.lock().remove(&entry_id);
                continue;
            };
            entry.delivery_count += 1;
            entry.redeliver = false;
            entry.consumer = self.config.consumer_name.clone();
            entry.delivered_at_ms = now_ms;
            pending.insert(&key, serde_json::to_vec(&entry)?)?;
            claimed.lock().insert(entry_id);
            batch.push(QueueMessage {
                id: message_id(topic, entry_id),
                topic: topic.to_string(),
                event: Self::decode_event(&raw_event)?,
                delivery_count: entry.delivery_count,
            });
        }

        let mut cursor = self.read_cursor(&db, topic)?;
        while batch.len() < CLAIM_BATCH {
            let Some((key, raw_event)) = next_entry(&stream, cursor)? else {
                break;
            };
            let entry_id = decode_entry_key(&key)?;
            let entry = PendingEntry {
                delivery_count: 1,
                consumer: self.config.consumer_name.clone(),
                delivered_at_ms: now_ms,
                redeliver: false,
            };
            pending.insert(&key, serde_json::to_vec(&entry)?)?;
            claimed.lock().insert(entry_id);
            cursor = entry_id;
            self.write_cursor(&db, topic, cursor)?;
            batch.push(QueueMessage {
                id: message_id(topic, entry_id),
                topic: topic.to_string(),
                event: Self::decode_event(&raw_event)?,
                delivery_count: 1,
            });
        }

        Ok(batch)
    }

    fn ack_inner(&self, id: &MessageId) -> Result<(), QueueError> {
        let (topic, entry_id) = parse_message_id(id)?;
        let db = self.db()?;
        let pending = self.pending_tree(&db, &topic)?;
        let key = entry_id.to_be_bytes();
        if pending.remove(key)?.is_none() {
            return Err(QueueError::UnknownMessage(id.clone()));
        }
        // Single consumer group: nothing will read this entry again.
        stream_tree(&db, &topic)?.remove(key)?;
        self.claimed_set(&topic).lock().remove(&entry_id);
        Ok(())
    }

    fn reject_inner(&self, id: &MessageId, requeue: bool) -> Result<(), QueueError> {
        let (topic, entry_id) = parse_message_id(id)?;
        let db = self.db()?;
        let pending = self.pending_tree(&db, &topic)?;
        let key = entry_id.to_be_bytes();
        let Some(raw) = pending.get(key)? else {
            return Err(QueueError::UnknownMessage(id.clone()));
        };
        let mut entry: PendingEntry = serde_json::from_slice(&raw)?;

        if requeue && entry.delivery_count <= self.config.requeue_limit {
            entry.redeliver = true;
            pending.insert(key, serde_json::to_vec(&entry)?)?;
            self.claimed_set(&topic).lock().remove(&entry_id);
            return Ok(());
        }

        // Out of redeliveries (or an explicit permanent reject): move the
        // entry to the dead-letter stream.
        let stream = stream_tree(&db, &topic)?;
        if let Some(raw_event) = stream.get(key)? {
            if topic != topics::DEAD_LETTER {
                let dead = stream_tree(&db, topics::DEAD_LETTER)?;
                let dead_id = db.generate_id()?;
                dead.insert(dead_id.to_be_bytes(), raw_event)?;
            } else {
                warn!(message_id = %id, "dropping entry rejected off the dead-letter stream");
            }
            stream.remove(key)?;
        }
        pending.remove(key)?;
        self.claimed_set(&topic).lock().remove(&entry_id);
        Ok(())
    }

    async fn deliver(self: &Arc<Self>, message: QueueMessage, handler: &MessageHandler) {
        let id = message.id.clone();
        match handler(message).await {
            Ok(()) => {
                if let Err(err) = self.ack_inner(&id) {
                    // The handler may have acked explicitly.
                    debug!(message_id = %id, error = %err, "auto-ack skipped");
                }
            }
            Err(HandlerError::Transient(reason)) => {
                debug!(message_id = %id, %reason, "transient handler failure, scheduling redelivery");
                if let Err(err) = self.reject_inner(&id, true) {
                    warn!(message_id = %id, error = %err, "reject failed");
                }
            }
            Err(HandlerError::Permanent(reason)) => {
                debug!(message_id = %id, %reason, "permanent handler failure, dead-lettering");
                if let Err(err) = self.reject_inner(&id, false) {
                    warn!(message_id = %id, error = %err, "reject failed");
                }
            }
        }
    }

    fn pending_depth(&self, topic: &str) -> Result<usize, QueueError> {
        let db = self.db()?;
        Ok(self.pending_tree(&db, topic)?.len())
    }
}

fn decode_entry_key(key: &[u8]) -> Result<u64, QueueError> {
    if key.len() != 8 {
        return Err(QueueError::Storage(format!(
            "stream key of unexpected length {}",
            key.len()
        )));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(key);
    Ok(u64::from_be_bytes(bytes))
}

fn next_entry(
    stream: &sled::Tree,
    after: u64,
) -> Result<Option<(sled::IVec, sled::IVec)>, QueueError> {
    let start = after.checked_add(1).unwrap_or(u64::MAX).to_be_bytes();
    Ok(stream.range(start..).next().transpose()?)
}

fn unix_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl MessageQueue for StreamQueue {
    async fn connect(&self) -> Result<(), QueueError> {
        let mut guard = self.inner.db.write();
        if guard.is_none() {
            let db = sled::open(&self.inner.config.data_dir)?;
            *guard = Some(db);
        }
        drop(guard);
        *self.inner.shutdown.lock() = CancellationToken::new();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), QueueError> {
        self.inner.shutdown.lock().cancel();
        let workers: Vec<JoinHandle<()>> = self.inner.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
        // Unacked deliveries stay in the pending tree and are redelivered on
        // the next attach.
        let db = self.inner.db.write().take();
        if let Some(db) = db {
            db.flush_async().await?;
        }
        self.inner.claimed.clear();
        Ok(())
    }

    async fn publish(&self, topic: &str, event: Event) -> Result<MessageId, QueueError> {
        if !topics::is_known(topic) {
            return Err(QueueError::UnknownTopic(topic.to_string()));
        }
        let db = self.inner.db()?;
        let stream = stream_tree(&db, topic)?;
        if stream.len() >= self.inner.config.max_stream_len {
            return Err(QueueError::Overflow {
                topic: topic.to_string(),
                capacity: self.inner.config.max_stream_len,
            });
        }
        let entry_id = db.generate_id()?;
        stream.insert(entry_id.to_be_bytes(), serde_json::to_vec(&event)?)?;
        db.flush_async().await?;
        Ok(message_id(topic, entry_id))
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, QueueError> {
        if !topics::is_known(topic) {
            return Err(QueueError::UnknownTopic(topic.to_string()));
        }
        self.inner.db()?;
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let topic = topic.to_string();
        let token = self.inner.shutdown.lock().clone();

        let worker = tokio::spawn(async move {
            debug!(subscription = id, topic = %topic, "stream subscription worker started");
            loop {
                if token.is_cancelled() {
                    break;
                }
                // Backpressure: stop reading while the pending list is full.
                match inner.pending_depth(&topic) {
                    Ok(depth) if depth >= inner.config.max_pending => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(inner.config.block_interval) => continue,
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(topic = %topic, error = %err, "pending depth check failed");
                        break;
                    }
                }

                match inner.claim_batch(&topic).await {
                    Ok(batch) if batch.is_empty() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(inner.config.block_interval) => {}
                        }
                    }
                    Ok(batch) => {
                        for message in batch {
                            inner.deliver(message, &handler).await;
                        }
                    }
                    Err(QueueError::NotConnected) => break,
                    Err(err) => {
                        warn!(topic = %topic, error = %err, "claim failed");
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(inner.config.block_interval) => {}
                        }
                    }
                }
            }
            debug!(subscription = id, topic = %topic, "stream subscription worker stopped");
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
        let connected = match self.inner.db() {
            Ok(db) => db.open_tree("cursors").is_ok(),
            Err(_) => false,
        };
        QueueHealth {
            connected,
            latency: start.elapsed(),
        }
    }
}
