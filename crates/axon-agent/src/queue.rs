//! Priority admission queue
//!
//! Ordering contract: higher priority first, FIFO within equal priority
//! (guaranteed for a single dequeuer). The backend is pluggable; the
//! in-memory heap is the only one shipped here.

use axon_core::{Error, QueuedMessage, Result};
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

#[async_trait::async_trait]
pub trait QueueBackend: Send + Sync {
    /// Returns false when the queue is full.
    async fn enqueue(&self, message: QueuedMessage) -> Result<bool>;

    /// Blocks up to `timeout` for the next message.
    async fn dequeue(&self, timeout: Duration) -> Option<QueuedMessage>;

    async fn len(&self) -> usize;

    async fn clear(&self);
}

struct HeapEntry {
    message: QueuedMessage,
    seq: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.message.priority == other.message.priority && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Max-heap: greatest = highest priority, then lowest sequence number.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.message
            .priority
            .cmp(&other.message.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

pub struct MemoryQueueBackend {
    max_size: usize,
    heap: Mutex<BinaryHeap<HeapEntry>>,
    notify: Notify,
    seq: AtomicU64,
}

impl MemoryQueueBackend {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
        }
    }
}

#[async_trait::async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn enqueue(&self, message: QueuedMessage) -> Result<bool> {
        {
            let mut heap = self.heap.lock().await;
            if heap.len() >= self.max_size {
                warn!("queue is full, message rejected");
                return Ok(false);
            }
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            heap.push(HeapEntry { message, seq });
        }
        self.notify.notify_one();
        Ok(true)
    }

    async fn dequeue(&self, timeout: Duration) -> Option<QueuedMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(entry) = self.heap.lock().await.pop() {
                return Some(entry.message);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }

    async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    async fn clear(&self) {
        self.heap.lock().await.clear();
    }
}

/// High-level queue wrapper with priority clamping and counters.
pub struct PriorityMessageQueue {
    backend: std::sync::Arc<dyn QueueBackend>,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    rejected: AtomicU64,
}

impl PriorityMessageQueue {
    pub fn new(backend: std::sync::Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn in_memory(max_size: usize) -> Self {
        Self::new(std::sync::Arc::new(MemoryQueueBackend::new(max_size)))
    }

    /// Enqueue a payload. Priority is clamped to 1..=9; a full queue is
    /// an error the caller sees.
    pub async fn enqueue(
        &self,
        payload: Value,
        priority: u8,
        session_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let message = QueuedMessage::new(payload, priority, session_id);
        let id = message.id;

        if !self.backend.enqueue(message).await? {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::QueueFull);
        }

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        debug!(message_id = %id, priority, "message enqueued");
        Ok(id)
    }

    pub async fn dequeue(&self, timeout: Duration) -> Option<QueuedMessage> {
        let message = self.backend.dequeue(timeout).await;
        if message.is_some() {
            self.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        message
    }

    pub async fn len(&self) -> usize {
        self.backend.len().await
    }

    pub async fn clear(&self) {
        self.backend.clear().await;
    }

    pub fn stats(&self) -> Value {
        serde_json::json!({
            "enqueued": self.enqueued.load(Ordering::Relaxed),
            "dequeued": self.dequeued.load(Ordering::Relaxed),
            "rejected": self.rejected.load(Ordering::Relaxed),
        })
    }
}
