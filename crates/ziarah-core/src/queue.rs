use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use ziarah_models::message::ChatMessage;

pub const DEFAULT_QUEUE_PREFIX: &str = "ziarah:chat_messages";

/// Upper bound on waiting for the AOF fsync of an enqueue.
const AOF_FSYNC_TIMEOUT_MS: u64 = 5_000;
/// Dedicated connections kept around between uses.
const MAX_IDLE_CONNECTIONS: usize = 16;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("queue operation failed: {0}")]
    Operation(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("queue closed")]
    Closed,
}

/// One envelope handed to a consumer. It stays in the processing set until
/// acknowledged or requeued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: String,
}

/// At-least-once work queue feeding the persistence consumers.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Returns only after the broker accepted the write.
    async fn enqueue_raw(&self, payload: String) -> Result<(), QueueError>;

    async fn next_delivery(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    async fn requeue(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Moves everything left in processing by a previous run back to ready.
    async fn recover_in_flight(&self) -> Result<usize, QueueError>;

    async fn enqueue(&self, message: &ChatMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message)
            .map_err(|err| QueueError::Serialization(err.to_string()))?;
        self.enqueue_raw(payload).await
    }
}

/// Connections reserved for one caller at a time. `BLMOVE` and `WAITAOF`
/// block the connection they run on, so they never share a multiplexed one.
struct IdleConnections<C> {
    idle: Mutex<Vec<C>>,
    max_idle: usize,
}

impl<C> IdleConnections<C> {
    fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Reuses an idle connection or opens a new one.
    async fn checkout<F, Fut, E>(&self, open: F) -> Result<C, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, E>>,
    {
        let idle = self.idle.lock().await.pop();
        match idle {
            Some(conn) => Ok(conn),
            None => open().await,
        }
    }

    /// Only connections that finished their last command cleanly come back.
    async fn checkin(&self, conn: C) {
        let mut idle = self.idle.lock().await;
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

/// `WAITAOF` replies `[local, replicas]`; the local count must be non-zero.
fn ensure_fsynced(reply: &[i64]) -> Result<(), QueueError> {
    match reply.first() {
        Some(local) if *local > 0 => Ok(()),
        _ => Err(QueueError::Operation(format!(
            "enqueue not fsynced to the append-only file: {reply:?}"
        ))),
    }
}

/// Reliable-queue layout: producers `LPUSH` onto `ready`, consumers
/// `BLMOVE` the oldest entry into `processing`, ack is `LREM`.
///
/// Enqueue waits for the AOF fsync, so the server must run with
/// `appendonly yes`; without it every enqueue fails.
pub struct RedisMessageQueue {
    client: redis::Client,
    manager: ConnectionManager,
    dedicated: IdleConnections<MultiplexedConnection>,
    ready_key: String,
    processing_key: String,
}

impl RedisMessageQueue {
    pub async fn connect(client: redis::Client, prefix: &str) -> Result<Self, QueueError> {
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|err| QueueError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            manager,
            dedicated: IdleConnections::new(MAX_IDLE_CONNECTIONS),
            ready_key: format!("{prefix}:ready"),
            processing_key: format!("{prefix}:processing"),
        })
    }

    async fn dedicated_connection(&self) -> Result<MultiplexedConnection, QueueError> {
        let client = &self.client;
        self.dedicated
            .checkout(move || async move {
                client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|err| QueueError::Unavailable(err.to_string()))
            })
            .await
    }
}

#[async_trait]
impl MessageQueue for RedisMessageQueue {
    async fn enqueue_raw(&self, payload: String) -> Result<(), QueueError> {
        let mut conn = self.dedicated_connection().await?;
        let mut pipeline = redis::pipe();
        pipeline.cmd("LPUSH").arg(&self.ready_key).arg(payload);
        pipeline
            .cmd("WAITAOF")
            .arg(1)
            .arg(0)
            .arg(AOF_FSYNC_TIMEOUT_MS);
        let (_, fsynced): (i64, Vec<i64>) = pipeline
            .query_async(&mut conn)
            .await
            .map_err(|err| QueueError::Operation(err.to_string()))?;
        self.dedicated.checkin(conn).await;
        ensure_fsynced(&fsynced)
    }

    async fn next_delivery(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.dedicated_connection().await?;
        let payload: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.ready_key)
            .arg(&self.processing_key)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(wait.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|err| QueueError::Operation(err.to_string()))?;
        self.dedicated.checkin(conn).await;
        Ok(payload.map(|payload| Delivery { payload }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(&delivery.payload)
            .query_async(&mut conn)
            .await
            .map_err(|err| QueueError::Operation(err.to_string()))?;
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let mut pipeline = redis::pipe();
        pipeline.atomic();
        pipeline
            .cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(&delivery.payload);
        // Right end is the next to be popped.
        pipeline
            .cmd("RPUSH")
            .arg(&self.ready_key)
            .arg(&delivery.payload);
        let _: Vec<Value> = pipeline
            .query_async(&mut conn)
            .await
            .map_err(|err| QueueError::Operation(err.to_string()))?;
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let mut moved = 0usize;
        loop {
            let payload: Option<String> = redis::cmd("LMOVE")
                .arg(&self.processing_key)
                .arg(&self.ready_key)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(|err| QueueError::Operation(err.to_string()))?;
            if payload.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }
}

#[derive(Default)]
struct MemoryQueueState {
    ready: VecDeque<String>,
    processing: Vec<String>,
    closed: bool,
}

/// In-process queue with the same ready/processing semantics. Not durable:
/// an accepted enqueue is lost if the process stops before it is consumed.
#[derive(Default)]
pub struct MemoryMessageQueue {
    state: Mutex<MemoryQueueState>,
    available: Notify,
}

impl MemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects further enqueues. Consumers drain what is left.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn processing_len(&self) -> usize {
        self.state.lock().await.processing.len()
    }
}

#[async_trait]
impl MessageQueue for MemoryMessageQueue {
    async fn enqueue_raw(&self, payload: String) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.ready.push_back(payload);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    async fn next_delivery(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(payload) = state.ready.pop_front() {
                    state.processing.push(payload.clone());
                    return Ok(Some(Delivery { payload }));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            // A stored permit from notify_one covers an enqueue that raced us.
            let _ = tokio::time::timeout_at(deadline, self.available.notified()).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.processing.iter().position(|p| *p == delivery.payload) {
            state.processing.remove(pos);
        }
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.processing.iter().position(|p| *p == delivery.payload) {
            state.processing.remove(pos);
        }
        state.ready.push_front(delivery.payload.clone());
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize, QueueError> {
        let mut state = self.state.lock().await;
        let in_flight: Vec<String> = state.processing.drain(..).collect();
        let moved = in_flight.len();
        for payload in in_flight.into_iter().rev() {
            state.ready.push_front(payload);
        }
        drop(state);
        if moved > 0 {
            self.available.notify_waiters();
        }
        Ok(moved)
    }
}
