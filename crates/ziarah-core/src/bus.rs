use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use uuid::Uuid;

/// Raw payloads delivered on one topic. Dropping it unsubscribes.
pub type Subscription = BoxStream<'static, String>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("broadcast bus unavailable: {0}")]
    Unavailable(String),
}

pub fn group_topic(group_id: Uuid) -> String {
    format!("chat:group:{group_id}")
}

/// Best-effort per-group fan-out between gateway connections.
#[async_trait]
pub trait BroadcastBus: Send + Sync {
    async fn publish(&self, group_id: Uuid, payload: String) -> Result<(), BusError>;

    /// The subscription is live once this returns.
    async fn subscribe(&self, group_id: Uuid) -> Result<Subscription, BusError>;
}

pub struct RedisBroadcastBus {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisBroadcastBus {
    pub fn new(client: redis::Client, manager: ConnectionManager) -> Self {
        Self { client, manager }
    }
}

#[async_trait]
impl BroadcastBus for RedisBroadcastBus {
    async fn publish(&self, group_id: Uuid, payload: String) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("PUBLISH")
            .arg(group_topic(group_id))
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|err| BusError::Unavailable(err.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, group_id: Uuid) -> Result<Subscription, BusError> {
        let topic = group_topic(group_id);
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|err| BusError::Unavailable(err.to_string()))?;
        pubsub
            .subscribe(&topic)
            .await
            .map_err(|err| BusError::Unavailable(err.to_string()))?;
        let stream = pubsub.into_on_message().filter_map(|msg| {
            let payload = msg.get_payload::<String>().ok();
            std::future::ready(payload)
        });
        Ok(stream.boxed())
    }
}

/// Single-process bus: one tokio broadcast channel per topic.
pub struct MemoryBroadcastBus {
    topics: DashMap<Uuid, broadcast::Sender<String>>,
    capacity: usize,
}

impl MemoryBroadcastBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl Default for MemoryBroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl BroadcastBus for MemoryBroadcastBus {
    async fn publish(&self, group_id: Uuid, payload: String) -> Result<(), BusError> {
        let delivered = match self.topics.get(&group_id) {
            Some(sender) => sender.send(payload).is_ok(),
            None => return Ok(()),
        };
        if !delivered {
            // Nobody listening any more.
            self.topics
                .remove_if(&group_id, |_, sender| sender.receiver_count() == 0);
        }
        Ok(())
    }

    async fn subscribe(&self, group_id: Uuid) -> Result<Subscription, BusError> {
        let receiver = self
            .topics
            .entry(group_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let payload = match item {
                Ok(payload) => Some(payload),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(%group_id, skipped, "subscriber lagged, dropping messages");
                    None
                }
            };
            std::future::ready(payload)
        });
        Ok(stream.boxed())
    }
}
