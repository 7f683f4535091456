use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use redis::aio::ConnectionManager;
use redis::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;
use ziarah_models::location::LocationSample;

/// Lifetime of a group's location map after its most recent write.
pub const PRESENCE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("presence store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Latest location per account per group. Any write refreshes the expiry of
/// the whole group map.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn put(
        &self,
        group_id: Uuid,
        sample: &LocationSample,
        ttl: Duration,
    ) -> Result<(), PresenceError>;

    async fn get_all(&self, group_id: Uuid) -> Result<Vec<LocationSample>, PresenceError>;
}

fn locations_key(group_id: Uuid) -> String {
    format!("group:{group_id}:locations")
}

pub struct RedisPresenceStore {
    manager: ConnectionManager,
}

impl RedisPresenceStore {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn put(
        &self,
        group_id: Uuid,
        sample: &LocationSample,
        ttl: Duration,
    ) -> Result<(), PresenceError> {
        let payload = serde_json::to_string(sample)
            .map_err(|err| PresenceError::Serialization(err.to_string()))?;
        let key = locations_key(group_id);
        let mut conn = self.manager.clone();
        let mut pipeline = redis::pipe();
        pipeline.atomic();
        pipeline
            .cmd("HSET")
            .arg(&key)
            .arg(sample.user_id.to_string())
            .arg(payload);
        pipeline.cmd("EXPIRE").arg(&key).arg(ttl.as_secs().max(1));
        let _: Vec<Value> = pipeline
            .query_async(&mut conn)
            .await
            .map_err(|err| PresenceError::Unavailable(err.to_string()))?;
        Ok(())
    }

    async fn get_all(&self, group_id: Uuid) -> Result<Vec<LocationSample>, PresenceError> {
        let mut conn = self.manager.clone();
        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(locations_key(group_id))
            .query_async(&mut conn)
            .await
            .map_err(|err| PresenceError::Unavailable(err.to_string()))?;
        let samples = raw
            .into_iter()
            .filter_map(|(field, payload)| {
                match serde_json::from_str::<LocationSample>(&payload) {
                    Ok(sample) => Some(sample),
                    Err(err) => {
                        tracing::warn!(%group_id, %field, error = %err, "skipping undecodable location");
                        None
                    }
                }
            })
            .collect();
        Ok(samples)
    }
}

struct GroupLocations {
    samples: HashMap<Uuid, LocationSample>,
    ttl: Duration,
}

/// A group map lives for the ttl of its latest write.
struct LatestWriteTtl;

impl Expiry<Uuid, Arc<GroupLocations>> for LatestWriteTtl {
    fn expire_after_create(
        &self,
        _: &Uuid,
        group: &Arc<GroupLocations>,
        _: Instant,
    ) -> Option<Duration> {
        Some(group.ttl)
    }

    fn expire_after_update(
        &self,
        _: &Uuid,
        group: &Arc<GroupLocations>,
        _: Instant,
        _: Option<Duration>,
    ) -> Option<Duration> {
        Some(group.ttl)
    }
}

pub struct MemoryPresenceStore {
    groups: Cache<Uuid, Arc<GroupLocations>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self {
            groups: Cache::builder().expire_after(LatestWriteTtl).build(),
        }
    }

    /// Groups still held after pending evictions have run.
    pub async fn group_count(&self) -> u64 {
        self.groups.run_pending_tasks().await;
        self.groups.entry_count()
    }
}

impl Default for MemoryPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn put(
        &self,
        group_id: Uuid,
        sample: &LocationSample,
        ttl: Duration,
    ) -> Result<(), PresenceError> {
        let sample = sample.clone();
        self.groups
            .entry(group_id)
            .and_upsert_with(|current| {
                // An expired group is never handed back here, so stale samples drop out.
                let mut samples = current
                    .map(|entry| entry.into_value().samples.clone())
                    .unwrap_or_default();
                samples.insert(sample.user_id, sample);
                std::future::ready(Arc::new(GroupLocations { samples, ttl }))
            })
            .await;
        Ok(())
    }

    async fn get_all(&self, group_id: Uuid) -> Result<Vec<LocationSample>, PresenceError> {
        Ok(self
            .groups
            .get(&group_id)
            .await
            .map(|group| group.samples.values().cloned().collect())
            .unwrap_or_default())
    }
}
