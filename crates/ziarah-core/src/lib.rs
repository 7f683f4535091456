pub mod auth;
pub mod bus;
pub mod chat;
pub mod error;
pub mod ingest;
pub mod membership;
pub mod notify;
pub mod presence;
pub mod queue;
pub mod ratelimit;
pub mod session;
pub mod tracking;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;
use ziarah_db::DbPool;

use crate::bus::{BroadcastBus, MemoryBroadcastBus, RedisBroadcastBus};
use crate::chat::ChatService;
use crate::error::CoreError;
use crate::notify::{Notifier, PushSender};
use crate::presence::{MemoryPresenceStore, PresenceStore, RedisPresenceStore, PRESENCE_TTL};
use crate::queue::{MemoryMessageQueue, MessageQueue, RedisMessageQueue};
use crate::ratelimit::KeyedLimiter;
use crate::session::{MemorySessionStore, RedisSessionStore, SessionAuthority, SessionStore, SESSION_TTL};
use crate::tracking::TrackingService;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub session_ttl: Duration,
    pub presence_ttl: Duration,
    /// Interval between server pings on every socket.
    pub ping_interval: Duration,
    /// A socket with no inbound frame for this long is closed.
    pub read_timeout: Duration,
    /// Per-account inbound chat frames per second; 0 disables the limit.
    pub chat_messages_per_second: u32,
    pub ingest_consumers: usize,
    pub ingest_retry_delay: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            session_ttl: SESSION_TTL,
            presence_ttl: PRESENCE_TTL,
            ping_interval: Duration::from_secs(54),
            read_timeout: Duration::from_secs(60),
            chat_messages_per_second: 5,
            ingest_consumers: 2,
            ingest_retry_delay: Duration::from_secs(2),
        }
    }
}

/// The swappable infrastructure behind the realtime components.
#[derive(Clone)]
pub struct Backends {
    pub sessions: Arc<dyn SessionStore>,
    pub bus: Arc<dyn BroadcastBus>,
    pub queue: Arc<dyn MessageQueue>,
    pub presence: Arc<dyn PresenceStore>,
    pub push: Arc<dyn PushSender>,
}

impl Backends {
    /// Everything in process. Nothing survives a restart.
    pub fn in_memory(push: Arc<dyn PushSender>) -> Self {
        Self {
            sessions: Arc::new(MemorySessionStore::new()),
            bus: Arc::new(MemoryBroadcastBus::default()),
            queue: Arc::new(MemoryMessageQueue::new()),
            presence: Arc::new(MemoryPresenceStore::new()),
            push,
        }
    }

    pub async fn redis(
        redis_url: &str,
        queue_prefix: &str,
        push: Arc<dyn PushSender>,
    ) -> Result<Self, CoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| CoreError::Internal(format!("invalid redis url: {err}")))?;
        let manager = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(|err| CoreError::Internal(format!("redis connect failed: {err}")))?;
        let queue = RedisMessageQueue::connect(client.clone(), queue_prefix).await?;
        Ok(Self {
            sessions: Arc::new(RedisSessionStore::new(manager.clone())),
            bus: Arc::new(RedisBroadcastBus::new(client, manager.clone())),
            queue: Arc::new(queue),
            presence: Arc::new(RedisPresenceStore::new(manager)),
            push,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub sessions: SessionAuthority,
    pub bus: Arc<dyn BroadcastBus>,
    pub queue: Arc<dyn MessageQueue>,
    pub notifier: Notifier,
    pub chat: ChatService,
    pub tracking: TrackingService,
    /// Shared by every chat socket of an account so extra tabs do not buy
    /// extra throughput. `None` when the limit is disabled.
    pub chat_limiter: Option<Arc<KeyedLimiter<Uuid>>>,
    pub shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig, backends: Backends) -> Self {
        let Backends {
            sessions,
            bus,
            queue,
            presence,
            push,
        } = backends;
        Self {
            sessions: SessionAuthority::new(sessions, config.session_ttl),
            notifier: Notifier::new(db.clone(), push),
            chat: ChatService::new(db.clone(), queue.clone(), bus.clone()),
            tracking: TrackingService::new(db.clone(), presence, config.presence_ttl),
            chat_limiter: KeyedLimiter::per_second(config.chat_messages_per_second).map(Arc::new),
            bus,
            queue,
            db,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::notify::DisabledPushSender;

    pub fn test_config() -> AppConfig {
        AppConfig {
            jwt_secret: "test-secret-for-unit-tests".into(),
            ingest_retry_delay: Duration::from_millis(5),
            ..AppConfig::default()
        }
    }

    async fn test_pool() -> DbPool {
        let pool = ziarah_db::create_pool("sqlite::memory:", 1).await.expect("pool");
        ziarah_db::run_migrations(&pool).await.expect("migrations");
        pool
    }

    pub async fn test_state() -> AppState {
        test_state_with_memory_queue().await.0
    }

    pub async fn test_state_with_memory_queue() -> (AppState, Arc<MemoryMessageQueue>) {
        let queue = Arc::new(MemoryMessageQueue::new());
        let mut backends = Backends::in_memory(Arc::new(DisabledPushSender));
        backends.queue = queue.clone();
        let state = AppState::new(test_pool().await, test_config(), backends);
        (state, queue)
    }

    pub async fn seed_account(state: &AppState, name: &str, phone: &str, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        let hash = crate::auth::hash_password(password).expect("hash");
        ziarah_db::users::create_user(&state.db, id, name, phone, &hash, "JAMAAH", None)
            .await
            .expect("create user");
        id
    }

    pub async fn seed_group(state: &AppState) -> Uuid {
        let id = Uuid::new_v4();
        ziarah_db::members::create_group(&state.db, id, "Rombongan A", None)
            .await
            .expect("create group");
        id
    }
}
