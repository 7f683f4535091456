use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Lifetime of a login session. The stored record and the token share it.
pub const SESSION_TTL: Duration = Duration::from_secs(72 * 60 * 60);

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed store holding at most one active session id per account.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(
        &self,
        account_id: Uuid,
        session_id: &str,
        ttl: Duration,
    ) -> Result<(), SessionStoreError>;

    async fn get(&self, account_id: Uuid) -> Result<Option<String>, SessionStoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    /// No record: never logged in, or the record aged out.
    Expired,
    /// A newer login replaced the presented session.
    Superseded,
}

#[derive(Clone)]
pub struct SessionAuthority {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl SessionAuthority {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mints a fresh session id and overwrites whatever the account had.
    pub async fn issue_session(&self, account_id: Uuid) -> Result<String, SessionStoreError> {
        let session_id = Uuid::new_v4().to_string();
        self.store.put(account_id, &session_id, self.ttl).await?;
        tracing::debug!(%account_id, "session issued");
        Ok(session_id)
    }

    /// Read-only check; never extends the record's lifetime.
    pub async fn validate(
        &self,
        account_id: Uuid,
        presented: &str,
    ) -> Result<SessionStatus, SessionStoreError> {
        let status = match self.store.get(account_id).await? {
            None => SessionStatus::Expired,
            Some(current) if current == presented => SessionStatus::Active,
            Some(_) => SessionStatus::Superseded,
        };
        Ok(status)
    }
}

fn session_key(account_id: Uuid) -> String {
    format!("session:user:{account_id}")
}

pub struct RedisSessionStore {
    manager: ConnectionManager,
}

impl RedisSessionStore {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(
        &self,
        account_id: Uuid,
        session_id: &str,
        ttl: Duration,
    ) -> Result<(), SessionStoreError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(session_key(account_id))
            .arg(session_id)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|err| SessionStoreError::Unavailable(err.to_string()))?;
        Ok(())
    }

    async fn get(&self, account_id: Uuid) -> Result<Option<String>, SessionStoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(session_key(account_id))
            .query_async(&mut conn)
            .await
            .map_err(|err| SessionStoreError::Unavailable(err.to_string()))
    }
}

#[derive(Clone)]
struct SessionEntry {
    session_id: String,
    ttl: Duration,
}

/// Each entry lives for the ttl it was written with. Reads leave it alone.
struct WrittenTtl;

impl Expiry<Uuid, SessionEntry> for WrittenTtl {
    fn expire_after_create(&self, _: &Uuid, entry: &SessionEntry, _: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _: &Uuid,
        entry: &SessionEntry,
        _: Instant,
        _: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process store for single-node setups and tests. Expired records are
/// evicted by the cache, not on the next read.
pub struct MemorySessionStore {
    entries: Cache<Uuid, SessionEntry>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().expire_after(WrittenTtl).build(),
        }
    }

    /// Live records after pending evictions have run.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(
        &self,
        account_id: Uuid,
        session_id: &str,
        ttl: Duration,
    ) -> Result<(), SessionStoreError> {
        let entry = SessionEntry {
            session_id: session_id.to_string(),
            ttl,
        };
        self.entries.insert(account_id, entry).await;
        Ok(())
    }

    async fn get(&self, account_id: Uuid) -> Result<Option<String>, SessionStoreError> {
        Ok(self.entries.get(&account_id).await.map(|entry| entry.session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> SessionAuthority {
        SessionAuthority::new(Arc::new(MemorySessionStore::new()), SESSION_TTL)
    }

    #[tokio::test]
    async fn second_login_supersedes_first() {
        let sessions = authority();
        let account = Uuid::new_v4();

        let first = sessions.issue_session(account).await.unwrap();
        assert_eq!(
            sessions.validate(account, &first).await.unwrap(),
            SessionStatus::Active
        );

        let second = sessions.issue_session(account).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(
            sessions.validate(account, &first).await.unwrap(),
            SessionStatus::Superseded
        );
        assert_eq!(
            sessions.validate(account, &second).await.unwrap(),
            SessionStatus::Active
        );
    }

    #[tokio::test]
    async fn unknown_account_is_expired() {
        let sessions = authority();
        assert_eq!(
            sessions.validate(Uuid::new_v4(), "anything").await.unwrap(),
            SessionStatus::Expired
        );
    }

    #[tokio::test]
    async fn session_expires_after_ttl_and_validation_does_not_extend_it() {
        let ttl = Duration::from_millis(300);
        let sessions = SessionAuthority::new(Arc::new(MemorySessionStore::new()), ttl);
        let account = Uuid::new_v4();
        let sid = sessions.issue_session(account).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            sessions.validate(account, &sid).await.unwrap(),
            SessionStatus::Active
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            sessions.validate(account, &sid).await.unwrap(),
            SessionStatus::Expired
        );
    }

    #[tokio::test]
    async fn expired_sessions_are_evicted_without_being_read() {
        let store = MemorySessionStore::new();
        for _ in 0..1000 {
            store
                .put(Uuid::new_v4(), "sid", Duration::from_millis(100))
                .await
                .unwrap();
        }
        assert_eq!(store.len().await, 1000);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let mut remaining = store.len().await;
        for _ in 0..20 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
            remaining = store.len().await;
        }
        assert_eq!(remaining, 0);
    }
}
