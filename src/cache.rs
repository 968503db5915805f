use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    models::User,
    repository::{RepositoryState, StoreError},
};

/// UserCache
///
/// Cache-aside store for principal snapshots, keyed `user-<id>`. The cache
/// is a disposable projection of the primary store: reads fail open (any
/// cache problem is a miss, never an error), and write paths only ever
/// delete entries. Updating an entry in place from a write path would race a
/// concurrent reader's fresher read/write-back, so invalidation is always a
/// delete.
#[async_trait]
pub trait UserCache: Send + Sync {
    /// Returns the cached snapshot, or None on miss (including decode
    /// failures and cache-service errors).
    async fn get(&self, user_id: i64) -> Option<User>;

    /// Stores a snapshot with the configured TTL. Only the read-through path
    /// calls this, after a primary-store fetch.
    async fn set(&self, user: &User);

    /// Deletes the entry. Called after every successful primary-store write
    /// touching this user. Failures are logged and swallowed: the primary
    /// store is already durable and staleness self-heals at TTL expiry.
    async fn invalidate(&self, user_id: i64);
}

/// The shared cache handle stored in the application state.
pub type UserCacheState = Arc<dyn UserCache>;

fn user_key(user_id: i64) -> String {
    format!("user-{user_id}")
}

/// RedisUserCache
///
/// Redis-backed implementation. The TTL is a deliberate staleness bound: if
/// a writer crashes between its primary-store mutation and the invalidation
/// call, readers may observe the stale snapshot for at most the TTL.
#[derive(Clone)]
pub struct RedisUserCache {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisUserCache {
    /// Connects to the cache service. The connection manager reconnects
    /// transparently, so later command failures degrade to misses instead of
    /// taking requests down.
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, ttl })
    }
}

#[async_trait]
impl UserCache for RedisUserCache {
    async fn get(&self, user_id: i64) -> Option<User> {
        let key = user_key(user_id);
        let mut conn = self.conn.clone();

        let raw: Option<String> = match conn.get(&key).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        let raw = raw?;

        // A snapshot that no longer deserializes (e.g. written by an older
        // build) is a miss, not an error; the read-through will overwrite it.
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "stale cache snapshot, treating as miss");
                None
            }
        }
    }

    async fn set(&self, user: &User) {
        let key = user_key(user.id);
        let raw = match serde_json::to_string(user) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to encode cache snapshot");
                return;
            }
        };

        let mut conn = self.conn.clone();
        if let Err(e) = conn
            .set_ex::<_, _, ()>(&key, raw, self.ttl.as_secs())
            .await
        {
            tracing::warn!(key = %key, error = %e, "cache write failed");
        }
    }

    async fn invalidate(&self, user_id: i64) {
        let key = user_key(user_id);
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(&key).await {
            tracing::warn!(key = %key, error = %e, "cache invalidation failed");
        }
    }
}

/// Pass-through cache used when caching is disabled: every read is a miss
/// and invalidation is a no-op, so call sites stay unconditional.
pub struct NoopUserCache;

#[async_trait]
impl UserCache for NoopUserCache {
    async fn get(&self, _user_id: i64) -> Option<User> {
        None
    }

    async fn set(&self, _user: &User) {}

    async fn invalidate(&self, _user_id: i64) {}
}

/// resolve_user
///
/// The read-through path: cache hit returns the snapshot; a miss fetches
/// from the primary store and populates the cache before returning. A miss
/// for a nonexistent user is Ok(None), not an error; only primary-store
/// failures propagate.
pub async fn resolve_user(
    repo: &RepositoryState,
    cache: &UserCacheState,
    user_id: i64,
) -> Result<Option<User>, StoreError> {
    if let Some(user) = cache.get(user_id).await {
        return Ok(Some(user));
    }

    match repo.get_user(user_id).await? {
        Some(user) => {
            cache.set(&user).await;
            Ok(Some(user))
        }
        None => Ok(None),
    }
}
