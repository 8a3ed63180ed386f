//! Refresh Token Store
//! Mission: Make self-contained refresh tokens revocable
//!
//! One key per user (`refresh_token:<user-id>`) holding the single refresh
//! token currently allowed to rotate. A new login or rotation overwrites it.
//! Store failures are reported as `StoreError`; they never mean "revoked".

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{aio::ConnectionManager, Client, Script};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const KEY_PREFIX: &str = "refresh_token:";

/// Compare-and-set: replace KEYS[1] with ARGV[2] (TTL ARGV[3] ms) only if it still holds ARGV[1].
const ROTATE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
    return 1
end
return 0
"#;

/// Entry count below which the memory store never sweeps expired tokens.
const MIN_SWEEP_AT: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store error: {0}")]
    Backend(String),
    #[error("session store deadline exceeded")]
    Timeout,
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Key holding a user's active refresh token
pub fn session_key(user_id: Uuid) -> String {
    format!("{}{}", KEY_PREFIX, user_id)
}

/// Pattern covering every key in a user's namespace
pub fn session_key_pattern(user_id: Uuid) -> String {
    format!("{}{}*", KEY_PREFIX, user_id)
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Unconditional set with TTL; replaces any previous token.
    async fn put(&self, user_id: Uuid, token: &str, ttl: Duration) -> Result<(), StoreError>;

    /// True iff a token is stored for the user and equals `token` exactly.
    async fn validate(&self, user_id: Uuid, token: &str) -> Result<bool, StoreError>;

    /// Atomically replace `expected` with `replacement`. Returns false, and
    /// stores nothing, when `expected` is no longer the user's token.
    async fn rotate(
        &self,
        user_id: Uuid,
        expected: &str,
        replacement: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Remove the user's token. Removing nothing is success.
    async fn revoke(&self, user_id: Uuid) -> Result<(), StoreError>;

    /// Remove every key in the user's namespace.
    async fn revoke_all(&self, user_id: Uuid) -> Result<(), StoreError>;
}

/// Redis-backed store. `SET PX` gives the TTL; Redis provides atomicity.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    rotate_script: Script,
}

impl RedisSessionStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        info!("🔑 Connecting session store: {}", url);

        let client = Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(StoreError::Backend(
                "redis ping did not return pong".to_string(),
            ));
        }

        Ok(Self {
            conn,
            rotate_script: Script::new(ROTATE_SCRIPT),
        })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, user_id: Uuid, token: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();

        let _: () = redis::cmd("SET")
            .arg(session_key(user_id))
            .arg(token)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(user_id = %user_id, "Redis SET failed: {}", e);
                StoreError::from(e)
            })?;

        Ok(())
    }

    async fn validate(&self, user_id: Uuid, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();

        let stored: Option<String> = redis::cmd("GET")
            .arg(session_key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(user_id = %user_id, "Redis GET failed: {}", e);
                StoreError::from(e)
            })?;

        Ok(stored.as_deref() == Some(token))
    }

    async fn rotate(
        &self,
        user_id: Uuid,
        expected: &str,
        replacement: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();

        let swapped: i64 = self
            .rotate_script
            .key(session_key(user_id))
            .arg(expected)
            .arg(replacement)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(user_id = %user_id, "Redis rotate script failed: {}", e);
                StoreError::from(e)
            })?;

        Ok(swapped == 1)
    }

    async fn revoke(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();

        let _: () = redis::cmd("DEL")
            .arg(session_key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(user_id = %user_id, "Redis DEL failed: {}", e);
                StoreError::from(e)
            })?;

        Ok(())
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pattern = session_key_pattern(user_id);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                removed += keys.len();
                let _: () = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(user_id = %user_id, removed, "Revoked all sessions");
        Ok(())
    }
}

struct StoredToken {
    token: String,
    expires_at: Instant,
}

impl StoredToken {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

struct MemoryState {
    entries: HashMap<String, StoredToken>,
    /// Size at which the next write sweeps expired entries.
    sweep_at: usize,
}

impl MemoryState {
    fn insert(&mut self, key: String, token: &str, ttl: Duration, now: Instant) {
        self.entries.insert(
            key,
            StoredToken {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );

        if self.entries.len() >= self.sweep_at {
            self.entries.retain(|_, entry| entry.is_live(now));
            self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP_AT);
        }
    }
}

/// In-process store with the same semantics, for development and tests.
pub struct MemorySessionStore {
    state: Mutex<MemoryState>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: HashMap::new(),
                sweep_at: MIN_SWEEP_AT,
            }),
        }
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, user_id: Uuid, token: &str, ttl: Duration) -> Result<(), StoreError> {
        self.state
            .lock()
            .insert(session_key(user_id), token, ttl, Instant::now());
        Ok(())
    }

    async fn validate(&self, user_id: Uuid, token: &str) -> Result<bool, StoreError> {
        let state = self.state.lock();
        Ok(state
            .entries
            .get(&session_key(user_id))
            .map(|entry| entry.is_live(Instant::now()) && entry.token == token)
            .unwrap_or(false))
    }

    async fn rotate(
        &self,
        user_id: Uuid,
        expected: &str,
        replacement: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let key = session_key(user_id);
        let now = Instant::now();
        let mut state = self.state.lock();

        let current = state
            .entries
            .get(&key)
            .map(|entry| entry.is_live(now) && entry.token == expected)
            .unwrap_or(false);
        if !current {
            return Ok(false);
        }

        state.insert(key, replacement, ttl, now);
        Ok(true)
    }

    async fn revoke(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.state.lock().entries.remove(&session_key(user_id));
        Ok(())
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<(), StoreError> {
        let prefix = session_key(user_id);
        self.state
            .lock()
            .entries
            .retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}
