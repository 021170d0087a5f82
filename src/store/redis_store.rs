//! Redis-backed store shared by every gateway instance.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::{KvStore, StoreError, WindowCount, WindowState};

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Fixed-window check-and-count, run atomically on the server.
///
/// KEYS[1] = counter key; ARGV = limit, window seconds, now (unix seconds).
/// Returns `{allowed, count, resetTime}`. Unreadable values start a fresh
/// window. The stored JSON layout matches [`WindowState`].
const INCREMENT_WINDOW_LUA: &str = r#"
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local count = 0
local reset = 0

local raw = redis.call('GET', KEYS[1])
if raw then
  local ok, state = pcall(cjson.decode, raw)
  if ok and type(state) == 'table' then
    count = tonumber(state.count) or 0
    reset = tonumber(state.resetTime) or 0
  end
end

if now < reset then
  if count >= limit then
    return {0, count, reset}
  end
  count = count + 1
else
  count = 1
  reset = now + window
end

local ttl = math.max(reset - now, 1)
redis.call('SET', KEYS[1], string.format('{"count":%d,"resetTime":%d}', count, reset), 'EX', ttl)
return {1, count, reset}
"#;

/// Store backed by a Redis connection manager.
///
/// The manager reconnects on its own; clones share one multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    increment_window: Script,
}

impl RedisStore {
    /// Connect to the given `redis://` URL.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis counter store");
        Ok(Self {
            conn,
            increment_window: Script::new(INCREMENT_WINDOW_LUA),
        })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        // SETEX rejects a zero expiry.
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn increment_window(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now: u64,
    ) -> Result<WindowCount, StoreError> {
        let mut conn = self.conn.clone();
        // EVALSHA, falling back to EVAL when the script is not cached yet.
        let (allowed, count, reset_time): (i64, i64, i64) = self
            .increment_window
            .key(key)
            .arg(limit)
            .arg(window_secs)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;

        let corrupt = |reason: &str| StoreError::Corrupt {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        Ok(WindowCount {
            allowed: allowed == 1,
            window: WindowState {
                count: u32::try_from(count).map_err(|_| corrupt("count out of range"))?,
                reset_time: u64::try_from(reset_time).map_err(|_| corrupt("resetTime out of range"))?,
            },
        })
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_key(name: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("rate_limit:test:{name}:{nanos}")
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_concurrent_increments_never_overshoot() {
        let store = RedisStore::connect("redis://127.0.0.1:6379").await.unwrap();
        let key = unique_key("burst");
        let now = 1_700_000_000;

        let calls = (0..20).map(|_| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move { store.increment_window(&key, 5, 60, now).await.unwrap() })
        });
        let mut admitted = 0;
        for call in calls.collect::<Vec<_>>() {
            if call.await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);

        let raw = store.get(&key).await.unwrap().unwrap();
        assert_eq!(
            WindowState::parse(&key, &raw),
            Some(WindowState { count: 5, reset_time: now + 60 })
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_script_resets_unreadable_and_elapsed_windows() {
        let store = RedisStore::connect("redis://127.0.0.1:6379").await.unwrap();
        let key = unique_key("reset");

        store.put(&key, "not json", Duration::from_secs(60)).await.unwrap();
        let fresh = store.increment_window(&key, 1, 60, 1_000).await.unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.window, WindowState { count: 1, reset_time: 1_060 });

        assert!(!store.increment_window(&key, 1, 60, 1_059).await.unwrap().allowed);

        let next = store.increment_window(&key, 1, 60, 1_060).await.unwrap();
        assert!(next.allowed);
        assert_eq!(next.window.reset_time, 1_120);
    }
}
