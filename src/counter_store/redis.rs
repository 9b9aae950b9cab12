use super::{ConsumeOutcome, CounterStore, MAX_COUNTER_DIGITS};
use crate::error::{QuotaError, Result};
use crate::quota::FixedWindow;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;

/// Fixed-window step evaluated inside Redis so that read, decision and write
/// happen as one atomic unit per key.
///
/// A stored value counts only if it is a canonical decimal of at most
/// `MAX_COUNTER_DIGITS` digits, the same rule as [`super::StoredCount::parse`].
/// Anything else is treated as 0.
///
/// Reply: `{allowed, count, window_started, malformed_value}` where the last
/// element is the empty string unless the stored value was rejected.
const CONSUME_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
local max_requests = tonumber(ARGV[1])
local window_secs = tonumber(ARGV[2])
local max_digits = tonumber(ARGV[3])
local count = 0
local malformed = ''
if current then
  local canonical = current == '0' or string.sub(current, 1, 1) ~= '0'
  if #current <= max_digits and canonical and string.match(current, '^%d+$') then
    count = tonumber(current)
  else
    malformed = current
  end
end
if count >= max_requests then
  return {0, count, 0, malformed}
end
if count == 0 then
  redis.call('SET', KEYS[1], '1', 'EX', window_secs)
  return {1, 1, 1, malformed}
end
local updated = redis.call('INCRBY', KEYS[1], 1)
return {1, updated, 0, malformed}
"#;

#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            QuotaError::CounterStore(format!("Failed to create Redis client: {}", e))
        })?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| QuotaError::CounterStore(format!("Failed to connect to Redis: {}", e)))?;
        Ok(Self::new(conn))
    }

    async fn eval_script<T>(&self, script: &str, keys: &[&str], args: &[String]) -> Result<T>
    where
        T: redis::FromRedisValue,
    {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(arg);
        }

        cmd.query_async(&mut conn)
            .await
            .map_err(|e| QuotaError::CounterStore(format!("Script execution failed: {}", e)))
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QuotaError::CounterStore(format!("GET failed: {}", e)))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| QuotaError::CounterStore(format!("SET failed: {}", e)))
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(|e| QuotaError::CounterStore(format!("INCRBY failed: {}", e)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let applied: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| QuotaError::CounterStore(format!("EXPIRE failed: {}", e)))?;
        Ok(applied == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QuotaError::CounterStore(format!("DEL failed: {}", e)))?;
        Ok(deleted > 0)
    }

    async fn consume(&self, key: &str, policy: &FixedWindow) -> Result<ConsumeOutcome> {
        let args = [
            policy.max_requests.to_string(),
            policy.window_secs().to_string(),
            MAX_COUNTER_DIGITS.to_string(),
        ];
        let (allowed, count, started, malformed): (i64, i64, i64, String) =
            self.eval_script(CONSUME_SCRIPT, &[key], &args).await?;

        Ok(ConsumeOutcome {
            allowed: allowed == 1,
            count: count.max(0) as u64,
            window_started: started == 1,
            malformed: (!malformed.is_empty()).then_some(malformed),
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QuotaError::CounterStore(format!("Ping failed: {}", e)))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> RedisCounterStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        RedisCounterStore::connect(&url).await.unwrap()
    }

    async fn ttl(store: &RedisCounterStore, key: &str) -> i64 {
        let mut conn = store.conn.clone();
        redis::cmd("TTL").arg(key).query_async(&mut conn).await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = RedisCounterStore::connect("not-a-redis-url").await;
        assert!(matches!(result, Err(QuotaError::CounterStore(_))));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn test_consume_script_against_redis() {
        let store = connect().await;
        let key = format!("quota:test-{}", uuid::Uuid::new_v4());
        let policy = FixedWindow::default();

        let first = store.consume(&key, &policy).await.unwrap();
        assert!(first.allowed && first.window_started);
        let armed = ttl(&store, &key).await;
        assert!(armed > 0 && armed <= 300, "ttl after first consume: {}", armed);

        for _ in 1..5 {
            let outcome = store.consume(&key, &policy).await.unwrap();
            assert!(outcome.allowed && !outcome.window_started);
            let remaining = ttl(&store, &key).await;
            assert!(
                remaining > 0 && remaining <= armed,
                "ttl after increment: {}",
                remaining
            );
        }
        let denied = store.consume(&key, &policy).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 5);
        assert_eq!(store.get(&key).await.unwrap(), Some("5".to_string()));

        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn test_consume_script_resets_malformed_value() {
        let store = connect().await;
        let key = format!("quota:test-{}", uuid::Uuid::new_v4());
        store.set(&key, "oops").await.unwrap();

        let outcome = store.consume(&key, &FixedWindow::default()).await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.malformed.as_deref(), Some("oops"));
        assert_eq!(store.get(&key).await.unwrap(), Some("1".to_string()));

        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn test_consume_script_matches_stored_count_parse() {
        let store = connect().await;
        let policy = FixedWindow::default();
        let overflowing = "1".repeat(MAX_COUNTER_DIGITS + 1);
        let key = format!("quota:test-{}", uuid::Uuid::new_v4());

        for raw in [" 3", "+3", "3\n", "-1", "007", overflowing.as_str()] {
            store.set(&key, raw).await.unwrap();
            let outcome = store.consume(&key, &policy).await.unwrap();
            assert_eq!(outcome, ConsumeOutcome::started(Some(raw.to_string())));
            assert_eq!(store.get(&key).await.unwrap(), Some("1".to_string()));
        }

        store.set(&key, "3").await.unwrap();
        assert_eq!(
            store.consume(&key, &policy).await.unwrap(),
            ConsumeOutcome::incremented(4)
        );

        let longest = "9".repeat(MAX_COUNTER_DIGITS);
        store.set(&key, &longest).await.unwrap();
        assert!(!store.consume(&key, &policy).await.unwrap().allowed);
        assert_eq!(store.get(&key).await.unwrap(), Some(longest));

        store.delete(&key).await.unwrap();
    }
}
