//! Key-value substrate behind the registry, locks, statuses, and queues
//!
//! The scheduler's durable coordination state lives in a networked
//! key-value store (Redis in production). All higher-level stores talk to
//! the substrate through the `Kv` trait so the registry, admin surface,
//! and task runner can be exercised in tests against an in-memory
//! implementation with the same semantics (TTLs, set-if-absent, guarded
//! delete, blocking queue pops).

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Operations the scheduler needs from the key-value substrate.
#[async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Set-if-absent with a TTL; returns whether the key was written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Delete only when the stored value matches; the guard keeps an
    /// expired lock holder from deleting its successor's lock.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;
    /// All keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
    /// Append to the tail of a list queue.
    async fn queue_push(&self, key: &str, value: &str) -> Result<()>;
    /// Pop from the head of the first non-empty queue, waiting up to
    /// `timeout`. Returns the queue key and the popped value.
    async fn queue_pop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>>;
    async fn queue_len(&self, key: &str) -> Result<usize>;
    /// Connectivity probe, used by preflight checks.
    async fn ping(&self) -> Result<()>;
}

// Lua script shared with every Redis deployment: compare-and-delete for
// lock release.
const DELETE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed substrate used by real deployments.
///
/// `ConnectionManager` multiplexes and reconnects under the hood, so the
/// handle is cheap to clone across tasks.
#[derive(Clone)]
pub struct RedisKv {
    conn: redis::aio::ConnectionManager,
}

impl RedisKv {
    /// Connect to the broker URL from configuration.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .with_context(|| format!("Invalid broker URL: {url}"))?;
        let conn = client
            .get_connection_manager()
            .await
            .context("Failed to connect to the key-value substrate")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::Script::new(DELETE_IF_EQUALS_SCRIPT)
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        {
            let mut cmd = redis::cmd("SCAN");
            cmd.cursor_arg(0).arg("MATCH").arg(&pattern).arg("COUNT").arg(100);
            let mut iter: redis::AsyncIter<String> = cmd.iter_async(&mut conn).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn queue_push(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn queue_pop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> =
            conn.blpop(keys, timeout.as_secs_f64()).await?;
        Ok(popped)
    }

    async fn queue_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: i64 = conn.llen(key).await?;
        Ok(len.max(0) as usize)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// In-memory substrate with Redis-equivalent semantics, used by tests.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, StoredValue>>,
    queues: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(key)
            .filter(|stored| stored.live())
            .map(|stored| stored.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map_or(false, |stored| stored.live()) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        Ok(entries.remove(key).is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        let matches = entries
            .get(key)
            .map_or(false, |stored| stored.live() && stored.value == value);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|(key, stored)| key.starts_with(prefix) && stored.live())
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn queue_push(&self, key: &str, value: &str) -> Result<()> {
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn queue_pop(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut queues = self.queues.lock().unwrap();
                for key in keys {
                    if let Some(queue) = queues.get_mut(key) {
                        if let Some(value) = queue.pop_front() {
                            return Ok(Some((key.clone(), value)));
                        }
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn queue_len(&self, key: &str) -> Result<usize> {
        let queues = self.queues.lock().unwrap();
        Ok(queues.get(key).map_or(0, |queue| queue.len()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
