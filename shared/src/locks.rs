//! Single-flight task locks
//!
//! Locks are TTL'd set-if-absent keys at `lock:{task}:{key}`. The TTL is
//! the schedule's `safety.timeout_s`, so a crashed worker's lock expires
//! on its own and the schedule resumes firing. Release is guarded by a
//! compare-and-delete on a per-acquisition token: a holder whose lock
//! already expired cannot delete the lock a later run now holds.

use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

use crate::kv::Kv;

fn lock_key(task: &str, key: &str) -> String {
    format!("lock:{task}:{key}")
}

fn lock_prefix(task: &str) -> String {
    format!("lock:{task}:")
}

/// Factory for task locks over the key-value substrate.
#[derive(Clone)]
pub struct TaskLocks {
    kv: Arc<dyn Kv>,
}

impl TaskLocks {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Attempt to acquire the lock for `(task, key)` with the given TTL.
    ///
    /// Returns `None` when another holder already owns it.
    pub async fn acquire(
        &self,
        task: &str,
        key: &str,
        ttl_seconds: u64,
    ) -> Result<Option<TaskLock>> {
        let redis_key = lock_key(task, key);
        let token = Uuid::new_v4().to_string();
        if self.kv.set_nx_ex(&redis_key, &token, ttl_seconds).await? {
            Ok(Some(TaskLock {
                kv: Arc::clone(&self.kv),
                redis_key,
                token,
                key: key.to_string(),
            }))
        } else {
            Ok(None)
        }
    }

    /// Whether any lock is currently held for the task, regardless of key.
    /// The scheduler's single-flight gate uses this to skip fires.
    pub async fn any_held(&self, task: &str) -> Result<bool> {
        let keys = self.kv.scan_prefix(&lock_prefix(task)).await?;
        Ok(!keys.is_empty())
    }
}

/// A held lock. Released explicitly; if the holder dies the TTL cleans up.
pub struct TaskLock {
    kv: Arc<dyn Kv>,
    redis_key: String,
    token: String,
    key: String,
}

impl TaskLock {
    /// The logical lock key (the part after the task name).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock if this acquisition still owns it.
    pub async fn release(self) -> Result<bool> {
        self.kv.delete_if_equals(&self.redis_key, &self.token).await
    }
}
