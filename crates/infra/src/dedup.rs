//! Redelivery dedup guard.
//!
//! A short-lived set of standups whose analysis already ran. Opt-in: without it
//! every redelivered trigger re-runs the analysis and bumps rolling-task counts
//! again.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use scrumai_core::StandupId;

use crate::store::StoreError;

#[async_trait]
pub trait ProcessedSet: Send + Sync {
    async fn contains(&self, standup_id: StandupId) -> Result<bool, StoreError>;

    /// Record a completed analysis. Returns `false` if it was already recorded.
    async fn mark(&self, standup_id: StandupId) -> Result<bool, StoreError>;
}

/// Process-local processed set. Expired entries are swept lazily on `mark`.
#[derive(Debug)]
pub struct InMemoryProcessedSet {
    ttl: Duration,
    entries: Mutex<HashMap<StandupId, Instant>>,
}

impl InMemoryProcessedSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<StandupId, Instant>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("processed set lock poisoned".to_string()))
    }
}

#[async_trait]
impl ProcessedSet for InMemoryProcessedSet {
    async fn contains(&self, standup_id: StandupId) -> Result<bool, StoreError> {
        let entries = self.lock()?;
        Ok(entries
            .get(&standup_id)
            .is_some_and(|expires| *expires > Instant::now()))
    }

    async fn mark(&self, standup_id: StandupId) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        entries.retain(|_, expires| *expires > now);
        Ok(entries.insert(standup_id, now + self.ttl).is_none())
    }
}

#[cfg(feature = "redis")]
pub use redis_set::RedisProcessedSet;

#[cfg(feature = "redis")]
mod redis_set {
    use std::time::Duration;

    use async_trait::async_trait;
    use redis::aio::MultiplexedConnection;
    use redis::Value;

    use scrumai_core::StandupId;

    use super::ProcessedSet;
    use crate::store::StoreError;

    /// `SET key 1 NX EX ttl` per standup, shared by every worker process.
    #[derive(Clone)]
    pub struct RedisProcessedSet {
        conn: MultiplexedConnection,
        prefix: String,
        ttl_secs: u64,
    }

    impl RedisProcessedSet {
        pub async fn connect(
            redis_url: &str,
            prefix: impl Into<String>,
            ttl: Duration,
        ) -> Result<Self, StoreError> {
            let client = redis::Client::open(redis_url)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let conn = client
                .get_multiplexed_tokio_connection()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(Self {
                conn,
                prefix: prefix.into(),
                ttl_secs: ttl.as_secs().max(1),
            })
        }

        fn key(&self, standup_id: StandupId) -> String {
            format!("{}:{}", self.prefix, standup_id)
        }
    }

    #[async_trait]
    impl ProcessedSet for RedisProcessedSet {
        async fn contains(&self, standup_id: StandupId) -> Result<bool, StoreError> {
            let mut conn = self.conn.clone();
            let exists: i64 = redis::cmd("EXISTS")
                .arg(self.key(standup_id))
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Unavailable(format!("EXISTS failed: {e}")))?;
            Ok(exists > 0)
        }

        async fn mark(&self, standup_id: StandupId) -> Result<bool, StoreError> {
            let mut conn = self.conn.clone();
            let reply: Value = redis::cmd("SET")
                .arg(self.key(standup_id))
                .arg(1)
                .arg("NX")
                .arg("EX")
                .arg(self.ttl_secs)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Unavailable(format!("SET NX failed: {e}")))?;
            Ok(!matches!(reply, Value::Nil))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let set = InMemoryProcessedSet::new(Duration::from_secs(60));
        let id = StandupId::new();

        assert!(!set.contains(id).await.unwrap());
        assert!(set.mark(id).await.unwrap());
        assert!(set.contains(id).await.unwrap());
        assert!(!set.mark(id).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!set.contains(id).await.unwrap());
        assert!(set.mark(id).await.unwrap());
    }
}
