use std::time::Duration;

use redis::AsyncCommands;

use crate::models::job::QueuedJob;

const QUEUE_KEY: &str = "img_predict:jobs";

/// Producer/consumer interface over the job queue. Implemented by the Redis
/// queue in production and by in-memory fakes in tests.
pub trait Queue: Send + Sync {
    fn push(&self, job: &QueuedJob) -> impl std::future::Future<Output = Result<(), QueueError>> + Send;

    /// Remove and return the head of the queue, blocking up to `timeout` when
    /// the queue is empty. `None` on timeout is a normal condition.
    fn pop_blocking(
        &self,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Option<QueuedJob>, QueueError>> + Send;

    /// Probe connectivity to the underlying store. Used by health checks and
    /// by the worker's reconnect probe after repeated transient errors.
    fn ping(&self) -> impl std::future::Future<Output = Result<(), QueueError>> + Send;
}

/// Redis-backed FIFO job queue shared by all dispatchers and workers.
pub struct RedisQueue {
    client: redis::Client,
}

impl RedisQueue {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    /// Current number of pending jobs.
    pub async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn.llen(QUEUE_KEY).await?)
    }
}

impl Queue for RedisQueue {
    async fn push(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    async fn pop_blocking(&self, timeout: Duration) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // BRPOP pairs with LPUSH for FIFO order and pops atomically, so a job
        // is handed to exactly one of the competing workers.
        let reply: Option<(String, String)> =
            conn.brpop(QUEUE_KEY, timeout.as_secs_f64()).await?;
        match reply {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
