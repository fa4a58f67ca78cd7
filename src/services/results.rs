use std::time::Duration;

use redis::AsyncCommands;
use uuid::Uuid;

use crate::models::prediction::JobOutcome;

/// Key-value namespace where workers publish job outcomes under the job id.
/// Keys expire after a finite TTL so never-polled jobs cannot accumulate.
pub trait ResultStore: Send + Sync {
    fn put(
        &self,
        job_id: Uuid,
        outcome: &JobOutcome,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), ResultStoreError>> + Send;

    fn get(
        &self,
        job_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<JobOutcome>, ResultStoreError>> + Send;

    fn delete(
        &self,
        job_id: Uuid,
    ) -> impl std::future::Future<Output = Result<(), ResultStoreError>> + Send;
}

/// Redis-backed result store sharing the queue's connection endpoint.
pub struct RedisResults {
    client: redis::Client,
}

impl RedisResults {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    fn key(job_id: Uuid) -> String {
        job_id.to_string()
    }
}

impl ResultStore for RedisResults {
    async fn put(
        &self,
        job_id: Uuid,
        outcome: &JobOutcome,
        ttl: Duration,
    ) -> Result<(), ResultStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(outcome)?;
        // SET with EX applies value and expiry atomically.
        conn.set_ex::<_, _, ()>(Self::key(job_id), payload, ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobOutcome>, ResultStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(Self::key(job_id)).await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, job_id: Uuid) -> Result<(), ResultStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(Self::key(job_id)).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResultStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
