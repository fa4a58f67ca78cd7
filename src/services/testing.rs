//! In-memory fakes for the queue and result store, used by unit tests to
//! drive the dispatcher and worker without a Redis instance.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::models::job::QueuedJob;
use crate::models::prediction::JobOutcome;
use crate::services::queue::{Queue, QueueError};
use crate::services::results::{ResultStore, ResultStoreError};

#[derive(Default)]
pub struct MemQueue {
    jobs: Mutex<VecDeque<QueuedJob>>,
}

impl MemQueue {
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn drain(&self) -> Vec<QueuedJob> {
        self.jobs.lock().await.drain(..).collect()
    }
}

impl Queue for MemQueue {
    async fn push(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.jobs.lock().await.push_back(job.clone());
        Ok(())
    }

    async fn pop_blocking(&self, timeout: Duration) -> Result<Option<QueuedJob>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.jobs.lock().await.pop_front() {
                return Ok(Some(job));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemResults {
    entries: Mutex<HashMap<Uuid, JobOutcome>>,
}

impl MemResults {
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl ResultStore for MemResults {
    async fn put(
        &self,
        job_id: Uuid,
        outcome: &JobOutcome,
        _ttl: Duration,
    ) -> Result<(), ResultStoreError> {
        self.entries.lock().await.insert(job_id, outcome.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobOutcome>, ResultStoreError> {
        Ok(self.entries.lock().await.get(&job_id).cloned())
    }

    async fn delete(&self, job_id: Uuid) -> Result<(), ResultStoreError> {
        self.entries.lock().await.remove(&job_id);
        Ok(())
    }
}
