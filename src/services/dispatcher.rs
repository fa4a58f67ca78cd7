use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::models::job::QueuedJob;
use crate::models::prediction::{JobOutcome, Prediction};
use crate::services::blob::{BlobError, BlobStore};
use crate::services::queue::{Queue, QueueError};
use crate::services::results::ResultStore;

/// Successful dispatch: the prediction plus the content-addressed name the
/// uploaded image was stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOk {
    pub prediction: Prediction,
    pub image_file_name: String,
}

/// API-side client of the job queue: stores the blob, enqueues a job and
/// polls the result store until the worker's outcome appears or the wait
/// budget runs out.
pub struct Dispatcher<Q, R> {
    blobs: Arc<BlobStore>,
    queue: Arc<Q>,
    results: Arc<R>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl<Q: Queue, R: ResultStore> Dispatcher<Q, R> {
    pub fn new(
        blobs: Arc<BlobStore>,
        queue: Arc<Q>,
        results: Arc<R>,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Self {
        Self {
            blobs,
            queue,
            results,
            poll_interval,
            max_wait,
        }
    }

    /// Submit an upload for classification and wait for the outcome.
    ///
    /// Synchronous from the caller's point of view; internally the image is
    /// stored, a job is queued for a worker process and the result store is
    /// polled on a fixed interval up to `max_wait`.
    pub async fn submit(
        &self,
        bytes: &[u8],
        original_filename: &str,
    ) -> Result<SubmitOk, DispatchError> {
        // Invalid input must fail before any queue or store interaction.
        BlobStore::key_for(bytes, original_filename).map_err(DispatchError::invalid_input)?;

        metrics::counter!("predict_jobs_total").increment(1);

        let image_name = self
            .blobs
            .put(bytes, original_filename)
            .await
            .map_err(DispatchError::invalid_input)?;

        let job = QueuedJob::new(image_name.clone());
        self.queue.push(&job).await?;

        tracing::debug!(job_id = %job.id, image_name = %image_name, "Job enqueued, polling for result");

        let started = Instant::now();
        let deadline = started + self.max_wait;
        loop {
            match self.results.get(job.id).await {
                Ok(Some(outcome)) => {
                    if let Err(e) = self.results.delete(job.id).await {
                        tracing::warn!(job_id = %job.id, error = %e, "Failed to delete consumed result");
                    }
                    metrics::histogram!("predict_wait_seconds")
                        .record(started.elapsed().as_secs_f64());
                    return match outcome {
                        JobOutcome::Ok(prediction) => {
                            metrics::counter!("predict_jobs_completed").increment(1);
                            Ok(SubmitOk {
                                prediction,
                                image_file_name: image_name,
                            })
                        }
                        JobOutcome::Err { error } => {
                            metrics::counter!("predict_jobs_failed").increment(1);
                            Err(DispatchError::ProcessingFailed(error))
                        }
                    };
                }
                Ok(None) => {}
                // Poll reads are cheap; a transient store error just costs
                // one interval of the wait budget.
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Result poll failed, retrying")
                }
            }

            if Instant::now() + self.poll_interval > deadline {
                metrics::counter!("predict_jobs_timed_out").increment(1);
                return Err(DispatchError::Timeout(self.max_wait));
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Caller's fault: missing or disallowed file. No job was created.
    #[error("invalid upload: {0}")]
    InvalidInput(#[source] BlobError),

    /// The blob could not be written to the shared filesystem.
    #[error("failed to store image: {0}")]
    Storage(#[source] BlobError),

    /// The job could not be enqueued; the caller may retry.
    #[error("failed to enqueue job: {0}")]
    Enqueue(#[from] QueueError),

    /// No result appeared within the polling budget.
    #[error("no result within {0:?}")]
    Timeout(Duration),

    /// The worker published a failure marker for this job.
    #[error("classification failed: {0}")]
    ProcessingFailed(String),
}

impl DispatchError {
    fn invalid_input(err: BlobError) -> Self {
        if err.is_input_error() {
            DispatchError::InvalidInput(err)
        } else {
            DispatchError::Storage(err)
        }
    }
}
