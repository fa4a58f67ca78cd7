//! Worker loop: pops classification jobs from the queue, runs inference and
//! publishes the outcome to the result store.
//!
//! The loop is an explicit state machine (`Idle -> Predicting -> Publishing
//! -> Idle`) so tests can drive it one transition at a time and shutdown is
//! deterministic via a cancellation token. One job is processed per cycle;
//! horizontal scaling is done by running more worker processes against the
//! same queue.

use std::sync::Arc;
use std::time::Duration;

use image::imageops::FilterType;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::QueuedJob;
use crate::models::prediction::{round_score, JobOutcome, Prediction};
use crate::services::blob::BlobStore;
use crate::services::classifier::Classifier;
use crate::services::queue::Queue;
use crate::services::results::ResultStore;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bound on each blocking pop; a timeout just loops back to idle.
    pub pop_timeout: Duration,
    /// Expiry applied to every published outcome.
    pub result_ttl: Duration,
    /// Consecutive transient store errors tolerated before the cool-down.
    pub max_consecutive_errors: u32,
    /// Pause after the error budget is exhausted and the probe fails.
    pub cooldown: Duration,
    /// Base delay for exponential backoff between transient-error retries.
    pub backoff_base: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pop_timeout: Duration::from_secs(5),
            result_ttl: Duration::from_secs(600),
            max_consecutive_errors: 3,
            cooldown: Duration::from_secs(5),
            backoff_base: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
pub enum WorkerState {
    Idle,
    Predicting(QueuedJob),
    Publishing { job_id: Uuid, outcome: JobOutcome },
}

pub struct Worker<C, Q, R> {
    blobs: Arc<BlobStore>,
    classifier: C,
    queue: Arc<Q>,
    results: Arc<R>,
    config: WorkerConfig,
    state: WorkerState,
    consecutive_errors: u32,
}

impl<C: Classifier, Q: Queue, R: ResultStore> Worker<C, Q, R> {
    pub fn new(
        blobs: Arc<BlobStore>,
        classifier: C,
        queue: Arc<Q>,
        results: Arc<R>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            blobs,
            classifier,
            queue,
            results,
            config,
            state: WorkerState::Idle,
            consecutive_errors: 0,
        }
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// Run until the token is cancelled. Transient store errors never exit
    /// the loop; they back off, probe the connection and resume.
    pub async fn run(&mut self, cancel: CancellationToken) {
        tracing::info!("Worker loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Worker loop cancelled, shutting down");
                    break;
                }
                _ = self.step() => {}
            }
        }
    }

    /// Advance the state machine by one transition.
    pub async fn step(&mut self) {
        match std::mem::replace(&mut self.state, WorkerState::Idle) {
            WorkerState::Idle => self.dequeue().await,
            WorkerState::Predicting(job) => self.predict(job).await,
            WorkerState::Publishing { job_id, outcome } => self.publish(job_id, outcome).await,
        }
    }

    async fn dequeue(&mut self) {
        match self.queue.pop_blocking(self.config.pop_timeout).await {
            Ok(Some(job)) => {
                self.consecutive_errors = 0;
                tracing::info!(job_id = %job.id, image_name = %job.image_name, "Job dequeued");
                self.state = WorkerState::Predicting(job);
            }
            Ok(None) => {
                // Empty queue is the normal idle condition.
                self.consecutive_errors = 0;
                tracing::trace!("No jobs in queue");
                self.state = WorkerState::Idle;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dequeue failed");
                self.state = WorkerState::Idle;
                self.handle_store_error().await;
            }
        }
    }

    async fn predict(&mut self, job: QueuedJob) {
        let started = std::time::Instant::now();
        let outcome = match self.predict_inner(&job).await {
            Ok(prediction) => {
                tracing::info!(
                    job_id = %job.id,
                    prediction = %prediction.prediction,
                    score = prediction.score,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Prediction complete"
                );
                metrics::histogram!("inference_seconds").record(started.elapsed().as_secs_f64());
                JobOutcome::Ok(prediction)
            }
            // Inference errors publish a failure marker instead of crashing
            // the loop; the dispatcher surfaces them to the caller.
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Prediction failed");
                JobOutcome::Err { error: e }
            }
        };
        self.state = WorkerState::Publishing {
            job_id: job.id,
            outcome,
        };
    }

    async fn predict_inner(&self, job: &QueuedJob) -> Result<Prediction, String> {
        let bytes = self
            .blobs
            .get(&job.image_name)
            .await
            .map_err(|e| format!("failed to load image {}: {e}", job.image_name))?;

        let decoded =
            image::load_from_memory(&bytes).map_err(|e| format!("failed to decode image: {e}"))?;
        let edge = self.classifier.input_edge();
        let resized = decoded.resize_exact(edge, edge, FilterType::Triangle);

        let ranked = self
            .classifier
            .classify(&resized)
            .await
            .map_err(|e| format!("inference failed: {e}"))?;

        // Top-1 selection is this loop's policy; the model only ranks.
        let top = ranked.first().ok_or("empty ranked list")?;
        Ok(Prediction {
            prediction: top.label.clone(),
            score: round_score(top.confidence),
        })
    }

    async fn publish(&mut self, job_id: Uuid, outcome: JobOutcome) {
        match self
            .results
            .put(job_id, &outcome, self.config.result_ttl)
            .await
        {
            Ok(()) => {
                self.consecutive_errors = 0;
                tracing::info!(job_id = %job_id, "Result published");
                self.state = WorkerState::Idle;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Publish failed, will retry");
                // Stay in Publishing so the outcome is retried, never dropped.
                self.state = WorkerState::Publishing { job_id, outcome };
                self.handle_store_error().await;
            }
        }
    }

    /// Bounded backoff for transient store errors. After the configured
    /// number of consecutive failures, probe the connection and cool down
    /// before resuming.
    async fn handle_store_error(&mut self) {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.config.max_consecutive_errors {
            match self.queue.ping().await {
                Ok(()) => tracing::info!("Store connection probe succeeded"),
                Err(e) => {
                    tracing::error!(error = %e, "Store unreachable, cooling down");
                    sleep(self.config.cooldown).await;
                }
            }
            self.consecutive_errors = 0;
        } else {
            let exp = self.consecutive_errors.saturating_sub(1).min(4);
            sleep(self.config.backoff_base * 2u32.pow(exp)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::prediction::RankedLabel;
    use crate::services::classifier::ClassifierError;
    use crate::services::queue::QueueError;
    use crate::services::results::{ResultStore, ResultStoreError};
    use crate::services::testing::{MemQueue, MemResults};
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::Mutex;

    struct FakeClassifier {
        ranked: Result<Vec<RankedLabel>, String>,
    }

    impl FakeClassifier {
        fn returning(ranked: Vec<RankedLabel>) -> Self {
            Self { ranked: Ok(ranked) }
        }

        fn failing(message: &str) -> Self {
            Self {
                ranked: Err(message.to_string()),
            }
        }
    }

    impl Classifier for FakeClassifier {
        fn input_edge(&self) -> u32 {
            224
        }

        async fn classify(
            &self,
            _image: &DynamicImage,
        ) -> Result<Vec<RankedLabel>, ClassifierError> {
            match &self.ranked {
                Ok(ranked) => Ok(ranked.clone()),
                Err(message) => Err(ClassifierError::Encode(message.clone())),
            }
        }
    }

    fn result_store_error() -> ResultStoreError {
        serde_json::from_str::<JobOutcome>("{").unwrap_err().into()
    }

    fn queue_error() -> QueueError {
        serde_json::from_str::<QueuedJob>("{").unwrap_err().into()
    }

    /// Result store whose first N puts fail, for exercising publish retries.
    struct FlakyResults {
        inner: MemResults,
        put_failures_left: Mutex<u32>,
    }

    impl FlakyResults {
        fn failing_puts(n: u32) -> Self {
            Self {
                inner: MemResults::default(),
                put_failures_left: Mutex::new(n),
            }
        }
    }

    impl ResultStore for FlakyResults {
        async fn put(
            &self,
            job_id: Uuid,
            outcome: &JobOutcome,
            ttl: Duration,
        ) -> Result<(), ResultStoreError> {
            {
                let mut left = self.put_failures_left.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    return Err(result_store_error());
                }
            }
            self.inner.put(job_id, outcome, ttl).await
        }

        async fn get(&self, job_id: Uuid) -> Result<Option<JobOutcome>, ResultStoreError> {
            self.inner.get(job_id).await
        }

        async fn delete(&self, job_id: Uuid) -> Result<(), ResultStoreError> {
            self.inner.delete(job_id).await
        }
    }

    /// Queue whose first N pops fail, with a configurable probe outcome.
    struct FlakyQueue {
        inner: MemQueue,
        pop_failures_left: Mutex<u32>,
        ping_ok: bool,
    }

    impl FlakyQueue {
        fn failing_pops(n: u32, ping_ok: bool) -> Self {
            Self {
                inner: MemQueue::default(),
                pop_failures_left: Mutex::new(n),
                ping_ok,
            }
        }
    }

    impl Queue for FlakyQueue {
        async fn push(&self, job: &QueuedJob) -> Result<(), QueueError> {
            self.inner.push(job).await
        }

        async fn pop_blocking(&self, timeout: Duration) -> Result<Option<QueuedJob>, QueueError> {
            {
                let mut left = self.pop_failures_left.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    return Err(queue_error());
                }
            }
            self.inner.pop_blocking(timeout).await
        }

        async fn ping(&self) -> Result<(), QueueError> {
            if self.ping_ok {
                Ok(())
            } else {
                Err(queue_error())
            }
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([120, 10, 200])));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            pop_timeout: Duration::from_millis(50),
            result_ttl: Duration::from_secs(60),
            backoff_base: Duration::from_millis(1),
            cooldown: Duration::from_millis(1),
            ..WorkerConfig::default()
        }
    }

    async fn setup(
        classifier: FakeClassifier,
    ) -> (
        Worker<FakeClassifier, MemQueue, MemResults>,
        Arc<MemQueue>,
        Arc<MemResults>,
        tempfile::TempDir,
        Arc<BlobStore>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(BlobStore::new(dir.path()).unwrap());
        let queue = Arc::new(MemQueue::default());
        let results = Arc::new(MemResults::default());
        let worker = Worker::new(
            blobs.clone(),
            classifier,
            queue.clone(),
            results.clone(),
            test_config(),
        );
        (worker, queue, results, dir, blobs)
    }

    #[tokio::test]
    async fn empty_queue_keeps_worker_idle() {
        let (mut worker, _queue, _results, _dir, _blobs) =
            setup(FakeClassifier::returning(vec![])).await;

        worker.step().await;
        assert!(matches!(worker.state(), WorkerState::Idle));
    }

    #[tokio::test]
    async fn job_round_trips_with_rounded_score() {
        let classifier = FakeClassifier::returning(vec![
            RankedLabel {
                label: "cat".to_string(),
                confidence: 0.93214567,
            },
            RankedLabel {
                label: "dog".to_string(),
                confidence: 0.02,
            },
        ]);
        let (mut worker, queue, results, _dir, blobs) = setup(classifier).await;

        let image_name = blobs.put(&png_bytes(), "cat.png").await.unwrap();
        let job = QueuedJob::new(image_name);
        let job_id = job.id;
        queue.push(&job).await.unwrap();

        // Idle -> Predicting -> Publishing -> Idle.
        worker.step().await;
        assert!(matches!(worker.state(), WorkerState::Predicting(_)));
        worker.step().await;
        assert!(matches!(worker.state(), WorkerState::Publishing { .. }));
        worker.step().await;
        assert!(matches!(worker.state(), WorkerState::Idle));

        let outcome = results.get(job_id).await.unwrap().unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Ok(Prediction {
                prediction: "cat".to_string(),
                score: 0.9321,
            })
        );
    }

    #[tokio::test]
    async fn jobs_are_processed_in_fifo_order() {
        let classifier = FakeClassifier::returning(vec![RankedLabel {
            label: "tabby".to_string(),
            confidence: 0.5,
        }]);
        let (mut worker, queue, results, _dir, blobs) = setup(classifier).await;

        let image_name = blobs.put(&png_bytes(), "img.png").await.unwrap();
        let first = QueuedJob::new(image_name.clone());
        let second = QueuedJob::new(image_name);
        queue.push(&first).await.unwrap();
        queue.push(&second).await.unwrap();

        // One full cycle publishes the first job's result before the second
        // job is even dequeued.
        for _ in 0..3 {
            worker.step().await;
        }
        assert!(results.get(first.id).await.unwrap().is_some());
        assert!(results.get(second.id).await.unwrap().is_none());

        for _ in 0..3 {
            worker.step().await;
        }
        assert!(results.get(second.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn inference_error_publishes_failure_marker() {
        let (mut worker, queue, results, _dir, blobs) =
            setup(FakeClassifier::failing("model exploded")).await;

        let image_name = blobs.put(&png_bytes(), "img.jpg").await.unwrap();
        let job = QueuedJob::new(image_name);
        let job_id = job.id;
        queue.push(&job).await.unwrap();

        for _ in 0..3 {
            worker.step().await;
        }

        let outcome = results.get(job_id).await.unwrap().unwrap();
        match outcome {
            // The model's error message is carried into the marker.
            JobOutcome::Err { error } => assert!(error.contains("model exploded")),
            other => panic!("expected failure marker, got {other:?}"),
        }
        // The loop is back to idle, not crashed.
        assert!(matches!(worker.state(), WorkerState::Idle));
    }

    #[tokio::test]
    async fn missing_blob_publishes_failure_marker() {
        let classifier = FakeClassifier::returning(vec![RankedLabel {
            label: "cat".to_string(),
            confidence: 0.5,
        }]);
        let (mut worker, queue, results, _dir, _blobs) = setup(classifier).await;

        let job = QueuedJob::new("does-not-exist.png");
        let job_id = job.id;
        queue.push(&job).await.unwrap();

        for _ in 0..3 {
            worker.step().await;
        }

        let outcome = results.get(job_id).await.unwrap().unwrap();
        match outcome {
            JobOutcome::Err { error } => assert!(error.contains("does-not-exist.png")),
            other => panic!("expected failure marker, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_is_retried_until_the_result_lands() {
        let classifier = FakeClassifier::returning(vec![RankedLabel {
            label: "cat".to_string(),
            confidence: 0.5,
        }]);
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(BlobStore::new(dir.path()).unwrap());
        let queue = Arc::new(MemQueue::default());
        let results = Arc::new(FlakyResults::failing_puts(2));
        let mut worker = Worker::new(
            blobs.clone(),
            classifier,
            queue.clone(),
            results.clone(),
            test_config(),
        );

        let image_name = blobs.put(&png_bytes(), "cat.png").await.unwrap();
        let job = QueuedJob::new(image_name);
        let job_id = job.id;
        queue.push(&job).await.unwrap();

        worker.step().await;
        worker.step().await;
        assert!(matches!(worker.state(), WorkerState::Publishing { .. }));

        // Two failed puts keep the outcome in Publishing instead of
        // dropping it.
        worker.step().await;
        assert!(matches!(worker.state(), WorkerState::Publishing { .. }));
        assert!(results.get(job_id).await.unwrap().is_none());
        worker.step().await;
        assert!(matches!(worker.state(), WorkerState::Publishing { .. }));

        worker.step().await;
        assert!(matches!(worker.state(), WorkerState::Idle));
        assert!(results.get(job_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn error_budget_triggers_probe_and_counter_reset() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(BlobStore::new(dir.path()).unwrap());
        let queue = Arc::new(FlakyQueue::failing_pops(3, true));
        let results = Arc::new(MemResults::default());
        let mut worker = Worker::new(
            blobs,
            FakeClassifier::returning(vec![]),
            queue,
            results,
            test_config(),
        );

        worker.step().await;
        assert_eq!(worker.consecutive_errors, 1);
        worker.step().await;
        assert_eq!(worker.consecutive_errors, 2);
        // Third failure exhausts the budget; the probe succeeds and the
        // counter resets without the loop exiting.
        worker.step().await;
        assert_eq!(worker.consecutive_errors, 0);
        assert!(matches!(worker.state(), WorkerState::Idle));
    }

    #[tokio::test]
    async fn failed_probe_cools_down_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(BlobStore::new(dir.path()).unwrap());
        let queue = Arc::new(FlakyQueue::failing_pops(3, false));
        let results = Arc::new(MemResults::default());
        let mut worker = Worker::new(
            blobs.clone(),
            FakeClassifier::returning(vec![RankedLabel {
                label: "cat".to_string(),
                confidence: 0.5,
            }]),
            queue.clone(),
            results,
            test_config(),
        );

        let image_name = blobs.put(&png_bytes(), "cat.png").await.unwrap();
        queue.push(&QueuedJob::new(image_name)).await.unwrap();

        // Three failures, an unreachable probe, a cool-down; the counter
        // resets and the loop keeps going.
        for _ in 0..3 {
            worker.step().await;
        }
        assert_eq!(worker.consecutive_errors, 0);

        // The flaky pops are exhausted, so the next step dequeues normally.
        worker.step().await;
        assert!(matches!(worker.state(), WorkerState::Predicting(_)));
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let (mut worker, _queue, _results, _dir, _blobs) =
            setup(FakeClassifier::returning(vec![])).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        // Returns promptly instead of blocking on the empty queue forever.
        tokio::time::timeout(Duration::from_secs(1), worker.run(cancel))
            .await
            .expect("worker did not honor cancellation");
    }
}
