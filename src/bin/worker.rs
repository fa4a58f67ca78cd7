use std::sync::Arc;
use std::time::Duration;

use img_predict::{
    config::AppConfig,
    services::{blob::BlobStore, classifier::RemoteClassifier, queue::RedisQueue, results::RedisResults},
    worker::{Worker, WorkerConfig},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting classification worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Startup failures are fatal; transient errors later are not.
    let blobs = Arc::new(BlobStore::new(&config.upload_dir).expect("Failed to open blob store"));

    let model_url = config
        .model_url
        .clone()
        .expect("MODEL_URL must be set for the worker");
    let classifier = RemoteClassifier::new(model_url, config.model_token.clone());

    tracing::info!("Connecting to Redis");
    let redis_client =
        redis::Client::open(config.redis_url.as_str()).expect("Failed to create Redis client");
    let queue = Arc::new(RedisQueue::new(redis_client.clone()));
    let results = Arc::new(RedisResults::new(redis_client));

    let worker_config = WorkerConfig {
        pop_timeout: Duration::from_secs(config.queue_pop_timeout_secs),
        result_ttl: Duration::from_secs(config.result_ttl_secs),
        max_consecutive_errors: config.max_consecutive_errors,
        cooldown: Duration::from_secs(config.error_cooldown_secs),
        ..WorkerConfig::default()
    };

    let mut worker = Worker::new(blobs, classifier, queue, results, worker_config);

    // Ctrl-C cancels the loop for a deterministic shutdown
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    tracing::info!("Worker ready, starting job processing loop");
    worker.run(cancel).await;

    tracing::info!("Worker stopped");
}
