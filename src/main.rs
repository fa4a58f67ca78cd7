mod app_state;
mod config;
mod models;
mod routes;
mod services;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::{
    blob::BlobStore, dispatcher::Dispatcher, queue::RedisQueue, results::RedisResults,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing img-predict API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("predict_jobs_total", "Total classification jobs submitted");
    metrics::describe_counter!(
        "predict_jobs_completed",
        "Total classification jobs that returned a prediction"
    );
    metrics::describe_counter!(
        "predict_jobs_failed",
        "Total classification jobs that returned a failure marker"
    );
    metrics::describe_counter!(
        "predict_jobs_timed_out",
        "Total classification jobs that exceeded the polling budget"
    );
    metrics::describe_histogram!(
        "predict_wait_seconds",
        "Wall-clock time from enqueue to result retrieval"
    );
    metrics::describe_gauge!(
        "queue_depth",
        "Pending jobs in the queue, sampled when /health is checked"
    );

    // Initialize the content-addressed blob store
    tracing::info!(upload_dir = %config.upload_dir, "Opening blob store");
    let blobs = Arc::new(BlobStore::new(&config.upload_dir).expect("Failed to open blob store"));

    // One Redis endpoint backs both the job queue and the result store
    tracing::info!("Connecting to Redis");
    let redis_client =
        redis::Client::open(config.redis_url.as_str()).expect("Failed to create Redis client");
    let queue = Arc::new(RedisQueue::new(redis_client.clone()));
    let results = Arc::new(RedisResults::new(redis_client));

    let dispatcher = Dispatcher::new(
        blobs,
        queue.clone(),
        results,
        Duration::from_millis(config.poll_interval_ms),
        Duration::from_secs(config.predict_timeout_secs),
    );

    // Create shared application state
    let state = AppState::new(dispatcher, queue, config.feedback_file.clone().into());

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/predict", post(routes::predict::predict))
        .route("/api/v1/feedback", post(routes::feedback::submit_feedback))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    tracing::info!("Starting img-predict on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
