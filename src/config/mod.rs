use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string, shared by the job queue and result store
    pub redis_url: String,

    /// Directory for content-addressed image uploads (shared with workers)
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// File that client feedback is appended to, one JSON object per line
    #[serde(default = "default_feedback_file")]
    pub feedback_file: String,

    /// Inference endpoint URL the worker posts images to
    #[serde(default)]
    pub model_url: Option<String>,

    /// Bearer token for the inference endpoint
    #[serde(default)]
    pub model_token: Option<String>,

    /// TTL applied to published results, in seconds
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    /// Dispatcher polling interval, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Dispatcher wall-clock wait ceiling, in seconds
    #[serde(default = "default_predict_timeout_secs")]
    pub predict_timeout_secs: u64,

    /// Worker blocking-pop timeout, in seconds
    #[serde(default = "default_queue_pop_timeout_secs")]
    pub queue_pop_timeout_secs: u64,

    /// Consecutive transient store errors before the worker cools down
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Worker cool-down after exhausting the error budget, in seconds
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

fn default_feedback_file() -> String {
    "feedback/feedback.jsonl".to_string()
}

fn default_result_ttl_secs() -> u64 {
    600
}

fn default_poll_interval_ms() -> u64 {
    300
}

fn default_predict_timeout_secs() -> u64 {
    30
}

fn default_queue_pop_timeout_secs() -> u64 {
    5
}

fn default_max_consecutive_errors() -> u32 {
    3
}

fn default_error_cooldown_secs() -> u64 {
    5
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
