use std::sync::Arc;

use crate::services::{
    dispatcher::Dispatcher,
    queue::RedisQueue,
    results::RedisResults,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher<RedisQueue, RedisResults>>,
    pub queue: Arc<RedisQueue>,
    pub feedback_file: Arc<std::path::PathBuf>,
}

impl AppState {
    pub fn new(
        dispatcher: Dispatcher<RedisQueue, RedisResults>,
        queue: Arc<RedisQueue>,
        feedback_file: std::path::PathBuf,
    ) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            queue,
            feedback_file: Arc::new(feedback_file),
        }
    }
}
