use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client feedback on a prediction, as submitted to the API.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub feedback: String,
}

/// Feedback entry as appended to the feedback file, one JSON object per line.
#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub feedback: String,
    pub submitted_at: DateTime<Utc>,
}

impl FeedbackEntry {
    pub fn new(feedback: String) -> Self {
        Self {
            feedback,
            submitted_at: Utc::now(),
        }
    }
}
