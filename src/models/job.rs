use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job record serialized onto the Redis queue.
///
/// Wire format: `{"id": "<uuid>", "image_name": "<blob key>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub image_name: String,
}

impl QueuedJob {
    /// Create a job with a fresh, globally unique id.
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_name: image_name.into(),
        }
    }
}
