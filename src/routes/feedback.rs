use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tokio::io::AsyncWriteExt;

use crate::app_state::AppState;
use crate::models::feedback::{FeedbackEntry, FeedbackRequest};

/// POST /api/v1/feedback — Append client feedback to the feedback file.
pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> StatusCode {
    if request.feedback.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }

    let entry = FeedbackEntry::new(request.feedback);
    match append_entry(&state.feedback_file, &entry).await {
        Ok(()) => StatusCode::CREATED,
        Err(e) => {
            tracing::error!(error = %e, "Failed to store feedback");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn append_entry(
    path: &std::path::Path,
    entry: &FeedbackEntry,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}
