use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::models::prediction::PredictResponse;
use crate::services::dispatcher::DispatchError;

/// POST /api/v1/predict — Upload an image and wait for its classification.
///
/// The caller can distinguish bad input (400), a queue that could not accept
/// the job (503), a worker-side failure (502) and a poll timeout (504).
pub async fn predict(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<PredictResponse>) {
    let mut upload: Option<(Vec<u8>, String)> = None;

    while let Some(field) = match multipart.next_field().await {
        Ok(field) => field,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(PredictResponse::failure())),
    } {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = match field.bytes().await {
                Ok(data) => data,
                Err(_) => return (StatusCode::BAD_REQUEST, Json(PredictResponse::failure())),
            };
            upload = Some((data.to_vec(), filename));
        }
    }

    let Some((bytes, filename)) = upload else {
        return (StatusCode::BAD_REQUEST, Json(PredictResponse::failure()));
    };

    match state.dispatcher.submit(&bytes, &filename).await {
        Ok(ok) => (
            StatusCode::OK,
            Json(PredictResponse {
                success: true,
                prediction: Some(ok.prediction.prediction),
                score: Some(ok.prediction.score),
                image_file_name: Some(ok.image_file_name),
            }),
        ),
        Err(e) => {
            let status = match &e {
                DispatchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                DispatchError::Storage(_) | DispatchError::Enqueue(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                DispatchError::ProcessingFailed(_) => StatusCode::BAD_GATEWAY,
                DispatchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            };
            tracing::warn!(error = %e, status = %status, "Predict request failed");
            (status, Json(PredictResponse::failure()))
        }
    }
}
