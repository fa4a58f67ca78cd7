use serde::{Deserialize, Serialize};

/// A successful classification result as stored in the result store.
///
/// Wire format: `{"prediction": "<label>", "score": <number>}`. The score is
/// rounded to four decimal places before storage so comparisons are stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction: String,
    pub score: f64,
}

/// Outcome published by a worker under the job id.
///
/// Untagged on the wire: a success is exactly the `Prediction` object, a
/// failure is `{"error": "<message>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Ok(Prediction),
    Err { error: String },
}

/// One entry of the ranked list a classifier returns.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RankedLabel {
    pub label: String,
    pub confidence: f64,
}

/// Round a raw model confidence to four decimal places.
pub fn round_score(raw: f64) -> f64 {
    (raw * 10_000.0).round() / 10_000.0
}

/// Response body for `POST /api/v1/predict`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub success: bool,
    pub prediction: Option<String>,
    pub score: Option<f64>,
    pub image_file_name: Option<String>,
}

impl PredictResponse {
    pub fn failure() -> Self {
        Self {
            success: false,
            prediction: None,
            score: None,
            image_file_name: None,
        }
    }
}
