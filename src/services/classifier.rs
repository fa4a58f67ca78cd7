use base64::Engine;
use image::DynamicImage;
use reqwest::Client;
use serde::Deserialize;

use crate::models::prediction::RankedLabel;

/// Narrow interface over the classification model: a decoded image in, a
/// ranked list of (label, confidence) pairs out. Top-1 selection is the
/// worker's policy, not the model's.
pub trait Classifier: Send + Sync {
    /// Square edge length, in pixels, the model expects its input resized to.
    fn input_edge(&self) -> u32;

    fn classify(
        &self,
        image: &DynamicImage,
    ) -> impl std::future::Future<Output = Result<Vec<RankedLabel>, ClassifierError>> + Send;
}

/// Client for an HTTP inference endpoint hosting the classification model.
pub struct RemoteClassifier {
    http: Client,
    url: String,
    token: Option<String>,
    input_edge: u32,
}

#[derive(Deserialize)]
struct InferenceResponse {
    predictions: Vec<RankedLabel>,
}

impl RemoteClassifier {
    pub fn new(url: String, token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            url,
            token,
            input_edge: 224,
        }
    }

    fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ClassifierError> {
        let mut buf = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut buf, image::ImageFormat::Png)
            .map_err(|e| ClassifierError::Encode(e.to_string()))?;
        Ok(buf.into_inner())
    }
}

impl Classifier for RemoteClassifier {
    fn input_edge(&self) -> u32 {
        self.input_edge
    }

    async fn classify(&self, image: &DynamicImage) -> Result<Vec<RankedLabel>, ClassifierError> {
        let png = Self::encode_png(image)?;
        let body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(&png),
        });

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        let inference: InferenceResponse = response.json().await?;

        if inference.predictions.is_empty() {
            return Err(ClassifierError::EmptyResponse);
        }
        Ok(inference.predictions)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to encode image for inference: {0}")]
    Encode(String),

    #[error("inference endpoint returned no predictions")]
    EmptyResponse,
}
