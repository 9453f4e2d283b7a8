use crate::error::AppError;
use crate::models::predict_types::{ClassCatalog, HealthStatus, ImageUpload, PredictionResult};
use async_trait::async_trait;
use reqwest::multipart;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The one inference call the request controller depends on, kept behind
/// a trait so tests can script responses without a network.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, upload: &ImageUpload) -> Result<PredictionResult, AppError>;
}

/// Typed wrapper around the analysis HTTP boundary.
#[derive(Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    base_url: String,
}

impl InferenceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Reads `PLANT_VISION_API_URL`; an empty value means relative paths
    /// against the current origin.
    pub fn from_env() -> Self {
        Self::new(std::env::var("PLANT_VISION_API_URL").unwrap_or_default())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Submit one image for analysis.
    pub async fn predict(&self, upload: &ImageUpload) -> Result<PredictionResult, AppError> {
        let part = multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.content_type)
            .map_err(|e| AppError::InvalidUpload(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.url("/api/predict"))
            .multipart(form)
            .send()
            .await
            .map_err(AppError::from)?;
        read_json(response).await
    }

    /// Fetch the supported label taxonomy.
    pub async fn classes(&self) -> Result<ClassCatalog, AppError> {
        let response = self
            .http
            .get(self.url("/api/classes"))
            .send()
            .await
            .map_err(AppError::from)?;
        read_json(response).await
    }

    /// Liveness probe.
    pub async fn health(&self) -> Result<HealthStatus, AppError> {
        let response = self
            .http
            .get(self.url("/api/health"))
            .send()
            .await
            .map_err(AppError::from)?;
        read_json(response).await
    }
}

#[async_trait]
impl Predictor for InferenceClient {
    async fn predict(&self, upload: &ImageUpload) -> Result<PredictionResult, AppError> {
        InferenceClient::predict(self, upload).await
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AppError> {
    let status = response.status();
    let body = response.bytes().await.map_err(AppError::from)?;
    parse_json(status, &body)
}

fn parse_json<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, AppError> {
    if !status.is_success() {
        return Err(server_error(status, body));
    }
    serde_json::from_slice(body).map_err(|e| AppError::ServerError {
        status: status.as_u16(),
        message: format!("Malformed response from the analysis service: {}", e),
    })
}

/// Non-2xx responses carry `{"detail": "..."}`; fall back to the status
/// line when the body is missing or unreadable.
fn server_error(status: StatusCode, body: &[u8]) -> AppError {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: Option<String>,
    }

    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail)
        .unwrap_or_else(|| format!("Analysis service returned HTTP {}", status.as_u16()));
    AppError::ServerError {
        status: status.as_u16(),
        message,
    }
}
