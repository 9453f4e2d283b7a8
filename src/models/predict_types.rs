use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Upload ceiling enforced at the boundary, matching the service limit.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "bmp"];

fn unknown() -> String {
    "Unknown".to_string()
}

fn no_information() -> String {
    "No information available.".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DiseaseInfo {
    #[serde(default = "unknown")]
    pub cause: String,
    #[serde(default = "no_information")]
    pub symptoms: String,
    #[serde(default = "no_information")]
    pub treatment: String,
}

impl Default for DiseaseInfo {
    fn default() -> Self {
        Self {
            cause: unknown(),
            symptoms: no_information(),
            treatment: no_information(),
        }
    }
}

/// Top-ranked model output. `class_name` is the raw label
/// (`"Tomato — Late Blight"`); `plant` and `condition` are its two halves.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Prediction {
    pub class_name: String,
    pub plant: String,
    pub condition: String,
    pub confidence: f32,
    pub is_healthy: bool,
    #[serde(default)]
    pub info: DiseaseInfo,
}

/// Runner-up predictions, kept in model-ranked order.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Alternative {
    pub class_name: String,
    pub plant: String,
    pub condition: String,
    pub confidence: f32,
    pub is_healthy: bool,
}

/// Outcome of one inference call. Exactly one of a successful prediction
/// or a rejection applies; transport failures never construct this type.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PredictionResult {
    pub success: bool,
    #[serde(default)]
    pub prediction: Option<Prediction>,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    #[serde(default)]
    pub rejected: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClassInfo {
    pub class_name: String,
    pub plant: String,
    pub condition: String,
    pub is_healthy: bool,
}

/// Supported label taxonomy as served by `GET /api/classes`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClassCatalog {
    pub total_classes: usize,
    pub plants: Vec<String>,
    pub classes: Vec<ClassInfo>,
    #[serde(default)]
    pub disease_info: HashMap<String, DiseaseInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
    pub model_backbone: String,
    pub num_classes: usize,
}

/// A validated image file handed to the request controller.
///
/// Validation lives here, at the acquisition boundary; the controller
/// assumes every upload it receives has already passed.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, AppError> {
        let file_name = file_name.into();
        let content_type = content_type.into();

        if !content_type.starts_with("image/") {
            return Err(AppError::InvalidUpload(
                "Uploaded file must be an image.".to_string(),
            ));
        }

        let extension = Path::new(&file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::InvalidUpload(format!(
                "Unsupported image format '{}'. Use JPEG, PNG, WebP, or BMP.",
                extension
            )));
        }

        if bytes.is_empty() {
            return Err(AppError::InvalidUpload(
                "Uploaded file is empty.".to_string(),
            ));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::InvalidUpload(
                "Image exceeds the 10 MB upload limit.".to_string(),
            ));
        }

        Ok(Self {
            file_name,
            content_type,
            bytes,
        })
    }
}
