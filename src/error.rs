use serde::Serialize;
use std::fmt;

/// Error taxonomy for the analysis client.
///
/// `NetworkUnreachable`, `Timeout` and `ServerError` surface to the user
/// through the request controller's error state. `DecodeFailure` and
/// `RemoteSyncFailure` are absorbed where they occur and only logged.
#[derive(Debug, Clone, Serialize)]
pub enum AppError {
    NetworkUnreachable(String),
    Timeout,
    ServerError { status: u16, message: String },
    DecodeFailure(String),
    RemoteSyncFailure(String),
    InvalidUpload(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NetworkUnreachable(msg) => {
                write!(f, "Could not reach the analysis service: {}", msg)
            }
            AppError::Timeout => {
                write!(f, "The analysis request timed out. Please try again.")
            }
            AppError::ServerError { message, .. } => write!(f, "{}", message),
            AppError::DecodeFailure(msg) => write!(f, "Failed to decode image: {}", msg),
            AppError::RemoteSyncFailure(msg) => write!(f, "History sync failed: {}", msg),
            AppError::InvalidUpload(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout
        } else if let Some(status) = err.status() {
            AppError::ServerError {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            AppError::NetworkUnreachable(err.to_string())
        }
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::DecodeFailure(err.to_string())
    }
}
