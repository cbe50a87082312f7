use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to load artifact {path}: {reason}")]
    Artifact { path: PathBuf, reason: String },

    #[error("Artifact schema mismatch: {0}")]
    Schema(String),

    #[error("Models not loaded: {0}")]
    ModelsNotLoaded(String),

    #[error("Prediction failed: {0}")]
    Prediction(String),

    #[error("Attribution failed: {0}")]
    Attribution(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn artifact(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        AppError::Artifact {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ModelsNotLoaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            AppError::ModelsNotLoaded(_) | AppError::Prediction(_) => self.to_string(),
            _ => {
                tracing::error!("Internal server error: {}", self);
                format!("Prediction failed: {}", self)
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

// Helper function for creating schema errors
pub fn schema_error(msg: impl Into<String>) -> AppError {
    AppError::Schema(msg.into())
}
