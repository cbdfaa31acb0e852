use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("{0} is not a valid build uuid")]
    BuildNotFound(String),

    #[error("Unknown blueprint: {0}")]
    RecipeNotFound(String),

    #[error("Invalid compose type ({compose_type}), must be one of {allowed:?}")]
    InvalidComposeType {
        compose_type: String,
        allowed: Vec<String>,
    },

    #[error("{0}")]
    InvalidState(String),

    #[error("Refusing to delete suspicious path: {}", .0.display())]
    UnsafeDeletePath(PathBuf),

    #[error("Depsolve error: {0}")]
    Depsolve(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Build error: {0}")]
    Execution(String),

    #[error("Build was cancelled")]
    Cancelled,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::TomlDe(e) => {
                tracing::error!("TOML error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::TomlSer(e) => {
                tracing::error!("TOML error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            e @ AppError::BuildNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
            e @ AppError::RecipeNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
            e @ AppError::InvalidComposeType { .. } => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::InvalidState(msg) => (StatusCode::BAD_REQUEST, msg),
            e @ AppError::UnsafeDeletePath(_) => {
                tracing::error!("{}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            e @ AppError::Depsolve(_) => (StatusCode::BAD_REQUEST, e.to_string()),
            e @ AppError::Upload(_) => (StatusCode::BAD_REQUEST, e.to_string()),
            e @ AppError::Execution(_) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            e @ AppError::Cancelled => (StatusCode::CONFLICT, e.to_string()),
        };

        let body = json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
