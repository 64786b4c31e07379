use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("this email has already entered the contest")]
    DuplicateEmail,

    #[error("not found")]
    NotFound,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmailTaken => AppError::DuplicateEmail,
            StoreError::Missing(_) => AppError::NotFound,
            StoreError::CodeTaken => {
                AppError::Internal("unresolved referral code collision".to_string())
            }
            StoreError::Unavailable(msg) => AppError::StoreUnavailable(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::DuplicateEmail => StatusCode::CONFLICT,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Business outcomes are normal control flow; only infrastructure
        // failures get logged.
        if matches!(
            self,
            AppError::StoreUnavailable { .. } | AppError::Internal { .. }
        ) {
            error!("request failed: {self}");
        }

        let body = Json(json!({ "success": false, "error": self.to_string() }));

        (status, body).into_response()
    }
}
