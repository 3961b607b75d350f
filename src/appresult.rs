use axum::{
    extract::ws::rejection::WebSocketUpgradeRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::rooms::HubError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("websocket upgrade failed: {0}")]
    UpgradeFailed(String),
    #[error("room hub is not running")]
    HubUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UpgradeFailed(_) => StatusCode::UPGRADE_REQUIRED,
            AppError::HubUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let AppError::Internal(err) = &self {
            error!("{err}\n\n{}", err.backtrace());
        }

        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

impl From<HubError> for AppError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::RoomExists(_) | HubError::AlreadyJoined { .. } => {
                AppError::Conflict(err.to_string())
            }
            HubError::RoomNotFound(_) => AppError::NotFound(err.to_string()),
            HubError::Closed => AppError::HubUnavailable,
        }
    }
}

impl From<WebSocketUpgradeRejection> for AppError {
    fn from(err: WebSocketUpgradeRejection) -> Self {
        AppError::UpgradeFailed(err.body_text())
    }
}
