use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::accounts::AccountError;
use crate::capture::CaptureError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("camera unavailable: {0}")]
    Device(#[from] glowscan_hw::CameraError),
    #[error("face model unavailable: {0}")]
    Model(#[from] glowscan_core::CascadeError),
    #[error("detector error: {0}")]
    Detector(#[from] glowscan_core::DetectorError),
    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(std::io::Error),
    #[error("pipeline thread exited")]
    ChannelClosed,
}

/// Errors surfaced to HTTP clients as `{"status": "error", "message": ...}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("no analysed frame is available yet; open the video stream first")]
    NoFrameYet,
    #[error("{0}")]
    DeviceUnavailable(String),
    #[error("login required")]
    Unauthorized,
    #[error("admin access required")]
    Forbidden,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("username already taken")]
    UsernameTaken,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoFrameYet => StatusCode::CONFLICT,
            Self::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::UsernameTaken => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({
            "status": "error",
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Device(_) | PipelineError::Model(_) | PipelineError::Detector(_) => {
                Self::DeviceUnavailable(err.to_string())
            }
            PipelineError::Spawn(_) | PipelineError::ChannelClosed => Self::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateUser(_) => Self::UsernameTaken,
            StoreError::Database(_) | StoreError::Io(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Store(e) => e.into(),
            AccountError::Hashing(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<CaptureError> for ApiError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::NoFrameYet => Self::NoFrameYet,
            CaptureError::Store(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glowscan_hw::CameraError;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::NoFrameYet.status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::DeviceUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_camera_failure_maps_to_unavailable() {
        let err: ApiError = PipelineError::Device(CameraError::DeviceNotFound("/dev/video9".into())).into();
        assert!(matches!(err, ApiError::DeviceUnavailable(ref m) if m.contains("/dev/video9")));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_duplicate_user_maps_to_conflict() {
        let err: ApiError = StoreError::DuplicateUser("ana".into()).into();
        assert!(matches!(err, ApiError::UsernameTaken));
    }
}
