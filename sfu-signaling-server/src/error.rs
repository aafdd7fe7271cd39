// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sfu_signaling::{ErrorBody, SignalingError};
use std::fmt;

/// Error returned before a socket is upgraded
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                kind: "ProtocolViolation".to_string(),
                message: message.into(),
            },
        }
    }
}

impl From<SignalingError> for AppError {
    fn from(err: SignalingError) -> Self {
        let status = match &err {
            SignalingError::ProtocolViolation(_) => StatusCode::BAD_REQUEST,
            SignalingError::Forbidden(_) => StatusCode::FORBIDDEN,
            SignalingError::CapacityExceeded(_) | SignalingError::EngineUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: err.to_body(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.body.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
