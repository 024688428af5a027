use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::{models::manifest::ManifestError, services::object_service::ServiceError};

/// Error returned by every handler; rendered as `{"error", "status"}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::ObjectNotFound(_) | ServiceError::FileNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ServiceError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            ServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
            ServiceError::Manifest(
                ManifestError::InvalidLocator { .. } | ManifestError::FileLocatorIsDirectory(_),
            ) => StatusCode::BAD_REQUEST,
            ServiceError::Manifest(
                ManifestError::Parse { .. }
                | ManifestError::MissingField { .. }
                | ManifestError::InvalidFileName(_),
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Manifest(ManifestError::Io { .. })
            | ServiceError::Io(_)
            | ServiceError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("request failed: {}", err);
        }
        Self::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn service_errors_map_to_statuses() {
        let uid = Uuid::new_v4();
        let cases = [
            (ServiceError::ObjectNotFound("x".into()), StatusCode::NOT_FOUND),
            (
                ServiceError::FileNotFound { uid, side: "mock" },
                StatusCode::NOT_FOUND,
            ),
            (
                ServiceError::PermissionDenied {
                    requester: "a@b".into(),
                    action: "read",
                    uid,
                },
                StatusCode::FORBIDDEN,
            ),
            (ServiceError::Invalid("bad".into()), StatusCode::BAD_REQUEST),
            (
                ServiceError::Manifest(ManifestError::InvalidFileName("x.yaml".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ServiceError::Io(std::io::Error::other("disk")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
