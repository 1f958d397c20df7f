use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use stemsplit::{ErrorKind, StemsplitError};
use thiserror::Error;

/// Errors returned by handlers, rendered as `{"error": {"code", "message"}}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] StemsplitError),

    #[error("{message}")]
    Request { kind: ErrorKind, message: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Request {
            kind: ErrorKind::InvalidArgument,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Service(e) => e.kind(),
            ApiError::Request { kind, .. } => *kind,
        }
    }
}

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument | ErrorKind::UnsupportedFormat => StatusCode::BAD_REQUEST,
        ErrorKind::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyRunning
        | ErrorKind::AlreadyFinished
        | ErrorKind::NotRunning
        | ErrorKind::DuplicateId => StatusCode::CONFLICT,
        ErrorKind::MissingDependency
        | ErrorKind::Timeout
        | ErrorKind::ExternalProcess
        | ErrorKind::Cancelled
        | ErrorKind::Storage
        | ErrorKind::Config
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        let kind = if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ErrorKind::FileTooLarge
        } else {
            ErrorKind::InvalidArgument
        };
        ApiError::Request {
            kind,
            message: e.body_text(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::bad_request(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "error": {
                "code": kind.as_str().to_ascii_uppercase(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}
