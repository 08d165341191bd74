//! REST error taxonomy and its JSON rendering.

use axum::{
    Json,
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::docker::engine::EngineError;

/// Every REST failure is rendered as `{ "error": ..., "code": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    NotFound { message: String, code: &'static str },

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    InvalidState { message: String, code: &'static str },

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    RateLimited { message: String, retry_after: u32 },

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn route_not_found() -> Self {
        Self::NotFound {
            message: "Not found".into(),
            code: "NOT_FOUND",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InvalidState { .. } | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { code, .. } | Self::InvalidState { code, .. } => code,
            Self::Conflict(_) => "RESOURCE_IN_USE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Classify an engine failure the way the dashboard reports it.
    pub fn from_engine(status_code: Option<u16>, message: &str) -> Self {
        let lower = message.to_ascii_lowercase();

        let not_found = |message: &str, code| Self::NotFound {
            message: message.into(),
            code,
        };

        if lower.contains("no such container") {
            return not_found("Container not found", "CONTAINER_NOT_FOUND");
        }
        if lower.contains("no such image") {
            return not_found("Image not found", "IMAGE_NOT_FOUND");
        }
        if lower.contains("no such volume") {
            return not_found("Volume not found", "VOLUME_NOT_FOUND");
        }
        if lower.contains("no such network")
            || (lower.starts_with("network ") && lower.contains("not found"))
        {
            return not_found("Network not found", "NETWORK_NOT_FOUND");
        }
        if lower.contains("is already in use") || lower.contains("is in use") {
            return Self::Conflict(message.to_string());
        }
        if lower.contains("is not running") {
            return Self::InvalidState {
                message: "Container is not running".into(),
                code: "CONTAINER_NOT_RUNNING",
            };
        }
        if lower.contains("container is already") || status_code == Some(304) {
            return Self::InvalidState {
                message: message.to_string(),
                code: "INVALID_STATE",
            };
        }

        match status_code {
            Some(404) => not_found(message, "NOT_FOUND"),
            Some(409) => Self::Conflict(message.to_string()),
            Some(400) => Self::Validation(message.to_string()),
            Some(_) => Self::Internal(message.to_string()),
            None => Self::Upstream(message.to_string()),
        }
    }
}

impl From<bollard::errors::Error> for ApiError {
    fn from(err: bollard::errors::Error) -> Self {
        match &err {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => Self::from_engine(Some(*status_code), message),
            _ => Self::from_engine(None, &err.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Docker(err) => err.into(),
            EngineError::Stream(message) => Self::from_engine(None, &message),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "{self}");
        } else {
            tracing::debug!(code = self.code(), "{self}");
        }

        let body = match &self {
            Self::RateLimited { retry_after, .. } => serde_json::json!({
                "error": self.to_string(),
                "code": self.code(),
                "retry_after": retry_after,
            }),
            _ => serde_json::json!({
                "error": self.to_string(),
                "code": self.code(),
            }),
        };

        (status, Json(body)).into_response()
    }
}
