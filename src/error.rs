use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Failures reported before a response stream is opened.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Invalid JSON body: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Missing or invalid 'prompt' field")]
    InvalidPrompt,
    #[error("Invalid 'options' field")]
    InvalidOptions,
    #[error("{message}")]
    Body { status: StatusCode, message: String },
    #[error("{0}")]
    Health(String),
    #[error("Not found")]
    NotFound,
    #[error("{0}")]
    Internal(String),
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::InvalidJson(_)
            | RequestError::InvalidPrompt
            | RequestError::InvalidOptions => StatusCode::BAD_REQUEST,
            RequestError::Body { status, .. } => *status,
            RequestError::NotFound => StatusCode::NOT_FOUND,
            RequestError::Health(_) | RequestError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Server lifecycle errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already started")]
    AlreadyStarted,
    #[error("server has been stopped")]
    Stopped,
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
