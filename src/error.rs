use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No route registered for path '{0}'")]
    RouteNotFound(String),

    #[error("Upstream service unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Authentication rejected ({status}): {message}")]
    AuthRejected { status: u16, message: String },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed input: {0}")]
    MalformedInput(String),
}

impl AppError {
    /// Status code the gateway answers with when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            AppError::UpstreamUnreachable(_) | AppError::Http(_) => StatusCode::BAD_GATEWAY,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            AppError::AuthRejected { status, .. } | AppError::Api { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            AppError::AuthRejected { status: 401, .. } | AppError::Api { status: 401, .. }
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "message": self.to_string() }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
