use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::messages::anthropic::{AnthropicError, AnthropicErrorDetails};

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by the translation pipeline, with the HTTP disposition each maps to.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The upstream backend returned an error or could not be reached at all.
    /// Surfaced to the client as a 502, since the fault is on the backend side.
    #[error("upstream error ({status}): {message}")]
    Upstream {
        /// HTTP status the upstream returned, or 0 if the request never got a response.
        status: u16,
        /// Upstream's error body, or a connection-failure description.
        message: String,
    },

    /// A tool definition could not be repaired into a schema the backend would accept.
    #[error("invalid tool definition: {0}")]
    InvalidToolDefinition(String),

    /// The inbound request was malformed in a way the translator can't paper over.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A bug in the pipeline itself; never exposed verbatim to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// HTTP status code for this error, per the disposition table.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidToolDefinition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Anthropic error `type` string for this error.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Upstream { .. } => "api_error",
            Self::InvalidToolDefinition(_) => "invalid_request_error",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::Internal(_) => "api_error",
        }
    }

    /// Message safe to expose to API consumers. Internal errors never leak
    /// their detail, and upstream errors never leak the backend's endpoint
    /// URL (present in the `log::warn!` at the call site, never here).
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            Self::Upstream { .. } => "upstream request failed".to_string(),
            _ => self.to_string(),
        }
    }
}

pub struct AnthropicErrorResponse {
    status: StatusCode,
    body: AnthropicError,
}

impl From<PipelineError> for AnthropicErrorResponse {
    fn from(error: PipelineError) -> Self {
        let status = error.status_code();

        let body = AnthropicError {
            error_type: "error".to_string(),
            error: AnthropicErrorDetails {
                error_type: error.error_type().to_string(),
                message: error.client_message(),
            },
        };

        Self { status, body }
    }
}

impl IntoResponse for AnthropicErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        AnthropicErrorResponse::from(self).into_response()
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicErrorResponse>;
