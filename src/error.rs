//! Error taxonomy for the relay boundary.  Every failure a request can hit
//! is a `RelayError`; the handler converts it into a `{ "error": ... }`
//! envelope with the matching status code.  Messages produced here are
//! client-facing, so upstream bodies and transport details never appear in
//! them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("Webhook URL is not configured")]
    Config,

    /// `status` is `None` when the request never produced a response
    /// (connect failure, broken body stream).
    #[error("{}", upstream_message(.status))]
    Upstream { status: Option<u16> },

    #[error("Invalid JSON response from webhook")]
    Parse,

    #[error("Invalid analysis result: {0}")]
    Schema(String),

    #[error("{}", too_large_message(.limit))]
    PayloadTooLarge { limit: Option<usize> },
}

fn upstream_message(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("Webhook request failed with status {}", code),
        None => "Webhook request failed".to_string(),
    }
}

fn too_large_message(limit: &Option<usize>) -> String {
    match limit {
        Some(limit) => format!("Request too large (body exceeded limit {} bytes)", limit),
        None => "Request too large".to_string(),
    }
}

/// Outcome label used by telemetry and metrics.  `Ok` is the only
/// non-error outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Ok,
    Validation,
    RateLimited,
    Config,
    Upstream,
    Parse,
    Schema,
    TooLarge,
}

impl Outcome {
    pub const COUNT: usize = 8;

    pub const ALL: [Outcome; Outcome::COUNT] = [
        Outcome::Ok,
        Outcome::Validation,
        Outcome::RateLimited,
        Outcome::Config,
        Outcome::Upstream,
        Outcome::Parse,
        Outcome::Schema,
        Outcome::TooLarge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Validation => "validation",
            Outcome::RateLimited => "rate_limited",
            Outcome::Config => "config",
            Outcome::Upstream => "upstream",
            Outcome::Parse => "parse",
            Outcome::Schema => "schema",
            Outcome::TooLarge => "too_large",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Outcome::Ok => 0,
            Outcome::Validation => 1,
            Outcome::RateLimited => 2,
            Outcome::Config => 3,
            Outcome::Upstream => 4,
            Outcome::Parse => 5,
            Outcome::Schema => 6,
            Outcome::TooLarge => 7,
        }
    }
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Config
            | RelayError::Upstream { .. }
            | RelayError::Parse
            | RelayError::Schema(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            RelayError::Validation(_) => Outcome::Validation,
            RelayError::RateLimited => Outcome::RateLimited,
            RelayError::Config => Outcome::Config,
            RelayError::Upstream { .. } => Outcome::Upstream,
            RelayError::Parse => Outcome::Parse,
            RelayError::Schema(_) => Outcome::Schema,
            RelayError::PayloadTooLarge { .. } => Outcome::TooLarge,
        }
    }
}

/// Body of every non-success response.
#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
