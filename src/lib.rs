//! Core library for the verdict relay.  This module wires together input
//! validation, per-client rate limiting, the downstream webhook call and
//! response normalization behind a single HTTP handler.  The analysis
//! itself happens elsewhere; this crate only guards and reshapes the hop.

mod config;
pub mod error;
pub mod forwarder;
pub mod metrics;
pub mod normalize;
pub mod rate_limit;
pub mod telemetry;
pub mod validate;

pub use config::{AppConfig, RateLimitConfig, RotationConfig};
pub use error::{ErrorResponse, Outcome, RelayError};

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, FailedToBufferBody};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::forwarder::{Downstream, WebhookForwarder};
use crate::metrics::RelayMetrics;
use crate::rate_limit::{client_identifier, FixedWindowLimiter, RateDecision};
use crate::telemetry::{RelayEvent, RotatingWriter, TelemetrySink};

/// Path of the relay endpoint.
pub const RELAY_PATH: &str = "/analyze-code";

/// Request headers browsers may send on the relay endpoint.
pub const CORS_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

/// Characters of submitted code included in debug logs.
const LOG_PREVIEW_CHARS: usize = 100;

/// Body accepted by the relay endpoint.  Validation happens in
/// [`validate::extract_code`]; this type only exists once it passed.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub code: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    NeedsMoreInfo,
}

/// One observation made by the downstream analysis.  `confidence` is
/// conventionally in `[0, 1]` but never checked.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Finding {
    pub label: String,
    pub evidence: String,
    pub confidence: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A `findings` element as received.  Entries that do not have the
/// `Finding` shape are kept verbatim rather than rejected.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum FindingEntry {
    Finding(Finding),
    Raw(Value),
}

impl FindingEntry {
    /// Classify a raw element.  It is only typed as `Finding` when that
    /// representation serializes back to the same JSON, so the caller always
    /// sees exactly what the webhook sent.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<Finding>(value.clone()) {
            Ok(finding) if serde_json::to_value(&finding).ok().as_ref() == Some(&value) => {
                FindingEntry::Finding(finding)
            }
            _ => FindingEntry::Raw(value),
        }
    }

    pub fn as_finding(&self) -> Option<&Finding> {
        match self {
            FindingEntry::Finding(f) => Some(f),
            FindingEntry::Raw(_) => None,
        }
    }
}

/// Verdict returned to the caller.  Produced only by
/// [`normalize::normalize`], so `decision` is always canonical.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AnalysisResult {
    pub decision: Decision,
    pub summary: String,
    pub findings: Vec<FindingEntry>,
}

impl AnalysisResult {
    /// Number of `findings` entries that do not have the `Finding` shape.
    pub fn malformed_findings(&self) -> usize {
        self.findings
            .iter()
            .filter(|entry| entry.as_finding().is_none())
            .count()
    }
}

/// Internal application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub downstream: Arc<dyn Downstream>,
    pub limiter: FixedWindowLimiter,
    pub telemetry: TelemetrySink,
    pub metrics: Arc<RelayMetrics>,
    /// Maximum accepted raw request body size in bytes (None => axum default)
    pub max_request_bytes: Option<usize>,
}

impl AppState {
    /// State with the given downstream and limiter, telemetry disabled and
    /// the default body limit.
    pub fn new(downstream: Arc<dyn Downstream>, limiter: FixedWindowLimiter) -> Self {
        Self {
            downstream,
            limiter,
            telemetry: TelemetrySink::disabled(),
            metrics: Arc::new(RelayMetrics::new()),
            max_request_bytes: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: TelemetrySink) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_max_request_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_request_bytes = limit;
        self
    }

    /// Build the full state from parsed configuration.  A missing webhook
    /// URL is not an error here; every relay request reports it instead.
    pub fn from_config(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        if config.webhook_url.is_none() {
            tracing::warn!("RELAY_WEBHOOK_URL not set; relay requests will fail with a configuration error");
        }
        let forwarder = WebhookForwarder::new(config.webhook_url.clone(), config.upstream_timeout)?;

        let limiter = FixedWindowLimiter::new(
            config.rate_limit.max_requests,
            config.rate_limit.window,
        );

        let writer = match config.log_file.as_deref() {
            Some(path) => match RotatingWriter::open(path, config.rotation.clone()) {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to open LOG_FILE; relay events disabled");
                    None
                }
            },
            None => None,
        };

        Ok(Self::new(Arc::new(forwarder), limiter)
            .with_telemetry(TelemetrySink::new(writer, config.log_stdout))
            .with_max_request_bytes(config.max_request_bytes))
    }
}

/// Build state from environment variables.  See [`AppConfig::from_env`]
/// for the variables read.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    AppState::from_config(&config)
}

/// Build the Axum router and attach handlers.  Every response, including
/// errors and preflight answers, carries the CORS headers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route(RELAY_PATH, post(relay_handler).options(preflight_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::overriding(
                    ACCESS_CONTROL_ALLOW_ORIGIN,
                    HeaderValue::from_static("*"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    ACCESS_CONTROL_ALLOW_HEADERS,
                    HeaderValue::from_static(CORS_ALLOW_HEADERS),
                )),
        )
        .with_state(state)
}

/// CORS preflight: empty 200, no validation, no rate accounting.
async fn preflight_handler() -> StatusCode {
    StatusCode::OK
}

/// Facts gathered while a request moves through the relay, reported once
/// it finishes.
#[derive(Default)]
struct RelayTrace {
    code_chars: Option<usize>,
    upstream_ms: Option<u64>,
}

/// Handler for the relay endpoint.  Runs validation, rate limiting, the
/// downstream call and normalization in that order; the first failure
/// short-circuits into an `{error}` response.
async fn relay_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let start = Instant::now();
    let client_id = client_identifier(&headers);
    let mut trace = RelayTrace::default();

    let result = relay(&state, &client_id, body, &mut trace).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    if let Some(ms) = trace.upstream_ms {
        state.metrics.observe_upstream_ms(ms);
    }
    let (outcome, status) = match &result {
        Ok(_) => (Outcome::Ok, StatusCode::OK),
        Err(err) => (err.outcome(), err.status()),
    };
    state.metrics.record_outcome(outcome);
    let mut event = RelayEvent::new(&client_id, outcome, status.as_u16(), latency_ms);
    event.code_chars = trace.code_chars;
    if let Ok(verdict) = &result {
        event.decision = Some(verdict.decision);
        event.findings = Some(verdict.findings.len());
        event.malformed_findings = Some(verdict.malformed_findings());
    }
    state.telemetry.emit(&event);

    match result {
        Ok(verdict) => {
            tracing::info!(
                client_id = %client_id,
                decision = ?verdict.decision,
                findings = verdict.findings.len(),
                malformed_findings = verdict.malformed_findings(),
                latency_ms,
                "relay succeeded"
            );
            (StatusCode::OK, Json(verdict)).into_response()
        }
        Err(err) => {
            match &err {
                RelayError::Validation(_)
                | RelayError::RateLimited
                | RelayError::PayloadTooLarge { .. } => {
                    tracing::warn!(client_id = %client_id, error = %err, "relay request rejected")
                }
                _ => tracing::error!(client_id = %client_id, error = %err, latency_ms, "relay failed"),
            }
            err.into_response()
        }
    }
}

async fn relay(
    state: &AppState,
    client_id: &str,
    body: Result<Bytes, BytesRejection>,
    trace: &mut RelayTrace,
) -> Result<AnalysisResult, RelayError> {
    let raw = body.map_err(|rejection| body_rejection(state, rejection))?;
    let request = validate::parse_body(&raw)?;
    trace.code_chars = Some(request.code.chars().count());
    tracing::debug!(
        client_id = %client_id,
        preview = %request.code.chars().take(LOG_PREVIEW_CHARS).collect::<String>(),
        "payload received"
    );

    if let RateDecision::Deny { count } = state.limiter.check(client_id) {
        tracing::debug!(client_id = %client_id, count, limit = state.limiter.max_requests(), "rate limit exceeded");
        return Err(RelayError::RateLimited);
    }

    let upstream_start = Instant::now();
    let forwarded = state.downstream.forward(&request.code).await;
    if !matches!(forwarded, Err(RelayError::Config)) {
        trace.upstream_ms = Some(upstream_start.elapsed().as_millis() as u64);
    }

    normalize::normalize(forwarded?)
}

fn body_rejection(state: &AppState, rejection: BytesRejection) -> RelayError {
    match rejection {
        BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_)) => {
            match state.max_request_bytes {
                Some(limit) => {
                    tracing::warn!(limit, "request body exceeded limit");
                    RelayError::PayloadTooLarge { limit: Some(limit) }
                }
                // axum's built-in limit sits far above any valid body, so
                // hitting it means `code` is over the character limit.
                None => {
                    tracing::warn!("request body exceeded default limit");
                    validate::code_too_long()
                }
            }
        }
        other => {
            tracing::warn!(error = %other, "failed to read request body");
            RelayError::Validation("Failed to read request body".into())
        }
    }
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "webhookConfigured": state.downstream.is_configured(),
        "rateLimit": {
            "maxRequests": state.limiter.max_requests(),
            "windowSecs": state.limiter.window().as_secs(),
        },
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.metrics.render(
        state.limiter.len(),
        state.telemetry.lines_total(),
        state.telemetry.write_errors_total(),
    );
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        body,
    )
        .into_response()
}
