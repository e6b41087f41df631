//! Translation pipeline: every stage that turns an inbound Anthropic Messages
//! request into an outbound OpenAI-shaped one and back, plus the axum router
//! that exposes it.
//!
//! `router` is this crate's single entry point for the ambient `server`
//! crate: it owns the [`PipelineState`] (health tracking and request
//! metrics) for the lifetime of the process and wires it into three routes.

#![deny(missing_docs)]

mod channel;
mod classifier;
mod corrector;
mod error;
mod health;
mod http_client;
mod loop_detector;
mod messages;
mod pipeline;
mod request;
mod router;
mod schema_repair;
mod streaming;
mod system_message;
mod tool_filter;
mod upstream;

use std::{convert::Infallible, sync::Arc};

use axum::{
    Router,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{get, post},
};
use axum_serde::Sonic;
use config::Config;
use futures::StreamExt;

pub use error::PipelineError;
pub use pipeline::PipelineState;

use crate::messages::anthropic;

struct AppState {
    pipeline: PipelineState,
    config: Config,
}

/// Build the bridgeproxy axum router: `POST /v1/messages`, plus `GET /health`
/// and `GET /metrics` for operators. Owns a fresh [`PipelineState`] for the
/// life of the returned router.
pub fn router(config: &Config) -> Router {
    let state = Arc::new(AppState {
        pipeline: PipelineState::new(),
        config: config.clone(),
    });

    Router::new()
        .route("/", get(banner_handler))
        .route("/v1/messages", post(messages_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// `GET /` banner: name and version, for a quick curl sanity check.
async fn banner_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": "bridgeproxy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Handle `POST /v1/messages`: supports both streaming and non-streaming
/// responses, mirroring the Anthropic Messages API's own `stream` flag.
async fn messages_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Sonic(request): Sonic<anthropic::AnthropicChatRequest>,
) -> Response {
    let context = request::extract_context(&headers);
    log::debug!("[{}] messages handler called for model: {}", context.request_id, request.model);
    log::debug!("[{}] request has {} messages", context.request_id, request.messages.len());

    let want_stream = request.stream.unwrap_or(false);

    match pipeline::handle(&state.pipeline, &state.config, request).await {
        Ok(response) if want_stream => {
            let events = anthropic::synthesize_stream_events(response);
            let stream = futures::stream::iter(events).map(|event| {
                let json = sonic_rs::to_string(&event).unwrap_or_else(|e| {
                    log::error!("failed to serialize stream event: {e}");
                    r#"{"type":"error","error":{"type":"api_error","message":"serialization failed"}}"#.to_string()
                });
                Ok::<_, Infallible>(Event::default().data(json))
            });

            Sse::new(stream).into_response()
        }
        Ok(response) => axum::Json(response).into_response(),
        Err(error) => error.into_response(),
    }
}

/// Liveness probe: always `200 OK` once the process is serving traffic.
async fn health_handler() -> impl IntoResponse {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    axum::Json(serde_json::json!({ "status": "ok", "timestamp": timestamp }))
}

/// Prometheus text-exposition metrics: request volume, upstream failures,
/// corrections applied, and loop detections, all monotonic counters for the
/// lifetime of the process.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    use std::sync::atomic::Ordering;

    let p = &state.pipeline;
    let body = format!(
        "# HELP bridgeproxy_requests_total Total requests handled.\n\
         # TYPE bridgeproxy_requests_total counter\n\
         bridgeproxy_requests_total {}\n\
         # HELP bridgeproxy_upstream_failures_total Upstream calls that exhausted failover.\n\
         # TYPE bridgeproxy_upstream_failures_total counter\n\
         bridgeproxy_upstream_failures_total {}\n\
         # HELP bridgeproxy_corrections_total Responses whose tool calls went through correction.\n\
         # TYPE bridgeproxy_corrections_total counter\n\
         bridgeproxy_corrections_total {}\n\
         # HELP bridgeproxy_loop_detections_total Requests short-circuited by the loop detector.\n\
         # TYPE bridgeproxy_loop_detections_total counter\n\
         bridgeproxy_loop_detections_total {}\n",
        p.requests_total.load(Ordering::Relaxed),
        p.upstream_failures_total.load(Ordering::Relaxed),
        p.corrections_total.load(Ordering::Relaxed),
        p.loop_detections_total.load(Ordering::Relaxed),
    );

    ([("content-type", "text/plain; version=0.0.4")], body)
}
