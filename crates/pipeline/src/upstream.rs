//! Upstream Caller: sends the translated request to the target OpenAI-shaped
//! backend and parses its response, streaming or not.
//!
//! Build with the shared [`crate::http_client`], check the HTTP status before
//! doing anything with the body, and for streaming responses, ride
//! `eventsource_stream` down to `data: [DONE]`. The target backend only ever
//! speaks one wire format, so this is a plain async function set rather than
//! a multi-provider trait impl.

use std::time::Duration;

use config::CircuitBreakerConfig;
use futures::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    error::{PipelineError, PipelineResult},
    health::HealthManager,
    http_client::http_client,
    messages::openai,
};
use eventsource_stream::Eventsource;

/// Default per-attempt timeout for a single upstream call. Overridden with a
/// shorter value for correction-endpoint calls, which should fail fast
/// rather than hold up the client response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn chat_completions_url(endpoint: &str) -> String {
    format!("{}/v1/chat/completions", endpoint.trim_end_matches('/'))
}

/// Issue one non-streaming call to `endpoint`, with no retry or failover —
/// just the single HTTP round trip and response parsing.
pub async fn call_once(
    endpoint: &str,
    api_key: &SecretString,
    request: &openai::ChatCompletionRequest,
    timeout: Duration,
) -> PipelineResult<openai::ChatCompletionResponse> {
    let body = serde_json::to_vec(request).map_err(|e| PipelineError::Internal(format!("failed to encode upstream request: {e}")))?;

    let response = http_client()
        .post(chat_completions_url(endpoint))
        .timeout(timeout)
        .header(AUTHORIZATION, format!("Bearer {}", api_key.expose_secret()))
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| PipelineError::Upstream {
            status: 0,
            message: format!("request to {endpoint} failed: {e}"),
        })?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
        return Err(PipelineError::Upstream {
            status: status.as_u16(),
            message,
        });
    }

    let bytes = response.bytes().await.map_err(|e| PipelineError::Upstream {
        status: status.as_u16(),
        message: format!("failed to read upstream response body: {e}"),
    })?;

    serde_json::from_slice(&bytes).map_err(|e| PipelineError::Upstream {
        status: status.as_u16(),
        message: format!("could not parse upstream response: {e}"),
    })
}

/// Issue one streaming call to `endpoint`. `request.stream` is forced to
/// `true` regardless of what the caller set.
pub async fn call_streaming_once(
    endpoint: &str,
    api_key: &SecretString,
    mut request: openai::ChatCompletionRequest,
    timeout: Duration,
) -> PipelineResult<impl Stream<Item = PipelineResult<openai::ChatCompletionChunk>>> {
    request.stream = Some(true);

    let body = serde_json::to_vec(&request).map_err(|e| PipelineError::Internal(format!("failed to encode upstream request: {e}")))?;

    let response = http_client()
        .post(chat_completions_url(endpoint))
        .timeout(timeout)
        .header(AUTHORIZATION, format!("Bearer {}", api_key.expose_secret()))
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| PipelineError::Upstream {
            status: 0,
            message: format!("request to {endpoint} failed: {e}"),
        })?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
        return Err(PipelineError::Upstream {
            status: status.as_u16(),
            message,
        });
    }

    let events = response.bytes_stream().eventsource();

    let chunks = events.filter_map(|event| async move {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                return Some(Err(PipelineError::Upstream {
                    status: 0,
                    message: format!("malformed SSE event from upstream: {e}"),
                }));
            }
        };

        if event.data == "[DONE]" {
            return None;
        }

        match serde_json::from_str::<openai::ChatCompletionChunk>(&event.data) {
            Ok(chunk) => Some(Ok(chunk)),
            Err(e) => {
                log::warn!("dropping unparseable upstream chunk: {e}");
                Some(Err(PipelineError::Upstream {
                    status: 0,
                    message: format!("could not parse upstream chunk: {e}"),
                }))
            }
        }
    });

    Ok(chunks)
}

/// Call across `endpoints` with health-manager-guarded failover: pick a
/// healthy endpoint, try it, record the outcome, and move to the next
/// healthy endpoint on failure. Exhausts after one attempt per endpoint.
pub async fn call_with_failover(
    pool_key: &str,
    endpoints: &[String],
    api_key: &SecretString,
    health: &HealthManager,
    circuit_breaker: &CircuitBreakerConfig,
    request: &openai::ChatCompletionRequest,
    timeout: Duration,
) -> PipelineResult<openai::ChatCompletionResponse> {
    if endpoints.is_empty() {
        return Err(PipelineError::Internal("no endpoints configured for this model pool".to_string()));
    }

    let mut last_error = None;

    for _ in 0..endpoints.len() {
        let Some(endpoint) = health.select_healthy(pool_key, endpoints) else {
            break;
        };
        let endpoint = endpoint.to_string();

        match call_once(&endpoint, api_key, request, timeout).await {
            Ok(response) => {
                health.record_success(&endpoint);
                return Ok(response);
            }
            Err(error) => {
                log::warn!("upstream call to {endpoint} failed: {error}");
                health.record_failure(&endpoint, circuit_breaker);
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| PipelineError::Internal("no healthy endpoint available".to_string())))
}

/// Streaming counterpart to [`call_with_failover`]: failover only covers
/// opening the connection. Once a stream is open, a mid-stream disconnect is
/// `streaming::reassemble`'s concern, not retried here — re-issuing a
/// streaming request after partial output would duplicate content.
pub async fn call_streaming_with_failover(
    pool_key: &str,
    endpoints: &[String],
    api_key: &SecretString,
    health: &HealthManager,
    circuit_breaker: &CircuitBreakerConfig,
    request: &openai::ChatCompletionRequest,
    timeout: Duration,
) -> PipelineResult<impl Stream<Item = PipelineResult<openai::ChatCompletionChunk>>> {
    if endpoints.is_empty() {
        return Err(PipelineError::Internal("no endpoints configured for this model pool".to_string()));
    }

    let mut last_error = None;

    for _ in 0..endpoints.len() {
        let Some(endpoint) = health.select_healthy(pool_key, endpoints) else {
            break;
        };
        let endpoint = endpoint.to_string();

        match call_streaming_once(&endpoint, api_key, request.clone(), timeout).await {
            Ok(stream) => {
                health.record_success(&endpoint);
                return Ok(stream);
            }
            Err(error) => {
                log::warn!("upstream stream open to {endpoint} failed: {error}");
                health.record_failure(&endpoint, circuit_breaker);
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| PipelineError::Internal("no healthy endpoint available".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_cleanly_regardless_of_trailing_slash() {
        assert_eq!(chat_completions_url("http://x"), "http://x/v1/chat/completions");
        assert_eq!(chat_completions_url("http://x/"), "http://x/v1/chat/completions");
    }
}
