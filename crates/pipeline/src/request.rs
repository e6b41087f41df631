use axum::http::HeaderMap;
use uuid::Uuid;

/// Per-request correlation id, logged alongside every pipeline stage so a single
/// request's path through the log can be grepped out.
#[derive(Debug, Clone)]
pub(crate) struct RequestContext {
    /// Unique id for this request. Taken from an inbound `X-Request-Id` header
    /// if present, otherwise generated.
    pub request_id: String,

    /// Incoming request headers, kept around for the rare stage that needs one
    /// (e.g. forwarding a client's `anthropic-beta` header upstream unchanged).
    pub headers: HeaderMap,
}

const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Extract request context from inbound headers.
pub(super) fn extract_context(headers: &HeaderMap) -> RequestContext {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    RequestContext {
        request_id,
        headers: headers.clone(),
    }
}
