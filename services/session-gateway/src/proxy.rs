//! Authenticated reverse proxy
//!
//! Receives inbound requests, strips hop-by-hop headers, and forwards them to
//! the upstream URL through the authenticated pipeline. Upstream responses,
//! including a 401 that survived the pipeline's retry, are returned verbatim.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use pipeline::{AuthenticatedClient, InboundResponse, OutboundRequest, PipelineError};
use tracing::{error, info, instrument, warn};

use crate::error::GatewayError;
use crate::metrics::{record_request, record_upstream_error};

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Largest request body the gateway buffers.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state for the proxy handler
#[derive(Clone)]
pub struct ProxyState {
    pub client: AuthenticatedClient,
    pub upstream_url: String,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
}

/// Decrements the in-flight gauge when the request finishes, however it ends.
struct InFlightGuard(Arc<AtomicU64>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Proxy an inbound request to upstream with the session's credential.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let _in_flight = InFlightGuard::enter(&state.in_flight);
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();
    let method = request.method().clone();

    let response = forward(state, request, &request_id).await;

    record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: &str,
) -> Response {
    let upstream_url = match request.uri().path_and_query() {
        Some(pq) => format!("{}{}", state.upstream_url.trim_end_matches('/'), pq),
        None => state.upstream_url.clone(),
    };
    let method = request.method().clone();
    let headers = forwardable_headers(request.headers());

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to read request body");
            return GatewayError::InvalidRequest(format!("invalid request body: {e}"))
                .into_response_with_id(request_id);
        }
    };

    let outbound = OutboundRequest::new(method, upstream_url)
        .with_headers(headers)
        .with_body(body);

    match state.client.execute(outbound).await {
        Ok(upstream) => relay(upstream, request_id),
        Err(PipelineError::RequestUnauthorized(upstream)) => {
            info!("upstream rejected request after credential renewal");
            relay(upstream, request_id)
        }
        Err(PipelineError::Timeout) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            record_upstream_error("timeout");
            error!("upstream timeout");
            GatewayError::UpstreamTimeout("no response from upstream".into())
                .into_response_with_id(request_id)
        }
        Err(PipelineError::Transport(msg)) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            record_upstream_error("connection");
            error!(error = %msg, "upstream request failed");
            GatewayError::Upstream(msg).into_response_with_id(request_id)
        }
    }
}

/// Copy inbound headers minus hop-by-hop ones and `host`, which must match
/// the upstream rather than the gateway.
fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if !is_hop_by_hop(name.as_str()) && name != axum::http::header::HOST {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

fn relay(upstream: InboundResponse, request_id: &str) -> Response {
    let mut response = Response::builder().status(upstream.status);
    for (name, value) in &upstream.headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(axum::body::Body::from(upstream.body))
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to build relayed response");
            GatewayError::Upstream(format!("response build error: {e}"))
                .into_response_with_id(request_id)
        })
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_detection() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(is_hop_by_hop("keep-alive"));
        assert!(is_hop_by_hop("Proxy-Authorization"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("Authorization"));
        assert!(!is_hop_by_hop("X-Custom-Header"));
    }

    #[test]
    fn forwardable_headers_drop_host_and_hop_by_hop() {
        let mut inbound = HeaderMap::new();
        inbound.insert("host", "gateway.local".parse().unwrap());
        inbound.insert("connection", "keep-alive".parse().unwrap());
        inbound.insert("accept", "application/json".parse().unwrap());
        inbound.append("x-multi", "a".parse().unwrap());
        inbound.append("x-multi", "b".parse().unwrap());

        let headers = forwardable_headers(&inbound);
        assert!(headers.get("host").is_none());
        assert!(headers.get("connection").is_none());
        assert_eq!(headers.get("accept").unwrap(), "application/json");
        assert_eq!(headers.get_all("x-multi").iter().count(), 2);
    }

    #[test]
    fn relay_keeps_status_and_strips_hop_by_hop() {
        let mut upstream = InboundResponse::new(StatusCode::UNAUTHORIZED);
        upstream
            .headers
            .insert("www-authenticate", "Bearer".parse().unwrap());
        upstream
            .headers
            .insert("transfer-encoding", "chunked".parse().unwrap());

        let response = relay(upstream, "req_test");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get("www-authenticate").unwrap(), "Bearer");
        assert!(response.headers().get("transfer-encoding").is_none());
    }
}
