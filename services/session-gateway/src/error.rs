//! Gateway error responses
//!
//! Every error the gateway produces itself (as opposed to relaying an
//! upstream response) is rendered as
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Per-request failures rendered as JSON error responses.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("login callback failed: {0}")]
    CallbackFailed(String),

    #[error("identity provider unavailable: {0}")]
    IdentityProvider(String),

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) | GatewayError::CallbackFailed(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::IdentityProvider(_) | GatewayError::Upstream(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Value of the `error.type` field.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::CallbackFailed(_) => "callback_failed",
            GatewayError::IdentityProvider(_) => "identity_provider_error",
            GatewayError::UpstreamTimeout(_) | GatewayError::Upstream(_) => "proxy_error",
        }
    }

    /// Render as a JSON error response tagged with `request_id`.
    pub fn into_response_with_id(self, request_id: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
                "request_id": request_id,
            }
        });
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

impl From<session::Error> for GatewayError {
    fn from(e: session::Error) -> Self {
        match e {
            session::Error::CallbackFailed(msg) => GatewayError::CallbackFailed(msg),
            other => GatewayError::IdentityProvider(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let request_id = new_request_id();
        self.into_response_with_id(&request_id)
    }
}

/// `req_` followed by a simple-format v4 UUID.
pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn statuses_match_error_kind() {
        assert_eq!(
            GatewayError::CallbackFailed("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::IdentityProvider("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::UpstreamTimeout("x".into()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn session_errors_map_to_gateway_errors() {
        let callback: GatewayError = session::Error::CallbackFailed("bad state".into()).into();
        assert!(matches!(callback, GatewayError::CallbackFailed(ref m) if m == "bad state"));

        let login: GatewayError = session::Error::Login("discovery failed".into()).into();
        assert_eq!(login.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn error_response_has_all_fields() {
        let response = GatewayError::Upstream("connection refused".into())
            .into_response_with_id("req_abc123");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "proxy_error");
        assert_eq!(json["error"]["request_id"], "req_abc123");
        assert!(
            json["error"]["message"]
                .as_str()
                .unwrap()
                .contains("connection refused")
        );
    }

    #[test]
    fn request_ids_are_prefixed_and_unique() {
        let a = new_request_id();
        let b = new_request_id();
        assert!(a.starts_with("req_"));
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, b);
    }
}
