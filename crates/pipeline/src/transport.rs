//! HTTP transport abstraction
//!
//! The pipeline only needs "send this request, give me status, headers and
//! body". `ReqwestTransport` is the production implementation; tests swap in
//! scripted transports.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::request::{InboundResponse, OutboundRequest};

/// Sends one request and reads the whole response.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<InboundResponse>> + Send + 'a>>;
}

/// `reqwest`-backed transport with a per-request timeout.
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl Transport for ReqwestTransport {
    fn send<'a>(
        &'a self,
        request: &'a OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<InboundResponse>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .request(request.method.clone(), &request.url)
                .headers(request.headers.clone())
                .timeout(self.timeout)
                .body(request.body.clone())
                .send()
                .await
                .map_err(classify)?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(classify)?;
            debug!(%status, bytes = body.len(), "upstream responded");

            Ok(InboundResponse {
                status,
                headers,
                body,
            })
        })
    }
}

fn classify(e: reqwest::Error) -> PipelineError {
    if e.is_timeout() {
        PipelineError::Timeout
    } else {
        PipelineError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use reqwest::Method;
    use tokio::net::TcpListener;

    async fn start_upstream() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let app = axum::Router::new()
                .route(
                    "/echo",
                    axum::routing::post(|headers: HeaderMap, body: String| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("none")
                            .to_string();
                        (StatusCode::CREATED, [("x-seen-auth", auth)], body)
                    }),
                )
                .route(
                    "/slow",
                    axum::routing::get(|| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        "late"
                    }),
                );
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{addr}")
    }

    #[tokio::test]
    async fn forwards_method_headers_and_body() {
        let base = start_upstream().await;
        let transport = ReqwestTransport::new(reqwest::Client::new(), Duration::from_secs(5));

        let mut request =
            OutboundRequest::new(Method::POST, format!("{base}/echo")).with_body("payload");
        request
            .headers
            .insert("authorization", "Bearer at_1".parse().unwrap());

        let response = transport.send(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.headers.get("x-seen-auth").unwrap(), "Bearer at_1");
        assert_eq!(&response.body[..], b"payload");
    }

    #[tokio::test]
    async fn slow_upstream_is_timeout() {
        let base = start_upstream().await;
        let transport = ReqwestTransport::new(reqwest::Client::new(), Duration::from_millis(100));

        let request = OutboundRequest::new(Method::GET, format!("{base}/slow"));
        let result = transport.send(&request).await;
        assert!(matches!(result, Err(PipelineError::Timeout)));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_transport_error() {
        let transport = ReqwestTransport::new(reqwest::Client::new(), Duration::from_secs(1));
        let request = OutboundRequest::new(Method::GET, "http://127.0.0.1:1/");
        let result = transport.send(&request).await;
        assert!(matches!(result, Err(PipelineError::Transport(_))));
    }
}
