//! Request and response values passed through the pipeline

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};

/// One-shot permission to retry a logical request after a 401.
///
/// Travels with the request, so the retry (a clone taken after consuming)
/// cannot retry again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryGuard {
    consumed: bool,
}

impl RetryGuard {
    /// Mark the guard consumed. Returns `true` if it was still available.
    pub fn consume(&mut self) -> bool {
        !std::mem::replace(&mut self.consumed, true)
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }
}

/// A request as the pipeline sends it.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub retry: RetryGuard,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            retry: RetryGuard::default(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// A fully read upstream response.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }
}
