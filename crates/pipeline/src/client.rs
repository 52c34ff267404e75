//! Authenticated request execution
//!
//! Every request gets the current bearer token (or none at all). A 401 is
//! answered with one forced renewal and one retry; the `RetryGuard` on the
//! request makes a second retry impossible, so a logical call costs at most
//! two upstream attempts. The pipeline never redirects and never starts a
//! login.

use std::sync::Arc;

use common::Secret;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::request::{InboundResponse, OutboundRequest};
use crate::source::CredentialSource;
use crate::transport::Transport;

/// Sends requests upstream with session credentials attached.
#[derive(Clone)]
pub struct AuthenticatedClient {
    credentials: Arc<dyn CredentialSource>,
    transport: Arc<dyn Transport>,
}

impl AuthenticatedClient {
    pub fn new(credentials: Arc<dyn CredentialSource>, transport: Arc<dyn Transport>) -> Self {
        Self {
            credentials,
            transport,
        }
    }

    /// Execute one logical request.
    ///
    /// Returns the upstream response for every status except a 401 that
    /// survives the retry, which becomes `RequestUnauthorized`.
    pub async fn execute(&self, mut request: OutboundRequest) -> Result<InboundResponse> {
        let token = self.credentials.get_credential().await;
        attach_credential(&mut request.headers, token.as_ref());

        let response = self.transport.send(&request).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        if !request.retry.consume() {
            debug!("401 with consumed retry guard, propagating");
            return Err(PipelineError::RequestUnauthorized(response));
        }

        let Some(token) = self.credentials.force_refresh().await else {
            info!("upstream rejected credential and renewal produced none");
            metrics::counter!("pipeline_retries_total", "outcome" => "no_credential").increment(1);
            return Err(PipelineError::RequestUnauthorized(response));
        };

        attach_credential(&mut request.headers, Some(&token));
        let retried = self.transport.send(&request).await?;
        if retried.is_unauthorized() {
            warn!("upstream rejected renewed credential");
            metrics::counter!("pipeline_retries_total", "outcome" => "rejected").increment(1);
            return Err(PipelineError::RequestUnauthorized(retried));
        }

        debug!(status = %retried.status, "retry with renewed credential succeeded");
        metrics::counter!("pipeline_retries_total", "outcome" => "recovered").increment(1);
        Ok(retried)
    }
}

/// Set `Authorization: Bearer <token>`, or remove any Authorization header
/// when there is no token.
fn attach_credential(headers: &mut HeaderMap, token: Option<&Secret<String>>) {
    headers.remove(AUTHORIZATION);
    let Some(token) = token else {
        return;
    };
    match HeaderValue::from_str(&format!("Bearer {}", token.expose())) {
        Ok(mut value) => {
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Err(e) => warn!(error = %e, "access token is not a valid header value, sending without it"),
    }
}
