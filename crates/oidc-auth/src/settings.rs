//! Identity provider client settings
//!
//! A typed record the service builds from its config file. Nothing here is
//! parsed or validated; the config layer owns that.

use std::time::Duration;

use common::Secret;

use crate::constants::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_SCOPES};

/// Endpoints that override (or replace) OpenID discovery.
///
/// When both `authorization_endpoint` and `token_endpoint` are set, the client
/// never fetches the discovery document.
#[derive(Debug, Clone, Default)]
pub struct EndpointOverrides {
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub end_session_endpoint: Option<String>,
    pub revocation_endpoint: Option<String>,
}

impl EndpointOverrides {
    pub fn skips_discovery(&self) -> bool {
        self.authorization_endpoint.is_some() && self.token_endpoint.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct OidcSettings {
    /// Issuer base URL, e.g. `https://tenant.zitadel.cloud`
    pub authority: String,
    pub client_id: String,
    /// Only for confidential clients; sent as `client_secret_post`.
    pub client_secret: Option<Secret<String>>,
    pub redirect_uri: String,
    pub post_logout_redirect_uri: Option<String>,
    /// Space-separated scope list
    pub scopes: String,
    pub endpoints: EndpointOverrides,
    pub request_timeout: Duration,
}

impl OidcSettings {
    pub fn new(
        authority: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            post_logout_redirect_uri: None,
            scopes: DEFAULT_SCOPES.to_string(),
            endpoints: EndpointOverrides::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
