//! OpenID Provider metadata
//!
//! Endpoints come from `{authority}/.well-known/openid-configuration`, with any
//! explicitly configured endpoint taking precedence over the discovered one.

use serde::Deserialize;
use tracing::info;

use crate::constants::DISCOVERY_PATH;
use crate::error::{Error, Result};
use crate::settings::OidcSettings;

/// The subset of the discovery document this client uses.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
}

impl ProviderMetadata {
    fn apply_overrides(mut self, settings: &OidcSettings) -> Self {
        let overrides = &settings.endpoints;
        if let Some(endpoint) = &overrides.authorization_endpoint {
            self.authorization_endpoint = endpoint.clone();
        }
        if let Some(endpoint) = &overrides.token_endpoint {
            self.token_endpoint = endpoint.clone();
        }
        if overrides.end_session_endpoint.is_some() {
            self.end_session_endpoint = overrides.end_session_endpoint.clone();
        }
        if overrides.revocation_endpoint.is_some() {
            self.revocation_endpoint = overrides.revocation_endpoint.clone();
        }
        self
    }
}

/// Resolve provider metadata, fetching the discovery document only when the
/// configured overrides don't already name the required endpoints.
pub async fn resolve(client: &reqwest::Client, settings: &OidcSettings) -> Result<ProviderMetadata> {
    let overrides = &settings.endpoints;
    if let (Some(authorization_endpoint), Some(token_endpoint)) = (
        &overrides.authorization_endpoint,
        &overrides.token_endpoint,
    ) {
        return Ok(ProviderMetadata {
            issuer: settings.authority.clone(),
            authorization_endpoint: authorization_endpoint.clone(),
            token_endpoint: token_endpoint.clone(),
            end_session_endpoint: overrides.end_session_endpoint.clone(),
            revocation_endpoint: overrides.revocation_endpoint.clone(),
        });
    }

    let url = format!("{}{DISCOVERY_PATH}", settings.authority.trim_end_matches('/'));
    let response = client
        .get(&url)
        .timeout(settings.request_timeout)
        .send()
        .await
        .map_err(|e| Error::Discovery(format!("fetching {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Discovery(format!("{url} returned {status}")));
    }

    let metadata = response
        .json::<ProviderMetadata>()
        .await
        .map_err(|e| Error::Discovery(format!("invalid discovery document: {e}")))?
        .apply_overrides(settings);

    info!(
        issuer = %metadata.issuer,
        end_session = metadata.end_session_endpoint.is_some(),
        revocation = metadata.revocation_endpoint.is_some(),
        "resolved identity provider metadata"
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::EndpointOverrides;
    use tokio::net::TcpListener;

    async fn start_discovery_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base = format!("http://{addr}");
        let issuer = base.clone();

        tokio::spawn(async move {
            let app = axum::Router::new().route(
                "/.well-known/openid-configuration",
                axum::routing::get(move || {
                    let issuer = issuer.clone();
                    async move {
                        axum::Json(serde_json::json!({
                            "issuer": issuer,
                            "authorization_endpoint": format!("{issuer}/oauth/v2/authorize"),
                            "token_endpoint": format!("{issuer}/oauth/v2/token"),
                            "end_session_endpoint": format!("{issuer}/oidc/v1/end_session"),
                            "jwks_uri": format!("{issuer}/oauth/v2/keys"),
                        }))
                    }
                }),
            );
            axum::serve(listener, app).await.unwrap();
        });

        base
    }

    #[tokio::test]
    async fn discovers_endpoints() {
        let base = start_discovery_server().await;
        let settings = OidcSettings::new(format!("{base}/"), "c", "http://localhost/cb");

        let metadata = resolve(&reqwest::Client::new(), &settings).await.unwrap();
        assert_eq!(metadata.issuer, base);
        assert_eq!(metadata.token_endpoint, format!("{base}/oauth/v2/token"));
        assert_eq!(
            metadata.end_session_endpoint,
            Some(format!("{base}/oidc/v1/end_session"))
        );
        assert!(metadata.revocation_endpoint.is_none());
    }

    #[tokio::test]
    async fn explicit_endpoint_overrides_discovered_one() {
        let base = start_discovery_server().await;
        let mut settings = OidcSettings::new(&base, "c", "http://localhost/cb");
        settings.endpoints.revocation_endpoint = Some("https://idp.example.com/revoke".into());

        let metadata = resolve(&reqwest::Client::new(), &settings).await.unwrap();
        assert_eq!(
            metadata.revocation_endpoint.as_deref(),
            Some("https://idp.example.com/revoke")
        );
        assert_eq!(metadata.authorization_endpoint, format!("{base}/oauth/v2/authorize"));
    }

    #[tokio::test]
    async fn full_overrides_skip_network() {
        let mut settings = OidcSettings::new("http://127.0.0.1:1", "c", "http://localhost/cb");
        settings.endpoints = EndpointOverrides {
            authorization_endpoint: Some("http://127.0.0.1:1/authorize".into()),
            token_endpoint: Some("http://127.0.0.1:1/token".into()),
            end_session_endpoint: None,
            revocation_endpoint: None,
        };
        assert!(settings.endpoints.skips_discovery());

        let metadata = resolve(&reqwest::Client::new(), &settings).await.unwrap();
        assert_eq!(metadata.token_endpoint, "http://127.0.0.1:1/token");
    }

    #[tokio::test]
    async fn unreachable_authority_is_discovery_error() {
        let settings = OidcSettings::new("http://127.0.0.1:1", "c", "http://localhost/cb");
        let result = resolve(&reqwest::Client::new(), &settings).await;
        assert!(matches!(result, Err(Error::Discovery(_))));
    }
}
