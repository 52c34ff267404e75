//! Token endpoint interactions
//!
//! Three calls, all form-encoded POSTs:
//! 1. Authorization code exchange (completes an interactive login)
//! 2. Refresh token grant (silent renewal)
//! 3. Refresh token revocation (RFC 7009, best effort on logout)

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::settings::OidcSettings;

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds; `SessionRecord::from_token_response`
/// turns it into an absolute timestamp.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Absent on refresh when the IdP does not rotate refresh tokens
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// RFC 6749 section 5.2 error body.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    token_endpoint: &str,
    settings: &OidcSettings,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("code_verifier", verifier),
        ("client_id", settings.client_id.as_str()),
        ("redirect_uri", settings.redirect_uri.as_str()),
    ];
    if let Some(secret) = &settings.client_secret {
        form.push(("client_secret", secret.expose().as_str()));
    }

    let response = client
        .post(token_endpoint)
        .timeout(settings.request_timeout)
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Obtain a fresh access token with a refresh token.
///
/// `invalid_grant` (or a 401) means the refresh token is dead and maps to
/// `Error::InvalidGrant`; anything else is `TokenExchange`.
pub async fn refresh_token(
    client: &reqwest::Client,
    token_endpoint: &str,
    settings: &OidcSettings,
    refresh: &str,
) -> Result<TokenResponse> {
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", settings.client_id.as_str()),
        ("scope", settings.scopes.as_str()),
    ];
    if let Some(secret) = &settings.client_secret {
        form.push(("client_secret", secret.expose().as_str()));
    }

    let response = client
        .post(token_endpoint)
        .timeout(settings.request_timeout)
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(classify_refresh_failure(status.as_u16(), &body));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

/// Revoke a refresh token at the revocation endpoint.
pub async fn revoke_token(
    client: &reqwest::Client,
    revocation_endpoint: &str,
    settings: &OidcSettings,
    token: &str,
) -> Result<()> {
    let mut form = vec![
        ("token", token),
        ("token_type_hint", "refresh_token"),
        ("client_id", settings.client_id.as_str()),
    ];
    if let Some(secret) = &settings.client_secret {
        form.push(("client_secret", secret.expose().as_str()));
    }

    let response = client
        .post(revocation_endpoint)
        .timeout(settings.request_timeout)
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Revocation(format!("request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Revocation(format!(
            "revocation endpoint returned {status}"
        )));
    }
    debug!("refresh token revoked");
    Ok(())
}

fn classify_refresh_failure(status: u16, body: &str) -> Error {
    let parsed = serde_json::from_str::<OAuthErrorBody>(body).ok();
    let invalid_grant = parsed
        .as_ref()
        .is_some_and(|e| e.error == "invalid_grant");

    if invalid_grant || status == 401 {
        let detail = parsed
            .and_then(|e| e.error_description)
            .unwrap_or_else(|| body.to_string());
        return Error::InvalidGrant(format!("{status}: {detail}"));
    }

    Error::TokenExchange(format!("token refresh returned {status}: {body}"))
}
