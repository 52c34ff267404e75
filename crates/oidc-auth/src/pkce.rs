//! PKCE (Proof Key for Code Exchange) per RFC 7636, plus the authorization URL
//!
//! The verifier stays with the client until the callback; only its S256
//! challenge travels in the authorization URL.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Error, Result};
use crate::settings::OidcSettings;

/// Generate a random PKCE code verifier.
///
/// 64 random bytes encode to 86 URL-safe characters, inside the 43-128
/// character range RFC 7636 allows.
pub fn generate_verifier() -> String {
    random_token::<64>()
}

/// Generate an opaque `state` value for CSRF protection.
pub fn generate_state() -> String {
    random_token::<32>()
}

fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the authorization URL for an authorization-code + PKCE login.
///
/// `prompt` is passed through when set (`none` asks the IdP to authenticate
/// without user interaction if it still has a session).
pub fn build_authorization_url(
    authorization_endpoint: &str,
    settings: &OidcSettings,
    state: &str,
    challenge: &str,
    prompt: Option<&str>,
) -> Result<String> {
    let mut url = Url::parse(authorization_endpoint)
        .map_err(|e| Error::InvalidUrl(format!("{authorization_endpoint}: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &settings.client_id)
            .append_pair("redirect_uri", &settings.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &settings.scopes)
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", state);
        if let Some(prompt) = prompt {
            query.append_pair("prompt", prompt);
        }
    }
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_url_safe_and_within_rfc_length() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 86);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier must be URL-safe base64 (no padding): {verifier}"
        );
    }

    #[test]
    fn verifiers_and_states_are_unique() {
        assert_ne!(generate_verifier(), generate_verifier());
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") base64url-encoded
        let challenge = compute_challenge("hello");
        assert_eq!(challenge, "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ");
    }

    #[test]
    fn authorization_url_contains_required_params() {
        let settings = OidcSettings::new(
            "https://idp.example.com",
            "client-123",
            "http://localhost:8080/auth/callback",
        );
        let challenge = compute_challenge("test-verifier");
        let url = build_authorization_url(
            "https://idp.example.com/oauth/v2/authorize",
            &settings,
            "state-abc",
            &challenge,
            None,
        )
        .unwrap();

        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path(), "/oauth/v2/authorize");
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["redirect_uri"], "http://localhost:8080/auth/callback");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "openid profile email offline_access");
        assert_eq!(pairs["code_challenge"], challenge);
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["state"], "state-abc");
        assert!(!pairs.contains_key("prompt"));
    }

    #[test]
    fn authorization_url_carries_prompt() {
        let settings = OidcSettings::new("https://idp.example.com", "c", "http://localhost/cb");
        let url = build_authorization_url(
            "https://idp.example.com/authorize",
            &settings,
            "s",
            "c",
            Some("none"),
        )
        .unwrap();
        assert!(url.contains("prompt=none"), "got: {url}");
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let settings = OidcSettings::new("https://idp.example.com", "c", "http://localhost/cb");
        let result = build_authorization_url("not a url", &settings, "s", "c", None);
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
