//! The possessed credential
//!
//! A `SessionRecord` is created by a completed login or a silent renewal and
//! is always replaced as a whole. There are no setters: renewing builds a new
//! record from the token response.

use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_EXPIRES_IN_SECS;
use crate::token::TokenResponse;

/// A bearer credential with its absolute expiry.
///
/// `expires_at` is a unix timestamp in milliseconds, computed when the record
/// is built from the token endpoint's `expires_in` delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub access_token: Secret<String>,
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<Secret<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl SessionRecord {
    /// Record without refresh capability.
    pub fn new(access_token: impl Into<Secret<String>>, expires_at: u64) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
            refresh_token: None,
            id_token: None,
            scope: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<Secret<String>>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_id_token(mut self, id_token: impl Into<Secret<String>>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    /// Build a record from a token endpoint response received at `now_millis`.
    ///
    /// A missing `expires_in` falls back to `DEFAULT_EXPIRES_IN_SECS` so every
    /// record has a finite lifetime.
    pub fn from_token_response(response: TokenResponse, now_millis: u64) -> Self {
        let lifetime_secs = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Self {
            access_token: Secret::new(response.access_token),
            expires_at: now_millis.saturating_add(lifetime_secs.saturating_mul(1000)),
            refresh_token: response.refresh_token.map(Secret::new),
            id_token: response.id_token.map(Secret::new),
            scope: response.scope,
        }
    }

    /// Whether a silent renewal can be attempted with this record.
    pub fn refresh_capable(&self) -> bool {
        self.refresh_token.is_some()
    }

    pub fn is_expired_at(&self, now_millis: u64) -> bool {
        self.expires_at <= now_millis
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// True when the record is expired or will be within `window`.
    pub fn expires_within(&self, window: Duration) -> bool {
        let window_millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self.expires_at <= now_millis().saturating_add(window_millis)
    }

    /// Milliseconds until expiry, zero once expired.
    pub fn remaining_millis(&self) -> u64 {
        self.expires_at.saturating_sub(now_millis())
    }
}

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_response(expires_in: Option<u64>, refresh: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: "at_fresh".into(),
            token_type: Some("Bearer".into()),
            expires_in,
            refresh_token: refresh.map(String::from),
            id_token: Some("idt".into()),
            scope: Some("openid offline_access".into()),
        }
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let record = SessionRecord::new("at", 1_000);
        assert!(!record.is_expired_at(999));
        assert!(record.is_expired_at(1_000), "expires_at == now counts as expired");
        assert!(record.is_expired_at(1_001));
    }

    #[test]
    fn from_token_response_computes_absolute_expiry() {
        let record = SessionRecord::from_token_response(token_response(Some(3600), Some("rt")), 10_000);
        assert_eq!(record.expires_at, 10_000 + 3_600_000);
        assert_eq!(record.access_token.expose(), "at_fresh");
        assert!(record.refresh_capable());
        assert_eq!(record.scope.as_deref(), Some("openid offline_access"));
    }

    #[test]
    fn missing_expires_in_uses_default_lifetime() {
        let record = SessionRecord::from_token_response(token_response(None, None), 0);
        assert_eq!(record.expires_at, DEFAULT_EXPIRES_IN_SECS * 1000);
        assert!(!record.refresh_capable());
    }

    #[test]
    fn expires_within_window() {
        let record = SessionRecord::new("at", now_millis() + 60_000);
        assert!(record.expires_within(Duration::from_secs(300)));
        assert!(!record.expires_within(Duration::from_secs(10)));
        assert!(!record.is_expired());
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let record = SessionRecord::new("at_secret_value", 0).with_refresh_token("rt_secret_value");
        let debug = format!("{record:?}");
        assert!(!debug.contains("at_secret_value"));
        assert!(!debug.contains("rt_secret_value"));
        assert!(debug.contains("expires_at"));
    }
}
