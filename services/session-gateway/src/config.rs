//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The OIDC client secret is loaded from OIDC_CLIENT_SECRET or
//! client_secret_file, never stored in the TOML directly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use oidc_auth::{EndpointOverrides, OidcSettings};
use serde::Deserialize;
use session::SessionSettings;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub oidc: OidcConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Listener and upstream settings
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Identity provider registration
#[derive(Debug, Deserialize)]
pub struct OidcConfig {
    pub authority: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,
    #[serde(default = "default_scopes")]
    pub scopes: String,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to OIDC_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
}

/// Session lifetime policy
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Where the session record is persisted. In memory only when unset.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default = "default_silent_renew_timeout")]
    pub silent_renew_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub automatic_silent_renew: bool,
    #[serde(default = "default_renew_before_expiry")]
    pub renew_before_expiry_secs: u64,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            silent_renew_timeout_secs: default_silent_renew_timeout(),
            automatic_silent_renew: true,
            renew_before_expiry_secs: default_renew_before_expiry(),
            check_interval_secs: default_check_interval(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_scopes() -> String {
    oidc_auth::DEFAULT_SCOPES.to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_silent_renew_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_renew_before_expiry() -> u64 {
    300
}

fn default_check_interval() -> u64 {
    30
}

fn require_http_url(field: &'static str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::InvalidField {
            field,
            reason: format!("must start with http:// or https://, got: {value}"),
        })
    }
}

fn require_nonzero(field: &'static str, value: u64) -> common::Result<()> {
    if value == 0 {
        return Err(common::Error::InvalidField {
            field,
            reason: "must be greater than 0".into(),
        });
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. OIDC_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(secret) = std::env::var("OIDC_CLIENT_SECRET") {
            config.oidc.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.oidc.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.oidc.client_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        require_http_url("upstream_url", &self.gateway.upstream_url)?;
        require_http_url("authority", &self.oidc.authority)?;
        require_http_url("redirect_uri", &self.oidc.redirect_uri)?;
        if let Some(uri) = &self.oidc.post_logout_redirect_uri {
            require_http_url("post_logout_redirect_uri", uri)?;
        }
        for (field, endpoint) in [
            ("authorization_endpoint", &self.oidc.authorization_endpoint),
            ("token_endpoint", &self.oidc.token_endpoint),
            ("end_session_endpoint", &self.oidc.end_session_endpoint),
            ("revocation_endpoint", &self.oidc.revocation_endpoint),
        ] {
            if let Some(endpoint) = endpoint {
                require_http_url(field, endpoint)?;
            }
        }

        if self.oidc.client_id.trim().is_empty() {
            return Err(common::Error::InvalidField {
                field: "client_id",
                reason: "must not be empty".into(),
            });
        }

        require_nonzero("timeout_secs", self.gateway.timeout_secs)?;
        require_nonzero("max_connections", self.gateway.max_connections as u64)?;
        require_nonzero("request_timeout_secs", self.oidc.request_timeout_secs)?;
        require_nonzero(
            "silent_renew_timeout_secs",
            self.session.silent_renew_timeout_secs,
        )?;
        if self.session.automatic_silent_renew {
            require_nonzero("check_interval_secs", self.session.check_interval_secs)?;
        }
        Ok(())
    }

    /// Typed settings for the identity provider client.
    pub fn oidc_settings(&self) -> OidcSettings {
        let oidc = &self.oidc;
        let mut settings =
            OidcSettings::new(&oidc.authority, &oidc.client_id, &oidc.redirect_uri);
        settings.client_secret = oidc.client_secret.clone();
        settings.post_logout_redirect_uri = oidc.post_logout_redirect_uri.clone();
        settings.scopes = oidc.scopes.clone();
        settings.endpoints = EndpointOverrides {
            authorization_endpoint: oidc.authorization_endpoint.clone(),
            token_endpoint: oidc.token_endpoint.clone(),
            end_session_endpoint: oidc.end_session_endpoint.clone(),
            revocation_endpoint: oidc.revocation_endpoint.clone(),
        };
        settings.request_timeout = Duration::from_secs(oidc.request_timeout_secs);
        settings
    }

    /// Typed session policy.
    pub fn session_settings(&self) -> SessionSettings {
        let session = &self.session;
        SessionSettings {
            silent_renew_timeout: Duration::from_secs(session.silent_renew_timeout_secs),
            automatic_silent_renew: session.automatic_silent_renew,
            renew_before_expiry: Duration::from_secs(session.renew_before_expiry_secs),
            check_interval: Duration::from_secs(session.check_interval_secs),
        }
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("session-gateway.toml")
    }
}
