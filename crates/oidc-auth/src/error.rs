//! Error types for identity provider and credential store operations

/// Errors from OIDC protocol exchanges and credential storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("provider discovery failed: {0}")]
    Discovery(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// The IdP rejected the refresh token (revoked, rotated away, or the
    /// user's IdP session ended).
    #[error("refresh token rejected: {0}")]
    InvalidGrant(String),

    #[error("session has no refresh token")]
    NoRefreshToken,

    #[error("login callback rejected: {0}")]
    Callback(String),

    #[error("token revocation failed: {0}")]
    Revocation(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
