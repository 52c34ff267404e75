//! Error types for session operations
//!
//! Routine expiry is not an error: `get_credential` and `force_refresh`
//! resolve failed renewals to `None`. Only the variants below leave the
//! session manager.

/// Errors surfaced by the session manager.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no credential available")]
    NoCredential,

    #[error("silent renewal failed: {0}")]
    RenewalFailed(String),

    #[error("login callback failed: {0}")]
    CallbackFailed(String),

    #[error("could not start login: {0}")]
    Login(String),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
