//! Identity provider abstraction
//!
//! The session manager treats the identity provider as an opaque capability:
//! start an interactive login, renew silently, sign out, finish a callback.
//! Notifications the provider raises on its own (renewal failures, the user's
//! IdP session ending) arrive on a broadcast channel.
//!
//! Uses `Pin<Box<dyn Future>>` return types so the manager can hold an
//! `Arc<dyn IdentityProvider>`.

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::record::SessionRecord;

/// Where the user agent must be sent next.
///
/// Interactive login and sign-out are navigations, not calls that return a
/// session. The caller that owns the user agent performs the redirect; the
/// login resumes through `complete_callback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
}

impl Redirect {
    pub fn to(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

/// Query parameters the IdP appends to the redirect URI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Notifications raised by the provider outside of a direct call.
///
/// `session` is the record the notification is about, when the provider
/// knows it. Consumers must not apply it to a record that has since been
/// replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// A silent renewal failed.
    SilentRenewError {
        reason: String,
        session: Option<SessionRecord>,
    },
    /// The user's session at the IdP is gone. `None` means every session.
    UserSignedOut { session: Option<SessionRecord> },
}

pub trait IdentityProvider: Send + Sync {
    /// Identifier for logging (e.g. "oidc")
    fn id(&self) -> &str;

    /// Begin an interactive login. `prompt` is forwarded to the IdP.
    fn login<'a>(
        &'a self,
        prompt: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Redirect>> + Send + 'a>>;

    /// Obtain a fresh record without user interaction, using whatever refresh
    /// capability `current` carries.
    fn silent_renew<'a>(
        &'a self,
        current: Option<&'a SessionRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<SessionRecord>> + Send + 'a>>;

    /// Sign out at the IdP. Returns the end-session redirect, if the provider
    /// has one.
    fn logout<'a>(
        &'a self,
        current: Option<&'a SessionRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Redirect>>> + Send + 'a>>;

    /// Finish the interactive login handshake.
    fn complete_callback<'a>(
        &'a self,
        params: &'a CallbackParams,
    ) -> Pin<Box<dyn Future<Output = Result<SessionRecord>> + Send + 'a>>;

    /// Subscribe to provider notifications.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}
