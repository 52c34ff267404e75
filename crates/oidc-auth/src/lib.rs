//! OIDC session credentials and identity provider client
//!
//! Provides the pieces the session manager builds on: the `SessionRecord`
//! credential, the single-record `CredentialStore`, the `IdentityProvider`
//! capability trait, and `OidcClient`, its authorization-code + PKCE
//! implementation. This crate holds no session policy of its own.
//!
//! Login flow:
//! 1. `IdentityProvider::login()` generates PKCE + state, returns the authorize redirect
//! 2. The IdP redirects back; `complete_callback()` exchanges the code
//! 3. The resulting `SessionRecord` goes into `CredentialStore::replace()`
//! 4. `silent_renew()` uses the record's refresh token for the next record

pub mod client;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod pkce;
pub mod record;
pub mod settings;
pub mod store;
pub mod token;

pub use client::OidcClient;
pub use constants::*;
pub use discovery::ProviderMetadata;
pub use error::{Error, Result};
pub use identity::{CallbackParams, IdentityProvider, ProviderEvent, Redirect};
pub use record::{SessionRecord, now_millis};
pub use settings::{EndpointOverrides, OidcSettings};
pub use store::CredentialStore;
pub use token::TokenResponse;
