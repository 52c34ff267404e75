//! OIDC client defaults
//!
//! Values mirror the public-client settings the gateway ships with. None of
//! these are secrets; tokens live in the credential store.

use std::time::Duration;

/// Scopes requested when the config does not override them.
/// `offline_access` is what makes the IdP issue a refresh token, which is the
/// only silent renewal mechanism this client supports.
pub const DEFAULT_SCOPES: &str = "openid profile email offline_access";

/// Path appended to the authority for OpenID Provider discovery.
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// How long a login started with `login()` may take before its PKCE state
/// is discarded and the callback is rejected.
pub const PENDING_LOGIN_TTL: Duration = Duration::from_secs(600);

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 300;

/// Timeout for individual requests to the identity provider.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
