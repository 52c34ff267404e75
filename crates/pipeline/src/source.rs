//! Where the pipeline gets its bearer token

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use session::SessionManager;

/// Supplies access tokens to the pipeline.
///
/// `get_credential` may renew silently; `force_refresh` renews even if the
/// cached token looks valid. Neither may start an interactive login.
pub trait CredentialSource: Send + Sync {
    fn get_credential(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>>;

    fn force_refresh(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>>;
}

impl CredentialSource for SessionManager {
    fn get_credential(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(SessionManager::get_credential(self))
    }

    fn force_refresh(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(SessionManager::force_refresh(self))
    }
}
