//! Session manager: the single owner of the current session record
//!
//! Callers ask for a credential and get a token or nothing. An expired or
//! absent record triggers one silent renewal; concurrent callers attach to
//! the renewal already in flight instead of starting their own. Renewal
//! failures clear the session and resolve to `None`, they never start an
//! interactive login.
//!
//! State transitions:
//! - NoSession → Valid (login callback)
//! - Valid → Expired (time passes)
//! - Expired → Renewing → Valid | NoSession
//! - any → NoSession (logout, reset, provider sign-out)

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use common::Secret;
use futures_util::FutureExt;
use futures_util::future::Shared;
use oidc_auth::{CallbackParams, CredentialStore, IdentityProvider, ProviderEvent, Redirect, SessionRecord};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Session policy knobs.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Upper bound on a single silent renewal.
    pub silent_renew_timeout: Duration,
    /// Run the background task that renews ahead of expiry.
    pub automatic_silent_renew: bool,
    /// How close to expiry the background task renews.
    pub renew_before_expiry: Duration,
    /// How often the background task checks.
    pub check_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            silent_renew_timeout: Duration::from_secs(10),
            automatic_silent_renew: true,
            renew_before_expiry: Duration::from_secs(300),
            check_interval: Duration::from_secs(30),
        }
    }
}

/// Observable session state. Never carries the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    NoSession,
    Valid { expires_at: u64 },
    Expired,
    Renewing,
}

impl SessionStatus {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::NoSession => "no_session",
            SessionStatus::Valid { .. } => "valid",
            SessionStatus::Expired => "expired",
            SessionStatus::Renewing => "renewing",
        }
    }

    fn of(record: Option<&SessionRecord>) -> Self {
        match record {
            None => SessionStatus::NoSession,
            Some(r) if r.is_expired() => SessionStatus::Expired,
            Some(r) => SessionStatus::Valid {
                expires_at: r.expires_at,
            },
        }
    }
}

/// Result of `SessionManager::logout`. The local session is gone either way.
#[derive(Debug, Clone, Default)]
pub struct LogoutOutcome {
    /// End-session redirect from the provider, if any
    pub redirect: Option<Redirect>,
    /// Why the provider sign-out failed, if it did
    pub remote_error: Option<String>,
}

/// Output of one renewal flight, shared by every caller attached to it.
type RenewalResult = std::result::Result<SessionRecord, String>;
type RenewalFuture = Shared<Pin<Box<dyn Future<Output = RenewalResult> + Send>>>;

struct InFlight {
    id: u64,
    renewal: RenewalFuture,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RenewMode {
    /// Skip the provider if someone else already left a valid record
    IfExpired,
    /// The current record was rejected upstream; renew regardless
    Always,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    store: CredentialStore,
    settings: SessionSettings,
    in_flight: Mutex<Option<InFlight>>,
    next_flight: AtomicU64,
    status: watch::Sender<SessionStatus>,
    events: StdMutex<Option<broadcast::Receiver<ProviderEvent>>>,
}

impl Inner {
    fn publish(&self, status: SessionStatus) {
        self.status.send_replace(status);
    }

    async fn publish_current(&self) {
        let record = self.store.get().await;
        self.publish(SessionStatus::of(record.as_ref()));
    }

    async fn clear_store(&self) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to remove persisted session");
        }
        self.publish(SessionStatus::NoSession);
    }
}

/// Cheaply cloneable handle to the process-wide session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager over `store`, which may already hold a record from a
    /// previous run.
    ///
    /// Subscribes to provider events immediately so nothing emitted before
    /// `spawn_event_listener` runs is lost.
    pub async fn new(
        provider: Arc<dyn IdentityProvider>,
        store: CredentialStore,
        settings: SessionSettings,
    ) -> Self {
        let events = provider.subscribe();
        let initial = SessionStatus::of(store.get().await.as_ref());
        info!(
            provider = provider.id(),
            status = initial.label(),
            persistent = store.is_persistent(),
            "session manager initialized"
        );
        let (status, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                provider,
                store,
                settings,
                in_flight: Mutex::new(None),
                next_flight: AtomicU64::new(0),
                status,
                events: StdMutex::new(Some(events)),
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// A valid access token, renewing silently if the record is expired or
    /// absent. `None` means the caller is unauthenticated.
    pub async fn get_credential(&self) -> Option<Secret<String>> {
        if let Some(token) = self.current_credential().await {
            return Some(token);
        }
        self.renew(RenewMode::IfExpired)
            .await
            .ok()
            .map(|record| record.access_token)
    }

    /// Like `get_credential`, but absence is an error.
    pub async fn require_credential(&self) -> Result<Secret<String>> {
        self.get_credential().await.ok_or(Error::NoCredential)
    }

    /// Renew even if the cached record looks valid. Used after the upstream
    /// rejected the current token.
    pub async fn force_refresh(&self) -> Option<Secret<String>> {
        self.renew(RenewMode::Always)
            .await
            .ok()
            .map(|record| record.access_token)
    }

    /// The cached token if it is still valid. Never renews.
    pub async fn current_credential(&self) -> Option<Secret<String>> {
        self.inner
            .store
            .get()
            .await
            .filter(|record| !record.is_expired())
            .map(|record| record.access_token)
    }

    /// Renew ahead of expiry if the record expires within `threshold`.
    ///
    /// Returns whether a renewal ran. Records without a refresh token and an
    /// absent session are left alone; those need an interactive login.
    pub async fn renew_if_expiring(&self, threshold: Duration) -> Result<bool> {
        let Some(record) = self.inner.store.get().await else {
            return Ok(false);
        };
        if !record.refresh_capable() || !record.expires_within(threshold) {
            return Ok(false);
        }
        debug!(
            remaining_ms = record.remaining_millis(),
            "session expiring within threshold, renewing"
        );
        self.renew(RenewMode::Always)
            .await
            .map(|_| true)
            .map_err(Error::RenewalFailed)
    }

    /// Start an interactive login.
    pub async fn login(&self) -> Result<Redirect> {
        self.login_with_prompt(None).await
    }

    /// Start an interactive login, forwarding `prompt` (e.g. `none`) to the
    /// provider.
    pub async fn login_with_prompt(&self, prompt: Option<&str>) -> Result<Redirect> {
        let redirect = self
            .inner
            .provider
            .login(prompt)
            .await
            .map_err(|e| Error::Login(e.to_string()))?;
        info!(provider = self.inner.provider.id(), "interactive login started");
        Ok(redirect)
    }

    /// Finish the login handshake and install the resulting record.
    pub async fn handle_callback(&self, params: &CallbackParams) -> Result<SessionStatus> {
        let record = self
            .inner
            .provider
            .complete_callback(params)
            .await
            .map_err(|e| {
                warn!(error = %e, "login callback failed");
                Error::CallbackFailed(e.to_string())
            })?;

        if record.is_expired() {
            warn!("login callback produced an already expired session");
            return Err(Error::CallbackFailed(
                "identity provider issued an expired token".into(),
            ));
        }

        if let Err(e) = self.inner.store.replace(record.clone()).await {
            warn!(error = %e, "failed to persist session after login");
        }
        let status = SessionStatus::of(Some(&record));
        self.inner.publish(status.clone());
        info!(expires_at = record.expires_at, "login completed");
        Ok(status)
    }

    /// Clear the local session, then sign out at the provider.
    ///
    /// A provider failure is logged and reported in the outcome; the local
    /// session is absent afterwards regardless.
    pub async fn logout(&self) -> LogoutOutcome {
        let previous = self.inner.store.get().await;
        self.inner.clear_store().await;
        self.sign_out_remote(previous.as_ref()).await
    }

    async fn sign_out_remote(&self, previous: Option<&SessionRecord>) -> LogoutOutcome {
        match self.inner.provider.logout(previous).await {
            Ok(redirect) => {
                info!(end_session = redirect.is_some(), "signed out");
                LogoutOutcome {
                    redirect,
                    remote_error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "provider sign-out failed, local session cleared");
                LogoutOutcome {
                    redirect: None,
                    remote_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Drop the local session unconditionally and start a fresh login.
    pub async fn reset_and_reauthenticate(&self) -> Result<Redirect> {
        info!("resetting session");
        self.inner.clear_store().await;
        self.login().await
    }

    /// React to a notification raised by the provider.
    ///
    /// An event that names a session only touches that session; a record
    /// installed after it (a login that finished meanwhile) is kept.
    pub async fn handle_provider_event(&self, event: &ProviderEvent) {
        match event {
            ProviderEvent::SilentRenewError { reason, session } => {
                if self.clear_matching(session.as_ref()).await {
                    warn!(error = %reason, "provider reported silent renewal failure, session cleared");
                } else {
                    debug!(error = %reason, "renewal failure concerns a replaced session, ignoring");
                }
            }
            ProviderEvent::UserSignedOut { session: None } => {
                info!("provider reported user signed out");
                let outcome = self.logout().await;
                if let Some(e) = outcome.remote_error {
                    debug!(error = %e, "sign-out after provider event did not complete remotely");
                }
            }
            ProviderEvent::UserSignedOut {
                session: Some(record),
            } => {
                let current = self.inner.store.get().await;
                if current.as_ref().is_some_and(|c| c != record) {
                    info!("provider sign-out concerns a replaced session, keeping current session");
                    return;
                }
                info!("provider reported user signed out");
                self.clear_matching(Some(record)).await;
                // The record may already be gone from the store; the event's
                // copy still carries the id token hint
                let outcome = self.sign_out_remote(Some(record)).await;
                if let Some(e) = outcome.remote_error {
                    debug!(error = %e, "sign-out after provider event did not complete remotely");
                }
            }
        }
    }

    /// Clear the store if it still holds `expected`. Returns whether it did.
    async fn clear_matching(&self, expected: Option<&SessionRecord>) -> bool {
        let cleared = match self.inner.store.clear_if(expected).await {
            Ok(cleared) => cleared,
            Err(e) => {
                warn!(error = %e, "failed to remove persisted session");
                true
            }
        };
        if cleared {
            self.inner.publish(SessionStatus::NoSession);
        }
        cleared
    }

    /// Current session state, computed from the store.
    pub async fn status(&self) -> SessionStatus {
        if self.inner.in_flight.lock().await.is_some() {
            return SessionStatus::Renewing;
        }
        SessionStatus::of(self.inner.store.get().await.as_ref())
    }

    /// Watch published session state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub(crate) fn take_event_receiver(&self) -> broadcast::Receiver<ProviderEvent> {
        let taken = match self.inner.events.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        taken.unwrap_or_else(|| self.inner.provider.subscribe())
    }

    /// Run, or attach to, the single renewal flight.
    async fn renew(&self, mode: RenewMode) -> RenewalResult {
        let renewal = {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                Some(flight) => {
                    debug!(flight = flight.id, "attaching to in-flight renewal");
                    flight.renewal.clone()
                }
                None => {
                    // A flight may have finished between our expiry check and
                    // taking the slot
                    if mode == RenewMode::IfExpired
                        && let Some(record) = self.inner.store.get().await
                        && !record.is_expired()
                    {
                        return Ok(record);
                    }
                    let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    let renewal = start_renewal(self.inner.clone(), id);
                    *slot = Some(InFlight {
                        id,
                        renewal: renewal.clone(),
                    });
                    self.inner.publish(SessionStatus::Renewing);
                    renewal
                }
            }
        };
        renewal.await
    }
}

/// Spawn one renewal flight and return the handle callers share.
///
/// The flight runs on its own task, so its timeout and the release of the
/// in-flight slot happen even if every caller has gone away.
fn start_renewal(inner: Arc<Inner>, id: u64) -> RenewalFuture {
    let task = tokio::spawn(run_renewal(inner, id));
    async move {
        task.await
            .unwrap_or_else(|e| Err(format!("renewal task failed: {e}")))
    }
    .boxed()
    .shared()
}

async fn run_renewal(inner: Arc<Inner>, id: u64) -> RenewalResult {
    let current = inner.store.get().await;
    let timeout = inner.settings.silent_renew_timeout;
    debug!(flight = id, has_session = current.is_some(), "starting silent renewal");

    let attempt =
        tokio::time::timeout(timeout, inner.provider.silent_renew(current.as_ref())).await;
    let outcome = match attempt {
        Ok(Ok(record)) if !record.is_expired() => Ok(record),
        Ok(Ok(_)) => Err(("expired", "renewal returned an expired token".to_string())),
        Ok(Err(e)) => Err(("failure", e.to_string())),
        Err(_) => Err((
            "timeout",
            format!("renewal timed out after {}ms", timeout.as_millis()),
        )),
    };

    let result = match outcome {
        Ok(record) => {
            if let Err(e) = inner.store.replace(record.clone()).await {
                warn!(error = %e, "failed to persist renewed session");
            }
            metrics::counter!("session_renewals_total", "outcome" => "success").increment(1);
            info!(flight = id, expires_at = record.expires_at, "silent renewal succeeded");
            Ok(record)
        }
        Err((label, reason)) => {
            metrics::counter!("session_renewals_total", "outcome" => label).increment(1);
            warn!(flight = id, error = %reason, "silent renewal failed, clearing session");
            // Only the record this flight started from; a login that
            // landed meanwhile stays
            if let Err(e) = inner.store.clear_if(current.as_ref()).await {
                warn!(error = %e, "failed to remove persisted session");
            }
            Err(reason)
        }
    };

    {
        let mut slot = inner.in_flight.lock().await;
        if slot.as_ref().is_some_and(|flight| flight.id == id) {
            *slot = None;
        }
    }
    inner.publish_current().await;
    result
}
