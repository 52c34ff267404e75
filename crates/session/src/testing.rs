//! Scriptable identity provider for session tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use oidc_auth::{
    CallbackParams, Error as AuthError, IdentityProvider, ProviderEvent, Redirect, SessionRecord,
    now_millis,
};
use tokio::sync::broadcast;

/// What the next `silent_renew` calls do.
#[derive(Clone)]
pub enum Renewal {
    /// Return a record with this token, expiring `lifetime` from now
    Succeed { token: String, lifetime: Duration },
    /// Return a record that is already expired
    Stale,
    /// Reject the refresh token, emitting the same events as `OidcClient`
    Fail,
    /// Never resolve
    Hang,
}

pub struct MockProvider {
    renewal: Mutex<Renewal>,
    renew_delay: Duration,
    logout_fails: AtomicBool,
    pub renewals: AtomicUsize,
    pub logins: AtomicUsize,
    pub logouts: AtomicUsize,
    pub callbacks: AtomicUsize,
    /// Record passed to the most recent `logout`
    pub last_logout: Mutex<Option<SessionRecord>>,
    events: broadcast::Sender<ProviderEvent>,
}

impl MockProvider {
    pub fn new(renewal: Renewal) -> Self {
        let (events, _) = broadcast::channel(8);
        Self {
            renewal: Mutex::new(renewal),
            renew_delay: Duration::ZERO,
            logout_fails: AtomicBool::new(false),
            renewals: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            callbacks: AtomicUsize::new(0),
            last_logout: Mutex::new(None),
            events,
        }
    }

    pub fn renewing_to(token: &str) -> Self {
        Self::new(Renewal::Succeed {
            token: token.into(),
            lifetime: Duration::from_secs(3600),
        })
    }

    pub fn with_renew_delay(mut self, delay: Duration) -> Self {
        self.renew_delay = delay;
        self
    }

    pub fn failing_logout(self) -> Self {
        self.logout_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_renewal(&self, renewal: Renewal) {
        *self.renewal.lock().unwrap() = renewal;
    }

    pub fn emit(&self, event: ProviderEvent) {
        self.events.send(event).unwrap();
    }

    pub fn renewal_count(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for MockProvider {
    fn id(&self) -> &str {
        "mock"
    }

    fn login<'a>(
        &'a self,
        prompt: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<Redirect>> + Send + 'a>> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        let location = match prompt {
            Some(p) => format!("https://idp.test/authorize?prompt={p}"),
            None => "https://idp.test/authorize".to_string(),
        };
        Box::pin(async move { Ok(Redirect::to(location)) })
    }

    fn silent_renew<'a>(
        &'a self,
        current: Option<&'a SessionRecord>,
    ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<SessionRecord>> + Send + 'a>> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        let renewal = self.renewal.lock().unwrap().clone();
        let delay = self.renew_delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            match renewal {
                Renewal::Succeed { token, lifetime } => Ok(SessionRecord::new(
                    token,
                    now_millis() + lifetime.as_millis() as u64,
                )
                .with_refresh_token("rt_next")),
                Renewal::Stale => Ok(SessionRecord::new("at_stale", now_millis() - 1)),
                Renewal::Fail => {
                    let session = current.cloned();
                    let _ = self.events.send(ProviderEvent::SilentRenewError {
                        reason: "invalid_grant".into(),
                        session: session.clone(),
                    });
                    let _ = self.events.send(ProviderEvent::UserSignedOut { session });
                    Err(AuthError::InvalidGrant("400: revoked".into()))
                }
                Renewal::Hang => std::future::pending().await,
            }
        })
    }

    fn logout<'a>(
        &'a self,
        current: Option<&'a SessionRecord>,
    ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<Option<Redirect>>> + Send + 'a>> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        *self.last_logout.lock().unwrap() = current.cloned();
        let fails = self.logout_fails.load(Ordering::SeqCst);
        Box::pin(async move {
            if fails {
                Err(AuthError::Revocation("revocation endpoint returned 500".into()))
            } else {
                Ok(Some(Redirect::to("https://idp.test/end_session")))
            }
        })
    }

    fn complete_callback<'a>(
        &'a self,
        params: &'a CallbackParams,
    ) -> Pin<Box<dyn Future<Output = oidc_auth::Result<SessionRecord>> + Send + 'a>> {
        self.callbacks.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            match params.code.as_deref() {
                Some("good-code") => Ok(SessionRecord::new("at_login", now_millis() + 3_600_000)
                    .with_refresh_token("rt_login")),
                Some("expired-code") => Ok(SessionRecord::new("at_login", now_millis() - 1)),
                _ => Err(AuthError::Callback("unknown or already used state".into())),
            }
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

pub fn expired_record(token: &str) -> SessionRecord {
    SessionRecord::new(token, now_millis() - 1_000).with_refresh_token("rt_old")
}

pub fn valid_record(token: &str) -> SessionRecord {
    SessionRecord::new(token, now_millis() + 3_600_000)
        .with_refresh_token("rt_old")
        .with_id_token("idt_old")
}
