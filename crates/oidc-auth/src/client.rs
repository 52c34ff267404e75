//! OIDC implementation of `IdentityProvider`
//!
//! Authorization code flow with PKCE for interactive login, the refresh token
//! grant for silent renewal, and RP-initiated logout. Holds no session: the
//! record to renew or sign out is always passed in by the session manager.
//!
//! Pending logins (state → PKCE verifier) are kept in memory and expire after
//! `PENDING_LOGIN_TTL`, so a callback must land on the process that started
//! the login.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use tokio::sync::{Mutex, OnceCell, broadcast};
use tracing::{debug, info, warn};
use url::Url;

use crate::constants::PENDING_LOGIN_TTL;
use crate::discovery::{self, ProviderMetadata};
use crate::error::{Error, Result};
use crate::identity::{CallbackParams, IdentityProvider, ProviderEvent, Redirect};
use crate::pkce::{build_authorization_url, compute_challenge, generate_state, generate_verifier};
use crate::record::{SessionRecord, now_millis};
use crate::settings::OidcSettings;
use crate::token;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// PKCE verifier for a login that has been started but not completed.
struct PendingLogin {
    verifier: String,
    created_at: Instant,
}

pub struct OidcClient {
    settings: OidcSettings,
    http: reqwest::Client,
    metadata: OnceCell<ProviderMetadata>,
    pending: Mutex<HashMap<String, PendingLogin>>,
    events: broadcast::Sender<ProviderEvent>,
}

impl OidcClient {
    pub fn new(settings: OidcSettings, http: reqwest::Client) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings,
            http,
            metadata: OnceCell::new(),
            pending: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn settings(&self) -> &OidcSettings {
        &self.settings
    }

    /// Provider metadata, discovered on first use and cached afterwards.
    /// A failed discovery is retried on the next call.
    pub async fn metadata(&self) -> Result<&ProviderMetadata> {
        self.metadata
            .get_or_try_init(|| discovery::resolve(&self.http, &self.settings))
            .await
    }

    /// Number of logins awaiting their callback (after pruning expired ones).
    pub async fn pending_logins(&self) -> usize {
        let mut pending = self.pending.lock().await;
        prune_expired(&mut pending);
        pending.len()
    }

    fn emit(&self, event: ProviderEvent) {
        // No subscribers is fine; nobody is listening yet.
        let _ = self.events.send(event);
    }

    async fn start_login(&self, prompt: Option<&str>) -> Result<Redirect> {
        let metadata = self.metadata().await?;
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        let state = generate_state();

        let location = build_authorization_url(
            &metadata.authorization_endpoint,
            &self.settings,
            &state,
            &challenge,
            prompt,
        )?;

        let mut pending = self.pending.lock().await;
        prune_expired(&mut pending);
        pending.insert(
            state,
            PendingLogin {
                verifier,
                created_at: Instant::now(),
            },
        );
        debug!(
            pending = pending.len(),
            prompt = prompt.unwrap_or("default"),
            "started interactive login"
        );

        Ok(Redirect::to(location))
    }

    async fn finish_login(&self, params: &CallbackParams) -> Result<SessionRecord> {
        if let Some(error) = &params.error {
            let description = params.error_description.as_deref().unwrap_or("no description");
            return Err(Error::Callback(format!("identity provider returned {error}: {description}")));
        }

        let state = params
            .state
            .as_deref()
            .ok_or_else(|| Error::Callback("missing state parameter".into()))?;

        let login = self
            .pending
            .lock()
            .await
            .remove(state)
            .ok_or_else(|| Error::Callback("unknown or already used state".into()))?;

        if login.created_at.elapsed() > PENDING_LOGIN_TTL {
            return Err(Error::Callback("login expired before callback arrived".into()));
        }

        let code = params
            .code
            .as_deref()
            .ok_or_else(|| Error::Callback("missing code parameter".into()))?;

        let metadata = self.metadata().await?;
        let response = token::exchange_code(
            &self.http,
            &metadata.token_endpoint,
            &self.settings,
            code,
            &login.verifier,
        )
        .await?;

        let record = SessionRecord::from_token_response(response, now_millis());
        info!(
            expires_at = record.expires_at,
            refresh_capable = record.refresh_capable(),
            "login completed"
        );
        Ok(record)
    }

    async fn renew(&self, current: Option<&SessionRecord>) -> Result<SessionRecord> {
        let refresh = current
            .and_then(|record| record.refresh_token.as_ref())
            .ok_or(Error::NoRefreshToken)?;

        let result = match self.metadata().await {
            Ok(metadata) => {
                token::refresh_token(
                    &self.http,
                    &metadata.token_endpoint,
                    &self.settings,
                    refresh.expose(),
                )
                .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => {
                let mut record = SessionRecord::from_token_response(response, now_millis());
                // IdPs that don't rotate refresh tokens omit them on refresh
                if record.refresh_token.is_none() {
                    record.refresh_token = Some(refresh.clone());
                }
                if record.id_token.is_none() {
                    record.id_token = current.and_then(|r| r.id_token.clone());
                }
                debug!(expires_at = record.expires_at, "silent renewal succeeded");
                Ok(record)
            }
            Err(e) => {
                warn!(error = %e, "silent renewal failed");
                self.emit(ProviderEvent::SilentRenewError {
                    reason: e.to_string(),
                    session: current.cloned(),
                });
                if matches!(e, Error::InvalidGrant(_)) {
                    self.emit(ProviderEvent::UserSignedOut {
                        session: current.cloned(),
                    });
                }
                Err(e)
            }
        }
    }

    async fn sign_out(&self, current: Option<&SessionRecord>) -> Result<Option<Redirect>> {
        let metadata = self.metadata().await?;

        if let (Some(endpoint), Some(refresh)) = (
            &metadata.revocation_endpoint,
            current.and_then(|r| r.refresh_token.as_ref()),
        ) {
            token::revoke_token(&self.http, endpoint, &self.settings, refresh.expose()).await?;
        }

        let Some(end_session) = &metadata.end_session_endpoint else {
            return Ok(None);
        };

        let mut url = Url::parse(end_session)
            .map_err(|e| Error::InvalidUrl(format!("{end_session}: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.settings.client_id);
            if let Some(id_token) = current.and_then(|r| r.id_token.as_ref()) {
                query.append_pair("id_token_hint", id_token.expose());
            }
            if let Some(target) = &self.settings.post_logout_redirect_uri {
                query.append_pair("post_logout_redirect_uri", target);
            }
        }
        Ok(Some(Redirect::to(url)))
    }
}

impl IdentityProvider for OidcClient {
    fn id(&self) -> &str {
        "oidc"
    }

    fn login<'a>(
        &'a self,
        prompt: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Redirect>> + Send + 'a>> {
        Box::pin(self.start_login(prompt))
    }

    fn silent_renew<'a>(
        &'a self,
        current: Option<&'a SessionRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<SessionRecord>> + Send + 'a>> {
        Box::pin(self.renew(current))
    }

    fn logout<'a>(
        &'a self,
        current: Option<&'a SessionRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Redirect>>> + Send + 'a>> {
        Box::pin(self.sign_out(current))
    }

    fn complete_callback<'a>(
        &'a self,
        params: &'a CallbackParams,
    ) -> Pin<Box<dyn Future<Output = Result<SessionRecord>> + Send + 'a>> {
        Box::pin(self.finish_login(params))
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

fn prune_expired(pending: &mut HashMap<String, PendingLogin>) {
    pending.retain(|_, login| login.created_at.elapsed() <= PENDING_LOGIN_TTL);
}
