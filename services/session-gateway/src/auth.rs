//! Session endpoints
//!
//! Endpoints:
//! - GET  /auth/login    : 302 to the identity provider's authorization URL
//! - GET  /auth/callback : finish the login handshake
//! - POST /auth/logout   : end the session locally and at the provider
//! - POST /auth/reset    : drop the session and start a fresh login (302)
//! - GET  /auth/session  : current session status, never the token

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use oidc_auth::CallbackParams;
use serde::Deserialize;
use session::SessionManager;
use tracing::info;

use crate::error::GatewayError;

/// Build the router for the session endpoints.
pub fn build_auth_router(session: SessionManager) -> Router {
    Router::new()
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/logout", post(logout))
        .route("/auth/reset", post(reset))
        .route("/auth/session", get(session_status))
        .with_state(session)
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn json(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

#[derive(Deserialize)]
struct LoginQuery {
    #[serde(default)]
    prompt: Option<String>,
}

/// GET /auth/login: redirect the user agent to the identity provider.
///
/// `?prompt=none` asks the provider to reuse an existing IdP session without
/// showing a login page.
async fn login(
    State(session): State<SessionManager>,
    Query(query): Query<LoginQuery>,
) -> Result<Response, GatewayError> {
    let redirect = session.login_with_prompt(query.prompt.as_deref()).await?;
    Ok(found(&redirect.location))
}

/// GET /auth/callback: exchange the authorization code and install the session.
async fn callback(
    State(session): State<SessionManager>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, GatewayError> {
    let status = session.handle_callback(&params).await?;
    Ok(json(
        StatusCode::OK,
        serde_json::json!({ "authenticated": true, "session": status }),
    ))
}

/// POST /auth/logout: always ends the local session.
///
/// A failed provider sign-out is reported in the body, not as an error
/// status.
async fn logout(State(session): State<SessionManager>) -> Response {
    let outcome = session.logout().await;
    let remote = if outcome.remote_error.is_some() {
        "failed"
    } else {
        "ok"
    };
    info!(remote_sign_out = remote, "logout requested");
    json(
        StatusCode::OK,
        serde_json::json!({
            "logged_out": true,
            "end_session_url": outcome.redirect.map(|r| r.location),
            "remote_sign_out": remote,
            "remote_error": outcome.remote_error,
        }),
    )
}

/// POST /auth/reset: clear the session and redirect to a fresh login.
async fn reset(State(session): State<SessionManager>) -> Result<Response, GatewayError> {
    let redirect = session.reset_and_reauthenticate().await?;
    Ok(found(&redirect.location))
}

/// GET /auth/session: session state without any token material.
async fn session_status(State(session): State<SessionManager>) -> impl IntoResponse {
    let status = session.status().await;
    json(StatusCode::OK, serde_json::json!({ "session": status }))
}
