//! Proactive background renewal
//!
//! Periodically renews the session shortly before it expires so requests
//! rarely pay renewal latency. Renewal goes through the manager's
//! single-flight path, so a request-time renewal and this task never race.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::manager::SessionManager;

/// Spawn a background task that renews the session when it expires within
/// `threshold`, checking every `interval`.
///
/// A failed renewal clears the session; the task keeps running and picks up
/// whatever session the next login installs.
pub fn spawn_refresh_task(
    manager: SessionManager,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick; the session was just loaded
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&manager, threshold).await;
        }
    })
}

async fn refresh_cycle(manager: &SessionManager, threshold: Duration) {
    match manager.renew_if_expiring(threshold).await {
        Ok(true) => info!("background session renewal succeeded"),
        Ok(false) => debug!("session not due for renewal"),
        Err(Error::RenewalFailed(reason)) => {
            warn!(error = %reason, "background session renewal failed, session cleared");
        }
        Err(e) => warn!(error = %e, "background session renewal failed"),
    }
}
