//! Provider event listener
//!
//! The identity provider reports renewal failures and IdP-side sign-outs on a
//! broadcast channel. This task forwards each one to the session manager.

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::manager::SessionManager;

/// Spawn a task that applies provider events to the session until the
/// provider's channel closes.
pub fn spawn_event_listener(manager: SessionManager) -> tokio::task::JoinHandle<()> {
    let mut events = manager.take_event_receiver();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => manager.handle_provider_event(&event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "provider event listener fell behind");
                }
                Err(RecvError::Closed) => {
                    info!("provider event channel closed, listener exiting");
                    break;
                }
            }
        }
    })
}
