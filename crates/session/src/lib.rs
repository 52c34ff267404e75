//! Session lifecycle for a single signed-in user
//!
//! `SessionManager` owns the current `SessionRecord` and hands out valid
//! access tokens. Expired sessions are renewed silently and at most once at
//! a time; renewal failures end the session instead of prompting the user.
//!
//! Background tasks:
//! 1. `spawn_event_listener` applies provider notifications (renewal failure,
//!    IdP sign-out) to the session
//! 2. `spawn_refresh_task` renews shortly before expiry

pub mod error;
pub mod events;
pub mod manager;
pub mod refresh;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use events::spawn_event_listener;
pub use manager::{LogoutOutcome, SessionManager, SessionSettings, SessionStatus};
pub use refresh::spawn_refresh_task;
