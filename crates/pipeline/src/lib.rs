//! Authenticated request pipeline
//!
//! Wraps an HTTP `Transport` so outbound requests carry the session's bearer
//! token, and recovers from a rejected token with a single forced renewal and
//! retry. The credential comes from a `CredentialSource`, normally the
//! process-wide `session::SessionManager`.

pub mod client;
pub mod error;
pub mod request;
pub mod source;
pub mod transport;

pub use client::AuthenticatedClient;
pub use error::{PipelineError, Result};
pub use request::{InboundResponse, OutboundRequest, RetryGuard};
pub use source::CredentialSource;
pub use transport::{ReqwestTransport, Transport};
