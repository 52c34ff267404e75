use crate::request::InboundResponse;

/// Errors from executing a request through the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The upstream answered 401 and the one permitted retry could not fix
    /// it. Carries the final upstream response.
    #[error("request unauthorized (status {})", .0.status)]
    RequestUnauthorized(InboundResponse),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream timed out")]
    Timeout,
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
