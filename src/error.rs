use thiserror::Error;

/// A specialized `Result` type for tracking operations.
pub type TraceResult<T> = Result<T, TraceError>;

/// Errors returned by trackers, collectors and writers.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceError {
    /// A required input was empty or otherwise unusable. Caller's bug, never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A span was queried before it reached the required state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Caller identity could not be resolved, or trackers were released out of order.
    #[error("tracking failed: {0}")]
    Tracking(String),

    /// Appending a batch to disk failed after exhausting the retry budget.
    #[error("appending batch failed after {attempts} attempt(s)")]
    Persistence {
        attempts: usize,
        #[source]
        source: std::io::Error,
    },

    /// Other errors propagated from collaborators (e.g. the encoder).
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}
