//! Failure taxonomy for upstream calls (made by FontLab https://www.fontlab.com/)

use thiserror::Error;

/// Outcome of a fetch that did not produce a usable response.
///
/// Transient failures never appear here directly: the fetcher retries them and
/// reports [`FetchError::Exhausted`] once the attempt ceiling is reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The source rejected automated traffic (429 or a source-specific status).
    #[error("blocked by upstream (HTTP {status})")]
    Blocked { status: u16 },

    /// Authoritative absence of the requested resource.
    #[error("not found")]
    NotFound,

    /// Retry budget spent on transient failures.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    /// The rate limiter could not admit the request within its maximum wait.
    #[error("abandoned waiting for a rate-limit token")]
    Abandoned,

    /// A client error that is neither a block signal nor a not-found.
    #[error("rejected by upstream (HTTP {status})")]
    Rejected { status: u16 },

    /// The response arrived but its payload could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The request could not be built or sent at all.
    #[error("invalid request: {0}")]
    Request(String),
}

impl FetchError {
    /// Blocked, exhausted and abandoned calls are all "source unavailable" to callers.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            FetchError::Blocked { .. } | FetchError::Exhausted { .. } | FetchError::Abandoned
        )
    }

    /// Short machine-readable label used in record warnings and logs.
    pub fn label(&self) -> &'static str {
        match self {
            FetchError::Blocked { .. } => "blocked",
            FetchError::NotFound => "not-found",
            FetchError::Exhausted { .. } => "exhausted",
            FetchError::Abandoned => "abandoned",
            FetchError::Rejected { .. } => "rejected",
            FetchError::Malformed(_) => "malformed",
            FetchError::Request(_) => "request",
        }
    }
}

/// Low-level failure reported by a [`crate::transport::Transport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("invalid request: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_covers_block_exhaust_and_abandon() {
        assert!(FetchError::Blocked { status: 429 }.is_unavailable());
        assert!(FetchError::Abandoned.is_unavailable());
        assert!(FetchError::Exhausted {
            attempts: 3,
            last: "503".into()
        }
        .is_unavailable());
        assert!(!FetchError::NotFound.is_unavailable());
        assert!(!FetchError::Malformed("x".into()).is_unavailable());
    }
}
