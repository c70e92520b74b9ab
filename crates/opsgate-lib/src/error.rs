//! Error taxonomy shared by the gateways and the core components

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the core
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Bad input, detected before any network call
    #[error("validation error: {0}")]
    Validation(String),

    /// Target workload, revision or metric is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// The concurrency token was stale; another writer updated the object
    #[error("conflict: {0}")]
    Conflict(String),

    /// The optimistic-concurrency retry budget ran out
    #[error("{workload}: still conflicting after {attempts} attempts")]
    ConflictExhausted { workload: String, attempts: u32 },

    /// The downstream backend is unreachable or timed out
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Any other downstream failure
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Prefix the message with operation context, keeping the variant
    pub fn context(self, ctx: impl Display) -> Self {
        match self {
            Error::Validation(msg) => Error::Validation(format!("{}: {}", ctx, msg)),
            Error::NotFound(msg) => Error::NotFound(format!("{}: {}", ctx, msg)),
            Error::Conflict(msg) => Error::Conflict(format!("{}: {}", ctx, msg)),
            Error::Unavailable(msg) => Error::Unavailable(format!("{}: {}", ctx, msg)),
            Error::Transport(msg) => Error::Transport(format!("{}: {}", ctx, msg)),
            exhausted @ Error::ConflictExhausted { .. } => exhausted,
        }
    }

    /// Short stable name, used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::ConflictExhausted { .. } => "conflict_exhausted",
            Error::Unavailable(_) => "unavailable",
            Error::Transport(_) => "transport",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }
}

/// Bound on any single gateway operation unless configured otherwise
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Await `work`, failing with `Unavailable` once `deadline` passes
pub async fn within<T, F>(deadline: Duration, what: impl Display, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, work).await {
        Ok(result) => result,
        Err(_) => Err(Error::Unavailable(format!(
            "{} did not complete within {:?}",
            what, deadline
        ))),
    }
}
