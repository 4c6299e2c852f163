//! Planning errors.
//!
//! Errors are returned, never thrown across the planner boundary. Missing
//! statistics are deliberately *not* an error: the coster falls back to
//! default cardinalities and planning continues. An unsatisfiable hint is
//! also not an error; the memo records that hints were ignored and returns
//! the cheapest plan.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    /// The logical input contains a construct the memo cannot represent.
    /// No partial plan is returned.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Planning was cancelled through the session context.
    #[error("planning cancelled")]
    Cancelled,

    /// A hint names a table that is not a leaf of the planned query.
    #[error("hint references unknown table: {0}")]
    UnresolvableHint(String),

    /// Two hints contradict each other in a way last-wins cannot resolve.
    #[error("incompatible hint combination: {0}")]
    IncompatibleHints(String),

    /// An internal invariant broke. The memo is discarded; the message
    /// carries enough context for diagnosis.
    #[error("internal planning error: {0}")]
    Internal(String),
}

impl PlanError {
    pub fn internal(msg: impl Into<String>) -> Self {
        PlanError::Internal(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        PlanError::NotSupported(msg.into())
    }
}

pub type PlanResult<T> = Result<T, PlanError>;
