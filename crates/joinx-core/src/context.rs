//! Session-scoped planning context and configuration.
//!
//! There is no global optimizer state: the memo, coster, statistics provider,
//! and hint set are all passed in by the caller so that planning is safely
//! concurrent across sessions. The context carries the cancellation signal;
//! statistics lookups that block must honor it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Configuration knobs for a single planning run.
///
/// The limits are safety valves against pathologically large queries rather
/// than tuning parameters.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    /// Upper bound on the number of groups the memo may contain.
    pub max_memo_groups: usize,
    /// Upper bound on the number of rounds the transformation passes run
    /// before the driver stops chasing a fixed point.
    pub max_rule_rounds: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_memo_groups: u16::MAX as usize,
            max_rule_rounds: 10,
        }
    }
}

/// Per-query planning context. Cheap to clone; the cancellation flag is
/// shared with the session that issued the query.
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    cancelled: Arc<AtomicBool>,
}

impl PlanContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context around an externally owned cancellation flag.
    pub fn with_cancel_flag(flag: Arc<AtomicBool>) -> Self {
        Self { cancelled: flag }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
