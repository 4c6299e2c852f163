//! Expression groups.
//!
//! An [`ExprGroup`] is an equivalence class of relational alternatives that
//! produce the same row multiset (possibly unordered) and the same output
//! columns. Alternatives live in a linked list threaded through the memo's
//! expression arena; `first` points at the head and prepending keeps every
//! earlier alternative reachable through its `next` link.
//!
//! `best` is fixed during optimization and immutable once `done` is set.
//! `hint_ok` records whether the chosen best satisfies the active join hints.

use crate::ids::{ExprId, GroupId};
use crate::props::RelProps;

#[derive(Debug)]
pub struct ExprGroup {
    pub id: GroupId,
    /// Head of the alternatives linked list.
    pub first: ExprId,
    pub best: Option<ExprId>,
    pub cost: f64,
    /// Estimated output cardinality, shared by all alternatives.
    pub card: f64,
    pub done: bool,
    pub hint_ok: bool,
    pub props: RelProps,
}

impl ExprGroup {
    pub fn new(id: GroupId, first: ExprId, props: RelProps) -> Self {
        Self {
            id,
            first,
            best: None,
            cost: 0.0,
            card: 0.0,
            done: false,
            hint_ok: false,
            props,
        }
    }

    /// Take `expr` as the new best when it is the first candidate or beats
    /// the current cost. Hint preference is applied by the memo before this
    /// is reached.
    pub fn update_best(&mut self, expr: ExprId, cost: f64) {
        if self.best.is_none() || cost < self.cost {
            self.best = Some(expr);
            self.cost = cost;
        }
    }
}
