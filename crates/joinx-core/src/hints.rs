//! # Join Hints
//!
//! Hints arrive from the SQL comment block (`/*+ JOIN_ORDER(a,b) ... */`).
//! The text is extracted upstream; [`parse_join_hints`] turns its contents
//! into the typed list, and the memo resolves table names against the leaf
//! tables of the root group.
//!
//! Hints are advisory. During optimization a hint-satisfying alternative is
//! preferred over a non-satisfying one regardless of cost; when no
//! alternative satisfies the hints the cheapest plan wins and the group
//! records `hint_ok = false`.
//!
//! When two operator hints name the same table pair, the later hint wins.
//! Distinct pairs are additive.

use crate::ids::{TableId, TableSet};
use crate::rel::JoinKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HintType {
    JoinOrder,
    JoinFixedOrder,
    InnerJoin,
    MergeJoin,
    LookupJoin,
    HashJoin,
    SemiJoin,
    AntiJoin,
    LeftOuterLookupJoin,
}

impl HintType {
    fn from_name(name: &str) -> Option<HintType> {
        match name.to_ascii_uppercase().as_str() {
            "JOIN_ORDER" => Some(HintType::JoinOrder),
            "JOIN_FIXED_ORDER" => Some(HintType::JoinFixedOrder),
            "INNER_JOIN" => Some(HintType::InnerJoin),
            "MERGE_JOIN" => Some(HintType::MergeJoin),
            "LOOKUP_JOIN" => Some(HintType::LookupJoin),
            "HASH_JOIN" => Some(HintType::HashJoin),
            "SEMI_JOIN" => Some(HintType::SemiJoin),
            "ANTI_JOIN" => Some(HintType::AntiJoin),
            "LEFT_OUTER_LOOKUP_JOIN" => Some(HintType::LeftOuterLookupJoin),
            _ => None,
        }
    }

    /// Whether a chosen join kind matches this operator hint.
    pub fn matches_kind(self, kind: JoinKind) -> bool {
        match self {
            HintType::InnerJoin => kind == JoinKind::Inner,
            HintType::MergeJoin => kind.is_merge(),
            HintType::LookupJoin => kind.is_lookup(),
            HintType::HashJoin => kind.is_hash(),
            HintType::SemiJoin => kind.is_semi(),
            HintType::AntiJoin => kind.is_anti(),
            HintType::LeftOuterLookupJoin => kind == JoinKind::LeftOuterLookup,
            HintType::JoinOrder | HintType::JoinFixedOrder => true,
        }
    }
}

/// A parsed hint: type plus raw name arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    pub typ: HintType,
    pub args: Vec<String>,
}

/// Parse the contents of a hint comment into typed hints. The surrounding
/// `/*+ ... */` markers are tolerated but not required. Unknown hint names
/// are skipped.
pub fn parse_join_hints(comment: &str) -> Vec<Hint> {
    let body = comment
        .trim()
        .trim_start_matches("/*+")
        .trim_end_matches("*/")
        .trim();

    let mut hints = Vec::new();
    let mut rest = body;
    while let Some(open) = rest.find('(') {
        let name = rest[..open].trim().trim_start_matches(',').trim();
        let Some(close) = rest[open..].find(')') else {
            break;
        };
        let args: Vec<String> = rest[open + 1..open + close]
            .split(',')
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if let Some(typ) = HintType::from_name(name) {
            hints.push(Hint { typ, args });
        } else {
            tracing::debug!(hint = name, "skipping unknown join hint");
        }
        rest = &rest[open + close + 1..];
    }
    // JOIN_FIXED_ORDER takes no parentheses; catch the bare token form.
    if body
        .split_whitespace()
        .any(|tok| tok.eq_ignore_ascii_case("JOIN_FIXED_ORDER"))
        && !hints.iter().any(|h| h.typ == HintType::JoinFixedOrder)
    {
        hints.push(Hint {
            typ: HintType::JoinFixedOrder,
            args: vec![],
        });
    }
    hints
}

/// A resolved `JOIN_ORDER` hint: each named leaf table mapped to its position
/// in the requested order.
#[derive(Debug, Clone, Default)]
pub struct JoinOrderHint {
    order: HashMap<TableId, usize>,
}

impl JoinOrderHint {
    pub fn new(order: HashMap<TableId, usize>) -> Self {
        Self { order }
    }

    /// A join satisfies the order when every hinted table on the left comes
    /// before every hinted table on the right. Tables the hint does not name
    /// leave the join unconstrained.
    pub fn satisfied_by(&self, left: &TableSet, right: &TableSet) -> bool {
        let max_left = left.iter().filter_map(|t| self.order.get(&t)).max();
        let min_right = right.iter().filter_map(|t| self.order.get(&t)).min();
        match (max_left, min_right) {
            (Some(l), Some(r)) => l < r,
            _ => true,
        }
    }
}

/// A resolved operator hint binding a join kind family to a table pair. The
/// hint constrains the first join above the two tables: the join whose
/// operand table sets contain the pair and are minimal.
#[derive(Debug, Clone)]
pub struct JoinOpHint {
    pub typ: HintType,
    pub left: TableId,
    pub right: TableId,
}

impl JoinOpHint {
    /// The hint applies to a join that actually joins the two tables: both
    /// are covered, and neither operand covers both on its own.
    pub fn applies_to(&self, left: &TableSet, right: &TableSet) -> bool {
        let l = self.left;
        let r = self.right;
        let covers =
            (left.contains(l) || right.contains(l)) && (left.contains(r) || right.contains(r));
        let one_sided = (left.contains(l) && left.contains(r))
            || (right.contains(l) && right.contains(r));
        covers && !one_sided
    }

    /// An applicable hint is satisfied by kind alone; operand orientation is
    /// the `JOIN_ORDER` hint's business.
    pub fn satisfied_by(&self, kind: JoinKind, left: &TableSet, right: &TableSet) -> bool {
        debug_assert!(self.applies_to(left, right));
        let _ = (left, right);
        self.typ.matches_kind(kind)
    }
}

/// The active hint set for one planning run.
#[derive(Debug, Clone, Default)]
pub struct JoinHints {
    pub order: Option<JoinOrderHint>,
    pub ops: Vec<JoinOpHint>,
    /// `JOIN_FIXED_ORDER`: freeze the memoized order; reorder passes skip
    /// the query entirely.
    pub fixed_order: bool,
}

impl JoinHints {
    pub fn is_empty(&self) -> bool {
        self.order.is_none() && self.ops.is_empty() && !self.fixed_order
    }

    /// Install an op hint, replacing any earlier hint on the same unordered
    /// table pair.
    pub fn push_op(&mut self, hint: JoinOpHint) {
        self.ops.retain(|h| {
            !((h.left == hint.left && h.right == hint.right)
                || (h.left == hint.right && h.right == hint.left))
        });
        self.ops.push(hint);
    }

    /// Whether a join alternative satisfies every applicable hint.
    pub fn satisfied_by_join(&self, kind: JoinKind, left: &TableSet, right: &TableSet) -> bool {
        if let Some(order) = &self.order {
            if !order.satisfied_by(left, right) {
                return false;
            }
        }
        self.ops
            .iter()
            .filter(|h| h.applies_to(left, right))
            .all(|h| h.satisfied_by(kind, left, right))
    }
}
