//! # Subquery Decorrelation
//!
//! Rewrites subquery predicates into join alternatives so they can
//! participate in cost-based selection. The rewrites are additive: the
//! original filter form stays in the group, and the coster chooses between
//! the decorrelated and per-row execution forms.
//!
//! The shapes handled:
//!
//! - `expr IN (subq)` becomes a semi join on `expr = subq.col` plus the
//!   lifted correlation predicates.
//! - `expr NOT IN (subq)` becomes an anti join when both the outer
//!   expression and the subquery column are provably non-NULL and the
//!   subquery is a simple filtered source. Otherwise MySQL's NULL semantics
//!   require the left-outer-hash-exclude-nulls form: a left outer hash join,
//!   an IS NULL filter over the subquery key, and a projection back to the
//!   outer columns.
//! - `EXISTS` / `NOT EXISTS` become semi / anti joins over the lifted
//!   correlation predicates alone.
//! - `expr op (scalar subq)`: the subquery must be provably single-row
//!   (or is wrapped in `Max1Row`); `=` becomes a semi join, `<>` always
//!   takes the exclude-nulls form, and inequalities decorrelate unless a
//!   `LIMIT` or boundary cast blocks them. An `ORDER BY` inside the
//!   subquery is irrelevant to the predicate and is discarded.
//!
//! Rewrites compose across nesting levels because each subquery's relation
//! is itself a memoized group whose filters the rule visits.

use crate::util::any_subquery;
use crate::Rule;
use joinx_core::error::PlanResult;
use joinx_core::ids::{ExprId, GroupId, ScalarId};
use joinx_core::memo::Memo;
use joinx_core::rel::{JoinKind, RelOp};
use joinx_core::scalar::{CmpOp, ScalarExpr, SubqueryExpr};
use std::collections::HashSet;
use tracing::trace;

#[derive(Default)]
pub struct DecorrelateSubqueries {
    seen: HashSet<ExprId>,
}

/// A recognized subquery predicate, normalized so the outer expression is
/// always on the left.
enum SubqueryPred {
    In {
        left: ScalarId,
        sub: SubqueryExpr,
        negated: bool,
    },
    Exists {
        sub: SubqueryExpr,
        negated: bool,
    },
    Cmp {
        op: CmpOp,
        left: ScalarId,
        sub: SubqueryExpr,
        negated: bool,
    },
}

impl Rule for DecorrelateSubqueries {
    fn name(&self) -> &'static str {
        "DecorrelateSubqueries"
    }

    fn apply(&mut self, memo: &mut Memo, expr: ExprId) -> PlanResult<bool> {
        if !self.seen.insert(expr) {
            return Ok(false);
        }
        let RelOp::Filter { child, filters } = memo.rel(expr).op.clone() else {
            return Ok(false);
        };
        let target = memo.rel(expr).group;

        for (i, f) in filters.iter().enumerate() {
            let Some(pred) = classify(memo, *f) else {
                continue;
            };
            if !correlation_in_scope(memo, &pred, child) {
                continue;
            }
            let residual: Vec<ScalarId> = filters
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, s)| *s)
                .collect();
            if rewrite(memo, target, child, pred, residual)? {
                trace!(group = %target, "decorrelated subquery predicate");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn classify(memo: &Memo, f: ScalarId) -> Option<SubqueryPred> {
    match &memo.scalar(f).expr {
        ScalarExpr::InSubquery { left, subquery } => Some(SubqueryPred::In {
            left: *left,
            sub: subquery.clone(),
            negated: false,
        }),
        ScalarExpr::Exists { subquery } => Some(SubqueryPred::Exists {
            sub: subquery.clone(),
            negated: false,
        }),
        ScalarExpr::Cmp { op, left, right } => classify_cmp(memo, *op, *left, *right, false),
        ScalarExpr::Not(inner) => match &memo.scalar(*inner).expr {
            ScalarExpr::InSubquery { left, subquery } => Some(SubqueryPred::In {
                left: *left,
                sub: subquery.clone(),
                negated: true,
            }),
            ScalarExpr::Exists { subquery } => Some(SubqueryPred::Exists {
                sub: subquery.clone(),
                negated: true,
            }),
            ScalarExpr::Cmp { op, left, right } => classify_cmp(memo, *op, *left, *right, true),
            _ => None,
        },
        _ => None,
    }
}

/// Normalize `expr op (subq)` and `(subq) op expr` to the former.
fn classify_cmp(
    memo: &Memo,
    op: CmpOp,
    left: ScalarId,
    right: ScalarId,
    negated: bool,
) -> Option<SubqueryPred> {
    if let ScalarExpr::Subquery(sub) = &memo.scalar(right).expr {
        return Some(SubqueryPred::Cmp {
            op,
            left,
            sub: sub.clone(),
            negated,
        });
    }
    if let ScalarExpr::Subquery(sub) = &memo.scalar(left).expr {
        return Some(SubqueryPred::Cmp {
            op: op.swap(),
            left: right,
            sub: sub.clone(),
            negated,
        });
    }
    None
}

/// The lifted correlation must bind against the join's left side; deeper
/// correlation crosses a scope boundary the join cannot express.
fn correlation_in_scope(memo: &Memo, pred: &SubqueryPred, child: GroupId) -> bool {
    let sub = match pred {
        SubqueryPred::In { sub, .. }
        | SubqueryPred::Exists { sub, .. }
        | SubqueryPred::Cmp { sub, .. } => sub,
    };
    !sub.blocked && sub.correlated.is_subset_of(&memo.group(child).props.col_set)
}

fn rewrite(
    memo: &mut Memo,
    target: GroupId,
    child: GroupId,
    pred: SubqueryPred,
    residual: Vec<ScalarId>,
) -> PlanResult<bool> {
    match pred {
        SubqueryPred::In { left, sub, negated } => {
            let out_ref = output_ref(memo, &sub);
            let eq = memo.add_scalar(ScalarExpr::Cmp {
                op: CmpOp::Eq,
                left,
                right: out_ref,
            });
            let mut filter = vec![eq];
            filter.extend(sub.corr_preds.iter().copied());
            if !negated {
                let join =
                    memo.memoize_semi_join(join_target(&residual, target), child, sub.root, JoinKind::Semi, filter)?;
                finish(memo, target, join, residual)?;
            } else if anti_safe(memo, left, &sub) {
                let join =
                    memo.memoize_anti_join(join_target(&residual, target), child, sub.root, JoinKind::Anti, filter)?;
                finish(memo, target, join, residual)?;
            } else {
                exclude_nulls_form(memo, target, child, sub.root, left, out_ref, filter, residual)?;
            }
            Ok(true)
        }
        SubqueryPred::Exists { sub, negated } => {
            let filter = sub.corr_preds.clone();
            let join = if negated {
                memo.memoize_anti_join(join_target(&residual, target), child, sub.root, JoinKind::Anti, filter)?
            } else {
                memo.memoize_semi_join(join_target(&residual, target), child, sub.root, JoinKind::Semi, filter)?
            };
            finish(memo, target, join, residual)?;
            Ok(true)
        }
        SubqueryPred::Cmp {
            op,
            left,
            sub,
            negated,
        } => {
            let inequality = !matches!(op, CmpOp::Eq | CmpOp::NullSafeEq);
            if negated && inequality {
                return Ok(false);
            }
            // LIMIT and a boundary cast block inequality decorrelation; a
            // discarded ORDER BY does not.
            if inequality && (sub.limit.is_some() || sub.cast_boundary || !sub.single_row) {
                return Ok(false);
            }
            let right = if sub.single_row {
                sub.root
            } else {
                memo.memoize_max1row(None, sub.root)?
            };
            let out_ref = output_ref(memo, &sub);
            let cond = memo.add_scalar(ScalarExpr::Cmp {
                op,
                left,
                right: out_ref,
            });
            let mut filter = vec![cond];
            filter.extend(sub.corr_preds.iter().copied());
            if negated && op == CmpOp::Eq {
                // `<>` keeps MySQL NULL semantics through the exclude-nulls
                // form regardless of provable null-safety.
                exclude_nulls_form(memo, target, child, right, left, out_ref, filter, residual)?;
            } else if negated {
                // not (a <=> b) is null-safe by construction.
                let join =
                    memo.memoize_anti_join(join_target(&residual, target), child, right, JoinKind::Anti, filter)?;
                finish(memo, target, join, residual)?;
            } else {
                let join =
                    memo.memoize_semi_join(join_target(&residual, target), child, right, JoinKind::Semi, filter)?;
                finish(memo, target, join, residual)?;
            }
            Ok(true)
        }
    }
}

/// When residual predicates remain, the join lands in a fresh group and the
/// residual filter is prepended to the target instead.
fn join_target(residual: &[ScalarId], target: GroupId) -> Option<GroupId> {
    if residual.is_empty() {
        Some(target)
    } else {
        None
    }
}

fn finish(
    memo: &mut Memo,
    target: GroupId,
    join: GroupId,
    residual: Vec<ScalarId>,
) -> PlanResult<()> {
    if join != target {
        memo.memoize_filter(Some(target), join, residual)?;
    }
    Ok(())
}

/// `NOT IN` may use the plain anti join only when no NULL can reach the
/// comparison: the outer expression and the subquery column are non-NULL
/// and the subquery is a simple filtered source (no further subqueries or
/// joins that defeat the proof).
fn anti_safe(memo: &Memo, left: ScalarId, sub: &SubqueryExpr) -> bool {
    if memo.scalar(left).nullable {
        return false;
    }
    let root_props = &memo.group(sub.root).props;
    let out_non_null = root_props
        .col_index(sub.output_col)
        .map(|i| !root_props.schema[i].nullable)
        .unwrap_or(false);
    if !out_non_null {
        return false;
    }
    match memo.leaf_source(sub.root) {
        Some(leaf) => !any_subquery(memo, &leaf.filters),
        None => false,
    }
}

/// The MySQL-faithful `NOT IN` rendition:
/// `Project(outer cols)(Filter(key IS NULL)(LeftOuterHashExcludeNulls(...)))`.
#[allow(clippy::too_many_arguments)]
fn exclude_nulls_form(
    memo: &mut Memo,
    target: GroupId,
    child: GroupId,
    right: GroupId,
    left_key: ScalarId,
    right_key: ScalarId,
    filter: Vec<ScalarId>,
    residual: Vec<ScalarId>,
) -> PlanResult<()> {
    let join = memo.memoize_hash_join(
        None,
        child,
        right,
        JoinKind::LeftOuterHashExcludeNulls,
        filter,
        vec![left_key],
        vec![right_key],
    )?;
    let is_null = memo.add_scalar(ScalarExpr::IsNull(right_key));
    let mut preds = vec![is_null];
    preds.extend(residual);
    let filtered = memo.memoize_filter(None, join, preds)?;
    let projections = outer_col_refs(memo, child);
    memo.memoize_project(Some(target), filtered, projections)?;
    Ok(())
}

/// Column references for every output column of a group.
fn outer_col_refs(memo: &mut Memo, group: GroupId) -> Vec<ScalarId> {
    let cols = memo.group(group).props.cols.clone();
    cols.into_iter()
        .map(|c| {
            let r = memo.col_ref(c).expect("registered output column");
            memo.add_scalar(ScalarExpr::ColRef(r))
        })
        .collect()
}

/// A reference to the subquery's output column.
fn output_ref(memo: &mut Memo, sub: &SubqueryExpr) -> ScalarId {
    let r = memo.col_ref(sub.output_col).expect("subquery output column");
    memo.add_scalar(ScalarExpr::ColRef(r))
}
