//! # Join Commutativity and Associativity
//!
//! Commute prepends the mirrored-operand form of every inner and cross
//! join. Associate rotates adjacent inner joins, `(A ⋈ B) ⋈ C` into
//! `A ⋈ (B ⋈ C)` and `B ⋈ (A ⋈ C)`, when the filter partition permits: the
//! new inner join only receives predicates whose columns live entirely on
//! its two operands, and at least one such predicate must exist so the
//! rotation does not manufacture a cross join.
//!
//! Outer joins do not commute. The one reorder-safe local rewrite applied
//! here lets a left join's preserved side associate with an inner join
//! above it: `(A ⟕ B) ⋈ C` becomes `(A ⋈ C) ⟕ B` when the inner predicate
//! ignores B.
//!
//! A `JOIN_FIXED_ORDER` hint disables this module for the query.

use crate::Rule;
use joinx_core::error::PlanResult;
use joinx_core::ids::{ExprId, GroupId, ScalarId};
use joinx_core::memo::Memo;
use joinx_core::rel::{JoinBase, JoinKind, RelOp};
use std::collections::HashSet;
use tracing::trace;

#[derive(Default)]
pub struct CommuteJoins {
    seen: HashSet<ExprId>,
}

impl Rule for CommuteJoins {
    fn name(&self) -> &'static str {
        "CommuteJoins"
    }

    fn apply(&mut self, memo: &mut Memo, expr: ExprId) -> PlanResult<bool> {
        if memo.hints.fixed_order || !self.seen.insert(expr) {
            return Ok(false);
        }
        let (is_cross, base) = match memo.rel(expr).op.clone() {
            RelOp::InnerJoin(b) if b.kind == JoinKind::Inner => (false, b),
            RelOp::CrossJoin(b) => (true, b),
            _ => return Ok(false),
        };
        let group = memo.rel(expr).group;
        if has_join_alt(memo, group, base.right, base.left) {
            return Ok(false);
        }
        if is_cross {
            memo.memoize_cross_join(Some(group), base.right, base.left, base.filter)?;
        } else {
            memo.memoize_inner_join(
                Some(group),
                base.right,
                base.left,
                JoinKind::Inner,
                base.filter,
            )?;
        }
        trace!(group = %group, "commuted join operands");
        Ok(true)
    }
}

/// Whether the group already holds a plain join alternative with the given
/// operand order.
fn has_join_alt(memo: &Memo, group: GroupId, left: GroupId, right: GroupId) -> bool {
    memo.exprs_of(group).into_iter().any(|eid| {
        matches!(
            &memo.rel(eid).op,
            RelOp::InnerJoin(b) | RelOp::CrossJoin(b) if b.left == left && b.right == right
        )
    })
}

#[derive(Default)]
pub struct AssociateJoins {
    seen: HashSet<ExprId>,
}

impl Rule for AssociateJoins {
    fn name(&self) -> &'static str {
        "AssociateJoins"
    }

    fn apply(&mut self, memo: &mut Memo, expr: ExprId) -> PlanResult<bool> {
        if memo.hints.fixed_order || !self.seen.insert(expr) {
            return Ok(false);
        }
        let RelOp::InnerJoin(outer) = memo.rel(expr).op.clone() else {
            return Ok(false);
        };
        if outer.kind != JoinKind::Inner {
            return Ok(false);
        }
        let group = memo.rel(expr).group;
        let mut changed = false;

        for eid in memo.exprs_of(outer.left) {
            match memo.rel(eid).op.clone() {
                RelOp::InnerJoin(inner) if inner.kind == JoinKind::Inner => {
                    changed |= rotate(memo, group, &outer, inner.left, inner.right, &inner.filter)?;
                    changed |= rotate(memo, group, &outer, inner.right, inner.left, &inner.filter)?;
                }
                RelOp::LeftJoin(inner) if inner.kind == JoinKind::Left => {
                    changed |= hoist_left_join(memo, group, &outer, &inner)?;
                }
                _ => {}
            }
            if changed {
                break;
            }
        }
        Ok(changed)
    }
}

/// `(stay ⋈ move) ⋈ C → stay ⋈ (move ⋈ C)`, pushing the outer predicates
/// that mention only `move` and `C` into the new inner join.
fn rotate(
    memo: &mut Memo,
    group: GroupId,
    outer: &JoinBase,
    stay: GroupId,
    move_grp: GroupId,
    inner_filter: &[ScalarId],
) -> PlanResult<bool> {
    let move_tables = memo.group(move_grp).props.tables.clone();
    let c_tables = memo.group(outer.right).props.tables.clone();
    let both = move_tables.union(&c_tables);

    let mut to_inner = Vec::new();
    let mut remaining = Vec::new();
    for f in &outer.filter {
        let tables = memo.scalar_tables(*f);
        if tables.is_subset_of(&both)
            && tables.intersects(&move_tables)
            && tables.intersects(&c_tables)
        {
            to_inner.push(*f);
        } else {
            remaining.push(*f);
        }
    }
    // No connecting predicate: the rotation would create a cross join.
    if to_inner.is_empty() {
        return Ok(false);
    }

    let bc = memo.memoize_inner_join(None, move_grp, outer.right, JoinKind::Inner, to_inner)?;
    let mut new_outer = inner_filter.to_vec();
    new_outer.extend(remaining);
    memo.memoize_inner_join(Some(group), stay, bc, JoinKind::Inner, new_outer)?;
    trace!(group = %group, "associated inner joins");
    Ok(true)
}

/// `(A ⟕ B) ⋈ C → (A ⋈ C) ⟕ B` when every inner predicate ignores B. The
/// left join preserves A rows either way, so the inner join sees the same
/// A rows in both shapes.
fn hoist_left_join(
    memo: &mut Memo,
    group: GroupId,
    outer: &JoinBase,
    left_join: &JoinBase,
) -> PlanResult<bool> {
    let b_tables = memo.group(left_join.right).props.tables.clone();
    if outer
        .filter
        .iter()
        .any(|f| memo.scalar_tables(*f).intersects(&b_tables))
    {
        return Ok(false);
    }
    let ac = memo.memoize_inner_join(
        None,
        left_join.left,
        outer.right,
        JoinKind::Inner,
        outer.filter.clone(),
    )?;
    memo.memoize_left_join(
        Some(group),
        ac,
        left_join.right,
        JoinKind::Left,
        left_join.filter.clone(),
    )?;
    trace!(group = %group, "hoisted inner join above left join");
    Ok(true)
}
