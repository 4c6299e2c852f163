//! Merge join generation.
//!
//! A merge join applies when both operands are leaf sources with indexes
//! whose leading columns align with an equi-join key: both sides can then
//! stream in key order. The left-side key must be the bare index column;
//! the right-side key may be offset by a constant (`y + 2 = s` still
//! streams in order). `SwapCmp` records that the comparison's written left
//! operand came from the right-side table.
//!
//! Applicable to left outer joins as `LeftOuterMerge`; the extra non-equi
//! predicates ride along as residual filters and never drop non-matching
//! outer rows.

use crate::util::{any_subquery, split_equalities, EquiPred};
use crate::Rule;
use joinx_core::error::PlanResult;
use joinx_core::ids::{ColumnId, ExprId, ScalarId};
use joinx_core::memo::Memo;
use joinx_core::rel::{IndexScan, JoinKind, RelOp};
use joinx_core::scalar::{ArithOp, ScalarExpr};
use std::collections::HashSet;
use tracing::trace;

#[derive(Default)]
pub struct MergeJoins {
    seen: HashSet<ExprId>,
}

impl Rule for MergeJoins {
    fn name(&self) -> &'static str {
        "MergeJoins"
    }

    fn apply(&mut self, memo: &mut Memo, expr: ExprId) -> PlanResult<bool> {
        if !self.seen.insert(expr) {
            return Ok(false);
        }
        let base = match memo.rel(expr).op.clone() {
            RelOp::InnerJoin(b) if b.kind == JoinKind::Inner => b,
            RelOp::LeftJoin(b) if b.kind == JoinKind::Left => b,
            _ => return Ok(false),
        };
        if any_subquery(memo, &base.filter) {
            return Ok(false);
        }
        let group = memo.rel(expr).group;
        if memo
            .exprs_of(group)
            .into_iter()
            .any(|eid| matches!(&memo.rel(eid).op, RelOp::MergeJoin(_)))
        {
            return Ok(false);
        }
        let (equis, _) = split_equalities(memo, &base);
        if equis.is_empty() {
            return Ok(false);
        }

        let Some((left_scan, right_scan, swap_cmp, extra)) = (|| {
            let left_leaf = memo.leaf_source(base.left)?;
            let right_leaf = memo.leaf_source(base.right)?;
            if any_subquery(memo, &left_leaf.filters) || any_subquery(memo, &right_leaf.filters) {
                return None;
            }
            for e in &equis {
                // Left side streams on the bare index column; the right
                // side tolerates a constant offset.
                let lcol = memo.scalar(e.left_expr).expr.as_col_ref()?.col;
                let rcol = monotone_col(memo, e.right_expr)?;
                let lidx = left_leaf
                    .base
                    .indexes
                    .iter()
                    .find(|i| i.cols().first() == Some(&lcol))?;
                let ridx = right_leaf
                    .base
                    .indexes
                    .iter()
                    .find(|i| i.cols().first() == Some(&rcol))?;
                // The null-supplying side's leaf filters ride along as
                // residual. The preserved side of a left join keeps
                // filtering its own input: moved into the residual, a
                // failing predicate would null-pad rows it should drop.
                let mut extra = right_leaf.filters.clone();
                if base.kind == JoinKind::Inner {
                    extra.extend(left_leaf.filters.iter().copied());
                }
                return Some((
                    IndexScan::template(left_leaf.group, lidx.clone(), vec![]),
                    IndexScan::template(right_leaf.group, ridx.clone(), vec![]),
                    e.swapped,
                    extra,
                ));
            }
            None
        })() else {
            return Ok(false);
        };

        let mut filter = base.filter.clone();
        filter.extend(extra);
        memo.memoize_merge_join(
            Some(group),
            base.left,
            base.right,
            left_scan,
            right_scan,
            base.kind,
            filter,
            swap_cmp,
        )?;
        trace!(group = %group, "added merge join");
        Ok(true)
    }
}

/// The column an expression is ordered by: the bare column itself, or the
/// column under an order-preserving constant offset.
fn monotone_col(memo: &Memo, sid: ScalarId) -> Option<ColumnId> {
    match &memo.scalar(sid).expr {
        ScalarExpr::ColRef(c) => Some(c.col),
        ScalarExpr::Arithmetic { op, left, right } => {
            let lcol = memo.scalar(*left).expr.as_col_ref();
            let rlit = matches!(memo.scalar(*right).expr, ScalarExpr::Literal(_));
            match op {
                // col + lit, lit + col, col - lit keep the column's order;
                // lit - col reverses it.
                ArithOp::Add => {
                    if let (Some(c), true) = (lcol, rlit) {
                        return Some(c.col);
                    }
                    let rcol = memo.scalar(*right).expr.as_col_ref()?;
                    matches!(memo.scalar(*left).expr, ScalarExpr::Literal(_))
                        .then_some(rcol.col)
                }
                ArithOp::Sub => match (lcol, rlit) {
                    (Some(c), true) => Some(c.col),
                    _ => None,
                },
                _ => None,
            }
        }
        _ => None,
    }
}
