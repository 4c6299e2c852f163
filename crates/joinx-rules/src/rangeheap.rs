//! Range-heap join generation.
//!
//! Recognizes value-against-interval predicates: exactly two conjuncts of
//! the shape `val op1 min AND val op2 max` with `op1`, `op2` drawn from
//! `<`, `<=`, `>`, `>=`, or their mirrors (`min op val`). `BETWEEN` arrives
//! as its two closed-bound conjuncts. The value column is the one both
//! conjuncts share; it must resolve to one operand and the two bound
//! columns to the other. Each bound records whether it is inclusive.
//!
//! The executor streams the value side against a heap of active intervals;
//! the range side is read ordered by its min column, through an index when
//! one leads with it and a sort otherwise. Applicable to left outer joins
//! as `LeftOuterRangeHeap`.

use crate::util::any_subquery;
use crate::Rule;
use joinx_core::error::PlanResult;
use joinx_core::ids::{ColumnId, ExprId, ScalarId};
use joinx_core::memo::Memo;
use joinx_core::rel::{IndexScan, JoinKind, RangeHeap, RelOp};
use joinx_core::scalar::{ColRef, CmpOp, ScalarExpr};
use std::collections::HashSet;
use tracing::trace;

#[derive(Default)]
pub struct RangeHeapJoins {
    seen: HashSet<ExprId>,
}

/// A bare column-to-column comparison, as written.
struct RawCmp {
    left: ColRef,
    right: ColRef,
    left_sid: ScalarId,
    right_sid: ScalarId,
    op: CmpOp,
}

/// One conjunct oriented as "val `op` bound".
struct BoundPred {
    val_sid: ScalarId,
    bound: ColRef,
    bound_sid: ScalarId,
    /// The bound is a lower bound (`val >` or `val >=`).
    lower: bool,
    closed: bool,
}

impl Rule for RangeHeapJoins {
    fn name(&self) -> &'static str {
        "RangeHeapJoins"
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
        if base.filter.len() != 2 || any_subquery(memo, &base.filter) {
            return Ok(false);
        }
        let group = memo.rel(expr).group;
        if memo
            .exprs_of(group)
            .into_iter()
            .any(|eid| matches!(&memo.rel(eid).op, RelOp::RangeHeapJoin(_)))
        {
            return Ok(false);
        }

        let (Some(a), Some(b)) = (raw_cmp(memo, base.filter[0]), raw_cmp(memo, base.filter[1]))
        else {
            return Ok(false);
        };

        // The value column is the one shared by both conjuncts.
        let val_col = [a.left.col, a.right.col]
            .into_iter()
            .find(|c| *c == b.left.col || *c == b.right.col);
        let Some(val_col) = val_col else {
            return Ok(false);
        };
        let (Some(pa), Some(pb)) = (orient(&a, val_col), orient(&b, val_col)) else {
            return Ok(false);
        };
        if pa.bound.col == pb.bound.col || pa.lower == pb.lower {
            return Ok(false);
        }
        let (lo, hi) = if pa.lower { (pa, pb) } else { (pb, pa) };

        // The value resolves to one operand, both bounds to the other.
        let left_cols = memo.group(base.left).props.col_set.clone();
        let right_cols = memo.group(base.right).props.col_set.clone();
        let (range_side, range_cols) = if left_cols.contains(val_col) {
            (base.right, &right_cols)
        } else if right_cols.contains(val_col) {
            (base.left, &left_cols)
        } else {
            return Ok(false);
        };
        if !range_cols.contains(lo.bound.col) || !range_cols.contains(hi.bound.col) {
            return Ok(false);
        }

        // An index leading with the min column spares the sort over the
        // range side.
        let min_col = lo.bound.col;
        let min_index = memo.leaf_source(range_side).and_then(|leaf| {
            if !leaf.filters.is_empty() {
                return None;
            }
            leaf.base
                .indexes
                .iter()
                .find(|i| i.cols().first() == Some(&min_col))
                .map(|i| IndexScan::template(leaf.group, i.clone(), vec![]))
        });

        let range_heap = RangeHeap {
            value_col: lo.val_sid,
            min_col: lo.bound_sid,
            max_col: hi.bound_sid,
            closed_lower: lo.closed,
            closed_upper: hi.closed,
            min_index,
        };
        memo.memoize_range_heap_join(
            Some(group),
            base.left,
            base.right,
            base.kind,
            base.filter.clone(),
            range_heap,
        )?;
        trace!(group = %group, "added range heap join");
        Ok(true)
    }
}

fn raw_cmp(memo: &Memo, sid: ScalarId) -> Option<RawCmp> {
    let ScalarExpr::Cmp { op, left, right } = &memo.scalar(sid).expr else {
        return None;
    };
    if !matches!(op, CmpOp::Lt | CmpOp::Leq | CmpOp::Gt | CmpOp::Geq) {
        return None;
    }
    Some(RawCmp {
        left: memo.scalar(*left).expr.as_col_ref()?.clone(),
        right: memo.scalar(*right).expr.as_col_ref()?.clone(),
        left_sid: *left,
        right_sid: *right,
        op: *op,
    })
}

/// Orient a comparison around the value column: `min < val` reads the same
/// as `val > min`.
fn orient(raw: &RawCmp, val_col: ColumnId) -> Option<BoundPred> {
    let (val_sid, bound, bound_sid, op) = if raw.left.col == val_col {
        (raw.left_sid, raw.right.clone(), raw.right_sid, raw.op)
    } else if raw.right.col == val_col {
        (raw.right_sid, raw.left.clone(), raw.left_sid, raw.op.swap())
    } else {
        return None;
    };
    Some(BoundPred {
        val_sid,
        bound,
        bound_sid,
        lower: matches!(op, CmpOp::Gt | CmpOp::Geq),
        closed: matches!(op, CmpOp::Geq | CmpOp::Leq),
    })
}
