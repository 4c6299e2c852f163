//! Hash join generation.
//!
//! Splits the join predicate into the largest conjunction of equalities
//! whose sides each bind to one operand; those become the build and probe
//! keys and everything else stays as a post-filter. Filterless cross joins
//! get the materialized `CrossHash` form.
//!
//! The build side defaults to the right operand; the commuted join
//! alternative supplies the opposite orientation and the coster picks the
//! smaller build.

use crate::util::{any_subquery, split_equalities};
use crate::Rule;
use joinx_core::error::PlanResult;
use joinx_core::ids::{ExprId, GroupId};
use joinx_core::memo::Memo;
use joinx_core::rel::{JoinKind, RelOp};
use std::collections::HashSet;
use tracing::trace;

#[derive(Default)]
pub struct HashJoins {
    seen: HashSet<ExprId>,
}

impl Rule for HashJoins {
    fn name(&self) -> &'static str {
        "HashJoins"
    }

    fn apply(&mut self, memo: &mut Memo, expr: ExprId) -> PlanResult<bool> {
        if !self.seen.insert(expr) {
            return Ok(false);
        }
        let base = match memo.rel(expr).op.clone() {
            RelOp::InnerJoin(b) if b.kind == JoinKind::Inner => b,
            RelOp::LeftJoin(b) if b.kind == JoinKind::Left => b,
            RelOp::CrossJoin(b) => b,
            _ => return Ok(false),
        };
        let group = memo.rel(expr).group;
        if has_hash_alt(memo, group, base.left, base.right) {
            return Ok(false);
        }

        if base.kind == JoinKind::Cross && base.filter.is_empty() {
            memo.memoize_hash_join(
                Some(group),
                base.left,
                base.right,
                JoinKind::CrossHash,
                vec![],
                vec![],
                vec![],
            )?;
            trace!(group = %group, "added cross hash join");
            return Ok(true);
        }

        if any_subquery(memo, &base.filter) {
            return Ok(false);
        }
        let (equis, _) = split_equalities(memo, &base);
        if equis.is_empty() {
            return Ok(false);
        }
        let left_attrs = equis.iter().map(|e| e.left_expr).collect();
        let right_attrs = equis.iter().map(|e| e.right_expr).collect();
        memo.memoize_hash_join(
            Some(group),
            base.left,
            base.right,
            base.kind.as_hash(),
            base.filter.clone(),
            left_attrs,
            right_attrs,
        )?;
        trace!(group = %group, "added hash join");
        Ok(true)
    }
}

fn has_hash_alt(memo: &Memo, group: GroupId, left: GroupId, right: GroupId) -> bool {
    memo.exprs_of(group).into_iter().any(|eid| {
        matches!(
            &memo.rel(eid).op,
            RelOp::HashJoin(j) if j.base.left == left && j.base.right == right
        )
    })
}
