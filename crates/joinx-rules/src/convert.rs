//! Semi-to-inner conversion.
//!
//! A semi join whose inner side is provably unique over the join keys
//! produces exactly the rows of the corresponding inner join, so the
//! cheaper inner-join machinery (hash, merge, lookup) can compete. The
//! conversion prepends `Project(outer cols)(InnerJoin(...))` to the semi
//! group; output columns are unchanged.

use crate::util::split_equalities;
use crate::Rule;
use joinx_core::error::PlanResult;
use joinx_core::ids::{ColSet, ExprId};
use joinx_core::memo::Memo;
use joinx_core::rel::{JoinKind, RelOp};
use joinx_core::scalar::ScalarExpr;
use std::collections::HashSet;
use tracing::trace;

#[derive(Default)]
pub struct SemiToInner {
    seen: HashSet<ExprId>,
}

impl Rule for SemiToInner {
    fn name(&self) -> &'static str {
        "SemiToInner"
    }

    fn apply(&mut self, memo: &mut Memo, expr: ExprId) -> PlanResult<bool> {
        if !self.seen.insert(expr) {
            return Ok(false);
        }
        let RelOp::SemiJoin(base) = memo.rel(expr).op.clone() else {
            return Ok(false);
        };
        if base.kind != JoinKind::Semi {
            return Ok(false);
        }
        let (equis, _) = split_equalities(memo, &base);
        if equis.is_empty() {
            return Ok(false);
        }

        // The inner-side columns the equalities bind. If they form a
        // superkey of the inner relation, each outer row matches at most
        // one inner row.
        let mut right_cols = ColSet::new();
        for e in &equis {
            right_cols.union_with(memo.scalar_cols(e.right_expr));
        }
        if !memo.group(base.right).props.fds.is_superkey(&right_cols) {
            return Ok(false);
        }

        let target = memo.rel(expr).group;
        let inner = memo.memoize_inner_join(
            None,
            base.left,
            base.right,
            JoinKind::Inner,
            base.filter.clone(),
        )?;
        let projections: Vec<_> = {
            let cols = memo.group(base.left).props.cols.clone();
            cols.into_iter()
                .map(|c| {
                    let r = memo.col_ref(c).expect("registered output column");
                    memo.add_scalar(ScalarExpr::ColRef(r))
                })
                .collect()
        };
        memo.memoize_project(Some(target), inner, projections)?;
        trace!(group = %target, "converted unique semi join to inner join");
        Ok(true)
    }
}
