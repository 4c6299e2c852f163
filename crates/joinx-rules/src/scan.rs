//! Static index scans.
//!
//! Matches filter conjuncts against the indexes of the source underneath
//! and, when every conjunct binds into a contiguous index prefix, prepends
//! an `IndexScan` carrying the bounds. The scan fully subsumes the filter,
//! so the source fast path may pick it without losing predicates.

use crate::util::any_subquery;
use crate::Rule;
use joinx_core::error::PlanResult;
use joinx_core::ids::{ColumnId, ExprId, ScalarId};
use joinx_core::memo::Memo;
use joinx_core::rel::{ColumnBound, Index, IndexScan, RelOp};
use joinx_core::scalar::{CmpOp, ScalarExpr};
use std::collections::HashMap;
use std::collections::HashSet;
use tracing::trace;

#[derive(Default)]
pub struct StaticIndexScans {
    seen: HashSet<ExprId>,
}

impl Rule for StaticIndexScans {
    fn name(&self) -> &'static str {
        "StaticIndexScans"
    }

    fn apply(&mut self, memo: &mut Memo, expr: ExprId) -> PlanResult<bool> {
        if !self.seen.insert(expr) {
            return Ok(false);
        }
        let RelOp::Filter { child, filters } = memo.rel(expr).op.clone() else {
            return Ok(false);
        };
        if any_subquery(memo, &filters) {
            return Ok(false);
        }
        let Some(base) = memo.source_base(child).cloned() else {
            return Ok(false);
        };

        // Every conjunct must bind a column, or the scan would drop rows'
        // worth of filtering.
        let mut bounds: HashMap<ColumnId, ColumnBound> = HashMap::new();
        for f in &filters {
            let Some((col, bound)) = bind_conjunct(memo, *f) else {
                return Ok(false);
            };
            match bounds.entry(col) {
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(bound);
                }
                std::collections::hash_map::Entry::Occupied(mut e) => {
                    let Some(merged) = merge_bounds(e.get(), &bound) else {
                        return Ok(false);
                    };
                    e.insert(merged);
                }
            }
        }
        if bounds.is_empty() {
            return Ok(false);
        }

        let Some(index) = pick_index(&base.indexes, &bounds) else {
            return Ok(false);
        };
        let ranges: Vec<(ColumnId, ColumnBound)> = index
            .cols()
            .iter()
            .take(bounds.len())
            .map(|c| (*c, bounds[c].clone()))
            .collect();

        let group = memo.rel(expr).group;
        memo.memoize_index_scan(Some(group), IndexScan::with_ranges(child, index, ranges))?;
        trace!(group = %group, "bound filter into static index scan");
        Ok(true)
    }
}

/// Bind one conjunct to a column bound, or fail.
fn bind_conjunct(memo: &Memo, f: ScalarId) -> Option<(ColumnId, ColumnBound)> {
    match &memo.scalar(f).expr {
        ScalarExpr::Cmp { op, left, right } => {
            let (col, val, op) = match (
                memo.scalar(*left).expr.as_col_ref(),
                is_literal(memo, *right),
                memo.scalar(*right).expr.as_col_ref(),
                is_literal(memo, *left),
            ) {
                (Some(c), true, _, _) => (c.col, *right, *op),
                (_, _, Some(c), true) => (c.col, *left, op.swap()),
                _ => return None,
            };
            let bound = match op {
                CmpOp::Eq => ColumnBound::Eq(val),
                CmpOp::Lt => ColumnBound::Range {
                    lo: None,
                    hi: Some((val, false)),
                },
                CmpOp::Leq => ColumnBound::Range {
                    lo: None,
                    hi: Some((val, true)),
                },
                CmpOp::Gt => ColumnBound::Range {
                    lo: Some((val, false)),
                    hi: None,
                },
                CmpOp::Geq => ColumnBound::Range {
                    lo: Some((val, true)),
                    hi: None,
                },
                CmpOp::NullSafeEq => return None,
            };
            Some((col, bound))
        }
        ScalarExpr::InTuple { left, right } => {
            let col = memo.scalar(*left).expr.as_col_ref()?.col;
            let ScalarExpr::Tuple(vals) = &memo.scalar(*right).expr else {
                return None;
            };
            if !vals.iter().all(|v| is_literal(memo, *v)) {
                return None;
            }
            Some((col, ColumnBound::InTuple(vals.clone())))
        }
        _ => None,
    }
}

fn is_literal(memo: &Memo, sid: ScalarId) -> bool {
    matches!(memo.scalar(sid).expr, ScalarExpr::Literal(_))
}

fn merge_bounds(a: &ColumnBound, b: &ColumnBound) -> Option<ColumnBound> {
    match (a, b) {
        (
            ColumnBound::Range { lo: la, hi: ha },
            ColumnBound::Range { lo: lb, hi: hb },
        ) => {
            let lo = match (la, lb) {
                (Some(_), Some(_)) => return None,
                (Some(l), None) | (None, Some(l)) => Some(*l),
                (None, None) => None,
            };
            let hi = match (ha, hb) {
                (Some(_), Some(_)) => return None,
                (Some(h), None) | (None, Some(h)) => Some(*h),
                (None, None) => None,
            };
            Some(ColumnBound::Range { lo, hi })
        }
        _ => None,
    }
}

/// The longest contiguous bound prefix determines applicability; ties break
/// by uniqueness, then index name.
fn pick_index(indexes: &[Index], bounds: &HashMap<ColumnId, ColumnBound>) -> Option<Index> {
    let mut best: Option<&Index> = None;
    for index in indexes {
        let prefix = index
            .cols()
            .iter()
            .take_while(|c| bounds.contains_key(c))
            .count();
        // Every bound column must fall inside the prefix.
        if prefix != bounds.len() {
            continue;
        }
        best = match best {
            None => Some(index),
            Some(b) => {
                let better = (index.is_unique() && !b.is_unique())
                    || (index.is_unique() == b.is_unique() && index.name() < b.name());
                if better {
                    Some(index)
                } else {
                    Some(b)
                }
            }
        };
    }
    best.cloned()
}
