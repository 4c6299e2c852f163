//! Shared predicate-decomposition helpers for the physical-alternative
//! rules.

use joinx_core::ids::{ScalarId, TableSet};
use joinx_core::memo::Memo;
use joinx_core::rel::JoinBase;
use joinx_core::scalar::{CmpOp, ScalarExpr};

/// An equality conjunct split across a join: `left_expr` is evaluable
/// against the join's left operand only, `right_expr` against the right.
/// `swapped` records that the comparison's written left operand came from
/// the right-side table.
#[derive(Debug, Clone)]
pub struct EquiPred {
    pub left_expr: ScalarId,
    pub right_expr: ScalarId,
    pub swapped: bool,
}

/// Whether a scalar references only tables of `side`, and at least one.
pub fn bound_to(memo: &Memo, sid: ScalarId, side: &TableSet) -> bool {
    let tables = memo.scalar_tables(sid);
    !tables.is_empty() && tables.is_subset_of(side)
}

/// Split a join's filter into equality conjuncts whose sides each bind to
/// exactly one operand, plus the residual predicates.
pub fn split_equalities(memo: &Memo, base: &JoinBase) -> (Vec<EquiPred>, Vec<ScalarId>) {
    let left_tables = memo.group(base.left).props.tables.clone();
    let right_tables = memo.group(base.right).props.tables.clone();
    let mut equis = Vec::new();
    let mut residual = Vec::new();
    for f in &base.filter {
        match &memo.scalar(*f).expr {
            ScalarExpr::Cmp {
                op: CmpOp::Eq,
                left,
                right,
            } => {
                if bound_to(memo, *left, &left_tables) && bound_to(memo, *right, &right_tables) {
                    equis.push(EquiPred {
                        left_expr: *left,
                        right_expr: *right,
                        swapped: false,
                    });
                } else if bound_to(memo, *left, &right_tables)
                    && bound_to(memo, *right, &left_tables)
                {
                    equis.push(EquiPred {
                        left_expr: *right,
                        right_expr: *left,
                        swapped: true,
                    });
                } else {
                    residual.push(*f);
                }
            }
            _ => residual.push(*f),
        }
    }
    (equis, residual)
}

/// Whether any of the given filters still holds a subquery. Physical access
/// paths do not apply over per-row subquery evaluation.
pub fn any_subquery(memo: &Memo, filters: &[ScalarId]) -> bool {
    filters.iter().any(|f| memo.scalar_has_subquery(*f))
}
