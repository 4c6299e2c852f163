//! # Lookup Join Generation
//!
//! Three related rewrites over indexed access paths:
//!
//! - **Lookup joins** for inner, left, and anti joins whose equality keys
//!   match a prefix of an index on the right operand's leaf table. Longer
//!   prefixes win; among candidates with the same prefix length a unique
//!   index is preferred, then name order for stability. A lookup covering
//!   a unique key is marked injective.
//! - **Concat lookups** when the predicate is a disjunction of equalities
//!   on the same inner column: one template per disjunct, results unioned
//!   by the executor.
//! - **Right-semi lookups**: a semi join whose *left* side is an indexed
//!   leaf flips into `Project(outer cols)(Lookup(Distinct(inner), outer))`,
//!   probing the outer table once per distinct inner key.

use crate::util::{any_subquery, bound_to, split_equalities, EquiPred};
use crate::Rule;
use joinx_core::error::PlanResult;
use joinx_core::ids::{ExprId, GroupId, ScalarId};
use joinx_core::memo::{LeafSource, Memo};
use joinx_core::rel::{Index, IndexScan, JoinBase, JoinKind, RelOp};
use joinx_core::scalar::{CmpOp, ScalarExpr};
use std::collections::HashSet;
use tracing::trace;

#[derive(Default)]
pub struct LookupJoins {
    seen: HashSet<ExprId>,
    /// Semi groups already given a right-semi rewrite.
    rewritten: HashSet<GroupId>,
}

impl Rule for LookupJoins {
    fn name(&self) -> &'static str {
        "LookupJoins"
    }

    fn apply(&mut self, memo: &mut Memo, expr: ExprId) -> PlanResult<bool> {
        if !self.seen.insert(expr) {
            return Ok(false);
        }
        let group = memo.rel(expr).group;
        match memo.rel(expr).op.clone() {
            RelOp::InnerJoin(b) if b.kind == JoinKind::Inner => {
                let mut changed = add_lookup(memo, group, &b)?;
                changed |= add_concat_lookup(memo, group, &b)?;
                Ok(changed)
            }
            RelOp::LeftJoin(b) if b.kind == JoinKind::Left => add_lookup(memo, group, &b),
            RelOp::AntiJoin(b) if b.kind == JoinKind::Anti => add_lookup(memo, group, &b),
            RelOp::SemiJoin(b) if b.kind == JoinKind::Semi => {
                add_right_semi_lookup(memo, group, &b, &mut self.rewritten)
            }
            _ => Ok(false),
        }
    }
}

/// Choose the index whose prefix binds the most equality keys. Returns the
/// index and the probe expressions aligned with its prefix.
fn match_index(
    memo: &Memo,
    leaf: &LeafSource<'_>,
    equis: &[EquiPred],
    key_side_right: bool,
) -> Option<(Index, Vec<ScalarId>)> {
    let mut best: Option<(Index, Vec<ScalarId>)> = None;
    for index in &leaf.base.indexes {
        let mut keys = Vec::new();
        for col in index.cols() {
            // Both sides must be bare columns: the inner one the index
            // column itself, the outer one the probe key.
            let probe = equis.iter().find_map(|e| {
                let (inner, outer) = if key_side_right {
                    (e.right_expr, e.left_expr)
                } else {
                    (e.left_expr, e.right_expr)
                };
                if memo.scalar(outer).expr.as_col_ref().is_none() {
                    return None;
                }
                match memo.scalar(inner).expr.as_col_ref() {
                    Some(c) if c.col == *col => Some(outer),
                    _ => None,
                }
            });
            match probe {
                Some(p) => keys.push(p),
                None => break,
            }
        }
        if keys.is_empty() {
            continue;
        }
        best = match best {
            None => Some((index.clone(), keys)),
            Some((bi, bk)) => {
                let better = keys.len() > bk.len()
                    || (keys.len() == bk.len() && index.is_unique() && !bi.is_unique())
                    || (keys.len() == bk.len()
                        && index.is_unique() == bi.is_unique()
                        && index.name() < bi.name());
                if better {
                    Some((index.clone(), keys))
                } else {
                    Some((bi, bk))
                }
            }
        };
    }
    best
}

fn add_lookup(memo: &mut Memo, group: GroupId, base: &JoinBase) -> PlanResult<bool> {
    if any_subquery(memo, &base.filter) {
        return Ok(false);
    }
    let (equis, _) = split_equalities(memo, base);
    if equis.is_empty() {
        return Ok(false);
    }
    let Some((leaf_group, index, keys, leaf_filters)) = (|| {
        let leaf = memo.leaf_source(base.right)?;
        if any_subquery(memo, &leaf.filters) {
            return None;
        }
        let (index, keys) = match_index(memo, &leaf, &equis, true)?;
        Some((leaf.group, index, keys, leaf.filters))
    })() else {
        return Ok(false);
    };
    if has_lookup_alt(memo, group, index.name()) {
        return Ok(false);
    }

    let mut filter = base.filter.clone();
    filter.extend(leaf_filters);
    memo.memoize_lookup_join(
        Some(group),
        base.left,
        base.right,
        base.kind,
        filter,
        IndexScan::template(leaf_group, index, keys),
    )?;
    trace!(group = %group, "added lookup join");
    Ok(true)
}

/// `x = v1 OR x = v2 OR ...` over a lookupable inner column becomes a
/// concat join holding one lookup template per disjunct.
fn add_concat_lookup(memo: &mut Memo, group: GroupId, base: &JoinBase) -> PlanResult<bool> {
    if base.filter.len() != 1 {
        return Ok(false);
    }
    let mut disjuncts = Vec::new();
    flatten_or(memo, base.filter[0], &mut disjuncts);
    if disjuncts.len() < 2 {
        return Ok(false);
    }

    let left_tables = memo.group(base.left).props.tables.clone();
    let right_tables = memo.group(base.right).props.tables.clone();
    let Some(leaf) = memo.leaf_source(base.right) else {
        return Ok(false);
    };
    if !leaf.filters.is_empty() {
        return Ok(false);
    }
    let leaf_group = leaf.group;
    let indexes = leaf.base.indexes.clone();

    // Every disjunct must be an equality binding the same inner column.
    let mut inner_col = None;
    let mut outer_exprs = Vec::new();
    for d in &disjuncts {
        let ScalarExpr::Cmp {
            op: CmpOp::Eq,
            left,
            right,
        } = &memo.scalar(*d).expr
        else {
            return Ok(false);
        };
        let (inner, outer) = if bound_to(memo, *right, &right_tables)
            && bound_to(memo, *left, &left_tables)
        {
            (*right, *left)
        } else if bound_to(memo, *left, &right_tables) && bound_to(memo, *right, &left_tables) {
            (*left, *right)
        } else {
            return Ok(false);
        };
        let Some(c) = memo.scalar(inner).expr.as_col_ref() else {
            return Ok(false);
        };
        match inner_col {
            None => inner_col = Some(c.col),
            Some(prev) if prev == c.col => {}
            _ => return Ok(false),
        }
        outer_exprs.push(outer);
    }
    let col = inner_col.expect("at least two disjuncts");
    let Some(index) = indexes
        .iter()
        .find(|i| i.cols().first() == Some(&col))
        .cloned()
    else {
        return Ok(false);
    };

    let lookups = outer_exprs
        .into_iter()
        .map(|e| IndexScan::template(leaf_group, index.clone(), vec![e]))
        .collect();
    memo.memoize_concat_join(
        Some(group),
        base.left,
        base.right,
        base.kind,
        base.filter.clone(),
        lookups,
    )?;
    trace!(group = %group, "added concat lookup join");
    Ok(true)
}

/// Semi join with an indexed left leaf: dedup the inner side over the join
/// keys and look up into the outer table instead.
fn add_right_semi_lookup(
    memo: &mut Memo,
    group: GroupId,
    base: &JoinBase,
    rewritten: &mut HashSet<GroupId>,
) -> PlanResult<bool> {
    if rewritten.contains(&group) || any_subquery(memo, &base.filter) {
        return Ok(false);
    }
    let (equis, _) = split_equalities(memo, base);
    if equis.is_empty() {
        return Ok(false);
    }
    // The dedup projection below re-emits the inner key columns, so they
    // must be bare columns.
    let key_cols: Vec<ScalarId> = equis.iter().map(|e| e.right_expr).collect();
    if key_cols
        .iter()
        .any(|k| memo.scalar(*k).expr.as_col_ref().is_none())
    {
        return Ok(false);
    }
    let Some((leaf_group, index, keys, leaf_filters)) = (|| {
        let leaf = memo.leaf_source(base.left)?;
        if any_subquery(memo, &leaf.filters) {
            return None;
        }
        let (index, keys) = match_index(memo, &leaf, &equis, false)?;
        Some((leaf.group, index, keys, leaf.filters))
    })() else {
        return Ok(false);
    };
    rewritten.insert(group);

    let keyed = memo.memoize_project(None, base.right, key_cols)?;
    let distinct = memo.memoize_distinct(None, keyed)?;
    let mut filter = base.filter.clone();
    filter.extend(leaf_filters);
    let lookup = memo.memoize_lookup_join(
        None,
        distinct,
        base.left,
        JoinKind::Inner,
        filter,
        IndexScan::template(leaf_group, index, keys),
    )?;
    let projections: Vec<ScalarId> = {
        let cols = memo.group(base.left).props.cols.clone();
        cols.into_iter()
            .map(|c| {
                let r = memo.col_ref(c).expect("registered output column");
                memo.add_scalar(ScalarExpr::ColRef(r))
            })
            .collect()
    };
    memo.memoize_project(Some(group), lookup, projections)?;
    trace!(group = %group, "added right-semi lookup join");
    Ok(true)
}

fn has_lookup_alt(memo: &Memo, group: GroupId, index: &str) -> bool {
    memo.exprs_of(group).into_iter().any(|eid| {
        matches!(
            &memo.rel(eid).op,
            RelOp::LookupJoin(j) if j.lookup.index.name() == index
        )
    })
}

fn flatten_or(memo: &Memo, sid: ScalarId, out: &mut Vec<ScalarId>) {
    match &memo.scalar(sid).expr {
        ScalarExpr::Or(l, r) => {
            flatten_or(memo, *l, out);
            flatten_or(memo, *r, out);
        }
        _ => out.push(sid),
    }
}
