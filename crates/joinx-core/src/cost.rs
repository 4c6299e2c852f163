//! # Cost Model
//!
//! The coster estimates the incremental cost of a relational alternative
//! from the cardinalities of its operand groups. Costs are additive: a
//! group's total is its chosen alternative's local cost plus the totals of
//! its child groups, accumulated bottom-up during optimization. Source
//! groups cost nothing themselves; operator costs carry the IO of reading
//! their inputs.
//!
//! Cardinality estimation is shared by all alternatives in a group (they
//! produce the same multiset) and is derived once per group from its
//! original logical form. Missing statistics fall back to
//! [`DEFAULT_TABLE_CARDINALITY`]; the coster never fails on absent stats.
//!
//! The model is monotone: adding an operator never reduces a plan's cost.

use crate::error::PlanResult;
use crate::ids::{ExprId, GroupId};
use crate::memo::Memo;
use crate::rel::{IndexScan, JoinBase, JoinKind, RelOp};
use crate::scalar::{ColRef, CmpOp, ScalarExpr};
use crate::stats::{
    StatsProvider, DEFAULT_FILTER_SELECTIVITY, DEFAULT_RANGE_SELECTIVITY, DEFAULT_TABLE_CARDINALITY,
};

/// Cost of touching one row sequentially.
pub const SEQ_IO_COST_FACTOR: f64 = 1.0;
/// Cost of one random (index probe) access.
pub const RAND_IO_COST_FACTOR: f64 = 1.3;
/// Cost of processing one row in memory.
pub const CPU_COST_FACTOR: f64 = 0.01;
/// Per-row cost of materializing the build side of a hash join.
pub const MEM_COST_FACTOR: f64 = 2.0;
/// Discount for the per-template probes of a concat lookup.
pub const CONCAT_COST_FACTOR: f64 = 0.75;
/// Multiplier applied to degenerate (filterless cross) nested loops.
pub const DEGENERATE_PENALTY: f64 = 10.0;
/// Average fraction of the range side assumed live in a range-heap.
pub const RANGE_HEAP_ACTIVE_FRACTION: f64 = 0.1;
/// Multiplier on per-row subquery execution. Re-running a subquery plan per
/// input row re-reads its relations without any of the sharing a join gets.
pub const SUBQUERY_COST_FACTOR: f64 = 2.0;

/// Coster implementations estimate the incremental cost of one relational
/// alternative. The default model is [`DefaultCoster`]; sessions may swap in
/// their own.
pub trait Coster: Send + Sync {
    fn estimate_cost(
        &self,
        memo: &Memo,
        expr: ExprId,
        stats: &dyn StatsProvider,
    ) -> PlanResult<f64>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultCoster;

impl Coster for DefaultCoster {
    fn estimate_cost(
        &self,
        memo: &Memo,
        expr: ExprId,
        stats: &dyn StatsProvider,
    ) -> PlanResult<f64> {
        let node = memo.rel(expr);
        let out = memo.group(node.group).card;
        let cost = match &node.op {
            // Source access is charged to the operator that reads it.
            RelOp::TableScan(_)
            | RelOp::TableAlias(_)
            | RelOp::IndexScan(_)
            | RelOp::Values(_)
            | RelOp::SubqueryAlias(_)
            | RelOp::RecursiveCte(_)
            | RelOp::RecursiveTable(_)
            | RelOp::TableFunc(_)
            | RelOp::EmptyTable(_) => 0.0,

            RelOp::Filter { child, filters } => {
                let in_card = memo.group(*child).card;
                let mut cost = in_card * CPU_COST_FACTOR * filters.len().max(1) as f64;
                // Filters that still hold a subquery re-execute the
                // subquery relation once per input row. The rescan reads
                // the relation under the subquery's filters, not its
                // (possibly tiny) output.
                for f in filters {
                    let mut roots = Vec::new();
                    memo.collect_subquery_roots(*f, &mut roots);
                    for root in roots {
                        cost += in_card
                            * rescan_card(memo, root)
                            * SEQ_IO_COST_FACTOR
                            * SUBQUERY_COST_FACTOR;
                    }
                }
                cost
            }
            RelOp::Project { child, .. } => memo.group(*child).card * CPU_COST_FACTOR,
            // Distinct enforcement is costed by the optimization loop, which
            // knows whether the input arrives sorted.
            RelOp::Distinct { .. } => 0.0,
            RelOp::Max1Row { child } => memo.group(*child).card * CPU_COST_FACTOR,

            RelOp::CrossJoin(b) => {
                let l = memo.group(b.left).card;
                let r = rescan_card(memo, b.right);
                l * SEQ_IO_COST_FACTOR + l * r * SEQ_IO_COST_FACTOR * DEGENERATE_PENALTY
            }
            // Unoptimized nested loop: read the outer side once and rescan
            // the inner relation once per outer row. The rescan reads the
            // relation underneath any filter, not the filtered output.
            RelOp::InnerJoin(b) | RelOp::LeftJoin(b) | RelOp::FullOuterJoin(b)
            | RelOp::SemiJoin(b) | RelOp::AntiJoin(b) => {
                let l = memo.group(b.left).card;
                let r = rescan_card(memo, b.right);
                l * SEQ_IO_COST_FACTOR + l * r * SEQ_IO_COST_FACTOR
            }
            RelOp::HashJoin(j) => {
                let (l, r) = operand_cards(memo, &j.base);
                (l + r) * SEQ_IO_COST_FACTOR + r * MEM_COST_FACTOR + out * CPU_COST_FACTOR
            }
            RelOp::LookupJoin(j) => {
                let (l, _) = operand_cards(memo, &j.base);
                let probe = if j.injective {
                    RAND_IO_COST_FACTOR * 0.9
                } else {
                    RAND_IO_COST_FACTOR
                };
                l * (SEQ_IO_COST_FACTOR + probe)
                    + lookup_fanout(memo, &j.lookup) * CPU_COST_FACTOR * l
                    + out * CPU_COST_FACTOR
            }
            RelOp::ConcatJoin(j) => {
                let (l, _) = operand_cards(memo, &j.base);
                let probes = j.concat.len() as f64;
                l * SEQ_IO_COST_FACTOR
                    + l * probes * RAND_IO_COST_FACTOR * CONCAT_COST_FACTOR
                    + out * CPU_COST_FACTOR
            }
            RelOp::MergeJoin(j) => {
                let (l, r) = operand_cards(memo, &j.base);
                let mut cost =
                    (l + r) * (SEQ_IO_COST_FACTOR + CPU_COST_FACTOR) + out * CPU_COST_FACTOR;
                if !covering(memo, &j.inner_scan) || !covering(memo, &j.outer_scan) {
                    cost += (l + r) * CPU_COST_FACTOR * 10.0;
                }
                cost
            }
            RelOp::RangeHeapJoin(j) => {
                let (l, r) = operand_cards(memo, &j.base);
                let active_avg = (r * RANGE_HEAP_ACTIVE_FRACTION).max(1.0);
                (l + r) * SEQ_IO_COST_FACTOR + active_avg * l * CPU_COST_FACTOR
            }
        };
        Ok(cost)
    }
}

fn operand_cards(memo: &Memo, base: &JoinBase) -> (f64, f64) {
    (memo.group(base.left).card, memo.group(base.right).card)
}

/// Rows touched when re-executing a relation from scratch. For a filtered
/// relation that is the unfiltered input, not the filter's output.
fn rescan_card(memo: &Memo, group: GroupId) -> f64 {
    match &memo.rel(memo.original_of(group)).op {
        RelOp::Filter { child, .. } => memo.group(*child).card,
        _ => memo.group(group).card,
    }
}

/// Expected inner matches per probe. Unique indexes bind at most one row;
/// wider prefixes fan out by the key's duplication factor.
fn lookup_fanout(memo: &Memo, scan: &IndexScan) -> f64 {
    if scan.index.is_unique() && scan.keys.len() >= scan.index.cols().len() {
        return 1.0;
    }
    let rows = memo.group(scan.group).card.max(1.0);
    // Without per-key statistics, assume the bound prefix divides the table
    // evenly: a fully bound prefix yields one match, shorter prefixes fan
    // out geometrically.
    let bound = scan.keys.len().min(scan.index.cols().len()) as f64;
    let width = scan.index.cols().len().max(1) as f64;
    rows.powf(1.0 - bound / width).max(1.0)
}

/// Whether the index covers the source's output columns, sparing a
/// primary-row fetch per match.
fn covering(memo: &Memo, scan: &IndexScan) -> bool {
    let props = &memo.group(scan.group).props;
    props.col_set.is_subset_of(scan.index.col_set())
}

// ----------------------------------------------------------------------
// Cardinality estimation
// ----------------------------------------------------------------------

/// Estimate a group's output cardinality from its original logical form.
/// Child groups must already carry their estimates.
pub fn estimate_group_card(memo: &Memo, group: GroupId, stats: &dyn StatsProvider) -> f64 {
    let original = memo.original_of(group);
    let card = match &memo.rel(original).op {
        RelOp::TableScan(b)
        | RelOp::TableAlias(b)
        | RelOp::RecursiveTable(b)
        | RelOp::TableFunc(b) => stats.row_count(&b.table).unwrap_or(DEFAULT_TABLE_CARDINALITY),
        RelOp::EmptyTable(_) => 0.0,
        RelOp::Values(v) => v.rows.len() as f64,
        RelOp::IndexScan(s) => memo.group(s.group).card,
        RelOp::SubqueryAlias(d) | RelOp::RecursiveCte(d) => memo.group(d.child).card,
        RelOp::Filter { child, filters } => {
            let sel: f64 = filters
                .iter()
                .map(|f| filter_selectivity(memo, stats, *f))
                .product();
            memo.group(*child).card * sel
        }
        RelOp::Project { child, .. } | RelOp::Distinct { child } => memo.group(*child).card,
        RelOp::Max1Row { .. } => 1.0,
        op => {
            let base = op.join_base().expect("join operator");
            join_card(memo, stats, base)
        }
    };
    card.max(1.0)
}

fn join_card(memo: &Memo, stats: &dyn StatsProvider, base: &JoinBase) -> f64 {
    let l = memo.group(base.left).card;
    let r = memo.group(base.right).card;
    if base.kind.is_semi() || base.kind.is_anti() {
        // Existence checks cannot grow the left side.
        return l;
    }
    if base.kind.is_cross() && base.filter.is_empty() {
        return l * r;
    }

    // Standard equi-join formula: |L ⋈ R| = |L|·|R| / max(ndv(l), ndv(r))
    // per equality, independence across equalities.
    let mut sel = 1.0;
    for f in &base.filter {
        if let Some((lc, rc)) = equality_col_pair(memo, base, *f) {
            let lndv = col_ndv(memo, stats, &lc).unwrap_or_else(|| memo.group(base.left).card);
            let rndv = col_ndv(memo, stats, &rc).unwrap_or_else(|| memo.group(base.right).card);
            sel /= lndv.max(rndv).max(1.0);
        } else {
            sel *= filter_selectivity(memo, stats, *f);
        }
    }
    let inner = l * r * sel;
    if base.kind.is_left_outer() {
        inner.max(l)
    } else if base.kind == JoinKind::FullOuter {
        inner.max(l + r)
    } else {
        inner
    }
}

/// If `filter` is an equality whose sides reference exactly one operand
/// each, return the column refs anchoring each side.
fn equality_col_pair(memo: &Memo, base: &JoinBase, filter: crate::ids::ScalarId) -> Option<(ColRef, ColRef)> {
    let ScalarExpr::Cmp {
        op: CmpOp::Eq,
        left,
        right,
    } = &memo.scalar(filter).expr
    else {
        return None;
    };
    let l_tables = memo.scalar_tables(*left);
    let r_tables = memo.scalar_tables(*right);
    let lt = &memo.group(base.left).props.tables;
    let rt = &memo.group(base.right).props.tables;
    let aligned = l_tables.is_subset_of(lt) && r_tables.is_subset_of(rt)
        || l_tables.is_subset_of(rt) && r_tables.is_subset_of(lt);
    if !aligned {
        return None;
    }
    let lc = anchor_col(memo, *left)?;
    let rc = anchor_col(memo, *right)?;
    Some((lc, rc))
}

/// The single column reference an expression is anchored on, if any.
pub fn anchor_col(memo: &Memo, id: crate::ids::ScalarId) -> Option<ColRef> {
    match &memo.scalar(id).expr {
        ScalarExpr::ColRef(c) => Some(c.clone()),
        ScalarExpr::Arithmetic { left, right, .. } => {
            let l = memo.scalar(*left).expr.as_col_ref().cloned();
            let r = memo.scalar(*right).expr.as_col_ref().cloned();
            match (l, r) {
                (Some(c), None) | (None, Some(c)) => Some(c),
                _ => None,
            }
        }
        _ => None,
    }
}

fn col_ndv(memo: &Memo, stats: &dyn StatsProvider, col: &ColRef) -> Option<f64> {
    let base = memo.source_base(col.group)?;
    stats.distinct_values(&base.table, &col.name)
}

fn numeric_literal(memo: &Memo, id: crate::ids::ScalarId) -> Option<f64> {
    match &memo.scalar(id).expr {
        ScalarExpr::Literal(crate::scalar::ScalarValue::Int64(v)) => Some(*v as f64),
        ScalarExpr::Literal(crate::scalar::ScalarValue::Float64(v)) => Some(v.into_inner()),
        _ => None,
    }
}

/// Fraction of rows a predicate keeps.
pub fn filter_selectivity(memo: &Memo, stats: &dyn StatsProvider, id: crate::ids::ScalarId) -> f64 {
    match &memo.scalar(id).expr {
        ScalarExpr::Cmp { op: CmpOp::Eq | CmpOp::NullSafeEq, left, right } => {
            let cols = [anchor_col(memo, *left), anchor_col(memo, *right)];
            for c in cols.into_iter().flatten() {
                if let Some(ndv) = col_ndv(memo, stats, &c) {
                    return 1.0 / ndv.max(1.0);
                }
            }
            DEFAULT_FILTER_SELECTIVITY
        }
        ScalarExpr::Cmp { op, left, right } => {
            // Range predicate: a histogram gives a real fraction, otherwise
            // fall back to the fixed heuristic.
            let oriented = match (
                anchor_col(memo, *left),
                numeric_literal(memo, *right),
                anchor_col(memo, *right),
                numeric_literal(memo, *left),
            ) {
                (Some(c), Some(v), _, _) => Some((c, v, *op)),
                (_, _, Some(c), Some(v)) => Some((c, v, op.swap())),
                _ => None,
            };
            if let Some((col, bound, op)) = oriented {
                if let Some(hist) = memo
                    .source_base(col.group)
                    .and_then(|b| stats.histogram(&b.table, &col.name))
                {
                    let below = hist.fraction_below(bound);
                    return match op {
                        CmpOp::Lt | CmpOp::Leq => below,
                        CmpOp::Gt | CmpOp::Geq => 1.0 - below,
                        _ => DEFAULT_RANGE_SELECTIVITY,
                    };
                }
            }
            DEFAULT_RANGE_SELECTIVITY
        }
        ScalarExpr::InTuple { left, right } => {
            let k = match &memo.scalar(*right).expr {
                ScalarExpr::Tuple(vals) => vals.len() as f64,
                _ => 1.0,
            };
            let eq = match anchor_col(memo, *left).and_then(|c| col_ndv(memo, stats, &c)) {
                Some(ndv) => 1.0 / ndv.max(1.0),
                None => DEFAULT_FILTER_SELECTIVITY,
            };
            (k * eq).min(1.0)
        }
        ScalarExpr::Not(c) => 1.0 - filter_selectivity(memo, stats, *c),
        ScalarExpr::And(l, r) => {
            filter_selectivity(memo, stats, *l) * filter_selectivity(memo, stats, *r)
        }
        ScalarExpr::Or(l, r) => {
            1.0 - (1.0 - filter_selectivity(memo, stats, *l))
                * (1.0 - filter_selectivity(memo, stats, *r))
        }
        _ => DEFAULT_FILTER_SELECTIVITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MemoryCatalog, SqlType, TableDef, TableRef};
    use crate::context::{PlanConfig, PlanContext};
    use crate::logical::{self, LogicalJoinKind};
    use crate::memo::Memo;
    use crate::memoize::memoize_plan;
    use crate::scalar::CmpOp;
    use crate::stats::{Histogram, HistogramBucket, MemoryStats};

    fn catalog() -> MemoryCatalog {
        let mut cat = MemoryCatalog::new();
        cat.add_table(
            TableDef::new(TableRef::new("db", "xy"))
                .with_column("x", SqlType::Int64)
                .with_column("y", SqlType::Int64)
                .with_primary_key(&["x"]),
        );
        cat.add_table(
            TableDef::new(TableRef::new("db", "uv"))
                .with_column("u", SqlType::Int64)
                .with_column("v", SqlType::Int64)
                .with_primary_key(&["u"]),
        );
        cat
    }

    fn stats() -> MemoryStats {
        let mut s = MemoryStats::new();
        s.set_row_count(&TableRef::new("db", "xy"), 1000.0);
        s.set_row_count(&TableRef::new("db", "uv"), 1000.0);
        s
    }

    #[test]
    fn test_histogram_drives_range_cardinality() {
        let mut s = stats();
        s.set_histogram(
            &TableRef::new("db", "xy"),
            "y",
            Histogram {
                buckets: vec![HistogramBucket {
                    lower: 0.0,
                    upper: 20.0,
                    count: 1000.0,
                    distinct: 20.0,
                }],
            },
        );
        let plan = logical::filter(
            logical::scan("db", "xy"),
            vec![logical::cmp(CmpOp::Gt, logical::col("xy", "y"), logical::lit(15))],
        );
        let mut memo = Memo::new(PlanConfig::default());
        memoize_plan(&mut memo, &catalog(), &plan).unwrap();
        memo.optimize_root(&DefaultCoster, &s, &PlanContext::new())
            .unwrap();

        // y > 15 keeps a quarter of a uniform [0, 20] column.
        let root = memo.root().unwrap();
        assert!((memo.group(root).card - 250.0).abs() < 1.0);
    }

    #[test]
    fn test_hash_join_beats_nested_loop() {
        let plan = logical::join(
            LogicalJoinKind::Inner,
            logical::scan("db", "xy"),
            logical::scan("db", "uv"),
            vec![logical::eq(logical::col("xy", "x"), logical::col("uv", "u"))],
        );
        let mut memo = Memo::new(PlanConfig::default());
        let root = memoize_plan(&mut memo, &catalog(), &plan).unwrap();

        let base = memo
            .rel(memo.group(root).first)
            .op
            .join_base()
            .unwrap()
            .clone();
        let (left_key, right_key) = {
            let ScalarExpr::Cmp { left, right, .. } = memo.scalar(base.filter[0]).expr.clone()
            else {
                panic!("expected equality");
            };
            (left, right)
        };
        memo.memoize_hash_join(
            Some(root),
            base.left,
            base.right,
            JoinKind::Hash,
            base.filter.clone(),
            vec![left_key],
            vec![right_key],
        )
        .unwrap();
        memo.optimize_root(&DefaultCoster, &stats(), &PlanContext::new())
            .unwrap();

        let best = memo.group(root).best.unwrap();
        assert!(matches!(memo.rel(best).op, RelOp::HashJoin(_)));
    }

    #[test]
    fn test_equality_selectivity_uses_ndv() {
        let mut s = stats();
        s.set_distinct_values(&TableRef::new("db", "xy"), "y", 4.0);
        let plan = logical::filter(
            logical::scan("db", "xy"),
            vec![logical::eq(logical::col("xy", "y"), logical::lit(2))],
        );
        let mut memo = Memo::new(PlanConfig::default());
        memoize_plan(&mut memo, &catalog(), &plan).unwrap();
        memo.optimize_root(&DefaultCoster, &s, &PlanContext::new())
            .unwrap();

        let root = memo.root().unwrap();
        assert!((memo.group(root).card - 250.0).abs() < 1.0);
    }
}
