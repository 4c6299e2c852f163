//! # Relational Alternatives
//!
//! [`RelOp`] is the tagged variant over every relational operator the memo
//! can hold: sources, unary shapes, and the join lattice. Dispatch is an
//! exhaustive `match` in the format, cost, and build functions; adding an
//! operator means extending the variant and letting the compiler point at
//! every match arm that needs a case.
//!
//! A [`RelExprNode`] wraps a `RelOp` for use as an expression-group
//! linked-list node: it carries the owning group, the `next` link, the cost
//! assigned during optimization, and the distinct-enforcement decision.

use crate::catalog::{Column, IndexDef, TableRef};
use crate::ids::{ColSet, ColumnId, ExprId, GroupId, ScalarId, TableId};
use crate::scalar::ScalarValue;
use serde::{Deserialize, Serialize};

/// Physical and logical join kinds. The "plain" kinds (`Inner`, `Left`,
/// `Semi`, ...) double as the unoptimized nested-loop implementation; the
/// rest name a physical algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    Cross,
    CrossHash,
    Inner,
    Hash,
    Lookup,
    Merge,
    RangeHeap,
    Left,
    LeftOuterHash,
    LeftOuterLookup,
    LeftOuterMerge,
    LeftOuterRangeHeap,
    /// Left-outer hash join that additionally drops rows once a NULL join
    /// key is seen on the build side. This is the MySQL-faithful rendition
    /// of `NOT IN` against a possibly-NULL subquery.
    LeftOuterHashExcludeNulls,
    FullOuter,
    Semi,
    SemiHash,
    SemiLookup,
    SemiMerge,
    Anti,
    AntiHash,
    AntiLookup,
    AntiMerge,
}

impl JoinKind {
    /// The lookup-implemented form of this join kind.
    pub fn as_lookup(self) -> JoinKind {
        match self {
            JoinKind::Cross | JoinKind::Inner | JoinKind::Hash | JoinKind::Merge => JoinKind::Lookup,
            JoinKind::Left | JoinKind::LeftOuterHash | JoinKind::LeftOuterMerge => {
                JoinKind::LeftOuterLookup
            }
            JoinKind::Semi | JoinKind::SemiHash | JoinKind::SemiMerge => JoinKind::SemiLookup,
            JoinKind::Anti | JoinKind::AntiHash | JoinKind::AntiMerge => JoinKind::AntiLookup,
            other => other,
        }
    }

    /// The hash-implemented form of this join kind.
    pub fn as_hash(self) -> JoinKind {
        match self {
            JoinKind::Cross => JoinKind::CrossHash,
            JoinKind::Inner | JoinKind::Lookup | JoinKind::Merge => JoinKind::Hash,
            JoinKind::Left | JoinKind::LeftOuterLookup | JoinKind::LeftOuterMerge => {
                JoinKind::LeftOuterHash
            }
            JoinKind::Semi | JoinKind::SemiLookup | JoinKind::SemiMerge => JoinKind::SemiHash,
            JoinKind::Anti | JoinKind::AntiLookup | JoinKind::AntiMerge => JoinKind::AntiHash,
            other => other,
        }
    }

    /// The merge-implemented form of this join kind.
    pub fn as_merge(self) -> JoinKind {
        match self {
            JoinKind::Inner | JoinKind::Hash | JoinKind::Lookup => JoinKind::Merge,
            JoinKind::Left | JoinKind::LeftOuterHash | JoinKind::LeftOuterLookup => {
                JoinKind::LeftOuterMerge
            }
            JoinKind::Semi => JoinKind::SemiMerge,
            JoinKind::Anti => JoinKind::AntiMerge,
            other => other,
        }
    }

    /// The range-heap form of this join kind.
    pub fn as_range_heap(self) -> JoinKind {
        match self {
            JoinKind::Inner => JoinKind::RangeHeap,
            JoinKind::Left => JoinKind::LeftOuterRangeHeap,
            other => other,
        }
    }

    /// Every left row survives at least once, right side NULL-padded.
    pub fn is_left_outer(self) -> bool {
        matches!(
            self,
            JoinKind::Left
                | JoinKind::LeftOuterHash
                | JoinKind::LeftOuterLookup
                | JoinKind::LeftOuterMerge
                | JoinKind::LeftOuterRangeHeap
                | JoinKind::LeftOuterHashExcludeNulls
        )
    }

    /// Output columns come from the left side only.
    pub fn is_semi(self) -> bool {
        matches!(
            self,
            JoinKind::Semi | JoinKind::SemiHash | JoinKind::SemiLookup | JoinKind::SemiMerge
        )
    }

    pub fn is_anti(self) -> bool {
        matches!(
            self,
            JoinKind::Anti | JoinKind::AntiHash | JoinKind::AntiLookup | JoinKind::AntiMerge
        )
    }

    pub fn is_inner(self) -> bool {
        matches!(
            self,
            JoinKind::Inner | JoinKind::Hash | JoinKind::Lookup | JoinKind::Merge | JoinKind::RangeHeap
        )
    }

    pub fn is_cross(self) -> bool {
        matches!(self, JoinKind::Cross | JoinKind::CrossHash)
    }

    pub fn is_hash(self) -> bool {
        matches!(
            self,
            JoinKind::Hash
                | JoinKind::CrossHash
                | JoinKind::LeftOuterHash
                | JoinKind::SemiHash
                | JoinKind::AntiHash
                | JoinKind::LeftOuterHashExcludeNulls
        )
    }

    pub fn is_lookup(self) -> bool {
        matches!(
            self,
            JoinKind::Lookup | JoinKind::LeftOuterLookup | JoinKind::SemiLookup | JoinKind::AntiLookup
        )
    }

    pub fn is_merge(self) -> bool {
        matches!(
            self,
            JoinKind::Merge | JoinKind::LeftOuterMerge | JoinKind::SemiMerge | JoinKind::AntiMerge
        )
    }

    pub fn is_range_heap(self) -> bool {
        matches!(self, JoinKind::RangeHeap | JoinKind::LeftOuterRangeHeap)
    }

    pub fn name(self) -> &'static str {
        match self {
            JoinKind::Cross => "Cross",
            JoinKind::CrossHash => "CrossHash",
            JoinKind::Inner => "Inner",
            JoinKind::Hash => "Hash",
            JoinKind::Lookup => "Lookup",
            JoinKind::Merge => "Merge",
            JoinKind::RangeHeap => "RangeHeap",
            JoinKind::Left => "LeftOuter",
            JoinKind::LeftOuterHash => "LeftOuterHash",
            JoinKind::LeftOuterLookup => "LeftOuterLookup",
            JoinKind::LeftOuterMerge => "LeftOuterMerge",
            JoinKind::LeftOuterRangeHeap => "LeftOuterRangeHeap",
            JoinKind::LeftOuterHashExcludeNulls => "LeftOuterHashExcludeNulls",
            JoinKind::FullOuter => "FullOuter",
            JoinKind::Semi => "Semi",
            JoinKind::SemiHash => "SemiHash",
            JoinKind::SemiLookup => "SemiLookup",
            JoinKind::SemiMerge => "SemiMerge",
            JoinKind::Anti => "Anti",
            JoinKind::AntiHash => "AntiHash",
            JoinKind::AntiLookup => "AntiLookup",
            JoinKind::AntiMerge => "AntiMerge",
        }
    }
}

/// An index over a memoized source: the ordered key columns as query-global
/// ids, the unordered set form, and the catalog definition it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub order: Vec<ColumnId>,
    pub set: ColSet,
    pub def: IndexDef,
}

impl Index {
    pub fn new(order: Vec<ColumnId>, def: IndexDef) -> Self {
        let set = order.iter().copied().collect();
        Self { order, set, def }
    }

    pub fn cols(&self) -> &[ColumnId] {
        &self.order
    }

    pub fn col_set(&self) -> &ColSet {
        &self.set
    }

    pub fn is_unique(&self) -> bool {
        self.def.unique
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }
}

/// Shared fields of every concrete data source.
#[derive(Debug, Clone)]
pub struct SourceBase {
    pub table: TableRef,
    /// Lowercased name the source is resolved as (alias if one was given).
    pub alias: String,
    pub table_id: TableId,
    /// Output column ids, aligned with `schema`.
    pub cols: Vec<ColumnId>,
    pub schema: Vec<Column>,
    pub indexes: Vec<Index>,
}

impl SourceBase {
    /// The id of the named output column, if present.
    pub fn col_id(&self, name: &str) -> Option<ColumnId> {
        self.schema
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .map(|i| self.cols[i])
    }
}

/// How a filter conjunct binds one index key column in a static scan.
#[derive(Debug, Clone)]
pub enum ColumnBound {
    /// `col = value`.
    Eq(ScalarId),
    /// `col IN (v1, v2, ...)`.
    InTuple(Vec<ScalarId>),
    /// Half-open or closed range; the flag marks an inclusive bound.
    Range {
        lo: Option<(ScalarId, bool)>,
        hi: Option<(ScalarId, bool)>,
    },
}

/// An index-based source. Static index scans read the ranges bound from
/// filter conjuncts; a lookup template instead carries probe `keys` that a
/// lookup join binds per outer row.
#[derive(Debug, Clone)]
pub struct IndexScan {
    /// The source group this scan reads.
    pub group: GroupId,
    pub index: Index,
    /// Probe expressions aligned with the index key prefix. Empty for a
    /// static scan.
    pub keys: Vec<ScalarId>,
    /// Static bounds aligned with the index key prefix, one per bound
    /// column. Empty for a lookup template.
    pub ranges: Vec<(ColumnId, ColumnBound)>,
}

impl IndexScan {
    /// A lookup template probing `index` with `keys`.
    pub fn template(group: GroupId, index: Index, keys: Vec<ScalarId>) -> Self {
        Self {
            group,
            index,
            keys,
            ranges: vec![],
        }
    }

    /// A static scan over pre-bound ranges.
    pub fn with_ranges(group: GroupId, index: Index, ranges: Vec<(ColumnId, ColumnBound)>) -> Self {
        Self {
            group,
            index,
            keys: vec![],
            ranges,
        }
    }
}

/// Value-against-interval join descriptor: `value_col` is probed against
/// `[min_col, max_col]` intervals from the other operand, with per-bound
/// closedness. The range side is streamed ordered by `min_col`, from
/// `min_index` when one exists and a sort otherwise.
#[derive(Debug, Clone)]
pub struct RangeHeap {
    pub value_col: ScalarId,
    pub min_col: ScalarId,
    pub max_col: ScalarId,
    pub closed_lower: bool,
    pub closed_upper: bool,
    pub min_index: Option<IndexScan>,
}

/// Fields shared by every join alternative.
#[derive(Debug, Clone)]
pub struct JoinBase {
    pub kind: JoinKind,
    pub left: GroupId,
    pub right: GroupId,
    pub filter: Vec<ScalarId>,
}

#[derive(Debug, Clone)]
pub struct LookupJoin {
    pub base: JoinBase,
    pub lookup: IndexScan,
    /// At most one inner row per outer row: the lookup covers a unique key
    /// of the inner side.
    pub injective: bool,
}

/// A lookup join over a disjunction: the executor unions the results of each
/// lookup template.
#[derive(Debug, Clone)]
pub struct ConcatJoin {
    pub base: JoinBase,
    pub concat: Vec<IndexScan>,
}

#[derive(Debug, Clone)]
pub struct HashJoin {
    pub base: JoinBase,
    /// Probe-side key expressions, aligned with `right_attrs`.
    pub left_attrs: Vec<ScalarId>,
    /// Build-side key expressions.
    pub right_attrs: Vec<ScalarId>,
}

#[derive(Debug, Clone)]
pub struct MergeJoin {
    pub base: JoinBase,
    pub inner_scan: IndexScan,
    pub outer_scan: IndexScan,
    /// The comparison's left operand comes from the right-side table.
    pub swap_cmp: bool,
}

#[derive(Debug, Clone)]
pub struct RangeHeapJoin {
    pub base: JoinBase,
    pub range_heap: RangeHeap,
}

/// A derived-table source: opaque to join planning but its relation is still
/// memoized underneath.
#[derive(Debug, Clone)]
pub struct DerivedSource {
    pub base: SourceBase,
    pub child: GroupId,
}

/// A list of literal rows used as a relation.
#[derive(Debug, Clone)]
pub struct ValuesSource {
    pub base: SourceBase,
    pub rows: Vec<Vec<ScalarValue>>,
}

/// Every relational alternative the memo can hold.
#[derive(Debug, Clone)]
pub enum RelOp {
    // Sources.
    TableScan(SourceBase),
    TableAlias(SourceBase),
    IndexScan(IndexScan),
    Values(ValuesSource),
    SubqueryAlias(DerivedSource),
    RecursiveCte(DerivedSource),
    RecursiveTable(SourceBase),
    TableFunc(SourceBase),
    EmptyTable(SourceBase),
    // Unary.
    Project {
        child: GroupId,
        projections: Vec<ScalarId>,
    },
    Filter {
        child: GroupId,
        filters: Vec<ScalarId>,
    },
    Distinct {
        child: GroupId,
    },
    Max1Row {
        child: GroupId,
    },
    // Joins.
    CrossJoin(JoinBase),
    InnerJoin(JoinBase),
    LeftJoin(JoinBase),
    FullOuterJoin(JoinBase),
    SemiJoin(JoinBase),
    AntiJoin(JoinBase),
    LookupJoin(LookupJoin),
    ConcatJoin(ConcatJoin),
    HashJoin(HashJoin),
    MergeJoin(MergeJoin),
    RangeHeapJoin(RangeHeapJoin),
}

impl RelOp {
    /// Operand groups, in order. Sources have none; joins have two.
    pub fn children(&self) -> Vec<GroupId> {
        match self {
            RelOp::TableScan(_)
            | RelOp::TableAlias(_)
            | RelOp::IndexScan(_)
            | RelOp::Values(_)
            | RelOp::RecursiveTable(_)
            | RelOp::TableFunc(_)
            | RelOp::EmptyTable(_) => vec![],
            RelOp::SubqueryAlias(d) | RelOp::RecursiveCte(d) => vec![d.child],
            RelOp::Project { child, .. }
            | RelOp::Filter { child, .. }
            | RelOp::Distinct { child }
            | RelOp::Max1Row { child } => vec![*child],
            _ => match self.join_base() {
                Some(b) => vec![b.left, b.right],
                None => vec![],
            },
        }
    }

    pub fn join_base(&self) -> Option<&JoinBase> {
        match self {
            RelOp::CrossJoin(b)
            | RelOp::InnerJoin(b)
            | RelOp::LeftJoin(b)
            | RelOp::FullOuterJoin(b)
            | RelOp::SemiJoin(b)
            | RelOp::AntiJoin(b) => Some(b),
            RelOp::LookupJoin(j) => Some(&j.base),
            RelOp::ConcatJoin(j) => Some(&j.base),
            RelOp::HashJoin(j) => Some(&j.base),
            RelOp::MergeJoin(j) => Some(&j.base),
            RelOp::RangeHeapJoin(j) => Some(&j.base),
            _ => None,
        }
    }

    pub fn join_kind(&self) -> Option<JoinKind> {
        self.join_base().map(|b| b.kind)
    }

    pub fn source_base(&self) -> Option<&SourceBase> {
        match self {
            RelOp::TableScan(b)
            | RelOp::TableAlias(b)
            | RelOp::RecursiveTable(b)
            | RelOp::TableFunc(b)
            | RelOp::EmptyTable(b) => Some(b),
            RelOp::Values(v) => Some(&v.base),
            RelOp::SubqueryAlias(d) | RelOp::RecursiveCte(d) => Some(&d.base),
            _ => None,
        }
    }

    pub fn is_source(&self) -> bool {
        self.source_base().is_some() || matches!(self, RelOp::IndexScan(_))
    }

    pub fn is_join(&self) -> bool {
        self.join_base().is_some()
    }
}

/// Distinct-enforcement decision made during optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistinctOp {
    #[default]
    None,
    /// Input already sorted on the output columns; dedup is free.
    Sorted,
    Hash,
}

/// A relational alternative threaded into its group's linked list.
#[derive(Debug, Clone)]
pub struct RelExprNode {
    pub op: RelOp,
    pub group: GroupId,
    pub next: Option<ExprId>,
    pub cost: f64,
    pub distinct: DistinctOp,
}

impl RelExprNode {
    pub fn new(op: RelOp, group: GroupId) -> Self {
        Self {
            op,
            group,
            next: None,
            cost: 0.0,
            distinct: DistinctOp::None,
        }
    }
}
