//! # The Memo
//!
//! The memo collects a forest of query plans structured by logical and
//! physical equivalency. Logically equivalent plans, represented by an
//! [`ExprGroup`], produce the same rows (possibly unordered) and output
//! columns. Alternatives are stored in a linked list within each group;
//! transformation passes prepend new alternatives and never remove one.
//!
//! The memo exclusively owns all groups, expressions, and interned scalars.
//! Expressions reference operand groups by [`GroupId`] only, which keeps the
//! arena acyclic. One memo serves one query and is discarded after the plan
//! is emitted.

use crate::catalog::Column;
use crate::context::{PlanConfig, PlanContext};
use crate::cost::{estimate_group_card, Coster};
use crate::error::{PlanError, PlanResult};
use crate::group::ExprGroup;
use crate::hints::{Hint, HintType, JoinHints, JoinOpHint, JoinOrderHint};
use crate::ids::{table_id_for_source, ColSet, ColumnId, ExprId, GroupId, ScalarId, TableId, TableSet};
use crate::props::{FdSet, RelProps};
use crate::rel::{
    ConcatJoin, DistinctOp, HashJoin, IndexScan, JoinBase, JoinKind, LookupJoin, MergeJoin,
    RangeHeap, RangeHeapJoin, RelExprNode, RelOp, SourceBase,
};
use crate::scalar::{ColRef, ScalarExpr, ScalarNode};
use crate::stats::StatsProvider;
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::{debug, trace, warn};

/// Case-insensitive mapping between memoized source names and their groups.
#[derive(Debug, Default)]
pub struct TableProps {
    grp_to_name: HashMap<GroupId, String>,
    name_to_grp: HashMap<String, GroupId>,
}

impl TableProps {
    fn add_table(&mut self, name: &str, id: GroupId) {
        let name = name.to_lowercase();
        self.grp_to_name.insert(id, name.clone());
        self.name_to_grp.insert(name, id);
    }

    pub fn table_name(&self, id: GroupId) -> Option<&str> {
        self.grp_to_name.get(&id).map(|s| s.as_str())
    }

    pub fn group_id(&self, name: &str) -> Option<GroupId> {
        self.name_to_grp.get(&name.to_lowercase()).copied()
    }
}

/// A leaf data source reachable from a group, together with the residual
/// filters sitting between the group and the source. Physical-alternative
/// passes use this to decide index applicability.
pub struct LeafSource<'a> {
    pub group: GroupId,
    pub base: &'a SourceBase,
    pub filters: Vec<ScalarId>,
}

pub struct Memo {
    groups: Vec<ExprGroup>,
    exprs: Vec<RelExprNode>,
    scalars: Vec<ScalarNode>,
    scalar_cache: HashMap<ScalarExpr, ScalarId>,
    root: Option<GroupId>,
    pub table_props: TableProps,
    pub hints: JoinHints,
    config: PlanConfig,
    next_col: u16,
    /// Origin group and definition of every allocated column id.
    col_info: HashMap<ColumnId, (GroupId, Column)>,
    /// Set when optimization finished without a hint-satisfying root plan.
    hints_ignored: bool,
}

impl Memo {
    pub fn new(config: PlanConfig) -> Self {
        Self {
            groups: Vec::new(),
            exprs: Vec::new(),
            scalars: Vec::new(),
            scalar_cache: HashMap::new(),
            root: None,
            table_props: TableProps::default(),
            hints: JoinHints::default(),
            config,
            next_col: 0,
            col_info: HashMap::new(),
            hints_ignored: false,
        }
    }

    pub fn root(&self) -> Option<GroupId> {
        self.root
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    pub fn set_root(&mut self, root: GroupId) {
        self.root = Some(root);
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.len()
    }

    /// Whether a scalar expression contains a subquery anywhere.
    pub fn scalar_has_subquery(&self, sid: ScalarId) -> bool {
        let mut roots = Vec::new();
        self.collect_subquery_roots(sid, &mut roots);
        !roots.is_empty()
    }

    pub fn group(&self, id: GroupId) -> &ExprGroup {
        &self.groups[id.index()]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut ExprGroup {
        &mut self.groups[id.index()]
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        (1..=self.groups.len() as u16).map(GroupId).collect()
    }

    pub fn rel(&self, id: ExprId) -> &RelExprNode {
        &self.exprs[id.0 as usize]
    }

    pub fn rel_mut(&mut self, id: ExprId) -> &mut RelExprNode {
        &mut self.exprs[id.0 as usize]
    }

    /// Snapshot of a group's alternatives, head first.
    pub fn exprs_of(&self, group: GroupId) -> Vec<ExprId> {
        let mut out = Vec::new();
        let mut n = Some(self.group(group).first);
        while let Some(id) = n {
            out.push(id);
            n = self.rel(id).next;
        }
        out
    }

    /// The group's original logical form: the tail of the alternatives list.
    pub fn original_of(&self, group: GroupId) -> ExprId {
        *self.exprs_of(group).last().expect("group has no alternatives")
    }

    /// Child groups of an alternative, including subquery roots referenced
    /// by its scalar expressions. Subquery relations must be optimized even
    /// when the predicate ends up executed as a per-row filter.
    pub fn children_with_subqueries(&self, eid: ExprId) -> Vec<GroupId> {
        let node = self.rel(eid);
        let mut out = node.op.children();
        let scalars: Vec<ScalarId> = match &node.op {
            RelOp::Filter { filters, .. } => filters.clone(),
            RelOp::Project { projections, .. } => projections.clone(),
            op => op.join_base().map(|b| b.filter.clone()).unwrap_or_default(),
        };
        for s in scalars {
            self.collect_subquery_roots(s, &mut out);
        }
        out
    }

    pub(crate) fn collect_subquery_roots(&self, sid: ScalarId, out: &mut Vec<GroupId>) {
        match &self.scalar(sid).expr {
            ScalarExpr::Subquery(sq) => out.push(sq.root),
            ScalarExpr::InSubquery { left, subquery } => {
                out.push(subquery.root);
                self.collect_subquery_roots(*left, out);
            }
            ScalarExpr::Exists { subquery } => out.push(subquery.root),
            ScalarExpr::Not(c) | ScalarExpr::IsNull(c) => self.collect_subquery_roots(*c, out),
            ScalarExpr::And(l, r)
            | ScalarExpr::Or(l, r)
            | ScalarExpr::Cmp { left: l, right: r, .. }
            | ScalarExpr::InTuple { left: l, right: r }
            | ScalarExpr::Regexp { left: l, right: r }
            | ScalarExpr::Arithmetic { left: l, right: r, .. } => {
                self.collect_subquery_roots(*l, out);
                self.collect_subquery_roots(*r, out);
            }
            ScalarExpr::Tuple(vals) => {
                for v in vals {
                    self.collect_subquery_roots(*v, out);
                }
            }
            _ => {}
        }
    }

    pub fn hints_ignored(&self) -> bool {
        self.hints_ignored
    }

    // ------------------------------------------------------------------
    // Scalar interning
    // ------------------------------------------------------------------

    pub fn scalar(&self, id: ScalarId) -> &ScalarNode {
        &self.scalars[id.0 as usize]
    }

    /// Allocate a fresh query-global column id.
    pub fn next_column_id(&mut self) -> ColumnId {
        let id = ColumnId(self.next_col);
        self.next_col += 1;
        id
    }

    /// Intern a scalar expression, deduplicating identical nodes, and derive
    /// its referenced columns, tables, and nullability.
    pub fn add_scalar(&mut self, expr: ScalarExpr) -> ScalarId {
        if let Some(id) = self.scalar_cache.get(&expr) {
            return *id;
        }
        let (cols, tables, nullable) = self.scalar_props(&expr);
        let id = ScalarId(self.scalars.len() as u32);
        self.scalars.push(ScalarNode {
            expr: expr.clone(),
            cols,
            tables,
            nullable,
        });
        self.scalar_cache.insert(expr, id);
        id
    }

    fn scalar_props(&self, expr: &ScalarExpr) -> (ColSet, TableSet, bool) {
        let mut cols = ColSet::new();
        let mut tables = TableSet::new();
        let mut nullable = false;
        let merge = |memo: &Memo, id: ScalarId, cols: &mut ColSet, tables: &mut TableSet| {
            let n = memo.scalar(id);
            cols.union_with(&n.cols);
            tables.union_with(&n.tables);
            n.nullable
        };
        match expr {
            ScalarExpr::Literal(v) => nullable = v.is_null(),
            ScalarExpr::ColRef(c) => {
                cols.add(c.col);
                tables.add(table_id_for_source(c.group));
                nullable = c.nullable;
            }
            ScalarExpr::Not(c) | ScalarExpr::IsNull(c) => {
                nullable = merge(self, *c, &mut cols, &mut tables);
                if matches!(expr, ScalarExpr::IsNull(_)) {
                    nullable = false;
                }
            }
            ScalarExpr::And(l, r)
            | ScalarExpr::Or(l, r)
            | ScalarExpr::Cmp { left: l, right: r, .. }
            | ScalarExpr::InTuple { left: l, right: r }
            | ScalarExpr::Regexp { left: l, right: r }
            | ScalarExpr::Arithmetic { left: l, right: r, .. } => {
                let ln = merge(self, *l, &mut cols, &mut tables);
                let rn = merge(self, *r, &mut cols, &mut tables);
                nullable = ln || rn;
            }
            ScalarExpr::Tuple(vals) => {
                for v in vals {
                    nullable |= merge(self, *v, &mut cols, &mut tables);
                }
            }
            ScalarExpr::Bindvar { .. } => nullable = true,
            ScalarExpr::Hidden { cols: c, tables: t, .. } => {
                cols = c.clone();
                tables = t.clone();
                nullable = true;
            }
            ScalarExpr::Subquery(sq) => {
                cols = sq.correlated.clone();
                for pred in &sq.corr_preds {
                    let n = self.scalar(*pred);
                    tables.union_with(&n.tables);
                }
                nullable = true;
            }
            ScalarExpr::InSubquery { left, subquery } => {
                merge(self, *left, &mut cols, &mut tables);
                cols.union_with(&subquery.correlated);
                // Set membership is NULL when either side introduces NULLs.
                nullable = true;
            }
            ScalarExpr::Exists { subquery } => {
                cols.union_with(&subquery.correlated);
                nullable = false;
            }
        }
        (cols, tables, nullable)
    }

    pub fn scalar_cols(&self, id: ScalarId) -> &ColSet {
        &self.scalar(id).cols
    }

    pub fn scalar_tables(&self, id: ScalarId) -> &TableSet {
        &self.scalar(id).tables
    }

    // ------------------------------------------------------------------
    // Group construction
    // ------------------------------------------------------------------

    /// Create a new expression group for a relational alternative. Sources
    /// are registered under their (case-insensitive) name for later hint
    /// resolution.
    pub fn new_expr_group(&mut self, op: RelOp) -> PlanResult<GroupId> {
        if self.groups.len() >= self.config.max_memo_groups {
            return Err(PlanError::internal(format!(
                "memo group limit exceeded ({})",
                self.config.max_memo_groups
            )));
        }
        let id = GroupId(self.groups.len() as u16 + 1);
        let props = self.derive_props(id, &op)?;
        if let Some(base) = op.source_base() {
            let alias = base.alias.clone();
            self.table_props.add_table(&alias, id);
        }
        let eid = ExprId(self.exprs.len() as u32);
        self.exprs.push(RelExprNode::new(op, id));
        self.groups.push(ExprGroup::new(id, eid, props));
        trace!(group = %id, "created expression group");
        Ok(id)
    }

    /// Prepend an alternative to an existing group. O(1); already-chosen
    /// best pointers in other groups are not disturbed.
    pub fn prepend(&mut self, group: GroupId, op: RelOp) -> ExprId {
        let eid = ExprId(self.exprs.len() as u32);
        let mut node = RelExprNode::new(op, group);
        node.next = Some(self.group(group).first);
        self.exprs.push(node);
        self.group_mut(group).first = eid;
        eid
    }

    fn memoize(&mut self, target: Option<GroupId>, op: RelOp) -> PlanResult<GroupId> {
        match target {
            None => self.new_expr_group(op),
            Some(grp) => {
                self.prepend(grp, op);
                Ok(grp)
            }
        }
    }

    /// Register a data source. `op` must be a source variant.
    pub fn memoize_source(&mut self, op: RelOp) -> PlanResult<GroupId> {
        debug_assert!(op.is_source());
        self.new_expr_group(op)
    }

    pub fn memoize_cross_join(
        &mut self,
        target: Option<GroupId>,
        left: GroupId,
        right: GroupId,
        filter: Vec<ScalarId>,
    ) -> PlanResult<GroupId> {
        let base = JoinBase {
            kind: JoinKind::Cross,
            left,
            right,
            filter,
        };
        self.memoize(target, RelOp::CrossJoin(base))
    }

    pub fn memoize_inner_join(
        &mut self,
        target: Option<GroupId>,
        left: GroupId,
        right: GroupId,
        kind: JoinKind,
        filter: Vec<ScalarId>,
    ) -> PlanResult<GroupId> {
        let base = JoinBase {
            kind,
            left,
            right,
            filter,
        };
        self.memoize(target, RelOp::InnerJoin(base))
    }

    pub fn memoize_left_join(
        &mut self,
        target: Option<GroupId>,
        left: GroupId,
        right: GroupId,
        kind: JoinKind,
        filter: Vec<ScalarId>,
    ) -> PlanResult<GroupId> {
        let base = JoinBase {
            kind,
            left,
            right,
            filter,
        };
        self.memoize(target, RelOp::LeftJoin(base))
    }

    pub fn memoize_full_outer_join(
        &mut self,
        target: Option<GroupId>,
        left: GroupId,
        right: GroupId,
        filter: Vec<ScalarId>,
    ) -> PlanResult<GroupId> {
        let base = JoinBase {
            kind: JoinKind::FullOuter,
            left,
            right,
            filter,
        };
        self.memoize(target, RelOp::FullOuterJoin(base))
    }

    pub fn memoize_semi_join(
        &mut self,
        target: Option<GroupId>,
        left: GroupId,
        right: GroupId,
        kind: JoinKind,
        filter: Vec<ScalarId>,
    ) -> PlanResult<GroupId> {
        let base = JoinBase {
            kind,
            left,
            right,
            filter,
        };
        self.memoize(target, RelOp::SemiJoin(base))
    }

    pub fn memoize_anti_join(
        &mut self,
        target: Option<GroupId>,
        left: GroupId,
        right: GroupId,
        kind: JoinKind,
        filter: Vec<ScalarId>,
    ) -> PlanResult<GroupId> {
        let base = JoinBase {
            kind,
            left,
            right,
            filter,
        };
        self.memoize(target, RelOp::AntiJoin(base))
    }

    pub fn memoize_lookup_join(
        &mut self,
        target: Option<GroupId>,
        left: GroupId,
        right: GroupId,
        kind: JoinKind,
        filter: Vec<ScalarId>,
        lookup: IndexScan,
    ) -> PlanResult<GroupId> {
        let injective = lookup.index.is_unique() && lookup.keys.len() == lookup.index.cols().len();
        let join = LookupJoin {
            base: JoinBase {
                kind: kind.as_lookup(),
                left,
                right,
                filter,
            },
            lookup,
            injective,
        };
        self.memoize(target, RelOp::LookupJoin(join))
    }

    /// A lookup join over a set of disjunctions. Where a lookup join
    /// simulates `x = v1`, a concat lookup performs `x in (v1, v2, ...)`
    /// and unions the per-template results.
    pub fn memoize_concat_join(
        &mut self,
        target: Option<GroupId>,
        left: GroupId,
        right: GroupId,
        kind: JoinKind,
        filter: Vec<ScalarId>,
        lookups: Vec<IndexScan>,
    ) -> PlanResult<GroupId> {
        let join = ConcatJoin {
            base: JoinBase {
                kind: kind.as_lookup(),
                left,
                right,
                filter,
            },
            concat: lookups,
        };
        self.memoize(target, RelOp::ConcatJoin(join))
    }

    pub fn memoize_hash_join(
        &mut self,
        target: Option<GroupId>,
        left: GroupId,
        right: GroupId,
        kind: JoinKind,
        filter: Vec<ScalarId>,
        left_attrs: Vec<ScalarId>,
        right_attrs: Vec<ScalarId>,
    ) -> PlanResult<GroupId> {
        let join = HashJoin {
            base: JoinBase {
                kind,
                left,
                right,
                filter,
            },
            left_attrs,
            right_attrs,
        };
        self.memoize(target, RelOp::HashJoin(join))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn memoize_merge_join(
        &mut self,
        target: Option<GroupId>,
        left: GroupId,
        right: GroupId,
        inner_scan: IndexScan,
        outer_scan: IndexScan,
        kind: JoinKind,
        filter: Vec<ScalarId>,
        swap_cmp: bool,
    ) -> PlanResult<GroupId> {
        let join = MergeJoin {
            base: JoinBase {
                kind: kind.as_merge(),
                left,
                right,
                filter,
            },
            inner_scan,
            outer_scan,
            swap_cmp,
        };
        self.memoize(target, RelOp::MergeJoin(join))
    }

    pub fn memoize_range_heap_join(
        &mut self,
        target: Option<GroupId>,
        left: GroupId,
        right: GroupId,
        kind: JoinKind,
        filter: Vec<ScalarId>,
        range_heap: RangeHeap,
    ) -> PlanResult<GroupId> {
        let join = RangeHeapJoin {
            base: JoinBase {
                kind: kind.as_range_heap(),
                left,
                right,
                filter,
            },
            range_heap,
        };
        self.memoize(target, RelOp::RangeHeapJoin(join))
    }

    pub fn memoize_project(
        &mut self,
        target: Option<GroupId>,
        child: GroupId,
        projections: Vec<ScalarId>,
    ) -> PlanResult<GroupId> {
        self.memoize(target, RelOp::Project { child, projections })
    }

    pub fn memoize_filter(
        &mut self,
        target: Option<GroupId>,
        child: GroupId,
        filters: Vec<ScalarId>,
    ) -> PlanResult<GroupId> {
        self.memoize(target, RelOp::Filter { child, filters })
    }

    pub fn memoize_distinct(
        &mut self,
        target: Option<GroupId>,
        child: GroupId,
    ) -> PlanResult<GroupId> {
        self.memoize(target, RelOp::Distinct { child })
    }

    pub fn memoize_max1row(
        &mut self,
        target: Option<GroupId>,
        child: GroupId,
    ) -> PlanResult<GroupId> {
        self.memoize(target, RelOp::Max1Row { child })
    }

    /// Add an index-based access path. Static scans are prepended into the
    /// source (or filter) group they replace; lookup templates are owned by
    /// join alternatives and never memoized on their own.
    pub fn memoize_index_scan(
        &mut self,
        target: Option<GroupId>,
        scan: IndexScan,
    ) -> PlanResult<GroupId> {
        self.memoize(target, RelOp::IndexScan(scan))
    }

    // ------------------------------------------------------------------
    // Property derivation
    // ------------------------------------------------------------------

    /// Rebuild a column reference from the memo's column registry.
    pub fn col_ref(&self, col: ColumnId) -> Option<ColRef> {
        let (group, c) = self.col_info.get(&col)?;
        Some(ColRef {
            col,
            group: *group,
            table: c.table.clone(),
            name: c.name.clone(),
            ty: c.ty,
            nullable: c.nullable,
        })
    }

    fn register_cols(&mut self, group: GroupId, cols: &[ColumnId], schema: &[Column]) {
        for (col, c) in cols.iter().zip(schema.iter()) {
            self.col_info.entry(*col).or_insert((group, c.clone()));
        }
    }

    fn source_props(&self, base: &SourceBase) -> RelProps {
        let mut fds = FdSet::new();
        for (i, col) in base.schema.iter().enumerate() {
            if !col.nullable {
                fds.add_not_null(base.cols[i]);
            }
        }
        for index in &base.indexes {
            if index.is_unique() {
                fds.add_key(index.col_set().clone());
            }
        }
        RelProps::new(
            base.schema.clone(),
            base.cols.clone(),
            TableSet::singleton(base.table_id),
            fds,
        )
    }

    fn derive_props(&mut self, id: GroupId, op: &RelOp) -> PlanResult<RelProps> {
        let props = match op {
            RelOp::TableScan(b)
            | RelOp::TableAlias(b)
            | RelOp::RecursiveTable(b)
            | RelOp::TableFunc(b)
            | RelOp::EmptyTable(b) => self.source_props(b),
            RelOp::Values(v) => self.source_props(&v.base),
            RelOp::SubqueryAlias(d) | RelOp::RecursiveCte(d) => self.source_props(&d.base),
            RelOp::IndexScan(scan) => self.group(scan.group).props.clone(),
            RelOp::Filter { child, filters } => {
                let mut props = self.group(*child).props.clone();
                for f in filters {
                    self.apply_filter_fds(*f, &mut props.fds);
                }
                props
            }
            RelOp::Project { child, projections } => {
                let child_props = self.group(*child).props.clone();
                let mut schema = Vec::with_capacity(projections.len());
                let mut cols = Vec::with_capacity(projections.len());
                for (i, p) in projections.iter().enumerate() {
                    match self.scalar(*p).expr.clone() {
                        ScalarExpr::ColRef(c) => {
                            schema.push(Column {
                                table: c.table.clone(),
                                name: c.name.clone(),
                                ty: c.ty,
                                nullable: c.nullable,
                            });
                            cols.push(c.col);
                        }
                        _ => {
                            let col = self.next_column_id();
                            let nullable = self.scalar(*p).nullable;
                            schema.push(Column {
                                table: String::new(),
                                name: format!("expr{i}"),
                                ty: crate::catalog::SqlType::Int64,
                                nullable,
                            });
                            cols.push(col);
                        }
                    }
                }
                let fds = child_props
                    .fds
                    .project(&cols.iter().copied().collect());
                RelProps::new(schema, cols, child_props.tables.clone(), fds)
            }
            RelOp::Distinct { child } => {
                let mut props = self.group(*child).props.clone();
                props.needs_distinct = true;
                props.fds.add_key(props.col_set.clone());
                props
            }
            RelOp::Max1Row { child } => {
                let mut props = self.group(*child).props.clone();
                props.fds.add_max_one_row();
                props
            }
            _ => {
                let base = op
                    .join_base()
                    .ok_or_else(|| PlanError::internal("expected join operator"))?;
                self.join_props(base)
            }
        };
        let (cols, schema) = (props.cols.clone(), props.schema.clone());
        self.register_cols(id, &cols, &schema);
        Ok(props)
    }

    fn apply_filter_fds(&self, filter: ScalarId, fds: &mut FdSet) {
        if let ScalarExpr::Cmp {
            op: crate::scalar::CmpOp::Eq,
            left,
            right,
        } = &self.scalar(filter).expr
        {
            let l = self.scalar(*left).expr.clone();
            let r = self.scalar(*right).expr.clone();
            match (&l, &r) {
                (ScalarExpr::ColRef(c), ScalarExpr::Literal(v))
                | (ScalarExpr::Literal(v), ScalarExpr::ColRef(c)) => {
                    if !v.is_null() {
                        fds.add_constant(c.col);
                        fds.add_not_null(c.col);
                    }
                }
                (ScalarExpr::ColRef(a), ScalarExpr::ColRef(b)) => {
                    fds.add_equiv(a.col, b.col);
                }
                _ => {}
            }
        }
    }

    fn join_props(&self, base: &JoinBase) -> RelProps {
        let left = &self.group(base.left).props;
        let right = &self.group(base.right).props;
        let tables = left.tables.union(&right.tables);

        if base.kind.is_semi() || base.kind.is_anti() {
            // Output is a subset of left rows; left keys remain keys.
            let mut props = left.clone();
            props.tables = tables;
            props.needs_distinct = false;
            return props;
        }

        let mut schema = left.schema.clone();
        let null_left = base.kind == JoinKind::FullOuter;
        let null_right = base.kind.is_left_outer() || base.kind == JoinKind::FullOuter;
        if null_left {
            for c in &mut schema {
                c.nullable = true;
            }
        }
        for c in &right.schema {
            let mut c = c.clone();
            if null_right {
                c.nullable = true;
            }
            schema.push(c);
        }
        let mut cols = left.cols.clone();
        cols.extend(right.cols.iter().copied());

        let mut fds = left.fds.join(&right.fds);
        for f in &base.filter {
            self.apply_filter_fds(*f, &mut fds);
        }
        let mut props = RelProps::new(schema, cols, tables, fds);
        props.needs_distinct = false;
        props
    }

    // ------------------------------------------------------------------
    // Leaf-source discovery
    // ------------------------------------------------------------------

    /// The source base of a group whose alternatives include a concrete
    /// source.
    pub fn source_base(&self, group: GroupId) -> Option<&SourceBase> {
        self.exprs_of(group)
            .into_iter()
            .find_map(|eid| self.rel(eid).op.source_base())
    }

    /// Resolve a group to a leaf source, looking through one Filter level.
    /// Returns the source group, its base, and any residual filters.
    pub fn leaf_source(&self, group: GroupId) -> Option<LeafSource<'_>> {
        for eid in self.exprs_of(group) {
            match &self.rel(eid).op {
                RelOp::Filter { child, filters } => {
                    if let Some(base) = self.source_base(*child) {
                        return Some(LeafSource {
                            group: *child,
                            base,
                            filters: filters.clone(),
                        });
                    }
                }
                op => {
                    if let Some(base) = op.source_base() {
                        return Some(LeafSource {
                            group,
                            base,
                            filters: vec![],
                        });
                    }
                }
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Hints
    // ------------------------------------------------------------------

    /// Resolve and install a parsed hint against the memoized tables.
    pub fn apply_hint(&mut self, hint: &Hint) -> PlanResult<()> {
        match hint.typ {
            HintType::JoinOrder => self.with_join_order(&hint.args),
            HintType::JoinFixedOrder => {
                self.hints.fixed_order = true;
                Ok(())
            }
            _ => {
                if hint.args.len() != 2 {
                    return Err(PlanError::IncompatibleHints(format!(
                        "{:?} requires exactly two tables",
                        hint.typ
                    )));
                }
                self.with_join_op(hint.typ, &hint.args[0], &hint.args[1])
            }
        }
    }

    /// Case-insensitive lookup of a memoized source's table id.
    pub fn table_id_by_name(&self, name: &str) -> Option<TableId> {
        self.table_props.group_id(name).map(table_id_for_source)
    }

    fn resolve_table(&self, name: &str) -> PlanResult<TableId> {
        self.table_id_by_name(name)
            .ok_or_else(|| PlanError::UnresolvableHint(name.to_string()))
    }

    pub fn with_join_order(&mut self, tables: &[String]) -> PlanResult<()> {
        if self.hints.order.is_some() {
            return Err(PlanError::IncompatibleHints(
                "multiple JOIN_ORDER hints".to_string(),
            ));
        }
        let mut order = HashMap::new();
        for (i, t) in tables.iter().enumerate() {
            order.insert(self.resolve_table(t)?, i);
        }
        self.hints.order = Some(JoinOrderHint::new(order));
        Ok(())
    }

    pub fn with_join_op(&mut self, typ: HintType, left: &str, right: &str) -> PlanResult<()> {
        let left = self.resolve_table(left)?;
        let right = self.resolve_table(right)?;
        self.hints.push_op(JoinOpHint { typ, left, right });
        Ok(())
    }

    /// Whether an alternative satisfies the active hints. Non-join
    /// alternatives satisfy trivially.
    pub fn hint_satisfied(&self, eid: ExprId) -> bool {
        match self.rel(eid).op.join_base() {
            Some(base) => self.hints.satisfied_by_join(
                base.kind,
                &self.group(base.left).props.tables,
                &self.group(base.right).props.tables,
            ),
            None => true,
        }
    }

    // ------------------------------------------------------------------
    // Optimization
    // ------------------------------------------------------------------

    /// Find the lowest-cost implementation for the root group.
    pub fn optimize_root(
        &mut self,
        coster: &dyn Coster,
        stats: &dyn StatsProvider,
        ctx: &PlanContext,
    ) -> PlanResult<()> {
        let root = self
            .root
            .ok_or_else(|| PlanError::internal("memo has no root group"))?;
        self.optimize_group(root, coster, stats, ctx)?;
        if !self.hints.is_empty() && !self.best_plan_hint_ok(root) {
            warn!("join hints could not be satisfied; using lowest-cost plan");
            self.hints_ignored = true;
        }
        debug!(cost = self.group(root).cost, "optimization complete");
        Ok(())
    }

    /// Whether every join alternative on the chosen best path satisfies the
    /// active hints.
    fn best_plan_hint_ok(&self, gid: GroupId) -> bool {
        let Some(best) = self.group(gid).best else {
            return true;
        };
        if !self.hint_satisfied(best) {
            return false;
        }
        self.rel(best)
            .op
            .children()
            .into_iter()
            .all(|c| self.best_plan_hint_ok(c))
    }

    /// Recursively build the lowest-cost plan for a group. Groups are
    /// optimized independently, walking the linked list of alternatives only
    /// after optimizing all subgroups; all alternatives in a group share the
    /// same subgroup dependencies.
    fn optimize_group(
        &mut self,
        gid: GroupId,
        coster: &dyn Coster,
        stats: &dyn StatsProvider,
        ctx: &PlanContext,
    ) -> PlanResult<()> {
        if self.group(gid).done {
            return Ok(());
        }
        if ctx.is_cancelled() {
            return Err(PlanError::Cancelled);
        }

        let head = self.group(gid).first;
        if self.rel(head).op.is_source() {
            // Sources return immediately. An IndexScan alternative is
            // assumed faster than the filter option it replaced; joins that
            // need a different access path reify it in the conflict pass.
            let grp = self.group_mut(gid);
            grp.done = true;
            grp.hint_ok = true;
            grp.best = Some(head);
            for eid in self.exprs_of(gid) {
                if matches!(self.rel(eid).op, RelOp::IndexScan(_)) {
                    self.group_mut(gid).best = Some(eid);
                    break;
                }
            }
            // Derived sources and displaced filter alternatives still own
            // child relations; optimize them so cardinalities are in place.
            for eid in self.exprs_of(gid) {
                for child in self.rel(eid).op.children() {
                    self.optimize_group(child, coster, stats, ctx)?;
                }
            }
            let card = estimate_group_card(self, gid, stats);
            self.group_mut(gid).card = card;
            return Ok(());
        }

        // Children first, so cardinalities and child costs are available.
        // Subquery roots count as children here: a filter that keeps its
        // subquery predicate still executes that relation.
        for eid in self.exprs_of(gid) {
            for child in self.children_with_subqueries(eid) {
                self.optimize_group(child, coster, stats, ctx)?;
            }
        }
        let card = estimate_group_card(self, gid, stats);
        self.group_mut(gid).card = card;

        for eid in self.exprs_of(gid) {
            let mut cost = 0.0;
            for child in self.rel(eid).op.children() {
                cost += self.group(child).cost;
            }
            let mut rel_cost = coster.estimate_cost(self, eid, stats)?;

            if self.group(gid).props.needs_distinct {
                if self.sorted_inputs(eid) {
                    self.rel_mut(eid).distinct = DistinctOp::Sorted;
                } else {
                    self.rel_mut(eid).distinct = DistinctOp::Hash;
                    rel_cost += crate::cost::CPU_COST_FACTOR * self.group(gid).card;
                }
            } else {
                self.rel_mut(eid).distinct = DistinctOp::None;
            }

            self.rel_mut(eid).cost = rel_cost;
            cost += rel_cost;
            self.update_best(gid, eid, cost);
        }

        self.fix_conflicts(gid);
        self.group_mut(gid).done = true;
        Ok(())
    }

    /// Choose the best hinted plan, or the best overall plan if no
    /// alternative satisfies the hints. A hint-satisfying candidate beats a
    /// non-satisfying one regardless of cost.
    fn update_best(&mut self, gid: GroupId, eid: ExprId, cost: f64) {
        if !self.hints.is_empty() {
            if self.hint_satisfied(eid) {
                if !self.group(gid).hint_ok {
                    let grp = self.group_mut(gid);
                    grp.best = Some(eid);
                    grp.cost = cost;
                    grp.hint_ok = true;
                    return;
                }
                self.group_mut(gid).update_best(eid, cost);
            } else if self.group(gid).best.is_none() || !self.group(gid).hint_ok {
                self.group_mut(gid).update_best(eid, cost);
            }
            return;
        }
        self.group_mut(gid).update_best(eid, cost);
    }

    /// Whether an alternative's input arrives sorted on the group's output
    /// columns, making sorted dedup free.
    fn sorted_inputs(&self, eid: ExprId) -> bool {
        match &self.rel(eid).op {
            RelOp::Distinct { child } => match self.group(*child).best {
                Some(best) => matches!(
                    self.rel(best).op,
                    RelOp::IndexScan(_) | RelOp::MergeJoin(_)
                ),
                None => false,
            },
            _ => false,
        }
    }

    /// Certain "best" selections in distinct groups are mutually
    /// incompatible: a lookup or merge join requires its inner side to be
    /// the index scan named by the chosen alternative, not whatever the
    /// inner group picked independently. Reify the inner best accordingly.
    fn fix_conflicts(&mut self, gid: GroupId) {
        let Some(best) = self.group(gid).best else {
            return;
        };
        let scans: Vec<(GroupId, IndexScan)> = match &self.rel(best).op {
            RelOp::LookupJoin(j) => vec![(j.base.right, j.lookup.clone())],
            RelOp::MergeJoin(j) => vec![
                (j.base.left, j.inner_scan.clone()),
                (j.base.right, j.outer_scan.clone()),
            ],
            _ => return,
        };
        for (side, scan) in scans {
            self.align_scan_best(side, &scan);
        }
    }

    /// Point `group`'s best at an IndexScan over `scan`'s index. A bare
    /// template scan may only displace a pure source: a filtered group
    /// aligns when a static scan over the same index already subsumes its
    /// predicates, and otherwise keeps its own best so no filter is lost.
    fn align_scan_best(&mut self, group: GroupId, scan: &IndexScan) {
        let existing = self.exprs_of(group).into_iter().find(|eid| {
            matches!(&self.rel(*eid).op, RelOp::IndexScan(s) if s.index.name() == scan.index.name())
        });
        if let Some(eid) = existing {
            self.group_mut(group).best = Some(eid);
            return;
        }
        if self.rel(self.original_of(group)).op.is_source() {
            let eid = self.prepend(group, RelOp::IndexScan(scan.clone()));
            self.group_mut(group).best = Some(eid);
        }
    }

    // ------------------------------------------------------------------
    // Formatting
    // ------------------------------------------------------------------

    pub fn format_scalar(&self, id: ScalarId) -> String {
        match &self.scalar(id).expr {
            ScalarExpr::Literal(v) => v.to_string(),
            ScalarExpr::ColRef(c) => format!("{}.{}", c.table, c.name),
            ScalarExpr::Not(c) => format!("not({})", self.format_scalar(*c)),
            ScalarExpr::And(l, r) => {
                format!("({} and {})", self.format_scalar(*l), self.format_scalar(*r))
            }
            ScalarExpr::Or(l, r) => {
                format!("({} or {})", self.format_scalar(*l), self.format_scalar(*r))
            }
            ScalarExpr::Cmp { op, left, right } => format!(
                "{} {} {}",
                self.format_scalar(*left),
                op,
                self.format_scalar(*right)
            ),
            ScalarExpr::InTuple { left, right } => format!(
                "{} in {}",
                self.format_scalar(*left),
                self.format_scalar(*right)
            ),
            ScalarExpr::Regexp { left, right } => format!(
                "{} regexp {}",
                self.format_scalar(*left),
                self.format_scalar(*right)
            ),
            ScalarExpr::Arithmetic { op, left, right } => format!(
                "({} {} {})",
                self.format_scalar(*left),
                op,
                self.format_scalar(*right)
            ),
            ScalarExpr::Tuple(vals) => {
                let parts: Vec<String> = vals.iter().map(|v| self.format_scalar(*v)).collect();
                format!("({})", parts.join(", "))
            }
            ScalarExpr::IsNull(c) => format!("{} is null", self.format_scalar(*c)),
            ScalarExpr::Bindvar { name, .. } => format!(":{name}"),
            ScalarExpr::Hidden { desc, .. } => format!("hidden: {desc}"),
            ScalarExpr::Subquery(sq) => format!("subquery: {}", sq.root.0),
            ScalarExpr::InSubquery { left, subquery } => format!(
                "{} in subquery: {}",
                self.format_scalar(*left),
                subquery.root.0
            ),
            ScalarExpr::Exists { subquery } => format!("exists: {}", subquery.root.0),
        }
    }

    pub fn format_expr(&self, eid: ExprId) -> String {
        let node = self.rel(eid);
        match &node.op {
            RelOp::TableScan(b) => format!("tablescan: {}", b.alias),
            RelOp::TableAlias(b) => format!("tablealias: {}", b.alias),
            RelOp::IndexScan(s) => format!("indexscan: {}", s.index.name()),
            RelOp::Values(v) => format!("values: {}", v.base.alias),
            RelOp::SubqueryAlias(d) => format!("subqueryalias: {}", d.base.alias),
            RelOp::RecursiveCte(d) => format!("recursivecte: {}", d.base.alias),
            RelOp::RecursiveTable(b) => format!("recursivetable: {}", b.alias),
            RelOp::TableFunc(b) => format!("tablefunc: {}", b.alias),
            RelOp::EmptyTable(b) => format!("emptytable: {}", b.alias),
            RelOp::Project { child, .. } => format!("project: {}", child.0),
            RelOp::Filter { child, .. } => format!("filter: {}", child.0),
            RelOp::Distinct { child } => format!("distinct: {}", child.0),
            RelOp::Max1Row { child } => format!("max1row: {}", child.0),
            op => {
                let token = match op {
                    RelOp::CrossJoin(_) => "crossjoin",
                    RelOp::InnerJoin(_) => "innerjoin",
                    RelOp::LeftJoin(_) => "leftjoin",
                    RelOp::FullOuterJoin(_) => "fullouterjoin",
                    RelOp::SemiJoin(_) => "semijoin",
                    RelOp::AntiJoin(_) => "antijoin",
                    RelOp::LookupJoin(_) => "lookupjoin",
                    RelOp::ConcatJoin(_) => "concatjoin",
                    RelOp::HashJoin(_) => "hashjoin",
                    RelOp::MergeJoin(_) => "mergejoin",
                    RelOp::RangeHeapJoin(_) => "rangeheapjoin",
                    _ => unreachable!("non-join handled above"),
                };
                let base = op.join_base().expect("join operator");
                format!("{token} {} {}", base.left.0, base.right.0)
            }
        }
    }

    /// Render the memo for debugging: one line per group, every alternative
    /// head-first.
    pub fn format(&self) -> String {
        let mut out = String::from("memo:\n");
        for (i, grp) in self.groups.iter().enumerate() {
            let beg = if i == self.groups.len() - 1 {
                "└──"
            } else {
                "├──"
            };
            let alts: Vec<String> = self
                .exprs_of(grp.id)
                .into_iter()
                .map(|eid| self.format_expr(eid))
                .collect();
            let _ = writeln!(out, "{beg} {}: {}", grp.id, alts.join(" | "));
        }
        out
    }
}
