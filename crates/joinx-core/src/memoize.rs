//! # Logical Memoization
//!
//! Turns the resolved logical tree into memo groups: each logical operator
//! becomes a group holding its original form, sources allocate query-global
//! column ids, and scalar expressions are interned against the scope of
//! visible sources.
//!
//! Subqueries are where the real work happens. Each subquery gets its own
//! scope frame; filter predicates that reference columns from an enclosing
//! frame are lifted out of the subquery's relation and recorded on the
//! [`SubqueryExpr`] as join-condition candidates. Correlation that escapes a
//! filter position (a correlated projection or join condition) marks the
//! subquery as blocked, leaving only the per-row execution form.

use crate::catalog::{Catalog, Column, SqlType, TableRef};
use crate::error::{PlanError, PlanResult};
use crate::ids::{ColSet, ColumnId, GroupId, ScalarId, TableId};
use crate::logical::{LogicalExpr, LogicalJoinKind, LogicalPlan, LogicalSubquery};
use crate::memo::Memo;
use crate::rel::{DerivedSource, Index, JoinKind, RelOp, SourceBase, ValuesSource};
use crate::scalar::{ColRef, ScalarExpr, SubqueryExpr};

/// Build the memo for a resolved logical plan and set its root group.
pub fn memoize_plan(
    memo: &mut Memo,
    catalog: &dyn Catalog,
    plan: &LogicalPlan,
) -> PlanResult<GroupId> {
    let mut m = Memoizer {
        memo,
        catalog,
        frames: vec![Frame::default()],
    };
    let root = m.build(plan)?;
    memo.set_root(root);
    Ok(root)
}

#[derive(Default)]
struct Frame {
    sources: Vec<SourceEntry>,
    /// Columns owned by sources of this query block.
    own_cols: ColSet,
    /// Correlated filter predicates lifted out of this block.
    corr_preds: Vec<ScalarId>,
    /// Correlation appeared somewhere the rewrite cannot lift it from.
    escaped: bool,
}

struct SourceEntry {
    alias: String,
    group: GroupId,
    cols: Vec<(String, ColumnId, Column)>,
}

struct Memoizer<'a> {
    memo: &'a mut Memo,
    catalog: &'a dyn Catalog,
    frames: Vec<Frame>,
}

impl<'a> Memoizer<'a> {
    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("scope frame")
    }

    fn build(&mut self, plan: &LogicalPlan) -> PlanResult<GroupId> {
        match plan {
            LogicalPlan::TableScan { table, alias } => self.build_table_scan(table, alias.as_deref()),
            LogicalPlan::Values { name, columns, rows } => {
                let cols: Vec<(String, SqlType)> = columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| {
                        let ty = rows
                            .first()
                            .map(|r| r[i].ty())
                            .unwrap_or(SqlType::Int64);
                        (c.clone(), ty)
                    })
                    .collect();
                let base = self.new_source_base(None, name, &cols, &[]);
                self.register_source(&base);
                self.memo.memoize_source(RelOp::Values(ValuesSource {
                    base,
                    rows: rows.clone(),
                }))
            }
            LogicalPlan::EmptyTable { name, columns } => {
                let base = self.new_source_base(None, name, columns, &[]);
                self.register_source(&base);
                self.memo.memoize_source(RelOp::EmptyTable(base))
            }
            LogicalPlan::TableFunc { name, columns } => {
                let base = self.new_source_base(None, name, columns, &[]);
                self.register_source(&base);
                self.memo.memoize_source(RelOp::TableFunc(base))
            }
            LogicalPlan::RecursiveTable { name, columns } => {
                let base = self.new_source_base(None, name, columns, &[]);
                self.register_source(&base);
                self.memo.memoize_source(RelOp::RecursiveTable(base))
            }
            LogicalPlan::RecursiveCte { name, child } => {
                let child_grp = self.build_derived_child(child)?;
                let base = self.derived_base(name, child_grp);
                self.register_source(&base);
                self.memo
                    .memoize_source(RelOp::RecursiveCte(DerivedSource {
                        base,
                        child: child_grp,
                    }))
            }
            LogicalPlan::SubqueryAlias { name, child } => {
                let child_grp = self.build_derived_child(child)?;
                let base = self.derived_base(name, child_grp);
                self.register_source(&base);
                self.memo
                    .memoize_source(RelOp::SubqueryAlias(DerivedSource {
                        base,
                        child: child_grp,
                    }))
            }
            LogicalPlan::Join { kind, left, right, on } => {
                let l = self.build(left)?;
                let r = self.build(right)?;
                let mut filter = Vec::with_capacity(on.len());
                for pred in on {
                    let sid = self.convert(pred)?;
                    if self.is_outer_ref(sid) {
                        // A correlated join condition cannot be lifted.
                        self.frame().escaped = true;
                    }
                    filter.push(sid);
                }
                match kind {
                    LogicalJoinKind::Cross => self.memo.memoize_cross_join(None, l, r, filter),
                    LogicalJoinKind::Inner => {
                        self.memo
                            .memoize_inner_join(None, l, r, JoinKind::Inner, filter)
                    }
                    LogicalJoinKind::Left => {
                        self.memo
                            .memoize_left_join(None, l, r, JoinKind::Left, filter)
                    }
                    LogicalJoinKind::FullOuter => {
                        self.memo.memoize_full_outer_join(None, l, r, filter)
                    }
                }
            }
            LogicalPlan::Filter { child, predicates } => {
                let child_grp = self.build(child)?;
                let mut kept = Vec::new();
                for pred in predicates {
                    let sid = self.convert(pred)?;
                    if self.is_outer_ref(sid) {
                        self.frame().corr_preds.push(sid);
                    } else {
                        kept.push(sid);
                    }
                }
                if kept.is_empty() {
                    Ok(child_grp)
                } else {
                    self.memo.memoize_filter(None, child_grp, kept)
                }
            }
            LogicalPlan::Project { child, exprs } => {
                let child_grp = self.build(child)?;
                let mut projections = Vec::with_capacity(exprs.len());
                for e in exprs {
                    let sid = self.convert(e)?;
                    if self.is_outer_ref(sid) {
                        self.frame().escaped = true;
                    }
                    projections.push(sid);
                }
                self.memo.memoize_project(None, child_grp, projections)
            }
            LogicalPlan::Distinct { child } => {
                let child_grp = self.build(child)?;
                self.memo.memoize_distinct(None, child_grp)
            }
        }
    }

    fn build_table_scan(&mut self, table: &TableRef, alias: Option<&str>) -> PlanResult<GroupId> {
        let def = self.catalog.table_def(table).ok_or_else(|| {
            PlanError::not_supported(format!("unresolved table {table}"))
        })?;
        let alias_l = alias.unwrap_or(&table.name).to_lowercase();
        let table_id = TableId(self.memo.num_groups() as u16);

        let mut cols = Vec::with_capacity(def.columns.len());
        let mut schema = Vec::with_capacity(def.columns.len());
        for c in &def.columns {
            cols.push(self.memo.next_column_id());
            schema.push(Column {
                table: alias_l.clone(),
                ..c.clone()
            });
        }
        let col_id = |name: &str| -> Option<ColumnId> {
            schema
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(name))
                .map(|i| cols[i])
        };
        let mut indexes = Vec::new();
        for idx in def.all_indexes() {
            let ordered: Option<Vec<ColumnId>> =
                idx.columns.iter().map(|c| col_id(c)).collect();
            if let Some(order) = ordered {
                indexes.push(Index::new(order, idx));
            }
        }

        let base = SourceBase {
            table: table.clone(),
            alias: alias_l,
            table_id,
            cols,
            schema,
            indexes,
        };
        self.register_source(&base);
        let op = if alias.is_some() {
            RelOp::TableAlias(base)
        } else {
            RelOp::TableScan(base)
        };
        self.memo.memoize_source(op)
    }

    /// Build a derived table's relation in its own scope frame. Correlation
    /// out of a derived table is not representable in the memo.
    fn build_derived_child(&mut self, child: &LogicalPlan) -> PlanResult<GroupId> {
        self.frames.push(Frame::default());
        let grp = self.build(child)?;
        let frame = self.frames.pop().expect("derived frame");
        if !frame.corr_preds.is_empty() || frame.escaped {
            return Err(PlanError::not_supported(
                "correlated derived table crosses a scope boundary",
            ));
        }
        Ok(grp)
    }

    /// Fresh source columns for a derived table, renaming the child's output.
    fn derived_base(&mut self, name: &str, child: GroupId) -> SourceBase {
        let child_props = self.memo.group(child).props.clone();
        let alias = name.to_lowercase();
        let table_id = TableId(self.memo.num_groups() as u16);
        let mut cols = Vec::with_capacity(child_props.cols.len());
        let mut schema = Vec::with_capacity(child_props.schema.len());
        for c in &child_props.schema {
            cols.push(self.memo.next_column_id());
            schema.push(Column {
                table: alias.clone(),
                ..c.clone()
            });
        }
        SourceBase {
            table: TableRef::new("", name),
            alias,
            table_id,
            cols,
            schema,
            indexes: vec![],
        }
    }

    fn new_source_base(
        &mut self,
        table: Option<&TableRef>,
        name: &str,
        columns: &[(String, SqlType)],
        index_defs: &[crate::catalog::IndexDef],
    ) -> SourceBase {
        let alias = name.to_lowercase();
        let table_id = TableId(self.memo.num_groups() as u16);
        let mut cols = Vec::with_capacity(columns.len());
        let mut schema = Vec::with_capacity(columns.len());
        for (cname, ty) in columns {
            cols.push(self.memo.next_column_id());
            schema.push(Column::new(alias.clone(), cname.clone(), *ty));
        }
        let col_id = |n: &str| -> Option<ColumnId> {
            schema
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(n))
                .map(|i| cols[i])
        };
        let indexes = index_defs
            .iter()
            .filter_map(|idx| {
                let order: Option<Vec<ColumnId>> = idx.columns.iter().map(|c| col_id(c)).collect();
                order.map(|o| Index::new(o, idx.clone()))
            })
            .collect();
        SourceBase {
            table: table
                .cloned()
                .unwrap_or_else(|| TableRef::new("", name)),
            alias,
            table_id,
            cols,
            schema,
            indexes,
        }
    }

    fn register_source(&mut self, base: &SourceBase) {
        let entry = SourceEntry {
            alias: base.alias.clone(),
            group: GroupId(base.table_id.0 + 1),
            cols: base
                .schema
                .iter()
                .zip(base.cols.iter())
                .map(|(c, id)| (c.name.to_lowercase(), *id, c.clone()))
                .collect(),
        };
        for (_, id, _) in &entry.cols {
            self.frame().own_cols.add(*id);
        }
        self.frame().sources.push(entry);
    }

    /// Whether an interned scalar references columns owned by an enclosing
    /// scope frame.
    fn is_outer_ref(&self, sid: ScalarId) -> bool {
        let own = &self.frames.last().expect("scope frame").own_cols;
        !self.memo.scalar_cols(sid).is_subset_of(own)
    }

    fn resolve_col(&self, table: Option<&str>, name: &str) -> PlanResult<ColRef> {
        let name_l = name.to_lowercase();
        for frame in self.frames.iter().rev() {
            for src in &frame.sources {
                if let Some(t) = table {
                    if !t.eq_ignore_ascii_case(&src.alias) {
                        continue;
                    }
                }
                if let Some((_, id, c)) = src.cols.iter().find(|(n, _, _)| *n == name_l) {
                    return Ok(ColRef {
                        col: *id,
                        group: src.group,
                        table: src.alias.clone(),
                        name: c.name.clone(),
                        ty: c.ty,
                        nullable: c.nullable,
                    });
                }
            }
        }
        Err(PlanError::not_supported(format!(
            "unresolved column {}{}",
            table.map(|t| format!("{t}.")).unwrap_or_default(),
            name
        )))
    }

    fn convert(&mut self, expr: &LogicalExpr) -> PlanResult<ScalarId> {
        let scalar = match expr {
            LogicalExpr::Column { table, name } => {
                ScalarExpr::ColRef(self.resolve_col(table.as_deref(), name)?)
            }
            LogicalExpr::Literal(v) => ScalarExpr::Literal(v.clone()),
            LogicalExpr::Cmp { op, left, right } => {
                let l = self.convert(left)?;
                let r = self.convert(right)?;
                ScalarExpr::Cmp {
                    op: *op,
                    left: l,
                    right: r,
                }
            }
            LogicalExpr::Not(c) => ScalarExpr::Not(self.convert(c)?),
            LogicalExpr::And(l, r) => {
                let l = self.convert(l)?;
                let r = self.convert(r)?;
                ScalarExpr::And(l, r)
            }
            LogicalExpr::Or(l, r) => {
                let l = self.convert(l)?;
                let r = self.convert(r)?;
                ScalarExpr::Or(l, r)
            }
            LogicalExpr::Arith { op, left, right } => {
                let l = self.convert(left)?;
                let r = self.convert(right)?;
                ScalarExpr::Arithmetic {
                    op: *op,
                    left: l,
                    right: r,
                }
            }
            LogicalExpr::InTuple { left, values } => {
                let l = self.convert(left)?;
                let vals: PlanResult<Vec<ScalarId>> =
                    values.iter().map(|v| self.convert(v)).collect();
                let tuple = self.memo.add_scalar(ScalarExpr::Tuple(vals?));
                ScalarExpr::InTuple {
                    left: l,
                    right: tuple,
                }
            }
            LogicalExpr::Regexp { left, right } => {
                let l = self.convert(left)?;
                let r = self.convert(right)?;
                ScalarExpr::Regexp { left: l, right: r }
            }
            LogicalExpr::IsNull(c) => ScalarExpr::IsNull(self.convert(c)?),
            LogicalExpr::Bindvar { name, ty } => ScalarExpr::Bindvar {
                name: name.clone(),
                ty: *ty,
            },
            LogicalExpr::Cast { child, ty } => {
                // A cast directly over a scalar subquery keeps the subquery
                // visible to decorrelation, flagged as a boundary cast.
                if let LogicalExpr::ScalarSubquery(sq) = child.as_ref() {
                    let mut sub = self.build_subquery(sq, true)?;
                    sub.cast_boundary = true;
                    ScalarExpr::Subquery(sub)
                } else {
                    let c = self.convert(child)?;
                    let node = self.memo.scalar(c);
                    ScalarExpr::Hidden {
                        desc: format!("cast({} as {:?})", self.memo.format_scalar(c), ty),
                        cols: node.cols.clone(),
                        tables: node.tables.clone(),
                    }
                }
            }
            LogicalExpr::InSubquery {
                left,
                subquery,
                negated,
            } => {
                let l = self.convert(left)?;
                let sub = self.build_subquery(subquery, true)?;
                let node = self.memo.add_scalar(ScalarExpr::InSubquery {
                    left: l,
                    subquery: sub,
                });
                if *negated {
                    ScalarExpr::Not(node)
                } else {
                    return Ok(node);
                }
            }
            LogicalExpr::Exists { subquery, negated } => {
                // EXISTS never reads the subquery's output, so any top
                // projection can be peeled.
                let sub = self.build_subquery(subquery, false)?;
                let node = self.memo.add_scalar(ScalarExpr::Exists { subquery: sub });
                if *negated {
                    ScalarExpr::Not(node)
                } else {
                    return Ok(node);
                }
            }
            LogicalExpr::ScalarSubquery(sq) => {
                ScalarExpr::Subquery(self.build_subquery(sq, true)?)
            }
        };
        Ok(self.memo.add_scalar(scalar))
    }

    fn build_subquery(
        &mut self,
        sq: &LogicalSubquery,
        output_needed: bool,
    ) -> PlanResult<SubqueryExpr> {
        self.frames.push(Frame::default());
        let mut root = self.build(&sq.plan)?;
        let frame = self.frames.pop().expect("subquery frame");

        // Peel a bare-column projection off the top: the lifted predicates
        // keep their columns visible in the relation, and key facts pinned
        // by filters survive for single-row detection. Computed projections
        // (casts and friends) stay in place, unless the caller never reads
        // the output at all.
        let mut output_col = None;
        let head = self.memo.group(root).first;
        if let RelOp::Project { child, projections } = self.memo.rel(head).op.clone() {
            let bare: Option<Vec<ColumnId>> = projections
                .iter()
                .map(|p| self.memo.scalar(*p).expr.as_col_ref().map(|c| c.col))
                .collect();
            if let Some(cols) = bare {
                output_col = cols.first().copied();
                root = child;
            } else if !output_needed {
                root = child;
            }
        }

        let props = &self.memo.group(root).props;
        let output_col = match output_col {
            Some(c) => c,
            None => *props
                .cols
                .first()
                .ok_or_else(|| PlanError::not_supported("subquery with no output columns"))?,
        };
        let single_row = sq.single_row || props.fds.max_one_row();

        // Correlation set: columns the lifted predicates reference outside
        // the subquery's own sources. If a lifted predicate needs an inner
        // column the relation no longer outputs, the rewrite is off.
        let mut correlated = ColSet::new();
        let mut blocked = frame.escaped;
        for pred in &frame.corr_preds {
            for col in self.memo.scalar_cols(*pred).iter() {
                if !frame.own_cols.contains(col) {
                    correlated.add(col);
                }
            }
            let inner = self.memo.scalar_cols(*pred).intersect(&frame.own_cols);
            if !inner.is_subset_of(&self.memo.group(root).props.col_set) {
                blocked = true;
            }
        }

        Ok(SubqueryExpr {
            root,
            output_col,
            corr_preds: frame.corr_preds,
            correlated,
            limit: sq.limit,
            ordered: sq.ordered,
            cast_boundary: false,
            blocked,
            single_row,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IndexDef, MemoryCatalog, TableDef};
    use crate::context::PlanConfig;
    use crate::logical::{self, LogicalJoinKind};
    use crate::scalar::CmpOp;

    fn test_catalog() -> MemoryCatalog {
        let mut cat = MemoryCatalog::new();
        cat.add_table(
            TableDef::new(TableRef::new("db", "xy"))
                .with_column("x", SqlType::Int64)
                .with_column("y", SqlType::Int64)
                .with_primary_key(&["x"])
                .with_index(IndexDef::new("y_idx", &["y"])),
        );
        cat.add_table(
            TableDef::new(TableRef::new("db", "uv"))
                .with_column("u", SqlType::Int64)
                .with_column("v", SqlType::Int64)
                .with_primary_key(&["u"]),
        );
        cat
    }

    #[test]
    fn test_memoize_join_assigns_global_columns() {
        let cat = test_catalog();
        let mut memo = Memo::new(PlanConfig::default());
        let plan = logical::join(
            LogicalJoinKind::Inner,
            logical::scan("db", "xy"),
            logical::scan("db", "uv"),
            vec![logical::eq(logical::col("xy", "x"), logical::col("uv", "u"))],
        );
        let root = memoize_plan(&mut memo, &cat, &plan).unwrap();

        let props = &memo.group(root).props;
        assert_eq!(props.cols.len(), 4);
        assert_eq!(props.tables.len(), 2);
        // xy registered as a leaf table for hint resolution.
        assert!(memo.table_props.group_id("XY").is_some());
        assert!(memo.table_props.group_id("uv").is_some());
    }

    #[test]
    fn test_correlated_predicate_is_lifted() {
        let cat = test_catalog();
        let mut memo = Memo::new(PlanConfig::default());
        // select * from xy where exists (select 1 from uv where u = x)
        let sub = LogicalSubquery::new(logical::filter(
            logical::scan("db", "uv"),
            vec![logical::eq(logical::col("uv", "u"), logical::col("xy", "x"))],
        ));
        let plan = logical::filter(
            logical::scan("db", "xy"),
            vec![LogicalExpr::Exists {
                subquery: sub,
                negated: false,
            }],
        );
        let root = memoize_plan(&mut memo, &cat, &plan).unwrap();

        let head = memo.group(root).first;
        let RelOp::Filter { filters, .. } = &memo.rel(head).op else {
            panic!("expected filter at root");
        };
        let ScalarExpr::Exists { subquery } = &memo.scalar(filters[0]).expr else {
            panic!("expected exists predicate");
        };
        assert_eq!(subquery.corr_preds.len(), 1);
        assert!(!subquery.blocked);
        assert_eq!(subquery.correlated.len(), 1);
        // The subquery root is the bare uv scan: the correlated filter was
        // removed from the relation.
        assert!(memo.rel(memo.group(subquery.root).first).op.is_source());
    }

    #[test]
    fn test_single_row_detection_via_constant_key() {
        let cat = test_catalog();
        let mut memo = Memo::new(PlanConfig::default());
        // (select u from uv where u = 1): keyed and pinned, provably one row.
        let sub = LogicalSubquery::new(logical::project(
            logical::filter(
                logical::scan("db", "uv"),
                vec![logical::eq(logical::col("uv", "u"), logical::lit(1))],
            ),
            vec![logical::col("uv", "u")],
        ));
        let plan = logical::filter(
            logical::scan("db", "xy"),
            vec![logical::cmp(
                CmpOp::Eq,
                logical::col("xy", "x"),
                LogicalExpr::ScalarSubquery(sub),
            )],
        );
        let root = memoize_plan(&mut memo, &cat, &plan).unwrap();
        let head = memo.group(root).first;
        let RelOp::Filter { filters, .. } = &memo.rel(head).op else {
            panic!("expected filter");
        };
        let ScalarExpr::Cmp { right, .. } = &memo.scalar(filters[0]).expr else {
            panic!("expected comparison");
        };
        let ScalarExpr::Subquery(sub) = &memo.scalar(*right).expr else {
            panic!("expected subquery operand");
        };
        assert!(sub.single_row);
        assert!(sub.corr_preds.is_empty());
    }
}
