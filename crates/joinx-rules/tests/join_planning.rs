//! End-to-end join planning tests.
//!
//! Each test builds a resolved logical tree over a small catalog, plans it,
//! and asserts two things: the chosen physical operator kinds (depth-first
//! preorder over join nodes), and the rows the plan produces under the
//! reference interpreter in `common`. Expected rows are computed by hand
//! from the fixture data, so a planner that picks a semantically wrong
//! alternative fails on rows even when the operator kinds look right.

mod common;

use common::{execute, ints, sort_rows, Row, TestData};
use joinx_core::build::{JoinSpec, PlanOp, PlanNode};
use joinx_core::catalog::{IndexDef, MemoryCatalog, SqlType, TableDef, TableRef};
use joinx_core::context::{PlanConfig, PlanContext};
use joinx_core::error::PlanError;
use joinx_core::hints::parse_join_hints;
use joinx_core::logical::{
    self, LogicalExpr, LogicalJoinKind, LogicalPlan, LogicalSubquery,
};
use joinx_core::rel::JoinKind;
use joinx_core::scalar::CmpOp;
use joinx_core::stats::MemoryStats;
use joinx_rules::{plan, PlannedQuery};

const DB: &str = "mydb";

fn table(name: &str) -> TableRef {
    TableRef::new(DB, name)
}

fn base_catalog() -> MemoryCatalog {
    let mut cat = MemoryCatalog::new();
    cat.add_table(
        TableDef::new(table("xy"))
            .with_column("x", SqlType::Int64)
            .with_column("y", SqlType::Int64)
            .with_primary_key(&["x"])
            .with_index(IndexDef::new("y_idx", &["y"])),
    );
    cat.add_table(
        TableDef::new(table("rs"))
            .with_column("r", SqlType::Int64)
            .with_column("s", SqlType::Int64)
            .with_primary_key(&["r"])
            .with_index(IndexDef::new("s_idx", &["s"])),
    );
    cat.add_table(
        TableDef::new(table("uv"))
            .with_column("u", SqlType::Int64)
            .with_column("v", SqlType::Int64)
            .with_primary_key(&["u"]),
    );
    cat.add_table(
        TableDef::new(table("ab"))
            .with_column("a", SqlType::Int64)
            .with_column("b", SqlType::Int64)
            .with_primary_key(&["a"]),
    );
    cat.add_table(
        TableDef::new(table("vals"))
            .with_column("val", SqlType::Int64)
            .with_primary_key(&["val"]),
    );
    cat.add_table(
        TableDef::new(table("ranges"))
            .with_column("min", SqlType::Int64)
            .with_column("max", SqlType::Int64)
            .with_primary_key(&["min"])
            .with_index(IndexDef::new("minmax_idx", &["min", "max"]).unique()),
    );
    cat.add_table(
        TableDef::new(table("lhs"))
            .with_column("a", SqlType::Int64)
            .with_column("b", SqlType::Int64)
            .with_column("c", SqlType::Int64),
    );
    cat.add_table(
        TableDef::new(table("rhs"))
            .with_column("a", SqlType::Int64)
            .with_column("b", SqlType::Int64)
            .with_column("c", SqlType::Int64)
            .with_column("d", SqlType::Int64)
            .with_index(IndexDef::new("a_idx", &["a"]))
            .with_index(IndexDef::new("abcd_idx", &["a", "b", "c", "d"])),
    );
    cat
}

fn base_stats() -> MemoryStats {
    let mut stats = MemoryStats::new();
    for name in ["xy", "rs", "uv", "ab", "vals", "ranges", "lhs", "rhs"] {
        stats.set_row_count(&table(name), 1000.0);
    }
    for (name, col) in [("xy", "x"), ("rs", "r"), ("uv", "u"), ("ab", "a"), ("vals", "val"), ("ranges", "min")] {
        stats.set_distinct_values(&table(name), col, 1000.0);
    }
    stats
}

fn base_data() -> TestData {
    let mut data = TestData::new();
    data.table(
        "xy",
        &[
            &[Some(1), Some(0)],
            &[Some(2), Some(1)],
            &[Some(0), Some(2)],
            &[Some(3), Some(3)],
        ],
    );
    data.table(
        "rs",
        &[
            &[Some(0), Some(0)],
            &[Some(1), Some(0)],
            &[Some(2), Some(0)],
            &[Some(4), Some(4)],
            &[Some(5), Some(4)],
        ],
    );
    data.table(
        "uv",
        &[
            &[Some(0), Some(1)],
            &[Some(1), Some(1)],
            &[Some(2), Some(2)],
            &[Some(3), Some(2)],
        ],
    );
    data.table(
        "ab",
        &[
            &[Some(0), Some(2)],
            &[Some(1), Some(2)],
            &[Some(2), Some(2)],
            &[Some(3), Some(1)],
        ],
    );
    data.table(
        "vals",
        &[
            &[Some(0)],
            &[Some(1)],
            &[Some(2)],
            &[Some(3)],
            &[Some(4)],
            &[Some(5)],
            &[Some(6)],
        ],
    );
    data.table(
        "ranges",
        &[
            &[Some(0), Some(2)],
            &[Some(1), Some(3)],
            &[Some(2), Some(4)],
            &[Some(3), Some(5)],
            &[Some(4), Some(6)],
        ],
    );
    data.table(
        "lhs",
        &[
            &[Some(0), Some(0), Some(0)],
            &[Some(0), Some(0), Some(1)],
            &[Some(0), Some(1), Some(1)],
            &[Some(1), Some(1), Some(1)],
        ],
    );
    data.table(
        "rhs",
        &[
            &[Some(0), Some(0), Some(0), Some(0)],
            &[Some(0), Some(0), Some(1), Some(1)],
            &[Some(1), Some(1), Some(1), Some(2)],
        ],
    );
    data
}

fn run(query: &LogicalPlan, hints: &str) -> PlannedQuery {
    // RUST_LOG=trace surfaces rule firing and the memo dump.
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let hints = parse_join_hints(hints);
    plan(
        query,
        &base_catalog(),
        &base_stats(),
        &hints,
        PlanConfig::default(),
        &PlanContext::new(),
    )
    .expect("planning failed")
}

fn rows_of(plan: &PlanNode) -> Vec<Row> {
    sort_rows(execute(plan, &base_data()))
}

fn expect_rows(rows: &[&[Option<i64>]]) -> Vec<Row> {
    sort_rows(rows.iter().map(|r| ints(r)).collect())
}

// -----------------------------------------------------------------------
// Spec scenarios
// -----------------------------------------------------------------------

#[test]
fn test_merge_on_indexed_equality() {
    // select * from rs join xy on y = s order by 1, 3
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "rs"),
        logical::scan(DB, "xy"),
        vec![logical::eq(logical::col("xy", "y"), logical::col("rs", "s"))],
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::Merge]);
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[Some(0), Some(0), Some(1), Some(0)],
            &[Some(1), Some(0), Some(1), Some(0)],
            &[Some(2), Some(0), Some(1), Some(0)],
        ])
    );
}

#[test]
fn test_lookup_for_semi_decorrelation() {
    // select * from xy where x in (select b from ab where a in (0, 1, 2))
    let sub = LogicalSubquery::new(logical::project(
        logical::filter(
            logical::scan(DB, "ab"),
            vec![LogicalExpr::InTuple {
                left: Box::new(logical::col("ab", "a")),
                values: vec![logical::lit(0), logical::lit(1), logical::lit(2)],
            }],
        ),
        vec![logical::col("ab", "b")],
    ));
    let q = logical::filter(
        logical::scan(DB, "xy"),
        vec![LogicalExpr::InSubquery {
            left: Box::new(logical::col("xy", "x")),
            subquery: sub,
            negated: false,
        }],
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::Lookup]);
    assert_eq!(rows_of(&planned.plan), expect_rows(&[&[Some(2), Some(1)]]));
}

#[test]
fn test_not_in_with_potential_nulls() {
    // select * from xy where y + 1 not in (select u from uv)
    let sub = LogicalSubquery::new(logical::project(
        logical::scan(DB, "uv"),
        vec![logical::col("uv", "u")],
    ));
    let q = logical::filter(
        logical::scan(DB, "xy"),
        vec![LogicalExpr::InSubquery {
            left: Box::new(logical::add(logical::col("xy", "y"), logical::lit(1))),
            subquery: sub,
            negated: true,
        }],
    );
    let planned = run(&q, "");
    assert_eq!(
        planned.plan.join_kinds(),
        vec![JoinKind::LeftOuterHashExcludeNulls]
    );
    assert_eq!(rows_of(&planned.plan), expect_rows(&[&[Some(3), Some(3)]]));
}

#[test]
fn test_range_heap_on_between() {
    // select * from vals join ranges on val between min and max
    let mut on = logical::between(
        logical::col("vals", "val"),
        logical::col("ranges", "min"),
        logical::col("ranges", "max"),
    );
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "vals"),
        logical::scan(DB, "ranges"),
        std::mem::take(&mut on),
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::RangeHeap]);
    let rows = rows_of(&planned.plan);
    assert_eq!(rows.len(), 15);
    // Every row satisfies val ∈ [min, max].
    for row in &rows {
        let (val, min, max) = (&row[0], &row[1], &row[2]);
        let as_i = |v: &joinx_core::scalar::ScalarValue| match v {
            joinx_core::scalar::ScalarValue::Int64(i) => *i,
            other => panic!("unexpected value {other:?}"),
        };
        assert!(as_i(min) <= as_i(val) && as_i(val) <= as_i(max));
    }
}

#[test]
fn test_hint_forces_join_order_and_operator() {
    // select /*+ JOIN_ORDER(a,b,c) HASH_JOIN(a,b) HASH_JOIN(b,c) */ 1
    // from xy a join uv b on a.x = b.u join xy c on b.u = c.x
    let q = logical::project(
        logical::join(
            LogicalJoinKind::Inner,
            logical::join(
                LogicalJoinKind::Inner,
                logical::scan_as(DB, "xy", "a"),
                logical::scan_as(DB, "uv", "b"),
                vec![logical::eq(logical::col("a", "x"), logical::col("b", "u"))],
            ),
            logical::scan_as(DB, "xy", "c"),
            vec![logical::eq(logical::col("b", "u"), logical::col("c", "x"))],
        ),
        vec![logical::lit(1)],
    );
    let planned = run(&q, "/*+ JOIN_ORDER(a,b,c) HASH_JOIN(a,b) HASH_JOIN(b,c) */");
    assert!(!planned.hints_ignored);
    assert_eq!(
        planned.plan.join_kinds(),
        vec![JoinKind::Hash, JoinKind::Hash]
    );
    assert_eq!(
        planned.plan.leaf_order(),
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );
    assert_eq!(rows_of(&planned.plan).len(), 4);
}

#[test]
fn test_multi_column_index_preferred() {
    // select rhs.* from lhs left join rhs
    //   on lhs.a = rhs.a and lhs.b = rhs.b and lhs.c = rhs.c
    let q = logical::project(
        logical::join(
            LogicalJoinKind::Left,
            logical::scan(DB, "lhs"),
            logical::scan(DB, "rhs"),
            vec![
                logical::eq(logical::col("lhs", "a"), logical::col("rhs", "a")),
                logical::eq(logical::col("lhs", "b"), logical::col("rhs", "b")),
                logical::eq(logical::col("lhs", "c"), logical::col("rhs", "c")),
            ],
        ),
        vec![
            logical::col("rhs", "a"),
            logical::col("rhs", "b"),
            logical::col("rhs", "c"),
            logical::col("rhs", "d"),
        ],
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::LeftOuterLookup]);
    // The longer prefix wins over a_idx.
    assert_eq!(lookup_index(&planned.plan).as_deref(), Some("abcd_idx"));
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[None, None, None, None],
            &[Some(0), Some(0), Some(0), Some(0)],
            &[Some(0), Some(0), Some(1), Some(1)],
            &[Some(1), Some(1), Some(1), Some(2)],
        ])
    );
}

fn lookup_index(plan: &PlanNode) -> Option<String> {
    match &plan.op {
        PlanOp::Join(j) => match &j.spec {
            JoinSpec::Lookup(spec) => Some(spec.index.clone()),
            _ => None,
        },
        PlanOp::Project { child, .. }
        | PlanOp::Filter { child, .. }
        | PlanOp::Distinct { child, .. }
        | PlanOp::Derived { child, .. }
        | PlanOp::Max1Row { child }
        | PlanOp::Sort { child, .. } => lookup_index(child),
        _ => None,
    }
}

// -----------------------------------------------------------------------
// Merge and hash selection details
// -----------------------------------------------------------------------

#[test]
fn test_left_outer_merge_preserves_left_rows() {
    // select /*+ JOIN_ORDER(rs, xy) */ * from rs left join xy on y = s
    let q = logical::join(
        LogicalJoinKind::Left,
        logical::scan(DB, "rs"),
        logical::scan(DB, "xy"),
        vec![logical::eq(logical::col("xy", "y"), logical::col("rs", "s"))],
    );
    let planned = run(&q, "JOIN_ORDER(rs, xy)");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::LeftOuterMerge]);
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[Some(0), Some(0), Some(1), Some(0)],
            &[Some(1), Some(0), Some(1), Some(0)],
            &[Some(2), Some(0), Some(1), Some(0)],
            &[Some(4), Some(4), None, None],
            &[Some(5), Some(4), None, None],
        ])
    );
}

#[test]
fn test_left_outer_merge_residual_keeps_left_rows() {
    // Extra join conditions never drop left-only rows.
    // select /*+ JOIN_ORDER(rs, xy) */ * from rs left join xy
    //   on y = s and y + s = 0
    let q = logical::join(
        LogicalJoinKind::Left,
        logical::scan(DB, "rs"),
        logical::scan(DB, "xy"),
        vec![
            logical::eq(logical::col("xy", "y"), logical::col("rs", "s")),
            logical::eq(
                logical::add(logical::col("xy", "y"), logical::col("rs", "s")),
                logical::lit(0),
            ),
        ],
    );
    let planned = run(&q, "JOIN_ORDER(rs, xy)");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::LeftOuterMerge]);
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[Some(0), Some(0), Some(1), Some(0)],
            &[Some(1), Some(0), Some(1), Some(0)],
            &[Some(2), Some(0), Some(1), Some(0)],
            &[Some(4), Some(4), None, None],
            &[Some(5), Some(4), None, None],
        ])
    );
}

#[test]
fn test_left_outer_merge_keeps_preserved_side_filter() {
    // select /*+ MERGE_JOIN(xy, uv) */ *
    // from (select * from xy where y >= 2) left join uv on x = u:
    // the preserved side's filter must apply to its input, not ride along
    // as join residual where failing rows would be null-padded instead of
    // dropped.
    let q = logical::join(
        LogicalJoinKind::Left,
        logical::filter(
            logical::scan(DB, "xy"),
            vec![logical::cmp(CmpOp::Geq, logical::col("xy", "y"), logical::lit(2))],
        ),
        logical::scan(DB, "uv"),
        vec![logical::eq(logical::col("xy", "x"), logical::col("uv", "u"))],
    );
    let planned = run(&q, "MERGE_JOIN(xy, uv)");
    assert!(!planned.hints_ignored);
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::LeftOuterMerge]);
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[Some(0), Some(2), Some(0), Some(1)],
            &[Some(3), Some(3), Some(3), Some(2)],
        ])
    );
}

#[test]
fn test_merge_with_offset_expression_key() {
    // select /*+ JOIN_ORDER(rs, xy) */ * from rs join xy on y + 2 = s:
    // y + 2 is monotone in y, so the y_idx order still works for merge.
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "rs"),
        logical::scan(DB, "xy"),
        vec![logical::eq(
            logical::add(logical::col("xy", "y"), logical::lit(2)),
            logical::col("rs", "s"),
        )],
    );
    let planned = run(&q, "JOIN_ORDER(rs, xy)");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::Merge]);
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[Some(4), Some(4), Some(0), Some(2)],
            &[Some(5), Some(4), Some(0), Some(2)],
        ])
    );
}

#[test]
fn test_hash_when_stream_side_is_expression() {
    // select /*+ JOIN_ORDER(rs, xy) */ * from rs join xy on y = s - 1:
    // the rs-side key is an expression, so no index streams it; hash wins.
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "rs"),
        logical::scan(DB, "xy"),
        vec![logical::eq(
            logical::col("xy", "y"),
            logical::sub(logical::col("rs", "s"), logical::lit(1)),
        )],
    );
    let planned = run(&q, "JOIN_ORDER(rs, xy)");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::Hash]);
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[Some(4), Some(4), Some(3), Some(3)],
            &[Some(5), Some(4), Some(3), Some(3)],
        ])
    );
}

#[test]
fn test_nested_loop_for_non_splittable_predicates() {
    // select /*+ JOIN_ORDER(rs, xy) */ * from rs join xy on 2 = s + y:
    // the equality spans both sides, so no hash keys exist.
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "rs"),
        logical::scan(DB, "xy"),
        vec![logical::eq(
            logical::lit(2),
            logical::add(logical::col("rs", "s"), logical::col("xy", "y")),
        )],
    );
    let planned = run(&q, "JOIN_ORDER(rs, xy)");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::Inner]);
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[Some(0), Some(0), Some(0), Some(2)],
            &[Some(1), Some(0), Some(0), Some(2)],
            &[Some(2), Some(0), Some(0), Some(2)],
        ])
    );
}

// -----------------------------------------------------------------------
// Subquery decorrelation
// -----------------------------------------------------------------------

fn scalar_subquery_on_rs() -> LogicalSubquery {
    // (select r from rs where r = 1)
    LogicalSubquery::new(logical::project(
        logical::filter(
            logical::scan(DB, "rs"),
            vec![logical::eq(logical::col("rs", "r"), logical::lit(1))],
        ),
        vec![logical::col("rs", "r")],
    ))
}

#[test]
fn test_not_equal_scalar_subquery() {
    // select * from xy where x != (select r from rs where r = 1)
    let q = logical::filter(
        logical::scan(DB, "xy"),
        vec![logical::ne(
            logical::col("xy", "x"),
            LogicalExpr::ScalarSubquery(scalar_subquery_on_rs()),
        )],
    );
    let planned = run(&q, "");
    assert_eq!(
        planned.plan.join_kinds(),
        vec![JoinKind::LeftOuterHashExcludeNulls]
    );
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[&[Some(0), Some(2)], &[Some(2), Some(1)], &[Some(3), Some(3)]])
    );
}

#[test]
fn test_order_by_in_scalar_subquery_is_discarded() {
    // select * from xy where x != (select r from rs where r = 1 order by 1)
    let q = logical::filter(
        logical::scan(DB, "xy"),
        vec![logical::ne(
            logical::col("xy", "x"),
            LogicalExpr::ScalarSubquery(scalar_subquery_on_rs().with_order_by()),
        )],
    );
    let planned = run(&q, "");
    assert_eq!(
        planned.plan.join_kinds(),
        vec![JoinKind::LeftOuterHashExcludeNulls]
    );
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[&[Some(0), Some(2)], &[Some(2), Some(1)], &[Some(3), Some(3)]])
    );
}

#[test]
fn test_limit_keeps_not_equal_decorrelation() {
    // A LIMIT blocks inequality decorrelation but not <>; the subquery is
    // deterministic either way.
    let q = logical::filter(
        logical::scan(DB, "xy"),
        vec![logical::ne(
            logical::col("xy", "x"),
            LogicalExpr::ScalarSubquery(scalar_subquery_on_rs().with_limit(1)),
        )],
    );
    let planned = run(&q, "");
    assert_eq!(
        planned.plan.join_kinds(),
        vec![JoinKind::LeftOuterHashExcludeNulls]
    );
}

#[test]
fn test_semi_for_inequality_scalar_subquery() {
    // select * from uv where u > (select r from rs where r = 1)
    let q = logical::filter(
        logical::scan(DB, "uv"),
        vec![logical::cmp(
            CmpOp::Gt,
            logical::col("uv", "u"),
            LogicalExpr::ScalarSubquery(scalar_subquery_on_rs()),
        )],
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::Semi]);
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[&[Some(2), Some(2)], &[Some(3), Some(2)]])
    );
}

#[test]
fn test_limit_blocks_inequality_decorrelation() {
    // select * from uv where u > (select x from xy where x = 1 limit 1):
    // the comparison stays a per-row subquery filter; no join appears.
    let sub = LogicalSubquery::new(logical::project(
        logical::filter(
            logical::scan(DB, "xy"),
            vec![logical::eq(logical::col("xy", "x"), logical::lit(1))],
        ),
        vec![logical::col("xy", "x")],
    ))
    .with_limit(1);
    let q = logical::filter(
        logical::scan(DB, "uv"),
        vec![logical::cmp(
            CmpOp::Gt,
            logical::col("uv", "u"),
            LogicalExpr::ScalarSubquery(sub),
        )],
    );
    let planned = run(&q, "");
    assert!(planned.plan.join_kinds().is_empty());
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[&[Some(2), Some(2)], &[Some(3), Some(2)]])
    );
}

#[test]
fn test_equal_scalar_subquery_becomes_lookup() {
    // select * from xy where x = (select r from rs where r = 1)
    let q = logical::filter(
        logical::scan(DB, "xy"),
        vec![logical::eq(
            logical::col("xy", "x"),
            LogicalExpr::ScalarSubquery(scalar_subquery_on_rs()),
        )],
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::Lookup]);
    assert_eq!(rows_of(&planned.plan), expect_rows(&[&[Some(1), Some(0)]]));
}

#[test]
fn test_in_over_unique_subquery_converts_to_inner() {
    // select * from xy where y - 1 in (select u from uv): u is a key, so
    // the semi join converts to an inner join and its physical forms.
    let sub = LogicalSubquery::new(logical::project(
        logical::scan(DB, "uv"),
        vec![logical::col("uv", "u")],
    ));
    let q = logical::filter(
        logical::scan(DB, "xy"),
        vec![LogicalExpr::InSubquery {
            left: Box::new(logical::sub(logical::col("xy", "y"), logical::lit(1))),
            subquery: sub,
            negated: false,
        }],
    );
    let planned = run(&q, "");
    let kinds = planned.plan.join_kinds();
    assert_eq!(kinds.len(), 1);
    assert!(
        kinds[0].is_inner(),
        "expected an inner-family physical join, got {kinds:?}"
    );
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[&[Some(0), Some(2)], &[Some(2), Some(1)], &[Some(3), Some(3)]])
    );
}

#[test]
fn test_nested_not_in_composition() {
    // select * from xy where x not in (
    //   select u from uv where u not in (
    //     select a from ab where a not in (
    //       select r from rs where r = 1)))
    let inner = LogicalSubquery::new(logical::project(
        logical::filter(
            logical::scan(DB, "ab"),
            vec![LogicalExpr::InSubquery {
                left: Box::new(logical::col("ab", "a")),
                subquery: scalar_subquery_on_rs(),
                negated: true,
            }],
        ),
        vec![logical::col("ab", "a")],
    ));
    let middle = LogicalSubquery::new(logical::project(
        logical::filter(
            logical::scan(DB, "uv"),
            vec![LogicalExpr::InSubquery {
                left: Box::new(logical::col("uv", "u")),
                subquery: inner,
                negated: true,
            }],
        ),
        vec![logical::col("uv", "u")],
    ));
    let q = logical::filter(
        logical::scan(DB, "xy"),
        vec![LogicalExpr::InSubquery {
            left: Box::new(logical::col("xy", "x")),
            subquery: middle,
            negated: true,
        }],
    );
    let planned = run(&q, "");
    assert_eq!(
        planned.plan.join_kinds(),
        vec![
            JoinKind::LeftOuterHashExcludeNulls,
            JoinKind::LeftOuterHashExcludeNulls,
            JoinKind::AntiLookup,
        ]
    );
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[&[Some(0), Some(2)], &[Some(2), Some(1)], &[Some(3), Some(3)]])
    );
}

#[test]
fn test_exists_becomes_lookup() {
    // select * from xy where exists (select 1 from uv where u = x)
    let sub = LogicalSubquery::new(logical::project(
        logical::filter(
            logical::scan(DB, "uv"),
            vec![logical::eq(logical::col("uv", "u"), logical::col("xy", "x"))],
        ),
        vec![logical::lit(1)],
    ));
    let q = logical::filter(
        logical::scan(DB, "xy"),
        vec![LogicalExpr::Exists {
            subquery: sub,
            negated: false,
        }],
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::Lookup]);
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[Some(0), Some(2)],
            &[Some(1), Some(0)],
            &[Some(2), Some(1)],
            &[Some(3), Some(3)],
        ])
    );
}

#[test]
fn test_not_exists_becomes_anti_lookup() {
    // select * from rs where not exists (select 1 from xy where x = r)
    let sub = LogicalSubquery::new(logical::project(
        logical::filter(
            logical::scan(DB, "xy"),
            vec![logical::eq(logical::col("xy", "x"), logical::col("rs", "r"))],
        ),
        vec![logical::lit(1)],
    ));
    let q = logical::filter(
        logical::scan(DB, "rs"),
        vec![LogicalExpr::Exists {
            subquery: sub,
            negated: true,
        }],
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::AntiLookup]);
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[&[Some(4), Some(4)], &[Some(5), Some(4)]])
    );
}

#[test]
fn test_exists_with_hinted_lookup_and_merge() {
    // select /*+ LOOKUP_JOIN(xy,ab) MERGE_JOIN(ab,uv) JOIN_ORDER(ab,uv,xy) */ *
    // from xy where exists (select 1 from ab join uv on a = u where x = a)
    let sub = LogicalSubquery::new(logical::project(
        logical::filter(
            logical::join(
                LogicalJoinKind::Inner,
                logical::scan(DB, "ab"),
                logical::scan(DB, "uv"),
                vec![logical::eq(logical::col("ab", "a"), logical::col("uv", "u"))],
            ),
            vec![logical::eq(logical::col("xy", "x"), logical::col("ab", "a"))],
        ),
        vec![logical::lit(1)],
    ));
    let q = logical::filter(
        logical::scan(DB, "xy"),
        vec![LogicalExpr::Exists {
            subquery: sub,
            negated: false,
        }],
    );
    let planned = run(&q, "/*+ LOOKUP_JOIN(xy,ab) MERGE_JOIN(ab,uv) JOIN_ORDER(ab,uv,xy) */");
    assert!(!planned.hints_ignored);
    assert_eq!(
        planned.plan.join_kinds(),
        vec![JoinKind::Lookup, JoinKind::Merge]
    );
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[Some(0), Some(2)],
            &[Some(1), Some(0)],
            &[Some(2), Some(1)],
            &[Some(3), Some(3)],
        ])
    );
}

// -----------------------------------------------------------------------
// Other operators and surfaces
// -----------------------------------------------------------------------

#[test]
fn test_concat_lookup_for_disjunction() {
    // select * from xy join ab on x = a or y = a
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "xy"),
        logical::scan(DB, "ab"),
        vec![LogicalExpr::Or(
            Box::new(logical::eq(logical::col("xy", "x"), logical::col("ab", "a"))),
            Box::new(logical::eq(logical::col("xy", "y"), logical::col("ab", "a"))),
        )],
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::Lookup]);
    let PlanOp::Join(j) = &planned.plan.op else {
        panic!("expected join at root");
    };
    assert!(matches!(&j.spec, JoinSpec::Concat(specs) if specs.len() == 2));
    assert_eq!(rows_of(&planned.plan).len(), 7);
}

#[test]
fn test_cross_join_materializes_hash() {
    // select * from ab, uv
    let q = logical::join(
        LogicalJoinKind::Cross,
        logical::scan(DB, "ab"),
        logical::scan(DB, "uv"),
        vec![],
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::CrossHash]);
    assert_eq!(rows_of(&planned.plan).len(), 16);
}

#[test]
fn test_derived_table_probes_indexed_side() {
    // select * from uv join (select * from ab) r on u = r.a: the derived
    // table has no indexes, so the commuted orientation looks up into uv's
    // primary key and the output is projected back to declaration order.
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "uv"),
        LogicalPlan::SubqueryAlias {
            name: "r".to_string(),
            child: Box::new(logical::scan(DB, "ab")),
        },
        vec![logical::eq(logical::col("uv", "u"), logical::col("r", "a"))],
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::Lookup]);
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[Some(0), Some(1), Some(0), Some(2)],
            &[Some(1), Some(1), Some(1), Some(2)],
            &[Some(2), Some(2), Some(2), Some(2)],
            &[Some(3), Some(2), Some(3), Some(1)],
        ])
    );
}

#[test]
fn test_full_outer_join_pads_both_sides() {
    // select * from xy full outer join uv on x = u + 10
    let q = LogicalPlan::Join {
        kind: LogicalJoinKind::FullOuter,
        left: Box::new(logical::scan(DB, "xy")),
        right: Box::new(logical::scan(DB, "uv")),
        on: vec![logical::eq(
            logical::col("xy", "x"),
            logical::add(logical::col("uv", "u"), logical::lit(10)),
        )],
    };
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::FullOuter]);
    assert_eq!(rows_of(&planned.plan).len(), 8);
}

#[test]
fn test_distinct_enforcement() {
    // select distinct b from ab
    let q = LogicalPlan::Distinct {
        child: Box::new(logical::project(
            logical::scan(DB, "ab"),
            vec![logical::col("ab", "b")],
        )),
    };
    let planned = run(&q, "");
    assert!(matches!(planned.plan.op, PlanOp::Distinct { .. }));
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[&[Some(1)], &[Some(2)]])
    );
}

#[test]
fn test_left_join_associates_with_inner_above() {
    // select * from (ab left join xy on b = y) join uv on a = u: the inner
    // join may hoist above the left join; either shape must produce the
    // same rows.
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::join(
            LogicalJoinKind::Left,
            logical::scan(DB, "ab"),
            logical::scan(DB, "xy"),
            vec![logical::eq(logical::col("ab", "b"), logical::col("xy", "y"))],
        ),
        logical::scan(DB, "uv"),
        vec![logical::eq(logical::col("ab", "a"), logical::col("uv", "u"))],
    );
    let planned = run(&q, "");
    assert!(!planned.plan.join_kinds().is_empty());
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[Some(0), Some(2), Some(0), Some(2), Some(0), Some(1)],
            &[Some(1), Some(2), Some(0), Some(2), Some(1), Some(1)],
            &[Some(2), Some(2), Some(0), Some(2), Some(2), Some(2)],
            &[Some(3), Some(1), Some(2), Some(1), Some(3), Some(2)],
        ])
    );
}

// -----------------------------------------------------------------------
// Hints and the error surface
// -----------------------------------------------------------------------

#[test]
fn test_unsatisfiable_hint_is_advisory() {
    // select /*+ MERGE_JOIN(xy, uv) */ * from xy join uv on y = v:
    // uv has no index on v, so no merge plan exists. The cheapest plan is
    // returned and the ignored-hints flag is raised.
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "xy"),
        logical::scan(DB, "uv"),
        vec![logical::eq(logical::col("xy", "y"), logical::col("uv", "v"))],
    );
    let planned = run(&q, "MERGE_JOIN(xy, uv)");
    assert!(planned.hints_ignored);
    assert_eq!(rows_of(&planned.plan).len(), 4);
}

#[test]
fn test_unresolvable_hint_reference() {
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "xy"),
        logical::scan(DB, "uv"),
        vec![logical::eq(logical::col("xy", "x"), logical::col("uv", "u"))],
    );
    let hints = parse_join_hints("JOIN_ORDER(xy, zz)");
    let err = plan(
        &q,
        &base_catalog(),
        &base_stats(),
        &hints,
        PlanConfig::default(),
        &PlanContext::new(),
    )
    .unwrap_err();
    assert!(matches!(err, PlanError::UnresolvableHint(t) if t == "zz"));
}

#[test]
fn test_cancellation_aborts_planning() {
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "xy"),
        logical::scan(DB, "uv"),
        vec![logical::eq(logical::col("xy", "x"), logical::col("uv", "u"))],
    );
    let ctx = PlanContext::new();
    ctx.cancel();
    let err = plan(
        &q,
        &base_catalog(),
        &base_stats(),
        &[],
        PlanConfig::default(),
        &ctx,
    )
    .unwrap_err();
    assert!(matches!(err, PlanError::Cancelled));
}

#[test]
fn test_values_and_empty_table_sources() {
    // select * from uv join (values (1),(3)) v(k) on u = k
    let values = LogicalPlan::Values {
        name: "v".to_string(),
        columns: vec!["k".to_string()],
        rows: vec![
            vec![joinx_core::scalar::ScalarValue::Int64(1)],
            vec![joinx_core::scalar::ScalarValue::Int64(3)],
        ],
    };
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "uv"),
        values,
        vec![logical::eq(logical::col("uv", "u"), logical::col("v", "k"))],
    );
    let planned = run(&q, "");
    assert_eq!(
        rows_of(&planned.plan),
        expect_rows(&[
            &[Some(1), Some(1), Some(1)],
            &[Some(3), Some(2), Some(3)],
        ])
    );

    // Joining an empty table yields no rows.
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "xy"),
        LogicalPlan::EmptyTable {
            name: "et".to_string(),
            columns: vec![("e".to_string(), SqlType::Int64)],
        },
        vec![logical::eq(logical::col("xy", "x"), logical::col("et", "e"))],
    );
    let planned = run(&q, "");
    assert!(rows_of(&planned.plan).is_empty());
}

#[test]
fn test_table_func_and_recursive_cte_sources() {
    // Table functions and recursive CTE bodies participate as opaque
    // sources: no indexes of their own, so the indexed side of the join
    // becomes the lookup target.
    let mut data = base_data();
    data.table("tf", &[&[Some(0)], &[Some(2)]]);

    let q = logical::join(
        LogicalJoinKind::Inner,
        LogicalPlan::TableFunc {
            name: "tf".to_string(),
            columns: vec![("fid".to_string(), SqlType::Int64)],
        },
        logical::scan(DB, "uv"),
        vec![logical::eq(logical::col("tf", "fid"), logical::col("uv", "u"))],
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::Lookup]);
    assert_eq!(
        sort_rows(execute(&planned.plan, &data)),
        expect_rows(&[
            &[Some(0), Some(0), Some(1)],
            &[Some(2), Some(2), Some(2)],
        ])
    );

    // A recursive CTE body is planned like any derived relation.
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "uv"),
        LogicalPlan::RecursiveCte {
            name: "cte".to_string(),
            child: Box::new(logical::scan(DB, "ab")),
        },
        vec![logical::eq(logical::col("uv", "u"), logical::col("cte", "a"))],
    );
    let planned = run(&q, "");
    assert_eq!(planned.plan.join_kinds(), vec![JoinKind::Lookup]);
    assert_eq!(rows_of(&planned.plan).len(), 4);
}

#[test]
fn test_join_fixed_order_disables_reordering() {
    // With JOIN_FIXED_ORDER the memoized (rs, xy) order is frozen; the
    // plan must keep rs on the left.
    let q = logical::join(
        LogicalJoinKind::Inner,
        logical::scan(DB, "rs"),
        logical::scan(DB, "xy"),
        vec![logical::eq(logical::col("xy", "y"), logical::col("rs", "s"))],
    );
    let planned = run(&q, "JOIN_FIXED_ORDER");
    assert_eq!(
        planned.plan.leaf_order(),
        vec!["rs".to_string(), "xy".to_string()]
    );
}
