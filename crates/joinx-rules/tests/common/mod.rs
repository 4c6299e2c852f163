//! Test support: an in-memory row store and a reference interpreter that
//! evaluates reified plans with MySQL comparison semantics. The interpreter
//! executes every join as its logical family (the physical payloads only
//! matter to a real executor), which is exactly what makes it useful as a
//! soundness oracle for the planner's physical choices.

use joinx_core::build::{JoinSpec, PhysExpr, PlanNode, PlanOp};
use joinx_core::ids::ColumnId;
use joinx_core::scalar::{ArithOp, CmpOp, ScalarValue};
use std::collections::{HashMap, HashSet};

pub type Row = Vec<ScalarValue>;

#[derive(Debug, Clone, Default)]
pub struct TestData {
    tables: HashMap<String, Vec<Row>>,
}

impl TestData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert integer rows; `None` is NULL.
    pub fn table(&mut self, name: &str, rows: &[&[Option<i64>]]) {
        let rows = rows
            .iter()
            .map(|r| {
                r.iter()
                    .map(|v| match v {
                        Some(i) => ScalarValue::Int64(*i),
                        None => ScalarValue::Null,
                    })
                    .collect()
            })
            .collect();
        self.tables.insert(name.to_lowercase(), rows);
    }

    fn rows(&self, name: &str) -> Vec<Row> {
        self.tables
            .get(&name.to_lowercase())
            .unwrap_or_else(|| panic!("no test data for table {name}"))
            .clone()
    }
}

/// Shorthand for integer rows in expected-result lists.
pub fn ints(vals: &[Option<i64>]) -> Row {
    vals.iter()
        .map(|v| match v {
            Some(i) => ScalarValue::Int64(*i),
            None => ScalarValue::Null,
        })
        .collect()
}

/// Sort rows lexicographically (NULLs first) for order-insensitive
/// comparison against expected results.
pub fn sort_rows(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by(|a, b| {
        for (x, y) in a.iter().zip(b.iter()) {
            let ord = cmp_values(x, y);
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    rows
}

/// Evaluation scope: a stack of (columns, row) frames, innermost last.
/// Correlated references resolve through outer frames.
#[derive(Clone, Default)]
pub struct Env {
    frames: Vec<(Vec<ColumnId>, Row)>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, cols: &[ColumnId], row: &Row) -> Env {
        let mut e = self.clone();
        e.frames.push((cols.to_vec(), row.clone()));
        e
    }

    fn get(&self, col: ColumnId) -> ScalarValue {
        for (cols, row) in self.frames.iter().rev() {
            if let Some(i) = cols.iter().position(|c| *c == col) {
                return row[i].clone();
            }
        }
        panic!("unbound column {col:?}");
    }
}

pub fn execute(plan: &PlanNode, data: &TestData) -> Vec<Row> {
    exec(plan, data, &Env::new())
}

fn exec(plan: &PlanNode, data: &TestData, env: &Env) -> Vec<Row> {
    match &plan.op {
        PlanOp::TableScan { table, .. } => data.rows(&table.name),
        PlanOp::IndexScan { table, ranges, .. } => {
            let rows = data.rows(&table.name);
            rows.into_iter()
                .filter(|row| {
                    ranges.iter().all(|(col, bound)| {
                        let i = plan
                            .cols
                            .iter()
                            .position(|c| c == col)
                            .expect("range column in scan output");
                        bound_matches(&row[i], bound, data, env)
                    })
                })
                .collect()
        }
        PlanOp::Values { rows, .. } => rows.clone(),
        PlanOp::EmptyTable { .. } => vec![],
        PlanOp::TableFunc { alias } | PlanOp::RecursiveTable { alias } => data.rows(alias),
        PlanOp::Derived { child, .. } => exec(child, data, env),
        PlanOp::Project { exprs, child } => {
            let rows = exec(child, data, env);
            rows.into_iter()
                .map(|row| {
                    let e = env.push(&child.cols, &row);
                    exprs.iter().map(|x| eval(x, data, &e)).collect()
                })
                .collect()
        }
        PlanOp::Filter { preds, child } => {
            let rows = exec(child, data, env);
            rows.into_iter()
                .filter(|row| {
                    let e = env.push(&child.cols, row);
                    preds.iter().all(|p| is_true(&eval(p, data, &e)))
                })
                .collect()
        }
        PlanOp::Distinct { child, .. } => {
            let rows = exec(child, data, env);
            let mut seen = HashSet::new();
            rows.into_iter().filter(|r| seen.insert(r.clone())).collect()
        }
        PlanOp::Max1Row { child } => {
            let rows = exec(child, data, env);
            assert!(rows.len() <= 1, "scalar subquery returned more than one row");
            rows
        }
        PlanOp::Sort { by, child } => {
            let mut rows = exec(child, data, env);
            let keys: Vec<usize> = by
                .iter()
                .map(|col| child.cols.iter().position(|c| c == col).expect("sort column"))
                .collect();
            rows.sort_by(|a, b| {
                for k in &keys {
                    let ord = cmp_values(&a[*k], &b[*k]);
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            rows
        }
        PlanOp::Join(j) => exec_join(j, plan, data, env),
    }
}

fn exec_join(
    j: &joinx_core::build::JoinNode,
    _plan: &PlanNode,
    data: &TestData,
    env: &Env,
) -> Vec<Row> {
    use joinx_core::rel::JoinKind;

    let lrows = exec(&j.left, data, env);
    let rrows = exec(&j.right, data, env);
    let mut combined_cols = j.left.cols.clone();
    combined_cols.extend(j.right.cols.iter().copied());

    let matches = |l: &Row, r: &Row| -> bool {
        let mut row = l.clone();
        row.extend(r.iter().cloned());
        let e = env.push(&combined_cols, &row);
        j.filter.iter().all(|p| is_true(&eval(p, data, &e)))
    };

    let mut out = Vec::new();
    if j.kind == JoinKind::LeftOuterHashExcludeNulls {
        let JoinSpec::Hash {
            left_keys,
            right_keys,
        } = &j.spec
        else {
            panic!("exclude-nulls join without hash keys");
        };
        let rkeys: Vec<Vec<ScalarValue>> = rrows
            .iter()
            .map(|r| {
                let e = env.push(&j.right.cols, r);
                right_keys.iter().map(|k| eval(k, data, &e)).collect()
            })
            .collect();
        let build_has_null = rkeys
            .iter()
            .any(|k| k.iter().any(|v| v.is_null()));
        for l in &lrows {
            let e = env.push(&j.left.cols, l);
            let lk: Vec<ScalarValue> = left_keys.iter().map(|k| eval(k, data, &e)).collect();
            if rrows.is_empty() {
                out.push(null_pad(l, j.right.cols.len()));
                continue;
            }
            if lk.iter().any(|v| v.is_null()) {
                continue;
            }
            if let Some(r) = rrows.iter().find(|r| matches(l, r)) {
                let mut row = l.clone();
                row.extend(r.iter().cloned());
                out.push(row);
            } else if !build_has_null {
                out.push(null_pad(l, j.right.cols.len()));
            }
        }
        return out;
    }

    if j.kind == JoinKind::FullOuter {
        let mut right_matched = vec![false; rrows.len()];
        for l in &lrows {
            let mut any = false;
            for (i, r) in rrows.iter().enumerate() {
                if matches(l, r) {
                    any = true;
                    right_matched[i] = true;
                    let mut row = l.clone();
                    row.extend(r.iter().cloned());
                    out.push(row);
                }
            }
            if !any {
                out.push(null_pad(l, j.right.cols.len()));
            }
        }
        for (i, r) in rrows.iter().enumerate() {
            if !right_matched[i] {
                let mut row: Row = std::iter::repeat(ScalarValue::Null)
                    .take(j.left.cols.len())
                    .collect();
                row.extend(r.iter().cloned());
                out.push(row);
            }
        }
        return out;
    }

    if j.kind.is_semi() {
        for l in &lrows {
            if rrows.iter().any(|r| matches(l, r)) {
                out.push(l.clone());
            }
        }
    } else if j.kind.is_anti() {
        for l in &lrows {
            if !rrows.iter().any(|r| matches(l, r)) {
                out.push(l.clone());
            }
        }
    } else if j.kind.is_left_outer() {
        for l in &lrows {
            let mut any = false;
            for r in &rrows {
                if matches(l, r) {
                    any = true;
                    let mut row = l.clone();
                    row.extend(r.iter().cloned());
                    out.push(row);
                }
            }
            if !any {
                out.push(null_pad(l, j.right.cols.len()));
            }
        }
    } else {
        // Inner and cross families, including the lookup, merge, concat,
        // and range-heap payloads.
        for l in &lrows {
            for r in &rrows {
                if matches(l, r) {
                    let mut row = l.clone();
                    row.extend(r.iter().cloned());
                    out.push(row);
                }
            }
        }
    }
    out
}

fn null_pad(l: &Row, width: usize) -> Row {
    let mut row = l.clone();
    row.extend(std::iter::repeat(ScalarValue::Null).take(width));
    row
}

fn bound_matches(
    value: &ScalarValue,
    bound: &joinx_core::build::BoundValues,
    data: &TestData,
    env: &Env,
) -> bool {
    use joinx_core::build::BoundValues;
    match bound {
        BoundValues::Eq(e) => {
            let v = eval(e, data, env);
            !value.is_null() && *value == v
        }
        BoundValues::InTuple(vals) => vals.iter().any(|e| {
            let v = eval(e, data, env);
            !value.is_null() && *value == v
        }),
        BoundValues::Range { lo, hi } => {
            if value.is_null() {
                return false;
            }
            let lo_ok = match lo {
                Some((e, closed)) => {
                    let v = eval(e, data, env);
                    match cmp_values(value, &v) {
                        std::cmp::Ordering::Greater => true,
                        std::cmp::Ordering::Equal => *closed,
                        std::cmp::Ordering::Less => false,
                    }
                }
                None => true,
            };
            let hi_ok = match hi {
                Some((e, closed)) => {
                    let v = eval(e, data, env);
                    match cmp_values(value, &v) {
                        std::cmp::Ordering::Less => true,
                        std::cmp::Ordering::Equal => *closed,
                        std::cmp::Ordering::Greater => false,
                    }
                }
                None => true,
            };
            lo_ok && hi_ok
        }
    }
}

fn cmp_values(a: &ScalarValue, b: &ScalarValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (ScalarValue::Null, ScalarValue::Null) => Ordering::Equal,
        (ScalarValue::Null, _) => Ordering::Less,
        (_, ScalarValue::Null) => Ordering::Greater,
        (ScalarValue::Int64(x), ScalarValue::Int64(y)) => x.cmp(y),
        (ScalarValue::Utf8(x), ScalarValue::Utf8(y)) => x.cmp(y),
        other => panic!("uncomparable values {other:?}"),
    }
}

fn is_true(v: &ScalarValue) -> bool {
    matches!(v, ScalarValue::Bool(true))
}

fn eval(expr: &PhysExpr, data: &TestData, env: &Env) -> ScalarValue {
    match expr {
        PhysExpr::Literal(v) => v.clone(),
        PhysExpr::Col { col, .. } => env.get(*col),
        PhysExpr::Not(c) => match eval(c, data, env) {
            ScalarValue::Bool(b) => ScalarValue::Bool(!b),
            ScalarValue::Null => ScalarValue::Null,
            other => panic!("NOT over non-boolean {other:?}"),
        },
        PhysExpr::And(l, r) => {
            match (eval(l, data, env), eval(r, data, env)) {
                (ScalarValue::Bool(false), _) | (_, ScalarValue::Bool(false)) => {
                    ScalarValue::Bool(false)
                }
                (ScalarValue::Bool(true), ScalarValue::Bool(true)) => ScalarValue::Bool(true),
                _ => ScalarValue::Null,
            }
        }
        PhysExpr::Or(l, r) => {
            match (eval(l, data, env), eval(r, data, env)) {
                (ScalarValue::Bool(true), _) | (_, ScalarValue::Bool(true)) => {
                    ScalarValue::Bool(true)
                }
                (ScalarValue::Bool(false), ScalarValue::Bool(false)) => ScalarValue::Bool(false),
                _ => ScalarValue::Null,
            }
        }
        PhysExpr::Cmp { op, left, right } => {
            let l = eval(left, data, env);
            let r = eval(right, data, env);
            if *op == CmpOp::NullSafeEq {
                return ScalarValue::Bool(l == r);
            }
            if l.is_null() || r.is_null() {
                return ScalarValue::Null;
            }
            let ord = cmp_values(&l, &r);
            let b = match op {
                CmpOp::Eq => ord == std::cmp::Ordering::Equal,
                CmpOp::Lt => ord == std::cmp::Ordering::Less,
                CmpOp::Leq => ord != std::cmp::Ordering::Greater,
                CmpOp::Gt => ord == std::cmp::Ordering::Greater,
                CmpOp::Geq => ord != std::cmp::Ordering::Less,
                CmpOp::NullSafeEq => unreachable!(),
            };
            ScalarValue::Bool(b)
        }
        PhysExpr::InTuple { left, values } => {
            let l = eval(left, data, env);
            if l.is_null() {
                return ScalarValue::Null;
            }
            let mut saw_null = false;
            for v in values {
                let v = eval(v, data, env);
                if v.is_null() {
                    saw_null = true;
                } else if v == l {
                    return ScalarValue::Bool(true);
                }
            }
            if saw_null {
                ScalarValue::Null
            } else {
                ScalarValue::Bool(false)
            }
        }
        PhysExpr::Arith { op, left, right } => {
            let (l, r) = (eval(left, data, env), eval(right, data, env));
            let (ScalarValue::Int64(a), ScalarValue::Int64(b)) = (&l, &r) else {
                return ScalarValue::Null;
            };
            match op {
                ArithOp::Add => ScalarValue::Int64(a + b),
                ArithOp::Sub => ScalarValue::Int64(a - b),
                ArithOp::Mul => ScalarValue::Int64(a * b),
                ArithOp::Div => {
                    if *b == 0 {
                        ScalarValue::Null
                    } else {
                        ScalarValue::Int64(a / b)
                    }
                }
            }
        }
        PhysExpr::IsNull(c) => ScalarValue::Bool(eval(c, data, env).is_null()),
        PhysExpr::InSubquery {
            left,
            plan,
            output_col,
            corr,
        } => {
            let l = eval(left, data, env);
            let vals = subquery_values(plan, *output_col, corr, data, env);
            if vals.is_empty() {
                return ScalarValue::Bool(false);
            }
            if l.is_null() {
                return ScalarValue::Null;
            }
            let mut saw_null = false;
            for v in vals {
                if v.is_null() {
                    saw_null = true;
                } else if v == l {
                    return ScalarValue::Bool(true);
                }
            }
            if saw_null {
                ScalarValue::Null
            } else {
                ScalarValue::Bool(false)
            }
        }
        PhysExpr::Exists { plan, corr } => {
            let rows = subquery_rows(plan, corr, data, env);
            ScalarValue::Bool(!rows.is_empty())
        }
        PhysExpr::ScalarSubquery {
            plan,
            output_col,
            corr,
            limit,
        } => {
            let mut vals = subquery_values(plan, *output_col, corr, data, env);
            if let Some(n) = limit {
                vals.truncate(*n as usize);
            }
            match vals.len() {
                0 => ScalarValue::Null,
                1 => vals.pop().unwrap(),
                _ => panic!("scalar subquery returned more than one row"),
            }
        }
        PhysExpr::Tuple(_) | PhysExpr::Bindvar { .. } | PhysExpr::Hidden { .. }
        | PhysExpr::Regexp { .. } => {
            panic!("expression not evaluable by the test interpreter: {expr:?}")
        }
    }
}

fn subquery_rows(plan: &PlanNode, corr: &[PhysExpr], data: &TestData, env: &Env) -> Vec<Row> {
    let rows = exec(plan, data, env);
    rows.into_iter()
        .filter(|row| {
            let e = env.push(&plan.cols, row);
            corr.iter().all(|p| is_true(&eval(p, data, &e)))
        })
        .collect()
}

fn subquery_values(
    plan: &PlanNode,
    output_col: ColumnId,
    corr: &[PhysExpr],
    data: &TestData,
    env: &Env,
) -> Vec<ScalarValue> {
    let idx = plan
        .cols
        .iter()
        .position(|c| *c == output_col)
        .expect("subquery output column");
    subquery_rows(plan, corr, data, env)
        .into_iter()
        .map(|row| row[idx].clone())
        .collect()
}
