//! # Resolved Logical Input
//!
//! The planner's input is a resolved logical tree: relational nodes with
//! scalar expressions whose column references name a table alias and column.
//! The parser and name resolver live upstream; this module only defines the
//! shapes they hand over, plus constructors that keep hand-built trees in
//! tests readable.
//!
//! Subqueries arrive embedded in scalar expressions. The resolver annotates
//! each with what the planner cannot re-derive: an attached `LIMIT`, whether
//! an `ORDER BY` was present, and whether the subquery provably returns a
//! single row (aggregate without grouping and friends).

use crate::catalog::{SqlType, TableRef};
use crate::scalar::{ArithOp, CmpOp, ScalarValue};

#[derive(Debug, Clone)]
pub enum LogicalPlan {
    TableScan {
        table: TableRef,
        alias: Option<String>,
    },
    Values {
        name: String,
        columns: Vec<String>,
        rows: Vec<Vec<ScalarValue>>,
    },
    EmptyTable {
        name: String,
        columns: Vec<(String, SqlType)>,
    },
    TableFunc {
        name: String,
        columns: Vec<(String, SqlType)>,
    },
    RecursiveTable {
        name: String,
        columns: Vec<(String, SqlType)>,
    },
    RecursiveCte {
        name: String,
        child: Box<LogicalPlan>,
    },
    SubqueryAlias {
        name: String,
        child: Box<LogicalPlan>,
    },
    Join {
        kind: LogicalJoinKind,
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        on: Vec<LogicalExpr>,
    },
    Filter {
        child: Box<LogicalPlan>,
        predicates: Vec<LogicalExpr>,
    },
    Project {
        child: Box<LogicalPlan>,
        exprs: Vec<LogicalExpr>,
    },
    Distinct {
        child: Box<LogicalPlan>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalJoinKind {
    Cross,
    Inner,
    Left,
    FullOuter,
}

/// A resolved subquery with the resolver's annotations.
#[derive(Debug, Clone)]
pub struct LogicalSubquery {
    pub plan: Box<LogicalPlan>,
    pub limit: Option<u64>,
    pub ordered: bool,
    /// Provably at most one row regardless of data (aggregate without
    /// grouping, `Max1Row`-wrapped by the resolver, ...).
    pub single_row: bool,
}

impl LogicalSubquery {
    pub fn new(plan: LogicalPlan) -> Self {
        Self {
            plan: Box::new(plan),
            limit: None,
            ordered: false,
            single_row: false,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order_by(mut self) -> Self {
        self.ordered = true;
        self
    }

    pub fn single_row(mut self) -> Self {
        self.single_row = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum LogicalExpr {
    Column {
        table: Option<String>,
        name: String,
    },
    Literal(ScalarValue),
    Cmp {
        op: CmpOp,
        left: Box<LogicalExpr>,
        right: Box<LogicalExpr>,
    },
    Not(Box<LogicalExpr>),
    And(Box<LogicalExpr>, Box<LogicalExpr>),
    Or(Box<LogicalExpr>, Box<LogicalExpr>),
    Arith {
        op: ArithOp,
        left: Box<LogicalExpr>,
        right: Box<LogicalExpr>,
    },
    InTuple {
        left: Box<LogicalExpr>,
        values: Vec<LogicalExpr>,
    },
    Regexp {
        left: Box<LogicalExpr>,
        right: Box<LogicalExpr>,
    },
    IsNull(Box<LogicalExpr>),
    Bindvar {
        name: String,
        ty: SqlType,
    },
    Cast {
        child: Box<LogicalExpr>,
        ty: SqlType,
    },
    InSubquery {
        left: Box<LogicalExpr>,
        subquery: LogicalSubquery,
        negated: bool,
    },
    Exists {
        subquery: LogicalSubquery,
        negated: bool,
    },
    ScalarSubquery(LogicalSubquery),
}

// Constructors used by tests and by upstream tree builders.

pub fn scan(schema: &str, name: &str) -> LogicalPlan {
    LogicalPlan::TableScan {
        table: TableRef::new(schema, name),
        alias: None,
    }
}

pub fn scan_as(schema: &str, name: &str, alias: &str) -> LogicalPlan {
    LogicalPlan::TableScan {
        table: TableRef::new(schema, name),
        alias: Some(alias.to_string()),
    }
}

pub fn col(table: &str, name: &str) -> LogicalExpr {
    LogicalExpr::Column {
        table: Some(table.to_string()),
        name: name.to_string(),
    }
}

pub fn lit(v: i64) -> LogicalExpr {
    LogicalExpr::Literal(ScalarValue::Int64(v))
}

pub fn cmp(op: CmpOp, left: LogicalExpr, right: LogicalExpr) -> LogicalExpr {
    LogicalExpr::Cmp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn eq(left: LogicalExpr, right: LogicalExpr) -> LogicalExpr {
    cmp(CmpOp::Eq, left, right)
}

/// `<>` is negated equality.
pub fn ne(left: LogicalExpr, right: LogicalExpr) -> LogicalExpr {
    LogicalExpr::Not(Box::new(eq(left, right)))
}

pub fn add(left: LogicalExpr, right: LogicalExpr) -> LogicalExpr {
    LogicalExpr::Arith {
        op: ArithOp::Add,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn sub(left: LogicalExpr, right: LogicalExpr) -> LogicalExpr {
    LogicalExpr::Arith {
        op: ArithOp::Sub,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// `val BETWEEN lo AND hi` as its two closed-bound conjuncts.
pub fn between(val: LogicalExpr, lo: LogicalExpr, hi: LogicalExpr) -> Vec<LogicalExpr> {
    vec![
        cmp(CmpOp::Geq, val.clone(), lo),
        cmp(CmpOp::Leq, val, hi),
    ]
}

pub fn join(
    kind: LogicalJoinKind,
    left: LogicalPlan,
    right: LogicalPlan,
    on: Vec<LogicalExpr>,
) -> LogicalPlan {
    LogicalPlan::Join {
        kind,
        left: Box::new(left),
        right: Box::new(right),
        on,
    }
}

pub fn filter(child: LogicalPlan, predicates: Vec<LogicalExpr>) -> LogicalPlan {
    LogicalPlan::Filter {
        child: Box::new(child),
        predicates,
    }
}

pub fn project(child: LogicalPlan, exprs: Vec<LogicalExpr>) -> LogicalPlan {
    LogicalPlan::Project {
        child: Box::new(child),
        exprs,
    }
}
