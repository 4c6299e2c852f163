//! # Scalar Expressions
//!
//! Scalar expressions appear in filters, projections, and join conditions.
//! They are interned into the memo's scalar arena and referenced by
//! [`ScalarId`]; children are ids, never owned boxes, so the arena stays
//! acyclic and nodes stay `Eq + Hash` for deduplication.
//!
//! A [`SubqueryExpr`] is the planner's view of a subquery predicate after
//! memoization: the uncorrelated part of the subquery is a regular relation
//! group, the correlated predicates are lifted out as join-condition
//! candidates, and the flags record what would block decorrelation.

use crate::catalog::SqlType;
use crate::ids::{ColSet, ColumnId, GroupId, ScalarId, TableSet};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Constant scalar value. `OrderedFloat` keeps f64 literals `Eq + Hash` so
/// scalar nodes can be deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since the Unix epoch.
    Date(i32),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn ty(&self) -> SqlType {
        match self {
            ScalarValue::Null => SqlType::Int64,
            ScalarValue::Bool(_) => SqlType::Bool,
            ScalarValue::Int64(_) => SqlType::Int64,
            ScalarValue::Float64(_) => SqlType::Float64,
            ScalarValue::Utf8(_) => SqlType::Utf8,
            ScalarValue::Date(_) => SqlType::Date,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{v}"),
            ScalarValue::Utf8(v) => write!(f, "'{v}'"),
            ScalarValue::Date(v) => write!(f, "date({v})"),
        }
    }
}

/// Comparison operators. `<>` is represented as `Not(Cmp(Eq, ..))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    /// MySQL `<=>`: equality that treats two NULLs as equal.
    NullSafeEq,
    Lt,
    Leq,
    Gt,
    Geq,
}

impl CmpOp {
    /// Mirror the operator across its operands: `a < b` becomes `b > a`.
    pub fn swap(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Leq => CmpOp::Geq,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Geq => CmpOp::Leq,
            other => other,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "=",
            CmpOp::NullSafeEq => "<=>",
            CmpOp::Lt => "<",
            CmpOp::Leq => "<=",
            CmpOp::Gt => ">",
            CmpOp::Geq => ">=",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        };
        write!(f, "{s}")
    }
}

/// A resolved column reference: the query-global column id plus the source
/// group it originated from and enough naming to print and rebuild it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColRef {
    pub col: ColumnId,
    pub group: GroupId,
    pub table: String,
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
}

/// The memoized form of a subquery predicate.
///
/// `root` is the subquery's relation with correlated predicates removed;
/// those predicates are in `corr_preds`, already expressed over query-global
/// column ids so they can be used directly as join conditions. `output_col`
/// is the subquery's single projected column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubqueryExpr {
    pub root: GroupId,
    pub output_col: ColumnId,
    pub corr_preds: Vec<ScalarId>,
    /// Outer columns referenced by the subquery.
    pub correlated: ColSet,
    pub limit: Option<u64>,
    /// An ORDER BY was present. It is irrelevant to set membership and is
    /// discarded during decorrelation.
    pub ordered: bool,
    /// A cast sits at the comparison boundary.
    pub cast_boundary: bool,
    /// Correlation escaped the subquery's filters (a correlated projection
    /// or join condition); the rewrite cannot lift it.
    pub blocked: bool,
    /// The resolver proved the subquery returns at most one row (aggregate
    /// without grouping, or similar).
    pub single_row: bool,
}

/// A scalar alternative node. Children are ids into the memo scalar arena.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarExpr {
    Literal(ScalarValue),
    ColRef(ColRef),
    Not(ScalarId),
    And(ScalarId, ScalarId),
    Or(ScalarId, ScalarId),
    Cmp {
        op: CmpOp,
        left: ScalarId,
        right: ScalarId,
    },
    /// `left IN (v1, v2, ...)` where the right side is a `Tuple`.
    InTuple {
        left: ScalarId,
        right: ScalarId,
    },
    Regexp {
        left: ScalarId,
        right: ScalarId,
    },
    Arithmetic {
        op: ArithOp,
        left: ScalarId,
        right: ScalarId,
    },
    Tuple(Vec<ScalarId>),
    IsNull(ScalarId),
    Bindvar {
        name: String,
        ty: SqlType,
    },
    /// Opaque expression the memo cannot reason about. Carries the columns
    /// and tables it references so property derivation stays sound.
    Hidden {
        desc: String,
        cols: ColSet,
        tables: TableSet,
    },
    /// A relation-valued operand: `expr op (subquery)`.
    Subquery(SubqueryExpr),
    /// `left IN (subquery)`. `NOT IN` wraps this in `Not`.
    InSubquery {
        left: ScalarId,
        subquery: SubqueryExpr,
    },
    /// `EXISTS (subquery)`. `NOT EXISTS` wraps this in `Not`.
    Exists {
        subquery: SubqueryExpr,
    },
}

impl ScalarExpr {
    pub fn as_col_ref(&self) -> Option<&ColRef> {
        match self {
            ScalarExpr::ColRef(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_subquery(&self) -> bool {
        matches!(self, ScalarExpr::Subquery(_))
    }
}

/// An interned scalar with its derived properties: the columns and tables it
/// references, and whether it can evaluate to NULL.
#[derive(Debug, Clone)]
pub struct ScalarNode {
    pub expr: ScalarExpr,
    pub cols: ColSet,
    pub tables: TableSet,
    pub nullable: bool,
}
