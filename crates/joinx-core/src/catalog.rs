//! # Catalog Interface
//!
//! The catalog gives the planner metadata about the schema: table column
//! definitions, primary keys, and secondary indexes with their ordered key
//! columns, uniqueness, and nullability. It is deliberately narrow and behind
//! a trait object so different backends can provide metadata; the
//! [`MemoryCatalog`] is the HashMap-backed implementation used by tests and
//! development.
//!
//! Catalog objects are read-only during planning and must be safe to share
//! across concurrently planning sessions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Reference to a table in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    fn key(&self) -> String {
        format!("{}.{}", self.schema.to_lowercase(), self.name.to_lowercase())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// SQL column types the planner understands. The planner never evaluates
/// values itself; types matter only for nullability analysis and schema
/// propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Bool,
    Int64,
    Float64,
    Utf8,
    Date,
}

/// A column definition as it appears in the catalog or in a derived schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Table alias the column is resolved against (lowercase).
    pub table: String,
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
}

impl Column {
    pub fn new(table: impl Into<String>, name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            ty,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// An index definition: the catalog handle the memo's `Index` type points
/// back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    /// Ordered key column names.
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Complete table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub table: TableRef,
    pub columns: Vec<Column>,
    /// Primary key column names, empty for keyless tables. The primary key
    /// is exposed to index matching as a unique index named `primary`.
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_column(mut self, name: &str, ty: SqlType) -> Self {
        let table = self.table.name.to_lowercase();
        self.columns.push(Column::new(table, name, ty));
        self
    }

    /// Declare the primary key. Key columns become non-nullable.
    pub fn with_primary_key(mut self, cols: &[&str]) -> Self {
        self.primary_key = cols.iter().map(|c| c.to_string()).collect();
        for col in &mut self.columns {
            if cols.iter().any(|c| c.eq_ignore_ascii_case(&col.name)) {
                col.nullable = false;
            }
        }
        self
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// All indexes usable by the planner, with the primary key first.
    pub fn all_indexes(&self) -> Vec<IndexDef> {
        let mut out = Vec::with_capacity(self.indexes.len() + 1);
        if !self.primary_key.is_empty() {
            let cols: Vec<&str> = self.primary_key.iter().map(|s| s.as_str()).collect();
            out.push(IndexDef::new("primary", &cols).unique());
        }
        out.extend(self.indexes.iter().cloned());
        out
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Catalog provides schema information. Implementations must be safe for
/// concurrent readers.
pub trait Catalog: Send + Sync {
    fn table_def(&self, table: &TableRef) -> Option<TableDef>;
}

/// In-memory catalog for testing and development, keyed by `schema.table`.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    tables: HashMap<String, TableDef>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, def: TableDef) {
        self.tables.insert(def.table.key(), def);
    }
}

impl Catalog for MemoryCatalog {
    fn table_def(&self, table: &TableRef) -> Option<TableDef> {
        self.tables.get(&table.key()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_is_unique_index() {
        let def = TableDef::new(TableRef::new("db", "xy"))
            .with_column("x", SqlType::Int64)
            .with_column("y", SqlType::Int64)
            .with_primary_key(&["x"])
            .with_index(IndexDef::new("y_idx", &["y"]));

        let indexes = def.all_indexes();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name, "primary");
        assert!(indexes[0].unique);
        assert!(!indexes[1].unique);

        // Primary key columns lose nullability.
        assert!(!def.column("x").unwrap().nullable);
        assert!(def.column("y").unwrap().nullable);
    }

    #[test]
    fn test_catalog_lookup_case_insensitive() {
        let mut cat = MemoryCatalog::new();
        cat.add_table(TableDef::new(TableRef::new("db", "XY")).with_column("x", SqlType::Int64));
        assert!(cat.table_def(&TableRef::new("DB", "xy")).is_some());
        assert!(cat.table_def(&TableRef::new("db", "uv")).is_none());
    }
}
