//! # Relational Properties
//!
//! Every expression group carries one set of relational properties shared by
//! all of its alternatives: output schema, output column ids, the set of leaf
//! tables underneath, a functional-dependency summary, and whether the plan
//! above mandates duplicate elimination. Properties are derived bottom-up
//! exactly once, when the group is created, and never change as alternatives
//! are prepended.
//!
//! The functional-dependency summary is deliberately compact: candidate keys,
//! constant columns, equivalence classes, and non-null columns. That is
//! enough to drive semi-to-inner conversion (right side keyed by the join
//! keys), injective-lookup detection, and the null-safety analysis behind
//! `NOT IN` planning.

use crate::catalog::Column;
use crate::ids::{ColSet, ColumnId, TableSet};

/// Compact functional-dependency set.
#[derive(Debug, Clone, Default)]
pub struct FdSet {
    /// Candidate keys: each set determines every output column.
    keys: Vec<ColSet>,
    /// Columns pinned to a constant by an equality filter.
    constants: ColSet,
    /// Column equivalence classes induced by equality predicates.
    equivs: Vec<ColSet>,
    /// Columns that cannot be NULL in the output.
    not_null: ColSet,
}

impl FdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, key: ColSet) {
        if !key.is_empty() && !self.keys.iter().any(|k| k == &key) {
            self.keys.push(key);
        }
    }

    pub fn add_constant(&mut self, col: ColumnId) {
        self.constants.add(col);
    }

    pub fn add_not_null(&mut self, col: ColumnId) {
        self.not_null.add(col);
    }

    /// Record that the relation holds at most one row. Every column set,
    /// including the empty one, is then a superkey.
    pub fn add_max_one_row(&mut self) {
        if !self.keys.iter().any(|k| k.is_empty()) {
            self.keys.push(ColSet::new());
        }
    }

    /// Record `a = b`. Classes containing either column are merged.
    pub fn add_equiv(&mut self, a: ColumnId, b: ColumnId) {
        let mut merged = ColSet::singleton(a);
        merged.add(b);
        self.equivs.retain(|class| {
            if class.contains(a) || class.contains(b) {
                merged.union_with(class);
                false
            } else {
                true
            }
        });
        self.equivs.push(merged);
    }

    pub fn keys(&self) -> &[ColSet] {
        &self.keys
    }

    pub fn constants(&self) -> &ColSet {
        &self.constants
    }

    pub fn is_not_null(&self, col: ColumnId) -> bool {
        self.not_null.contains(col)
    }

    /// Close `cols` over constants and equivalences.
    fn closure(&self, cols: &ColSet) -> ColSet {
        let mut out = cols.union(&self.constants);
        loop {
            let before = out.len();
            for class in &self.equivs {
                if out.intersects(class) {
                    out.union_with(class);
                }
            }
            if out.len() == before {
                break;
            }
        }
        out
    }

    /// True when `cols` functionally determines the whole row, i.e. some
    /// candidate key is contained in the closure of `cols`.
    pub fn is_superkey(&self, cols: &ColSet) -> bool {
        let closed = self.closure(cols);
        self.keys.iter().any(|k| k.is_subset_of(&closed))
    }

    /// True when the relation is provably at most one row: some key is fully
    /// pinned by constants.
    pub fn max_one_row(&self) -> bool {
        let closed = self.closure(&ColSet::new());
        self.keys.iter().any(|k| k.is_subset_of(&closed))
    }

    /// Restrict the dependency set to a projected column set. Keys survive
    /// only when fully covered; constants, equivalences, and null facts are
    /// intersected.
    pub fn project(&self, cols: &ColSet) -> FdSet {
        let mut out = FdSet::new();
        for key in &self.keys {
            if key.is_subset_of(cols) {
                out.keys.push(key.clone());
            }
        }
        out.constants = self.constants.intersect(cols);
        out.equivs = self
            .equivs
            .iter()
            .map(|class| class.intersect(cols))
            .filter(|class| class.len() >= 2)
            .collect();
        out.not_null = self.not_null.intersect(cols);
        out
    }

    /// Union used for join derivation: keys become pairwise unions, the rest
    /// merge directly.
    pub fn join(&self, other: &FdSet) -> FdSet {
        let mut out = FdSet::new();
        for lk in &self.keys {
            for rk in &other.keys {
                out.add_key(lk.union(rk));
            }
        }
        out.constants = self.constants.union(&other.constants);
        out.equivs = self.equivs.iter().chain(other.equivs.iter()).cloned().collect();
        out.not_null = self.not_null.union(&other.not_null);
        out
    }
}

/// Properties shared by every alternative in a group.
#[derive(Debug, Clone, Default)]
pub struct RelProps {
    /// Output schema, in column order.
    pub schema: Vec<Column>,
    /// Output column ids, aligned with `schema`.
    pub cols: Vec<ColumnId>,
    /// The same ids as an unordered set.
    pub col_set: ColSet,
    /// Leaf tables contained in this relation.
    pub tables: TableSet,
    pub fds: FdSet,
    /// The plan above requires duplicate elimination on this group's output.
    pub needs_distinct: bool,
}

impl RelProps {
    pub fn new(schema: Vec<Column>, cols: Vec<ColumnId>, tables: TableSet, fds: FdSet) -> Self {
        let col_set = cols.iter().copied().collect();
        Self {
            schema,
            cols,
            col_set,
            tables,
            fds,
            needs_distinct: false,
        }
    }

    /// Position of a column id in the output, if present.
    pub fn col_index(&self, col: ColumnId) -> Option<usize> {
        self.cols.iter().position(|c| *c == col)
    }
}
