//! # Identifiers and Small Sets
//!
//! All cross-references inside the memo go through small integer ids rather
//! than owning pointers: groups reference child groups by [`GroupId`], scalar
//! expressions reference each other by [`ScalarId`], and columns are numbered
//! globally per query by [`ColumnId`]. This keeps the memo arena acyclic and
//! makes equality and hashing trivial.
//!
//! [`ColSet`] and [`TableSet`] are word-backed bitsets over column and table
//! ids. They carry the functional-dependency machinery and the hint resolver's
//! dependency bitmasks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an expression group in the memo. Ids are 16-bit and 1-based;
/// `GroupId(0)` is never a valid group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u16);

impl GroupId {
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

/// Identifier of a leaf table within a query. Sources are numbered in
/// memoization order; the id of a source group's table is `group id - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u16);

/// Derive the table id for a source from its group id.
pub fn table_id_for_source(id: GroupId) -> TableId {
    TableId(id.0 - 1)
}

/// Index of a relational alternative in the memo's expression arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// Index of a scalar expression in the memo's scalar arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScalarId(pub u32);

/// Query-global column identifier. Columns are numbered sequentially as
/// sources are memoized, so a column id identifies both the column and the
/// source it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnId(pub u16);

/// A set of [`ColumnId`]s backed by 64-bit words.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColSet {
    words: Vec<u64>,
}

/// A set of [`TableId`]s backed by 64-bit words.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableSet {
    words: Vec<u64>,
}

macro_rules! bitset_impl {
    ($set:ident, $id:ident) => {
        impl $set {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn singleton(id: $id) -> Self {
                let mut s = Self::default();
                s.add(id);
                s
            }

            pub fn add(&mut self, id: $id) {
                let (w, b) = (id.0 as usize / 64, id.0 as usize % 64);
                if self.words.len() <= w {
                    self.words.resize(w + 1, 0);
                }
                self.words[w] |= 1 << b;
            }

            pub fn remove(&mut self, id: $id) {
                let (w, b) = (id.0 as usize / 64, id.0 as usize % 64);
                if w < self.words.len() {
                    self.words[w] &= !(1 << b);
                }
            }

            pub fn contains(&self, id: $id) -> bool {
                let (w, b) = (id.0 as usize / 64, id.0 as usize % 64);
                w < self.words.len() && self.words[w] & (1 << b) != 0
            }

            pub fn is_empty(&self) -> bool {
                self.words.iter().all(|w| *w == 0)
            }

            pub fn len(&self) -> usize {
                self.words.iter().map(|w| w.count_ones() as usize).sum()
            }

            pub fn union_with(&mut self, other: &Self) {
                if self.words.len() < other.words.len() {
                    self.words.resize(other.words.len(), 0);
                }
                for (i, w) in other.words.iter().enumerate() {
                    self.words[i] |= w;
                }
            }

            pub fn union(&self, other: &Self) -> Self {
                let mut s = self.clone();
                s.union_with(other);
                s
            }

            pub fn intersect(&self, other: &Self) -> Self {
                let mut s = Self::default();
                s.words = self
                    .words
                    .iter()
                    .zip(other.words.iter())
                    .map(|(a, b)| a & b)
                    .collect();
                s
            }

            pub fn intersects(&self, other: &Self) -> bool {
                self.words
                    .iter()
                    .zip(other.words.iter())
                    .any(|(a, b)| a & b != 0)
            }

            /// True when every member of `self` is also in `other`.
            pub fn is_subset_of(&self, other: &Self) -> bool {
                self.words.iter().enumerate().all(|(i, w)| {
                    let o = other.words.get(i).copied().unwrap_or(0);
                    w & !o == 0
                })
            }

            pub fn iter(&self) -> impl Iterator<Item = $id> + '_ {
                self.words.iter().enumerate().flat_map(|(i, w)| {
                    (0..64u16)
                        .filter(move |b| w & (1 << b) != 0)
                        .map(move |b| $id(i as u16 * 64 + b))
                })
            }
        }

        impl FromIterator<$id> for $set {
            fn from_iter<T: IntoIterator<Item = $id>>(iter: T) -> Self {
                let mut s = Self::default();
                for id in iter {
                    s.add(id);
                }
                s
            }
        }

        impl fmt::Display for $set {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "(")?;
                for (i, id) in self.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", id.0)?;
                }
                write!(f, ")")
            }
        }
    };
}

bitset_impl!(ColSet, ColumnId);
bitset_impl!(TableSet, TableId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colset_basics() {
        let mut s = ColSet::new();
        assert!(s.is_empty());
        s.add(ColumnId(3));
        s.add(ColumnId(70));
        assert!(s.contains(ColumnId(3)));
        assert!(s.contains(ColumnId(70)));
        assert!(!s.contains(ColumnId(4)));
        assert_eq!(s.len(), 2);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![ColumnId(3), ColumnId(70)]);
    }

    #[test]
    fn test_subset_and_intersection() {
        let a: ColSet = [ColumnId(1), ColumnId(2)].into_iter().collect();
        let b: ColSet = [ColumnId(1), ColumnId(2), ColumnId(9)].into_iter().collect();
        assert!(a.is_subset_of(&b));
        assert!(!b.is_subset_of(&a));
        assert!(a.intersects(&b));

        let c = ColSet::singleton(ColumnId(100));
        assert!(!a.intersects(&c));
        // The empty set is a subset of everything, including itself.
        assert!(ColSet::new().is_subset_of(&a));
        assert!(ColSet::new().is_subset_of(&ColSet::new()));
    }

    #[test]
    fn test_tableset_union() {
        let a = TableSet::singleton(TableId(0));
        let b = TableSet::singleton(TableId(1));
        let u = a.union(&b);
        assert_eq!(u.len(), 2);
        assert!(u.contains(TableId(0)));
        assert!(u.contains(TableId(1)));
    }
}
