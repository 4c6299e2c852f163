//! # joinx-core: Join Planning Core
//!
//! This crate implements the memo-based join planning core of a MySQL-dialect
//! SQL engine: the data structures and algorithms that decide, for a given
//! logical join tree, which physical join algorithm, operand ordering, and
//! indexes to use.
//!
//! ## Module Overview
//!
//! - **`memo`**: The memo -- a forest of expression groups sharing logically
//!   equivalent sub-plans, with physical alternatives in linked lists.
//! - **`group`** / **`rel`** / **`scalar`**: Expression groups and the tagged
//!   relational and scalar operator variants they hold.
//! - **`props`**: Per-group relational properties (schema, column and table
//!   sets, functional dependencies, distinct requirements).
//! - **`memoize`**: Conversion of the resolved logical tree into memo groups,
//!   including subquery correlation lifting.
//! - **`cost`**: Cost model trait, default implementation, and cardinality
//!   estimation from statistics.
//! - **`hints`**: Join hint parsing, resolution, and satisfaction.
//! - **`build`**: Reification of the chosen best alternatives into the
//!   executable plan tree.
//! - **`catalog`** / **`stats`**: The narrow interfaces to schema metadata
//!   and table statistics.
//!
//! Transformation passes that populate the memo with alternatives live in
//! the companion `joinx-rules` crate.

pub mod build;
pub mod catalog;
pub mod context;
pub mod cost;
pub mod error;
pub mod group;
pub mod hints;
pub mod ids;
pub mod logical;
pub mod memo;
pub mod memoize;
pub mod props;
pub mod rel;
pub mod scalar;
pub mod stats;
