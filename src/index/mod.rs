//! Index structures.
//!
//! - [`btree`] - generic B⁺-tree index over fixed-width keys (spec.md §4.5)

pub mod btree;
