//! Eviction policy implementations (replacers).
//!
//! Implements:
//! - [`LruKReplacer`] - K-distance based eviction (spec.md §4.1)
mod lru_k;

pub use lru_k::LruKReplacer;
