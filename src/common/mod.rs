//! Common types and utilities shared across InterchangeDB.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants
//! - Error types
//! - Identifiers (PageId, FrameId, Rid)
//! - The generic extendible hash table shared by the page table and indexes

pub mod config;
pub mod error;
mod frame_id;
pub mod hash_table;
mod page_id;
mod rid;
mod table_oid;
mod txn_id;

pub use config::Config;
pub use error::{AbortReason, Error, Result};
pub use frame_id::FrameId;
pub use hash_table::ExtendibleHashTable;
pub use page_id::PageId;
pub use rid::Rid;
pub use table_oid::TableOid;
pub use txn_id::TxnId;