//! InterchangeDB - the storage and transaction core of a relational database.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         InterchangeDB                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │         Executor interface stubs (execution/)            │   │
//! │  │   Catalog + lock-before-access contract, no operators    │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Transaction Layer (concurrency/)               │   │
//! │  │      TransactionManager + LockManager + 2PL              │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Index Layer (index/)                      │   │
//! │  │        B⁺-tree over generic fixed-width keys              │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                 Buffer Pool (buffer/)                     │   │
//! │  │        LRU-K replacement, pin/unpin, page guards          │   │
//! │  │      BufferPoolManager + Frame + Statistics               │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Storage Layer (storage/)                   │   │
//! │  │            DiskManager + Page + PageHeader                │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, FrameId, RID, Error, config)
//! - [`buffer`] - Buffer pool management and the LRU-K replacer
//! - [`storage`] - Disk I/O and page formats
//! - [`index`] - The B⁺-tree index
//! - [`concurrency`] - Lock manager and transaction context
//! - [`execution`] - The interface executors consume, not the executors
//!
//! No crash recovery protocol, SQL parser/binder, or query planner is
//! implemented; see spec.md §1 for the scope boundary.
//!
//! # Quick Start
//! ```no_run
//! use interchangedb::storage::DiskManager;
//! use interchangedb::common::PageId;
//!
//! // Create a new database file
//! let mut dm = DiskManager::create("my_database.db").unwrap();
//!
//! // Allocate and write a page
//! let page_id = dm.allocate_page().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod execution;
pub mod index;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::{Config, PAGE_SIZE};
pub use common::{Error, FrameId, PageId, Result, Rid, TableOid, TxnId};

pub use buffer::{BufferPoolManager, BufferPoolStats, Frame, StatsSnapshot};
pub use storage::page::{Page, PageHeader, PageType};
pub use storage::DiskManager;

pub use concurrency::{IsolationLevel, LockManager, LockMode, TransactionContext, TransactionManager};
pub use index::btree::BPlusTree;
pub use execution::{Catalog, SimpleCatalog};
