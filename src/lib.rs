//! Arbor - a buffer-pool backed concurrent B+Tree index
//!
//! This crate provides a disk-oriented storage core: a page cache with a
//! pluggable eviction policy, RAII page guards, and a B+Tree index built
//! entirely on top of that cache.
//!
//! # Architecture
//!
//! The system is organized into three layers:
//!
//! - **Storage Layer** (`storage`): Handles disk I/O
//!   - `DiskManager`: Reads, writes, allocates and frees pages in a database file
//!   - `DiskScheduler`: Background worker that serializes disk requests
//!
//! - **Buffer Pool** (`buffer`): Memory management for database pages
//!   - `BufferPoolManager`: Fetches pages from disk and caches them in memory
//!   - `ArcReplacer`: Adaptive Replacement Cache eviction policy
//!   - `ClockReplacer`: Second-chance clock eviction policy
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards for thread-safe page access
//!
//! - **Index** (`index`): B+Tree over fixed-width keys
//!   - `BPlusTree`: Search, insert, delete and ordered iteration with latch crabbing
//!   - `LeafPage`/`InternalPage`/`HeaderPage`: On-page layouts
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use arbor::buffer::BufferPoolManager;
//! use arbor::index::{BPlusTree, BPlusTreeOptions, IntegerComparator};
//! use arbor::storage::disk::DiskManager;
//! use arbor::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("index.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, disk_manager));
//!
//! let tree = BPlusTree::new(bpm, IntegerComparator, BPlusTreeOptions::default()).unwrap();
//! let rid = RecordId::new(PageId::new(7), SlotId::new(3));
//! tree.insert(&IntegerComparator::key(42), rid).unwrap();
//!
//! assert_eq!(tree.get_value(&IntegerComparator::key(42)).unwrap(), Some(rid));
//! for entry in tree.begin().unwrap() {
//!     let (key, rid) = entry.unwrap();
//!     println!("{:?} -> {:?}", key, rid);
//! }
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{ArborError, PageId, RecordId, Result, SlotId};
