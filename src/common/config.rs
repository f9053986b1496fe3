use super::types::PageId;

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Depth of the disk scheduler request queue
pub const DEFAULT_DISK_QUEUE_DEPTH: usize = 128;

/// Default width of an index key in bytes
pub const DEFAULT_KEY_SIZE: usize = 8;

/// Eviction policy used by the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacerKind {
    /// Adaptive Replacement Cache
    #[default]
    Arc,
    /// Second-chance clock
    Clock,
}
