use crate::common::{FrameId, PageId, ReplacerKind, Result};

use super::{ArcReplacer, ClockReplacer};

/// Eviction policy consulted by the buffer pool.
///
/// The policy only tracks frame bookkeeping; it never touches page data.
/// Every method is internally synchronized.
pub trait Replacer: Send + Sync {
    /// Picks an evictable frame, stops tracking it and returns its id.
    /// Returns `None` when every tracked frame is pinned.
    fn evict(&self) -> Option<FrameId>;

    /// Records that `frame_id` (currently holding `page_id`) was accessed.
    /// Untracked frames start out evictable.
    fn record_access(&self, frame_id: FrameId, page_id: PageId);

    /// Takes back a frame returned by `evict` whose page could not be
    /// dropped after all. The frame is tracked again, evictable, without
    /// counting as an access.
    fn restore(&self, frame_id: FrameId, page_id: PageId);

    /// Marks a tracked frame evictable or pinned.
    /// Fails with `InvalidFrameId` if the frame is not tracked.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<()>;

    /// Stops tracking an evictable frame. Untracked frames are ignored;
    /// pinned frames fail with `FrameNotEvictable`.
    fn remove(&self, frame_id: FrameId) -> Result<()>;

    /// Number of evictable frames.
    fn size(&self) -> usize;
}

/// Builds the replacer for a pool of `num_frames` frames.
pub fn new_replacer(kind: ReplacerKind, num_frames: usize) -> Box<dyn Replacer> {
    match kind {
        ReplacerKind::Arc => Box::new(ArcReplacer::new(num_frames)),
        ReplacerKind::Clock => Box::new(ClockReplacer::new(num_frames)),
    }
}
