use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::{
    ArborError, FrameId, PageId, ReplacerKind, Result, DEFAULT_BUFFER_POOL_SIZE, INVALID_PAGE_ID,
    PAGE_SIZE,
};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{new_replacer, FrameHeader, ReadPageGuard, Replacer, WritePageGuard};

/// Page table and free list, protected together by the pool latch
struct PoolTables {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
}

/// State shared with the release callbacks of outstanding guards
struct BufferPoolState {
    frames: Vec<Arc<FrameHeader>>,
    latch: Mutex<PoolTables>,
    replacer: Box<dyn Replacer>,
}

impl BufferPoolState {
    /// Unpins a page on guard release; the frame becomes evictable once the
    /// last guard is gone.
    fn release(&self, page_id: PageId, is_dirty: bool) {
        let tables = self.latch.lock();
        let Some(&frame_id) = tables.page_table.get(&page_id) else {
            warn!(%page_id, "released guard for a page that is no longer resident");
            return;
        };

        let frame = &self.frames[frame_id.as_usize()];
        if is_dirty {
            frame.set_dirty(true);
        }
        if let Some(0) = frame.unpin() {
            if let Err(e) = self.replacer.set_evictable(frame_id, true) {
                warn!(%frame_id, error = %e, "failed to mark frame evictable");
            }
        }
    }
}

/// BufferPoolManager caches database pages in a fixed set of frames.
///
/// Pages are handed out through read/write guards; a page is pinned while any
/// guard on it is alive and can only be evicted once every guard has been
/// dropped. Eviction decisions are delegated to the configured replacer.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<BufferPoolState>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames using the ARC policy.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_replacer(pool_size, ReplacerKind::Arc, disk_manager)
    }

    /// Creates a pool of `DEFAULT_BUFFER_POOL_SIZE` frames using the ARC policy.
    pub fn with_default_size(disk_manager: Arc<DiskManager>) -> Self {
        Self::new(DEFAULT_BUFFER_POOL_SIZE, disk_manager)
    }

    /// Creates a pool of `pool_size` frames using the given policy.
    pub fn with_replacer(
        pool_size: usize,
        kind: ReplacerKind,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        let frames = (0..pool_size)
            .map(|i| Arc::new(FrameHeader::new(FrameId::new(i as u32))))
            .collect();
        let free_list = (0..pool_size).map(|i| FrameId::new(i as u32)).collect();

        let state = Arc::new(BufferPoolState {
            frames,
            latch: Mutex::new(PoolTables {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: new_replacer(kind, pool_size),
        });

        debug!(pool_size, replacer = ?kind, "created buffer pool");

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Allocates a new zeroed page and makes it resident, unpinned.
    /// Acquire a guard to pin it.
    pub fn new_page(&self) -> Result<PageId> {
        let mut tables = self.state.latch.lock();
        let frame_id = self.acquire_frame(&mut tables)?;

        let page_id = match self.disk_scheduler.disk_manager().allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                tables.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        frame.load(page_id, &[0u8; PAGE_SIZE]);
        tables.page_table.insert(page_id, frame_id);
        self.state.replacer.record_access(frame_id, page_id);
        self.state.replacer.set_evictable(frame_id, true)?;

        debug!(%page_id, %frame_id, "new page");
        Ok(page_id)
    }

    /// Drops a page from the pool and releases it on disk.
    /// Returns `Ok(false)` if the page was not resident; pinned pages fail
    /// with `PageStillPinned`.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut tables = self.state.latch.lock();

        let Some(&frame_id) = tables.page_table.get(&page_id) else {
            self.disk_scheduler.disk_manager().deallocate_page(page_id)?;
            return Ok(false);
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Err(ArborError::PageStillPinned(page_id));
        }

        self.state.replacer.remove(frame_id)?;
        tables.page_table.remove(&page_id);
        frame.reset();
        tables.free_list.push_back(frame_id);
        self.disk_scheduler.disk_manager().deallocate_page(page_id)?;

        debug!(%page_id, %frame_id, "deleted page");
        Ok(true)
    }

    /// Pins `page_id` and waits for shared access to it. Returns `None` if the
    /// page was never allocated or has been deleted.
    pub fn checked_read_page(&self, page_id: PageId) -> Result<Option<ReadPageGuard>> {
        let Some(frame) = self.pin_page(page_id)? else {
            return Ok(None);
        };
        let state = Arc::clone(&self.state);

        // Safety: the frame was pinned above and is unpinned only by the callback
        let guard = unsafe {
            ReadPageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| state.release(pid, is_dirty)),
            )
        };
        Ok(Some(guard))
    }

    /// Pins `page_id` and waits for exclusive access to it. Returns `None` if
    /// the page was never allocated or has been deleted.
    pub fn checked_write_page(&self, page_id: PageId) -> Result<Option<WritePageGuard>> {
        let Some(frame) = self.pin_page(page_id)? else {
            return Ok(None);
        };
        let state = Arc::clone(&self.state);

        // Safety: the frame was pinned above and is unpinned only by the callback
        let guard = unsafe {
            WritePageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| state.release(pid, is_dirty)),
            )
        };
        Ok(Some(guard))
    }

    /// Shorthand for `checked_read_page` that fails instead of returning `None`.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        self.checked_read_page(page_id)?
            .ok_or(ArborError::PageNotFound(page_id))
    }

    /// Shorthand for `checked_write_page` that fails instead of returning `None`.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        self.checked_write_page(page_id)?
            .ok_or(ArborError::PageNotFound(page_id))
    }

    /// Writes a resident page back to disk. Returns `Ok(false)` if the page is
    /// not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Err(ArborError::InvalidPageId(page_id));
        }

        let Some(frame) = self.pin_resident(page_id) else {
            return Ok(false);
        };
        let result = self.write_back(&frame);
        self.state.release(page_id, false);
        result.map(|_| true)
    }

    /// Writes every dirty resident page back to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let dirty: Vec<PageId> = {
            let tables = self.state.latch.lock();
            tables
                .page_table
                .iter()
                .filter(|(_, frame_id)| self.state.frames[frame_id.as_usize()].is_dirty())
                .map(|(&page_id, _)| page_id)
                .collect()
        };

        for page_id in dirty {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Pin count of a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let tables = self.state.latch.lock();
        tables
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.latch.lock().free_list.len()
    }

    /// Number of resident frames the replacer may evict.
    pub fn evictable_count(&self) -> usize {
        self.state.replacer.size()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Pins `page_id` only if it is already resident.
    fn pin_resident(&self, page_id: PageId) -> Option<Arc<FrameHeader>> {
        let tables = self.state.latch.lock();
        let &frame_id = tables.page_table.get(&page_id)?;
        let frame = &self.state.frames[frame_id.as_usize()];
        frame.pin();
        if let Err(e) = self.state.replacer.set_evictable(frame_id, false) {
            warn!(%frame_id, error = %e, "resident frame unknown to replacer");
        }
        Some(Arc::clone(frame))
    }

    /// Makes `page_id` resident and pins it. `None` for pages that do not
    /// exist on disk.
    fn pin_page(&self, page_id: PageId) -> Result<Option<Arc<FrameHeader>>> {
        if page_id == INVALID_PAGE_ID {
            return Err(ArborError::InvalidPageId(page_id));
        }

        let mut tables = self.state.latch.lock();

        let frame_id = match tables.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => {
                if !self.disk_scheduler.disk_manager().is_allocated(page_id) {
                    return Ok(None);
                }
                let frame_id = self.acquire_frame(&mut tables)?;
                let mut contents = [0u8; PAGE_SIZE];
                if let Err(e) = self.disk_scheduler.schedule_read_sync(page_id, &mut contents) {
                    tables.free_list.push_back(frame_id);
                    return Err(e);
                }
                self.state.frames[frame_id.as_usize()].load(page_id, &contents);
                tables.page_table.insert(page_id, frame_id);
                frame_id
            }
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        frame.pin();
        self.state.replacer.record_access(frame_id, page_id);
        self.state.replacer.set_evictable(frame_id, false)?;

        Ok(Some(Arc::clone(frame)))
    }

    /// Takes a frame from the free list, or evicts one and writes its page
    /// back if dirty. Caller holds the latch.
    fn acquire_frame(&self, tables: &mut PoolTables) -> Result<FrameId> {
        if let Some(frame_id) = tables.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.state.replacer.evict().ok_or(ArborError::BufferPoolFull)?;
        let frame = &self.state.frames[frame_id.as_usize()];
        let victim = frame.page_id();

        if frame.is_dirty() {
            if let Err(e) = self.write_back(frame) {
                // Put the victim back so its page is not lost
                self.state.replacer.restore(frame_id, victim);
                return Err(e);
            }
        }

        tables.page_table.remove(&victim);
        frame.reset();
        debug!(page_id = %victim, %frame_id, "evicted page");
        Ok(frame_id)
    }

    /// Copies the frame out and writes it to disk. The caller either pins the
    /// frame or holds the latch over an unpinned one.
    fn write_back(&self, frame: &FrameHeader) -> Result<()> {
        // Cleared before the copy so a concurrent writer re-marks the frame
        frame.set_dirty(false);
        let contents = frame.snapshot();
        if let Err(e) = self
            .disk_scheduler
            .schedule_write_sync(frame.page_id(), &contents[..])
        {
            frame.set_dirty(true);
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all_pages() {
            warn!(error = %e, "failed to flush buffer pool on shutdown");
        }
    }
}
