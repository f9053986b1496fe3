use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::FrameHeader;

/// Callback run once the guard's lock is gone: `(page_id, is_dirty)`.
/// The pool uses it to unpin the frame.
type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// A typed layout laid over page bytes. `B` is `&[u8]` for read-only views
/// and `&mut [u8]` for mutable ones.
pub trait PageView<B>: Sized {
    fn from_bytes(data: B) -> Self;
}

/// Common bookkeeping shared by both guard kinds
struct PageGuardBase {
    page_id: PageId,
    /// Keeps the frame alive for the transmuted lock guard
    _frame: Arc<FrameHeader>,
    release_callback: Option<ReleaseCallback>,
    is_dirty: bool,
}

impl PageGuardBase {
    fn new(page_id: PageId, frame: Arc<FrameHeader>, release_callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            _frame: frame,
            release_callback: Some(release_callback),
            is_dirty: false,
        }
    }

    fn release(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            callback(self.page_id, self.is_dirty);
        }
    }
}

/// Shared access to one resident page. Many readers may hold the same page;
/// the frame stays pinned until the guard is dropped.
pub struct ReadPageGuard {
    base: PageGuardBase,
    data_guard: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// Blocks until the frame's data lock is available in shared mode.
    ///
    /// # Safety
    /// `frame` must be pinned for the guard's whole lifetime so the pool never
    /// reuses it underneath the lock.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.read();
        // The Arc held in `base` keeps the lock's owner alive
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &[u8] {
        match &self.data_guard {
            Some(guard) => &guard[..],
            None => &[],
        }
    }

    /// Interprets the page bytes as layout `P`.
    pub fn as_page<'a, P: PageView<&'a [u8]>>(&'a self) -> P {
        P::from_bytes(self.data())
    }

    /// Releases the page before the end of scope.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Unlock first so an unpinned frame is never still locked
        self.data_guard.take();
        self.base.release();
    }
}

/// Exclusive access to one resident page. Taking mutable access marks the
/// page dirty.
pub struct WritePageGuard {
    base: PageGuardBase,
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard {
    /// Blocks until the frame's data lock is available exclusively.
    ///
    /// # Safety
    /// `frame` must be pinned for the guard's whole lifetime so the pool never
    /// reuses it underneath the lock.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.write();
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            base: PageGuardBase::new(page_id, frame, release_callback),
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn is_dirty(&self) -> bool {
        self.base.is_dirty
    }

    pub fn data(&self) -> &[u8] {
        match &self.data_guard {
            Some(guard) => &guard[..],
            None => &[],
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        match &mut self.data_guard {
            Some(guard) => &mut guard[..],
            None => &mut [],
        }
    }

    /// Interprets the page bytes as a read-only layout `P`.
    pub fn as_page<'a, P: PageView<&'a [u8]>>(&'a self) -> P {
        P::from_bytes(self.data())
    }

    /// Interprets the page bytes as a mutable layout `P`.
    pub fn as_page_mut<'a, P: PageView<&'a mut [u8]>>(&'a mut self) -> P {
        P::from_bytes(self.data_mut())
    }

    /// Releases the page before the end of scope.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data_guard.take();
        self.base.release();
    }
}
