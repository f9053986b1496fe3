use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// One buffer frame: the page bytes plus the metadata the pool keeps for it.
///
/// `page_id` and `pin_count` are only changed while the pool latch is held;
/// the data lock is what page guards acquire.
pub struct FrameHeader {
    frame_id: FrameId,
    page_id: AtomicU32,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    pub(crate) data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl FrameHeader {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU32::new(INVALID_PAGE_ID.as_u32()),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// The resident page, or `INVALID_PAGE_ID` for an empty frame.
    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value,
    /// or `None` if the frame was not pinned.
    pub fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|prev| prev - 1)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Installs `page_id` with the given contents, clean and unpinned.
    pub fn load(&self, page_id: PageId, contents: &[u8]) {
        assert_eq!(contents.len(), PAGE_SIZE);
        self.data.write().copy_from_slice(contents);
        self.page_id.store(page_id.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
    }

    /// Copies the page bytes out, e.g. for write-back.
    pub fn snapshot(&self) -> Box<[u8; PAGE_SIZE]> {
        Box::new(**self.data.read())
    }

    /// Empties the frame.
    pub fn reset(&self) {
        self.load(INVALID_PAGE_ID, &[0u8; PAGE_SIZE]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_new() {
        let frame = FrameHeader::new(FrameId::new(3));
        assert_eq!(frame.frame_id(), FrameId::new(3));
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_header_pin_unpin() {
        let frame = FrameHeader::new(FrameId::new(0));

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), Some(1));
        assert_eq!(frame.unpin(), Some(0));
        assert_eq!(frame.unpin(), None);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_frame_header_load_and_reset() {
        let frame = FrameHeader::new(FrameId::new(0));

        let mut contents = [0u8; PAGE_SIZE];
        contents[0] = 42;
        contents[PAGE_SIZE - 1] = 7;
        frame.set_dirty(true);
        frame.load(PageId::new(5), &contents);

        assert_eq!(frame.page_id(), PageId::new(5));
        assert!(!frame.is_dirty());
        let copy = frame.snapshot();
        assert_eq!(copy[0], 42);
        assert_eq!(copy[PAGE_SIZE - 1], 7);

        frame.pin();
        frame.reset();
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert_eq!(frame.snapshot()[0], 0);
    }
}
