use std::collections::VecDeque;

use crate::buffer::WritePageGuard;
use crate::common::PageId;

/// Guards retained by a pessimistic descent.
///
/// `write_set` runs from the highest page still held down to the current one.
/// Whenever a page turns out to be safe, every guard above it is dropped,
/// including the header guard.
pub(crate) struct Context {
    pub header: Option<WritePageGuard>,
    pub root_page_id: PageId,
    pub write_set: VecDeque<WritePageGuard>,
}

impl Context {
    pub fn new(header: WritePageGuard, root_page_id: PageId) -> Self {
        Self {
            header: Some(header),
            root_page_id,
            write_set: VecDeque::new(),
        }
    }

    pub fn push(&mut self, guard: WritePageGuard) {
        self.write_set.push_back(guard);
    }

    /// Releases the header and every ancestor of the most recently pushed page.
    pub fn release_ancestors(&mut self) {
        self.header = None;
        while self.write_set.len() > 1 {
            self.write_set.pop_front();
        }
    }

    pub fn is_root(&self, page_id: PageId) -> bool {
        page_id == self.root_page_id
    }
}
