use crate::buffer::PageView;
use crate::common::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

use super::btree_page::{read_u32, write_u32};

const ROOT_PAGE_ID_OFFSET: usize = 0;

/// The fixed entry point of a tree: a single root pointer.
///
/// Readers and writers synchronize on this page's guard before touching the
/// root, so a root change is atomic with respect to descents.
pub struct HeaderPage<B> {
    data: B,
}

pub type HeaderPageRef<'a> = HeaderPage<&'a [u8]>;
pub type HeaderPageMut<'a> = HeaderPage<&'a mut [u8]>;

impl<B: AsRef<[u8]>> PageView<B> for HeaderPage<B> {
    fn from_bytes(data: B) -> Self {
        debug_assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }
}

impl<B: AsRef<[u8]>> HeaderPage<B> {
    pub fn root_page_id(&self) -> PageId {
        PageId::new(read_u32(self.data.as_ref(), ROOT_PAGE_ID_OFFSET))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeaderPage<B> {
    /// Starts an empty tree.
    pub fn init(&mut self) {
        self.data.as_mut().fill(0);
        self.set_root_page_id(INVALID_PAGE_ID);
    }

    pub fn set_root_page_id(&mut self, root_page_id: PageId) {
        write_u32(self.data.as_mut(), ROOT_PAGE_ID_OFFSET, root_page_id.as_u32());
    }
}
