use std::cmp::Ordering;

use crate::buffer::PageView;
use crate::common::{PageId, RecordId, INVALID_PAGE_ID, PAGE_SIZE};

use super::btree_page::{
    init_header, read_record_id, read_u32, set_size, write_record_id, write_u32,
    BTreePageHeader, IndexPageType, BTREE_PAGE_HEADER_SIZE,
};
use super::KeyComparator;

const NEXT_PAGE_ID_OFFSET: usize = BTREE_PAGE_HEADER_SIZE;

/// Common header plus the successor leaf pointer
pub const LEAF_PAGE_HEADER_SIZE: usize = BTREE_PAGE_HEADER_SIZE + 4;

/// Number of `(key, RecordId)` entries that fit in one leaf page.
pub fn leaf_page_capacity(key_size: usize) -> usize {
    (PAGE_SIZE - LEAF_PAGE_HEADER_SIZE) / (key_size + RecordId::ENCODED_LEN)
}

/// Leaf page layout.
///
/// ```text
/// | header (16) | next_page_id (4) | key_0 | rid_0 | key_1 | rid_1 | ...
/// ```
///
/// Keys are sorted and unique. A leaf may transiently hold `max_size + 1`
/// entries between an insert and the split that follows it.
pub struct LeafPage<B> {
    data: B,
}

pub type LeafPageRef<'a> = LeafPage<&'a [u8]>;
pub type LeafPageMut<'a> = LeafPage<&'a mut [u8]>;

impl<B: AsRef<[u8]>> PageView<B> for LeafPage<B> {
    fn from_bytes(data: B) -> Self {
        debug_assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }
}

impl<B: AsRef<[u8]>> BTreePageHeader for LeafPage<B> {
    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<B: AsRef<[u8]>> LeafPage<B> {
    fn entry_size(&self) -> usize {
        self.key_size() + RecordId::ENCODED_LEN
    }

    fn entry_offset(&self, index: usize) -> usize {
        LEAF_PAGE_HEADER_SIZE + index * self.entry_size()
    }

    pub fn next_page_id(&self) -> PageId {
        PageId::new(read_u32(self.bytes(), NEXT_PAGE_ID_OFFSET))
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.entry_offset(index);
        &self.bytes()[offset..offset + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> RecordId {
        read_record_id(self.bytes(), self.entry_offset(index) + self.key_size())
    }

    /// Index of the first key `>= key`, or `size()` if there is none.
    pub fn key_index<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> usize {
        let mut left = 0;
        let mut right = self.size();

        while left < right {
            let mid = left + (right - left) / 2;
            if comparator.compare(self.key_at(mid), key) == Ordering::Less {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        left
    }

    pub fn lookup<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> Option<RecordId> {
        let index = self.key_index(key, comparator);
        (index < self.size() && comparator.compare(self.key_at(index), key) == Ordering::Equal)
            .then(|| self.value_at(index))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LeafPage<B> {
    pub fn init(&mut self, max_size: usize, key_size: usize) {
        init_header(self.data.as_mut(), IndexPageType::Leaf, max_size, key_size);
        self.set_next_page_id(INVALID_PAGE_ID);
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        write_u32(self.data.as_mut(), NEXT_PAGE_ID_OFFSET, page_id.as_u32());
    }

    pub fn set_size(&mut self, size: usize) {
        set_size(self.data.as_mut(), size);
    }

    /// Inserts at `index`, shifting later entries right.
    pub fn insert_at(&mut self, index: usize, key: &[u8], value: RecordId) {
        let size = self.size();
        let key_size = self.key_size();
        debug_assert_eq!(key.len(), key_size);
        debug_assert!(index <= size);
        debug_assert!(self.entry_offset(size + 1) <= PAGE_SIZE);

        let start = self.entry_offset(index);
        let end = self.entry_offset(size);
        let entry_size = self.entry_size();
        let data = self.data.as_mut();
        data.copy_within(start..end, start + entry_size);
        data[start..start + key_size].copy_from_slice(key);
        write_record_id(data, start + key_size, value);

        self.set_size(size + 1);
    }

    /// Inserts in key order. Returns `false` if the key is already present.
    pub fn insert<C: KeyComparator + ?Sized>(
        &mut self,
        key: &[u8],
        value: RecordId,
        comparator: &C,
    ) -> bool {
        let index = self.key_index(key, comparator);
        if index < self.size() && comparator.compare(self.key_at(index), key) == Ordering::Equal {
            return false;
        }
        self.insert_at(index, key, value);
        true
    }

    /// Removes the entry at `index`, shifting later entries left.
    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);

        let start = self.entry_offset(index);
        let next = self.entry_offset(index + 1);
        let end = self.entry_offset(size);
        self.data.as_mut().copy_within(next..end, start);

        self.set_size(size - 1);
    }

    /// Removes `key` if present.
    pub fn remove<C: KeyComparator + ?Sized>(&mut self, key: &[u8], comparator: &C) -> bool {
        let index = self.key_index(key, comparator);
        if index < self.size() && comparator.compare(self.key_at(index), key) == Ordering::Equal {
            self.remove_at(index);
            return true;
        }
        false
    }

    /// Appends entries `[from, to)` of `self` to the end of `recipient`.
    fn append_range_to<R>(&self, from: usize, to: usize, recipient: &mut LeafPage<R>)
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let src = self.entry_offset(from);
        let len = self.entry_offset(to) - src;
        let recipient_size = recipient.size();
        let dst = recipient.entry_offset(recipient_size);

        recipient.data.as_mut()[dst..dst + len].copy_from_slice(&self.bytes()[src..src + len]);
        recipient.set_size(recipient_size + to - from);
    }

    /// Split helper: keeps the lower `size / 2` entries and moves the rest to
    /// the (empty) `recipient`.
    pub fn move_half_to<R>(&mut self, recipient: &mut LeafPage<R>)
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        let keep = size / 2;
        self.append_range_to(keep, size, recipient);
        self.set_size(keep);
    }

    /// Merge helper: appends every entry to `recipient`, which takes over the
    /// successor pointer.
    pub fn move_all_to<R>(&mut self, recipient: &mut LeafPage<R>)
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.append_range_to(0, self.size(), recipient);
        recipient.set_next_page_id(self.next_page_id());
        self.set_size(0);
    }

    /// Redistribution helper for a left `recipient`.
    pub fn move_first_to_end_of<R>(&mut self, recipient: &mut LeafPage<R>)
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.append_range_to(0, 1, recipient);
        self.remove_at(0);
    }

    /// Redistribution helper for a right `recipient`.
    pub fn move_last_to_front_of<R>(&mut self, recipient: &mut LeafPage<R>)
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let last = self.size() - 1;
        recipient.insert_at(0, self.key_at(last), self.value_at(last));
        self.set_size(last);
    }
}
