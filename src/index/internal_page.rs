use std::cmp::Ordering;

use crate::buffer::PageView;
use crate::common::{PageId, PAGE_SIZE};

use super::btree_page::{
    init_header, read_u32, set_size, write_u32, BTreePageHeader, IndexPageType,
    BTREE_PAGE_HEADER_SIZE,
};
use super::KeyComparator;

const CHILD_SIZE: usize = 4;

/// Number of `(key, child)` entries that fit in one internal page.
pub fn internal_page_capacity(key_size: usize) -> usize {
    (PAGE_SIZE - BTREE_PAGE_HEADER_SIZE) / (key_size + CHILD_SIZE)
}

/// Internal page layout.
///
/// ```text
/// | header (16) | key_0 | child_0 | key_1 | child_1 | ...
/// ```
///
/// `size` counts children. `key_0` is a sentinel and never compared; every
/// key reachable through `child_i` lies in `[key_i, key_{i+1})`.
pub struct InternalPage<B> {
    data: B,
}

pub type InternalPageRef<'a> = InternalPage<&'a [u8]>;
pub type InternalPageMut<'a> = InternalPage<&'a mut [u8]>;

impl<B: AsRef<[u8]>> PageView<B> for InternalPage<B> {
    fn from_bytes(data: B) -> Self {
        debug_assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }
}

impl<B: AsRef<[u8]>> BTreePageHeader for InternalPage<B> {
    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<B: AsRef<[u8]>> InternalPage<B> {
    fn entry_size(&self) -> usize {
        self.key_size() + CHILD_SIZE
    }

    fn entry_offset(&self, index: usize) -> usize {
        BTREE_PAGE_HEADER_SIZE + index * self.entry_size()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.entry_offset(index);
        &self.bytes()[offset..offset + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> PageId {
        PageId::new(read_u32(self.bytes(), self.entry_offset(index) + self.key_size()))
    }

    /// Slot holding `child`, if any.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    /// Greatest index `i` with `key_i <= key` (slot 0 when every separator
    /// is greater). Equal keys descend to the right.
    pub fn child_index<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> usize {
        let mut left = 1;
        let mut right = self.size();

        while left < right {
            let mid = left + (right - left) / 2;
            if comparator.compare(self.key_at(mid), key) == Ordering::Greater {
                right = mid;
            } else {
                left = mid + 1;
            }
        }

        left - 1
    }

    pub fn lookup<C: KeyComparator + ?Sized>(&self, key: &[u8], comparator: &C) -> PageId {
        self.value_at(self.child_index(key, comparator))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> InternalPage<B> {
    pub fn init(&mut self, max_size: usize, key_size: usize) {
        init_header(self.data.as_mut(), IndexPageType::Internal, max_size, key_size);
    }

    pub fn set_size(&mut self, size: usize) {
        set_size(self.data.as_mut(), size);
    }

    pub fn set_key_at(&mut self, index: usize, key: &[u8]) {
        let offset = self.entry_offset(index);
        let key_size = self.key_size();
        debug_assert_eq!(key.len(), key_size);
        self.data.as_mut()[offset..offset + key_size].copy_from_slice(key);
    }

    pub fn set_value_at(&mut self, index: usize, child: PageId) {
        let offset = self.entry_offset(index) + self.key_size();
        write_u32(self.data.as_mut(), offset, child.as_u32());
    }

    /// Turns an empty page into a root with two children.
    pub fn populate_new_root(&mut self, left: PageId, key: &[u8], right: PageId) {
        self.set_size(2);
        self.set_value_at(0, left);
        self.set_key_at(1, key);
        self.set_value_at(1, right);
    }

    /// Inserts at `index`, shifting later entries right.
    pub fn insert_at(&mut self, index: usize, key: &[u8], child: PageId) {
        let size = self.size();
        debug_assert!(index <= size);
        debug_assert!(self.entry_offset(size + 1) <= PAGE_SIZE);

        let start = self.entry_offset(index);
        let end = self.entry_offset(size);
        let entry_size = self.entry_size();
        self.data.as_mut().copy_within(start..end, start + entry_size);

        self.set_size(size + 1);
        self.set_key_at(index, key);
        self.set_value_at(index, child);
    }

    /// Inserts `(key, new_child)` right after `old_child`. Returns `false` if
    /// `old_child` is not referenced by this page.
    pub fn insert_after(&mut self, old_child: PageId, key: &[u8], new_child: PageId) -> bool {
        match self.value_index(old_child) {
            Some(index) => {
                self.insert_at(index + 1, key, new_child);
                true
            }
            None => false,
        }
    }

    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);

        let start = self.entry_offset(index);
        let next = self.entry_offset(index + 1);
        let end = self.entry_offset(size);
        self.data.as_mut().copy_within(next..end, start);

        self.set_size(size - 1);
    }

    fn append_range_to<R>(&self, from: usize, to: usize, recipient: &mut InternalPage<R>)
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

    /// Split helper: keeps the lower `size / 2` children and moves the rest to
    /// the (empty) `recipient`. The recipient's slot-0 key is the separator to
    /// push into the parent.
    pub fn move_half_to<R>(&mut self, recipient: &mut InternalPage<R>)
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        let keep = size / 2;
        self.append_range_to(keep, size, recipient);
        self.set_size(keep);
    }

    /// Merge helper: pulls the parent separator `middle_key` down into slot 0
    /// and appends every entry to `recipient`.
    pub fn move_all_to<R>(&mut self, recipient: &mut InternalPage<R>, middle_key: &[u8])
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.set_key_at(0, middle_key);
        self.append_range_to(0, self.size(), recipient);
        self.set_size(0);
    }

    /// Redistribution helper for a left `recipient`. Afterwards `key_at(0)`
    /// holds the new parent separator.
    pub fn move_first_to_end_of<R>(&mut self, recipient: &mut InternalPage<R>, middle_key: &[u8])
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.set_key_at(0, middle_key);
        self.append_range_to(0, 1, recipient);
        self.remove_at(0);
    }

    /// Redistribution helper for a right `recipient`. Afterwards the
    /// recipient's `key_at(0)` holds the new parent separator.
    pub fn move_last_to_front_of<R>(&mut self, recipient: &mut InternalPage<R>, middle_key: &[u8])
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let last = self.size() - 1;
        recipient.set_key_at(0, middle_key);
        recipient.insert_at(0, self.key_at(last), self.value_at(last));
        self.set_size(last);
    }
}
