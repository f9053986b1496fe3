use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{ArborError, PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::BTreePageHeader;
use super::leaf_page::LeafPageRef;

/// Forward iterator over the leaf level of a [`BPlusTree`](super::BPlusTree).
///
/// Holds a shared guard on the current leaf, so writers that need that page
/// wait until the iterator moves on or is dropped. Moving to the next leaf
/// latches the successor before releasing the current page.
pub struct BTreeIterator {
    bpm: Arc<BufferPoolManager>,
    guard: Option<ReadPageGuard>,
    index: usize,
    /// Failure hit while moving to the next leaf, reported on the next call
    error: Option<ArborError>,
}

impl BTreeIterator {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        guard: Option<ReadPageGuard>,
        index: usize,
    ) -> Result<Self> {
        let mut iter = Self {
            bpm,
            guard,
            index,
            error: None,
        };
        iter.skip_exhausted()?;
        Ok(iter)
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            guard: None,
            index: 0,
            error: None,
        }
    }

    /// `(leaf page, slot)` of the next entry, or `None` at the end.
    pub fn position(&self) -> Option<(PageId, usize)> {
        self.guard
            .as_ref()
            .map(|guard| (guard.page_id(), self.index))
    }

    pub fn is_end(&self) -> bool {
        self.guard.is_none()
    }

    /// Moves past exhausted leaves so the iterator always rests on an entry
    /// or at the end.
    fn skip_exhausted(&mut self) -> Result<()> {
        loop {
            let Some(guard) = self.guard.as_ref() else {
                return Ok(());
            };
            let leaf: LeafPageRef = guard.as_page();
            if self.index < leaf.size() {
                return Ok(());
            }

            let next_page_id = leaf.next_page_id();
            if next_page_id == INVALID_PAGE_ID {
                self.guard = None;
                self.index = 0;
                return Ok(());
            }

            let next = self.bpm.read_page(next_page_id)?;
            self.guard = Some(next);
            self.index = 0;
        }
    }
}

impl PartialEq for BTreeIterator {
    fn eq(&self, other: &Self) -> bool {
        self.position() == other.position()
    }
}

impl Iterator for BTreeIterator {
    type Item = Result<(Vec<u8>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.error.take() {
            return Some(Err(e));
        }

        let guard = self.guard.as_ref()?;
        let leaf: LeafPageRef = guard.as_page();
        let item = (leaf.key_at(self.index).to_vec(), leaf.value_at(self.index));
        self.index += 1;

        if let Err(e) = self.skip_exhausted() {
            self.guard = None;
            self.error = Some(e);
        }
        Some(Ok(item))
    }
}
