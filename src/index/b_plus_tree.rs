use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::buffer::{BufferPoolManager, PageView, ReadPageGuard, WritePageGuard};
use crate::common::{ArborError, PageId, RecordId, Result, DEFAULT_KEY_SIZE, INVALID_PAGE_ID};

use super::btree_page::{BTreePageHeader, BTreePageRef, IndexPageType};
use super::context::Context;
use super::header_page::{HeaderPageMut, HeaderPageRef};
use super::internal_page::{internal_page_capacity, InternalPageMut, InternalPageRef};
use super::leaf_page::{leaf_page_capacity, LeafPageMut, LeafPageRef};
use super::{BTreeIterator, KeyComparator};

/// Geometry of a tree: key width and page fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BPlusTreeOptions {
    pub key_size: usize,
    /// Maximum number of entries in a leaf page.
    pub leaf_max_size: usize,
    /// Maximum number of children of an internal page.
    pub internal_max_size: usize,
}

impl BPlusTreeOptions {
    /// Largest fan-out that fits a page for the given key width.
    pub fn with_key_size(key_size: usize) -> Self {
        Self {
            key_size,
            leaf_max_size: leaf_page_capacity(key_size).saturating_sub(1),
            internal_max_size: internal_page_capacity(key_size).saturating_sub(1),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_size == 0 {
            return Err(ArborError::InvalidConfig("key_size must be positive".into()));
        }
        if self.leaf_max_size < 2 {
            return Err(ArborError::InvalidConfig(format!(
                "leaf_max_size must be at least 2, got {}",
                self.leaf_max_size
            )));
        }
        if self.internal_max_size < 3 {
            return Err(ArborError::InvalidConfig(format!(
                "internal_max_size must be at least 3, got {}",
                self.internal_max_size
            )));
        }
        // An overflowing page holds max + 1 entries until it is split
        if self.leaf_max_size + 1 > leaf_page_capacity(self.key_size) {
            return Err(ArborError::InvalidConfig(format!(
                "leaf_max_size {} does not fit a page with {}-byte keys",
                self.leaf_max_size, self.key_size
            )));
        }
        if self.internal_max_size + 1 > internal_page_capacity(self.key_size) {
            return Err(ArborError::InvalidConfig(format!(
                "internal_max_size {} does not fit a page with {}-byte keys",
                self.internal_max_size, self.key_size
            )));
        }
        Ok(())
    }
}

impl Default for BPlusTreeOptions {
    fn default() -> Self {
        Self::with_key_size(DEFAULT_KEY_SIZE)
    }
}

/// Shape summary returned by [`BPlusTree::check_integrity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Number of levels; 0 for an empty tree.
    pub depth: usize,
    pub leaf_pages: usize,
    pub internal_pages: usize,
    pub entries: usize,
}

/// Reads the tag of a tree page, rejecting anything that is not a leaf or an
/// internal page.
fn is_leaf_page(data: &[u8], page_id: PageId) -> Result<bool> {
    match BTreePageRef::from_bytes(data).page_type() {
        IndexPageType::Leaf => Ok(true),
        IndexPageType::Internal => Ok(false),
        IndexPageType::Invalid => Err(ArborError::IndexCorrupted(format!(
            "page {page_id} is not a tree page"
        ))),
    }
}

fn corrupted(message: impl Into<String>) -> ArborError {
    ArborError::IndexCorrupted(message.into())
}

/// A page is safe for insert if one more entry cannot split it.
/// The root flag is unused; it keeps the signature shared with `is_delete_safe`.
fn is_insert_safe(page: &BTreePageRef<'_>, _is_root: bool) -> bool {
    page.size() < page.max_size()
}

/// A page is safe for delete if losing one entry cannot underflow it.
fn is_delete_safe(page: &BTreePageRef<'_>, is_root: bool) -> bool {
    match (is_root, page.is_leaf()) {
        (true, true) => page.size() > 1,
        (true, false) => page.size() > 2,
        (false, _) => page.size() > page.min_size(),
    }
}

fn take_reserved(reserved: &mut Vec<WritePageGuard>) -> Result<WritePageGuard> {
    reserved
        .pop()
        .ok_or_else(|| corrupted("split needed more pages than were reserved"))
}

/// Outcome of an exclusive descent
enum Descent {
    /// Guards down to the target leaf
    Leaf(Context),
    /// The tree is empty; the header guard is handed back
    Empty(WritePageGuard),
}

/// A concurrent B+Tree mapping fixed-width keys to [`RecordId`]s.
///
/// All pages live in the buffer pool. The root pointer is kept in a header
/// page that never moves, so a tree can be reopened from its header page id.
///
/// Readers crab down with shared guards. Writers first try the same descent
/// and lock only the leaf exclusively; if the leaf could split or underflow
/// they start over, holding exclusive guards on every page that might change.
pub struct BPlusTree<C: KeyComparator> {
    header_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    options: BPlusTreeOptions,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Creates an empty tree with a freshly allocated header page.
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        options: BPlusTreeOptions,
    ) -> Result<Self> {
        options.validate()?;

        let header_page_id = bpm.new_page()?;
        {
            let mut guard = bpm.write_page(header_page_id)?;
            let mut header: HeaderPageMut = guard.as_page_mut();
            header.init();
        }

        debug!(%header_page_id, ?options, "created b+tree");
        Ok(Self {
            header_page_id,
            bpm,
            comparator,
            options,
        })
    }

    /// Re-attaches to a tree created earlier with the same options.
    pub fn open(
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        options: BPlusTreeOptions,
    ) -> Result<Self> {
        options.validate()?;

        let tree = Self {
            header_page_id,
            bpm,
            comparator,
            options,
        };

        let root_page_id = tree.get_root_page_id()?;
        if root_page_id != INVALID_PAGE_ID {
            let guard = tree.bpm.read_page(root_page_id)?;
            is_leaf_page(&guard, root_page_id)?;
            let key_size = BTreePageRef::from_bytes(guard.data()).key_size();
            if key_size != options.key_size {
                return Err(ArborError::KeySizeMismatch {
                    expected: options.key_size,
                    actual: key_size,
                });
            }
        }

        debug!(%header_page_id, %root_page_id, "opened b+tree");
        Ok(tree)
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    pub fn options(&self) -> &BPlusTreeOptions {
        &self.options
    }

    /// Current root, or `INVALID_PAGE_ID` for an empty tree.
    pub fn get_root_page_id(&self) -> Result<PageId> {
        let guard = self.bpm.read_page(self.header_page_id)?;
        let header: HeaderPageRef = guard.as_page();
        Ok(header.root_page_id())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.get_root_page_id()? == INVALID_PAGE_ID)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.options.key_size {
            return Err(ArborError::KeySizeMismatch {
                expected: self.options.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Search
    // ---------------------------------------------------------------------

    pub fn get_value(&self, key: &[u8]) -> Result<Option<RecordId>> {
        self.check_key(key)?;

        let Some(guard) = self.find_leaf_read(Some(key))? else {
            return Ok(None);
        };
        let leaf: LeafPageRef = guard.as_page();
        let value = leaf.lookup(key, &self.comparator);
        Ok(value)
    }

    /// Descends with shared guards to the leaf covering `key`, or to the
    /// leftmost leaf for `None`. Returns `None` for an empty tree.
    fn find_leaf_read(&self, key: Option<&[u8]>) -> Result<Option<ReadPageGuard>> {
        let header_guard = self.bpm.read_page(self.header_page_id)?;
        let root_page_id = header_guard.as_page::<HeaderPageRef>().root_page_id();
        if root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.read_page(root_page_id)?;
        drop(header_guard);

        while !is_leaf_page(&guard, guard.page_id())? {
            let child = {
                let internal: InternalPageRef = guard.as_page();
                match key {
                    Some(key) => internal.lookup(key, &self.comparator),
                    None => internal.value_at(0),
                }
            };
            // The child is latched before the parent is released
            guard = self.bpm.read_page(child)?;
        }

        Ok(Some(guard))
    }

    /// Shared descent that takes the leaf exclusively. Returns `None` when the
    /// tree is empty or the root is itself a leaf, which the caller handles on
    /// the exclusive path.
    fn find_leaf_write_optimistic(&self, key: &[u8]) -> Result<Option<WritePageGuard>> {
        let header_guard = self.bpm.read_page(self.header_page_id)?;
        let root_page_id = header_guard.as_page::<HeaderPageRef>().root_page_id();
        if root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut parent = self.bpm.read_page(root_page_id)?;
        drop(header_guard);
        if is_leaf_page(&parent, root_page_id)? {
            return Ok(None);
        }

        loop {
            let child_page_id = parent
                .as_page::<InternalPageRef>()
                .lookup(key, &self.comparator);
            let child = self.bpm.read_page(child_page_id)?;

            if is_leaf_page(&child, child_page_id)? {
                // The parent stays shared-latched while the leaf latch is upgraded
                drop(child);
                let leaf = self.bpm.write_page(child_page_id)?;
                return Ok(Some(leaf));
            }
            parent = child;
        }
    }

    /// Exclusive descent from the root, keeping every guard that a split or
    /// merge could still need. `is_safe(page, is_root)` decides when the
    /// guards above a page can be released.
    fn find_leaf_pessimistic(
        &self,
        key: &[u8],
        header_guard: WritePageGuard,
        is_safe: impl Fn(&BTreePageRef<'_>, bool) -> bool,
    ) -> Result<Descent> {
        let root_page_id = header_guard.as_page::<HeaderPageRef>().root_page_id();
        if root_page_id == INVALID_PAGE_ID {
            return Ok(Descent::Empty(header_guard));
        }

        let mut ctx = Context::new(header_guard, root_page_id);
        let mut page_id = root_page_id;

        loop {
            let guard = self.bpm.write_page(page_id)?;
            let is_leaf = is_leaf_page(&guard, page_id)?;
            let safe = is_safe(&guard.as_page(), ctx.is_root(page_id));
            let child = (!is_leaf).then(|| {
                guard
                    .as_page::<InternalPageRef>()
                    .lookup(key, &self.comparator)
            });

            ctx.push(guard);
            if safe {
                ctx.release_ancestors();
            }

            match child {
                Some(child) => page_id = child,
                None => return Ok(Descent::Leaf(ctx)),
            }
        }
    }

    // ---------------------------------------------------------------------
    // Insert
    // ---------------------------------------------------------------------

    /// Inserts a unique key. Returns `Ok(false)` if the key already exists.
    pub fn insert(&self, key: &[u8], value: RecordId) -> Result<bool> {
        self.check_key(key)?;

        if let Some(inserted) = self.insert_optimistic(key, value)? {
            return Ok(inserted);
        }
        self.insert_pessimistic(key, value)
    }

    fn insert_optimistic(&self, key: &[u8], value: RecordId) -> Result<Option<bool>> {
        let Some(mut guard) = self.find_leaf_write_optimistic(key)? else {
            return Ok(None);
        };

        {
            let leaf: LeafPageRef = guard.as_page();
            if leaf.lookup(key, &self.comparator).is_some() {
                return Ok(Some(false));
            }
            if leaf.size() >= leaf.max_size() {
                trace!(page_id = %guard.page_id(), "leaf full, retrying insert pessimistically");
                return Ok(None);
            }
        }

        let mut leaf: LeafPageMut = guard.as_page_mut();
        leaf.insert(key, value, &self.comparator);
        Ok(Some(true))
    }

    fn insert_pessimistic(&self, key: &[u8], value: RecordId) -> Result<bool> {
        let header_guard = self.bpm.write_page(self.header_page_id)?;

        let mut ctx = match self.find_leaf_pessimistic(key, header_guard, is_insert_safe)? {
            Descent::Leaf(ctx) => ctx,
            Descent::Empty(header_guard) => {
                self.start_new_tree(header_guard, key, value)?;
                return Ok(true);
            }
        };

        let mut leaf_guard = ctx
            .write_set
            .pop_back()
            .ok_or_else(|| corrupted("descent ended without a leaf"))?;

        let will_split = {
            let leaf: LeafPageRef = leaf_guard.as_page();
            if leaf.lookup(key, &self.comparator).is_some() {
                return Ok(false);
            }
            leaf.size() >= leaf.max_size()
        };
        if !will_split {
            leaf_guard
                .as_page_mut::<LeafPageMut>()
                .insert(key, value, &self.comparator);
            return Ok(true);
        }

        // Every page the split cascade needs is latched before anything changes
        let mut reserved = self.reserve_split_pages(&ctx)?;

        leaf_guard
            .as_page_mut::<LeafPageMut>()
            .insert(key, value, &self.comparator);
        let sibling_guard = take_reserved(&mut reserved)?;
        let (separator, sibling_page_id) = self.split_leaf(&mut leaf_guard, sibling_guard);
        let leaf_page_id = leaf_guard.page_id();
        drop(leaf_guard);

        self.insert_into_parent(
            &mut ctx,
            &mut reserved,
            leaf_page_id,
            separator,
            sibling_page_id,
        )?;
        self.release_reserved(reserved);
        Ok(true)
    }

    /// Allocates and latches the pages a split of the current leaf will
    /// consume: one sibling per full page still held, plus a new root when
    /// the root itself splits. Nothing is kept if any allocation fails.
    fn reserve_split_pages(&self, ctx: &Context) -> Result<Vec<WritePageGuard>> {
        let full_ancestors = ctx
            .write_set
            .iter()
            .filter(|guard| {
                let page = BTreePageRef::from_bytes(guard.data());
                page.size() >= page.max_size()
            })
            .count();
        // The header is only still held when no page on the path was safe
        let needed = 1 + full_ancestors + usize::from(ctx.header.is_some());

        let mut reserved = Vec::with_capacity(needed);
        for _ in 0..needed {
            match self.allocate_page() {
                Ok(guard) => reserved.push(guard),
                Err(e) => {
                    debug!(needed, got = reserved.len(), error = %e, "could not reserve split pages");
                    self.release_reserved(reserved);
                    return Err(e);
                }
            }
        }
        Ok(reserved)
    }

    /// A new page, latched exclusively.
    fn allocate_page(&self) -> Result<WritePageGuard> {
        let page_id = self.bpm.new_page()?;
        match self.bpm.write_page(page_id) {
            Ok(guard) => Ok(guard),
            Err(e) => {
                if let Err(free_err) = self.free_page(page_id) {
                    warn!(%page_id, error = %free_err, "failed to free unused page");
                }
                Err(e)
            }
        }
    }

    fn release_reserved(&self, reserved: Vec<WritePageGuard>) {
        for guard in reserved {
            let page_id = guard.page_id();
            drop(guard);
            if let Err(e) = self.free_page(page_id) {
                warn!(%page_id, error = %e, "failed to free reserved page");
            }
        }
    }

    fn start_new_tree(
        &self,
        mut header_guard: WritePageGuard,
        key: &[u8],
        value: RecordId,
    ) -> Result<()> {
        let mut guard = self.allocate_page()?;
        let root_page_id = guard.page_id();
        {
            let mut leaf: LeafPageMut = guard.as_page_mut();
            leaf.init(self.options.leaf_max_size, self.options.key_size);
            leaf.insert_at(0, key, value);
        }
        drop(guard);

        header_guard
            .as_page_mut::<HeaderPageMut>()
            .set_root_page_id(root_page_id);
        debug!(%root_page_id, "started new tree");
        Ok(())
    }

    /// Moves the upper half of an overflowing leaf into `sibling_guard`, a
    /// fresh page linked in after it. Returns the sibling's first key and
    /// page id.
    fn split_leaf(
        &self,
        leaf_guard: &mut WritePageGuard,
        mut sibling_guard: WritePageGuard,
    ) -> (Vec<u8>, PageId) {
        let page_id = leaf_guard.page_id();
        let sibling_page_id = sibling_guard.page_id();
        let mut leaf: LeafPageMut = leaf_guard.as_page_mut();
        let mut sibling: LeafPageMut = sibling_guard.as_page_mut();
        sibling.init(self.options.leaf_max_size, self.options.key_size);
        leaf.move_half_to(&mut sibling);
        sibling.set_next_page_id(leaf.next_page_id());
        leaf.set_next_page_id(sibling_page_id);

        debug!(
            %page_id,
            %sibling_page_id,
            left = leaf.size(),
            right = sibling.size(),
            "split leaf"
        );
        (sibling.key_at(0).to_vec(), sibling_page_id)
    }

    /// Moves the upper half of an overflowing internal page into
    /// `sibling_guard`. Returns the separator pushed up and the sibling's
    /// page id.
    fn split_internal(
        &self,
        guard: &mut WritePageGuard,
        mut sibling_guard: WritePageGuard,
    ) -> (Vec<u8>, PageId) {
        let page_id = guard.page_id();
        let sibling_page_id = sibling_guard.page_id();
        let mut page: InternalPageMut = guard.as_page_mut();
        let mut sibling: InternalPageMut = sibling_guard.as_page_mut();
        sibling.init(self.options.internal_max_size, self.options.key_size);
        page.move_half_to(&mut sibling);

        debug!(
            %page_id,
            %sibling_page_id,
            left = page.size(),
            right = sibling.size(),
            "split internal page"
        );
        (sibling.key_at(0).to_vec(), sibling_page_id)
    }

    /// Links `right` after `left` in their parent, splitting upwards as long
    /// as parents overflow. A split root grows the tree by one level.
    fn insert_into_parent(
        &self,
        ctx: &mut Context,
        reserved: &mut Vec<WritePageGuard>,
        mut left_page_id: PageId,
        mut separator: Vec<u8>,
        mut right_page_id: PageId,
    ) -> Result<()> {
        loop {
            let Some(mut parent_guard) = ctx.write_set.pop_back() else {
                let root_guard = take_reserved(reserved)?;
                return self.grow_root(ctx, root_guard, left_page_id, &separator, right_page_id);
            };

            let parent_page_id = parent_guard.page_id();
            let overflow = {
                let mut parent: InternalPageMut = parent_guard.as_page_mut();
                if !parent.insert_after(left_page_id, &separator, right_page_id) {
                    return Err(corrupted(format!(
                        "page {parent_page_id} is missing child {left_page_id}"
                    )));
                }
                parent.size() > parent.max_size()
            };
            if !overflow {
                return Ok(());
            }

            let sibling_guard = take_reserved(reserved)?;
            let (pushed_up, sibling_page_id) = self.split_internal(&mut parent_guard, sibling_guard);
            left_page_id = parent_page_id;
            separator = pushed_up;
            right_page_id = sibling_page_id;
        }
    }

    fn grow_root(
        &self,
        ctx: &mut Context,
        mut root_guard: WritePageGuard,
        left_page_id: PageId,
        separator: &[u8],
        right_page_id: PageId,
    ) -> Result<()> {
        let header_guard = ctx
            .header
            .as_mut()
            .ok_or_else(|| corrupted("root split without the header latch"))?;

        let root_page_id = root_guard.page_id();
        {
            let mut root: InternalPageMut = root_guard.as_page_mut();
            root.init(self.options.internal_max_size, self.options.key_size);
            root.populate_new_root(left_page_id, separator, right_page_id);
        }
        drop(root_guard);

        header_guard
            .as_page_mut::<HeaderPageMut>()
            .set_root_page_id(root_page_id);
        ctx.root_page_id = root_page_id;
        debug!(%root_page_id, %left_page_id, %right_page_id, "grew new root");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Delete
    // ---------------------------------------------------------------------

    /// Removes `key`. Absent keys and empty trees are a no-op.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;

        if self.remove_optimistic(key)? {
            return Ok(());
        }
        self.remove_pessimistic(key)
    }

    /// Returns `false` if the removal has to be retried pessimistically.
    fn remove_optimistic(&self, key: &[u8]) -> Result<bool> {
        let Some(mut guard) = self.find_leaf_write_optimistic(key)? else {
            return Ok(false);
        };

        {
            let leaf: LeafPageRef = guard.as_page();
            if leaf.lookup(key, &self.comparator).is_none() {
                return Ok(true);
            }
            if !is_delete_safe(&BTreePageRef::from_bytes(guard.data()), false) {
                trace!(page_id = %guard.page_id(), "leaf at minimum, retrying remove pessimistically");
                return Ok(false);
            }
        }

        let mut leaf: LeafPageMut = guard.as_page_mut();
        leaf.remove(key, &self.comparator);
        Ok(true)
    }

    fn remove_pessimistic(&self, key: &[u8]) -> Result<()> {
        let header_guard = self.bpm.write_page(self.header_page_id)?;

        let mut ctx = match self.find_leaf_pessimistic(key, header_guard, is_delete_safe)? {
            Descent::Leaf(ctx) => ctx,
            Descent::Empty(_) => return Ok(()),
        };

        let mut leaf_guard = ctx
            .write_set
            .pop_back()
            .ok_or_else(|| corrupted("descent ended without a leaf"))?;

        if leaf_guard
            .as_page::<LeafPageRef>()
            .lookup(key, &self.comparator)
            .is_none()
        {
            return Ok(());
        }

        leaf_guard
            .as_page_mut::<LeafPageMut>()
            .remove(key, &self.comparator);

        self.handle_underflow(&mut ctx, leaf_guard)
    }

    /// Restores minimum occupancy from `guard` upwards by borrowing from or
    /// merging with a sibling.
    fn handle_underflow(&self, ctx: &mut Context, mut guard: WritePageGuard) -> Result<()> {
        loop {
            let page_id = guard.page_id();
            if ctx.is_root(page_id) {
                return self.adjust_root(ctx, guard);
            }

            let (is_leaf, size, min_size) = {
                let page: BTreePageRef = guard.as_page();
                (page.is_leaf(), page.size(), page.min_size())
            };
            if size >= min_size {
                return Ok(());
            }

            let mut parent_guard = ctx
                .write_set
                .pop_back()
                .ok_or_else(|| corrupted(format!("underfull page {page_id} has no parent")))?;
            let (index, parent_size) = {
                let parent: InternalPageRef = parent_guard.as_page();
                let index = parent.value_index(page_id).ok_or_else(|| {
                    corrupted(format!(
                        "page {} is missing child {page_id}",
                        parent_guard.page_id()
                    ))
                })?;
                (index, parent.size())
            };
            if parent_size < 2 {
                return Err(corrupted(format!(
                    "page {} has a single child",
                    parent_guard.page_id()
                )));
            }

            if index > 0 {
                let left_page_id = parent_guard.as_page::<InternalPageRef>().value_at(index - 1);
                // Siblings are latched left to right
                drop(guard);
                let mut left_guard = self.bpm.write_page(left_page_id)?;
                let mut node_guard = self.bpm.write_page(page_id)?;

                if BTreePageRef::from_bytes(left_guard.data()).size() > min_size {
                    self.redistribute_from_left(
                        &mut left_guard,
                        &mut node_guard,
                        &mut parent_guard,
                        index,
                        is_leaf,
                    );
                    return Ok(());
                }
                self.merge(&mut left_guard, node_guard, &mut parent_guard, index, is_leaf)?;
            } else {
                let right_page_id = parent_guard.as_page::<InternalPageRef>().value_at(1);
                let mut right_guard = self.bpm.write_page(right_page_id)?;

                if BTreePageRef::from_bytes(right_guard.data()).size() > min_size {
                    self.redistribute_from_right(
                        &mut guard,
                        &mut right_guard,
                        &mut parent_guard,
                        is_leaf,
                    );
                    return Ok(());
                }
                self.merge(&mut guard, right_guard, &mut parent_guard, 1, is_leaf)?;
            }

            guard = parent_guard;
        }
    }

    /// Moves the last entry of the left sibling to the front of the node at
    /// `index` and refreshes the separator between them.
    fn redistribute_from_left(
        &self,
        left_guard: &mut WritePageGuard,
        node_guard: &mut WritePageGuard,
        parent_guard: &mut WritePageGuard,
        index: usize,
        is_leaf: bool,
    ) {
        let mut parent: InternalPageMut = parent_guard.as_page_mut();
        if is_leaf {
            let mut left: LeafPageMut = left_guard.as_page_mut();
            let mut node: LeafPageMut = node_guard.as_page_mut();
            left.move_last_to_front_of(&mut node);
            parent.set_key_at(index, node.key_at(0));
        } else {
            let middle_key = parent.key_at(index).to_vec();
            let mut left: InternalPageMut = left_guard.as_page_mut();
            let mut node: InternalPageMut = node_guard.as_page_mut();
            left.move_last_to_front_of(&mut node, &middle_key);
            parent.set_key_at(index, node.key_at(0));
        }
        trace!(page_id = %node_guard.page_id(), "borrowed entry from left sibling");
    }

    /// Moves the first entry of the right sibling (slot 1 of the parent) to
    /// the end of the node in slot 0.
    fn redistribute_from_right(
        &self,
        node_guard: &mut WritePageGuard,
        right_guard: &mut WritePageGuard,
        parent_guard: &mut WritePageGuard,
        is_leaf: bool,
    ) {
        let mut parent: InternalPageMut = parent_guard.as_page_mut();
        if is_leaf {
            let mut node: LeafPageMut = node_guard.as_page_mut();
            let mut right: LeafPageMut = right_guard.as_page_mut();
            right.move_first_to_end_of(&mut node);
            parent.set_key_at(1, right.key_at(0));
        } else {
            let middle_key = parent.key_at(1).to_vec();
            let mut node: InternalPageMut = node_guard.as_page_mut();
            let mut right: InternalPageMut = right_guard.as_page_mut();
            right.move_first_to_end_of(&mut node, &middle_key);
            parent.set_key_at(1, right.key_at(0));
        }
        trace!(page_id = %node_guard.page_id(), "borrowed entry from right sibling");
    }

    /// Folds the page at `right_index` of the parent into its left neighbour,
    /// drops it from the parent and frees it.
    fn merge(
        &self,
        left_guard: &mut WritePageGuard,
        mut right_guard: WritePageGuard,
        parent_guard: &mut WritePageGuard,
        right_index: usize,
        is_leaf: bool,
    ) -> Result<()> {
        let right_page_id = right_guard.page_id();
        {
            let mut parent: InternalPageMut = parent_guard.as_page_mut();
            if is_leaf {
                let mut left: LeafPageMut = left_guard.as_page_mut();
                let mut right: LeafPageMut = right_guard.as_page_mut();
                right.move_all_to(&mut left);
            } else {
                let middle_key = parent.key_at(right_index).to_vec();
                let mut left: InternalPageMut = left_guard.as_page_mut();
                let mut right: InternalPageMut = right_guard.as_page_mut();
                right.move_all_to(&mut left, &middle_key);
            }
            parent.remove_at(right_index);
        }

        debug!(
            page_id = %left_guard.page_id(),
            merged = %right_page_id,
            is_leaf,
            "merged pages"
        );

        // The parent is still latched, so nothing can reach the page anymore
        drop(right_guard);
        self.free_page(right_page_id)
    }

    /// Collapses the root once it has no entries (leaf) or a single child
    /// (internal page).
    fn adjust_root(&self, ctx: &mut Context, guard: WritePageGuard) -> Result<()> {
        let root_page_id = guard.page_id();
        let new_root_page_id = {
            let page: BTreePageRef = guard.as_page();
            if page.is_leaf() {
                if page.size() > 0 {
                    return Ok(());
                }
                INVALID_PAGE_ID
            } else {
                if page.size() > 1 {
                    return Ok(());
                }
                guard.as_page::<InternalPageRef>().value_at(0)
            }
        };

        let header_guard = ctx
            .header
            .as_mut()
            .ok_or_else(|| corrupted("root change without the header latch"))?;
        header_guard
            .as_page_mut::<HeaderPageMut>()
            .set_root_page_id(new_root_page_id);
        ctx.root_page_id = new_root_page_id;

        drop(guard);
        self.free_page(root_page_id)?;
        debug!(old_root = %root_page_id, new_root = %new_root_page_id, "collapsed root");
        Ok(())
    }

    fn free_page(&self, page_id: PageId) -> Result<()> {
        match self.bpm.delete_page(page_id) {
            Ok(_) => Ok(()),
            Err(ArborError::PageStillPinned(_)) => {
                warn!(%page_id, "unlinked tree page is still pinned, leaving it allocated");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ---------------------------------------------------------------------
    // Iteration
    // ---------------------------------------------------------------------

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<BTreeIterator> {
        let guard = self.find_leaf_read(None)?;
        BTreeIterator::new(Arc::clone(&self.bpm), guard, 0)
    }

    /// Iterator positioned at the first key `>= key`.
    pub fn begin_at(&self, key: &[u8]) -> Result<BTreeIterator> {
        self.check_key(key)?;

        let guard = self.find_leaf_read(Some(key))?;
        let index = match &guard {
            Some(guard) => guard
                .as_page::<LeafPageRef>()
                .key_index(key, &self.comparator),
            None => 0,
        };
        BTreeIterator::new(Arc::clone(&self.bpm), guard, index)
    }

    /// The past-the-end iterator.
    pub fn end(&self) -> BTreeIterator {
        BTreeIterator::end(Arc::clone(&self.bpm))
    }

    /// Every entry with `start <= key <= end`, in key order.
    pub fn range_scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, RecordId)>> {
        self.check_key(end)?;

        let mut entries = Vec::new();
        for entry in self.begin_at(start)? {
            let (key, value) = entry?;
            if self.comparator.compare(&key, end) == Ordering::Greater {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }

    // ---------------------------------------------------------------------
    // Verification
    // ---------------------------------------------------------------------

    /// Walks the whole tree and verifies key order, separator bounds,
    /// occupancy, uniform leaf depth and the leaf chain.
    ///
    /// Holds the header shared for the duration, so it is meant for quiescent
    /// trees.
    pub fn check_integrity(&self) -> Result<TreeStats> {
        let header_guard = self.bpm.read_page(self.header_page_id)?;
        let root_page_id = header_guard.as_page::<HeaderPageRef>().root_page_id();

        let mut stats = TreeStats::default();
        if root_page_id == INVALID_PAGE_ID {
            return Ok(stats);
        }

        let mut leaves = Vec::new();
        self.check_subtree(root_page_id, None, None, 1, &mut stats, &mut leaves)?;

        for pair in leaves.windows(2) {
            let (page_id, next) = pair[0];
            if next != pair[1].0 {
                return Err(corrupted(format!(
                    "leaf {page_id} links to {next}, expected {}",
                    pair[1].0
                )));
            }
        }
        if let Some(&(page_id, next)) = leaves.last() {
            if next != INVALID_PAGE_ID {
                return Err(corrupted(format!("last leaf {page_id} links to {next}")));
            }
        }

        drop(header_guard);
        Ok(stats)
    }

    /// Checks the subtree at `page_id` whose keys must lie in
    /// `[lower, upper)`. Leaves are collected with their successor pointers.
    fn check_subtree(
        &self,
        page_id: PageId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        stats: &mut TreeStats,
        leaves: &mut Vec<(PageId, PageId)>,
    ) -> Result<()> {
        let guard = self.bpm.read_page(page_id)?;
        let is_leaf = is_leaf_page(&guard, page_id)?;
        let page: BTreePageRef = guard.as_page();
        let is_root = depth == 1;

        if page.key_size() != self.options.key_size {
            return Err(ArborError::KeySizeMismatch {
                expected: self.options.key_size,
                actual: page.key_size(),
            });
        }

        let size = page.size();
        let min_size = match (is_root, is_leaf) {
            (true, true) => 1,
            (true, false) => 2,
            (false, _) => page.min_size(),
        };
        if size > page.max_size() || size < min_size {
            return Err(corrupted(format!(
                "page {page_id} holds {size} entries, allowed {min_size}..={}",
                page.max_size()
            )));
        }

        let in_bounds = |key: &[u8]| {
            lower.map_or(true, |lower| self.comparator.compare(key, lower) != Ordering::Less)
                && upper.map_or(true, |upper| {
                    self.comparator.compare(key, upper) == Ordering::Less
                })
        };

        if is_leaf {
            let leaf: LeafPageRef = guard.as_page();
            for i in 0..size {
                let key = leaf.key_at(i);
                if !in_bounds(key) {
                    return Err(corrupted(format!("leaf {page_id} key {i} out of bounds")));
                }
                if i > 0 && self.comparator.compare(leaf.key_at(i - 1), key) != Ordering::Less {
                    return Err(corrupted(format!("leaf {page_id} keys out of order at {i}")));
                }
            }

            if stats.leaf_pages == 0 {
                stats.depth = depth;
            } else if stats.depth != depth {
                return Err(corrupted(format!(
                    "leaf {page_id} at depth {depth}, expected {}",
                    stats.depth
                )));
            }
            stats.leaf_pages += 1;
            stats.entries += size;
            leaves.push((page_id, leaf.next_page_id()));
            return Ok(());
        }

        let internal: InternalPageRef = guard.as_page();
        for i in 1..size {
            let key = internal.key_at(i);
            if !in_bounds(key) {
                return Err(corrupted(format!("internal {page_id} key {i} out of bounds")));
            }
            if i > 1 && self.comparator.compare(internal.key_at(i - 1), key) != Ordering::Less {
                return Err(corrupted(format!("internal {page_id} keys out of order at {i}")));
            }
        }
        stats.internal_pages += 1;

        for i in 0..size {
            let child_lower = if i == 0 { lower } else { Some(internal.key_at(i)) };
            let child_upper = if i + 1 < size { Some(internal.key_at(i + 1)) } else { upper };
            self.check_subtree(
                internal.value_at(i),
                child_lower,
                child_upper,
                depth + 1,
                stats,
                leaves,
            )?;
        }
        Ok(())
    }
}
