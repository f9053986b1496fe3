use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::common::{ArborError, FrameId, PageId, Result};

use super::Replacer;

/// The four ARC lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcList {
    /// Pages seen once since they were admitted
    Recent,
    /// Pages seen at least twice
    Frequent,
    /// History of pages evicted from `Recent`
    RecentGhost,
    /// History of pages evicted from `Frequent`
    FrequentGhost,
}

#[derive(Debug, Clone, Copy)]
struct Link<K> {
    prev: Option<K>,
    next: Option<K>,
}

/// Doubly-linked list of ids. Links live in a map keyed by the id itself,
/// so membership, unlinking and moving to the front are O(1) without
/// handing out positions. Front is the hot end, back is the cold end.
#[derive(Debug)]
struct KeyList<K> {
    head: Option<K>,
    tail: Option<K>,
    links: HashMap<K, Link<K>>,
}

impl<K: Copy + Eq + Hash> KeyList<K> {
    fn new() -> Self {
        Self {
            head: None,
            tail: None,
            links: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.links.len()
    }

    fn contains(&self, key: &K) -> bool {
        self.links.contains_key(key)
    }

    fn push_front(&mut self, key: K) {
        self.remove(&key);

        let link = Link {
            prev: None,
            next: self.head,
        };
        match self.head {
            Some(old_head) => {
                if let Some(old) = self.links.get_mut(&old_head) {
                    old.prev = Some(key);
                }
            }
            None => self.tail = Some(key),
        }
        self.head = Some(key);
        self.links.insert(key, link);
    }

    fn push_back(&mut self, key: K) {
        self.remove(&key);

        let link = Link {
            prev: self.tail,
            next: None,
        };
        match self.tail {
            Some(old_tail) => {
                if let Some(old) = self.links.get_mut(&old_tail) {
                    old.next = Some(key);
                }
            }
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.links.insert(key, link);
    }

    fn remove(&mut self, key: &K) -> bool {
        let Some(link) = self.links.remove(key) else {
            return false;
        };

        match link.prev {
            Some(prev) => {
                if let Some(p) = self.links.get_mut(&prev) {
                    p.next = link.next;
                }
            }
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => {
                if let Some(n) = self.links.get_mut(&next) {
                    n.prev = link.prev;
                }
            }
            None => self.tail = link.prev,
        }
        true
    }

    fn pop_back(&mut self) -> Option<K> {
        let key = self.tail?;
        self.remove(&key);
        Some(key)
    }

    /// Walks from the cold end towards the hot end.
    fn iter_from_back(&self) -> impl Iterator<Item = K> + '_ {
        std::iter::successors(self.tail, move |key| {
            self.links.get(key).and_then(|link| link.prev)
        })
    }

    fn iter(&self) -> impl Iterator<Item = K> + '_ {
        std::iter::successors(self.head, move |key| {
            self.links.get(key).and_then(|link| link.next)
        })
    }
}

/// Bookkeeping for a resident frame. Owned by the alive map; the lists
/// only carry the frame id.
#[derive(Debug, Clone, Copy)]
struct FrameStatus {
    page_id: PageId,
    evictable: bool,
    list: ArcList,
}

/// Eviction history for a page that no longer has a frame.
#[derive(Debug, Clone, Copy)]
struct GhostStatus {
    list: ArcList,
    last_frame: FrameId,
}

#[derive(Debug)]
struct ArcState {
    capacity: usize,
    /// Desired size of `recent`, within `[0, capacity]`
    target: usize,
    /// Number of evictable frames
    size: usize,
    recent: KeyList<FrameId>,
    frequent: KeyList<FrameId>,
    recent_ghost: KeyList<PageId>,
    frequent_ghost: KeyList<PageId>,
    alive: HashMap<FrameId, FrameStatus>,
    ghosts: HashMap<PageId, GhostStatus>,
}

impl ArcState {
    fn total_len(&self) -> usize {
        self.recent.len() + self.frequent.len() + self.recent_ghost.len() + self.frequent_ghost.len()
    }

    fn live_list_mut(&mut self, list: ArcList) -> &mut KeyList<FrameId> {
        match list {
            ArcList::Recent | ArcList::RecentGhost => &mut self.recent,
            ArcList::Frequent | ArcList::FrequentGhost => &mut self.frequent,
        }
    }

    fn ghost_list_mut(&mut self, list: ArcList) -> &mut KeyList<PageId> {
        match list {
            ArcList::Recent | ArcList::RecentGhost => &mut self.recent_ghost,
            ArcList::Frequent | ArcList::FrequentGhost => &mut self.frequent_ghost,
        }
    }

    /// Evicts the coldest evictable frame of `from` (Recent or Frequent)
    /// into the matching ghost list.
    fn evict_from(&mut self, from: ArcList) -> Option<FrameId> {
        let (live, ghost) = match from {
            ArcList::Recent => (&self.recent, ArcList::RecentGhost),
            ArcList::Frequent => (&self.frequent, ArcList::FrequentGhost),
            _ => return None,
        };

        let alive = &self.alive;
        let victim = live
            .iter_from_back()
            .find(|frame_id| alive.get(frame_id).is_some_and(|s| s.evictable))?;

        self.live_list_mut(from).remove(&victim);
        let status = self.alive.remove(&victim)?;
        self.size -= 1;

        // A page is never tracked twice in the history
        if let Some(stale) = self.ghosts.remove(&status.page_id) {
            self.ghost_list_mut(stale.list).remove(&status.page_id);
        }
        self.ghost_list_mut(ghost).push_front(status.page_id);
        self.ghosts.insert(
            status.page_id,
            GhostStatus {
                list: ghost,
                last_frame: victim,
            },
        );

        trace!(frame_id = %victim, page_id = %status.page_id, ghost = ?ghost, "evicted frame");
        Some(victim)
    }

    /// Undoes the eviction of `page_id` from `frame_id`: the ghost entry is
    /// dropped and the frame goes back to the cold end of its old list.
    /// The target is left alone.
    fn restore(&mut self, frame_id: FrameId, page_id: PageId) {
        if self.alive.contains_key(&frame_id) {
            return;
        }
        let list = match self.ghosts.remove(&page_id) {
            Some(ghost) => {
                self.ghost_list_mut(ghost.list).remove(&page_id);
                match ghost.list {
                    ArcList::FrequentGhost => ArcList::Frequent,
                    _ => ArcList::Recent,
                }
            }
            None => ArcList::Recent,
        };

        self.live_list_mut(list).push_back(frame_id);
        self.alive.insert(
            frame_id,
            FrameStatus {
                page_id,
                evictable: true,
                list,
            },
        );
        self.size += 1;
        trace!(%frame_id, %page_id, list = ?list, "restored frame");
    }

    fn admit(&mut self, frame_id: FrameId, page_id: PageId, list: ArcList) {
        self.live_list_mut(list).push_front(frame_id);
        self.alive.insert(
            frame_id,
            FrameStatus {
                page_id,
                evictable: true,
                list,
            },
        );
        self.size += 1;
    }

    fn record_access(&mut self, frame_id: FrameId, page_id: PageId) {
        // Resident hit: promote to (or refresh within) the frequent list
        if let Some(status) = self.alive.get_mut(&frame_id) {
            status.page_id = page_id;
            if status.list == ArcList::Recent {
                status.list = ArcList::Frequent;
                self.recent.remove(&frame_id);
            }
            self.frequent.push_front(frame_id);
            return;
        }

        // Ghost hit: adapt the target, then admit straight into frequent
        if let Some(ghost) = self.ghosts.remove(&page_id) {
            let before = self.target;
            match ghost.list {
                ArcList::RecentGhost => {
                    let delta = (self.frequent_ghost.len() / self.recent_ghost.len().max(1)).max(1);
                    self.target = (self.target + delta).min(self.capacity);
                    self.recent_ghost.remove(&page_id);
                }
                _ => {
                    let delta = (self.recent_ghost.len() / self.frequent_ghost.len().max(1)).max(1);
                    self.target = self.target.saturating_sub(delta);
                    self.frequent_ghost.remove(&page_id);
                }
            }
            trace!(
                %page_id,
                %frame_id,
                last_frame = %ghost.last_frame,
                ghost = ?ghost.list,
                before,
                after = self.target,
                "ghost hit adjusted target"
            );
            self.admit(frame_id, page_id, ArcList::Frequent);
            return;
        }

        // Miss: keep the history bounded before admitting into recent
        if self.recent.len() + self.recent_ghost.len() >= self.capacity {
            if let Some(forgotten) = self.recent_ghost.pop_back() {
                self.ghosts.remove(&forgotten);
            }
        } else if self.total_len() >= 2 * self.capacity {
            if let Some(forgotten) = self.frequent_ghost.pop_back() {
                self.ghosts.remove(&forgotten);
            }
        }
        self.admit(frame_id, page_id, ArcList::Recent);
    }
}

/// Adaptive Replacement Cache policy.
///
/// Resident frames live in `Recent` (seen once) or `Frequent` (seen again);
/// evicted pages leave their id in the matching ghost list. A hit in a ghost
/// list moves the target size of `Recent` towards the side that would have
/// kept the page, and eviction picks its side by comparing `|Recent|` with
/// that target. When the preferred side is entirely pinned the other side is
/// used instead.
pub struct ArcReplacer {
    state: Mutex<ArcState>,
}

impl ArcReplacer {
    /// Creates an ARC replacer for `num_frames` frames with empty lists and a
    /// target size of zero.
    pub fn new(num_frames: usize) -> Self {
        Self {
            state: Mutex::new(ArcState {
                capacity: num_frames,
                target: 0,
                size: 0,
                recent: KeyList::new(),
                frequent: KeyList::new(),
                recent_ghost: KeyList::new(),
                frequent_ghost: KeyList::new(),
                alive: HashMap::new(),
                ghosts: HashMap::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Current target size of the recent list.
    pub fn target_size(&self) -> usize {
        self.state.lock().target
    }

    /// Number of entries in one of the four lists.
    pub fn list_len(&self, list: ArcList) -> usize {
        let state = self.state.lock();
        match list {
            ArcList::Recent => state.recent.len(),
            ArcList::Frequent => state.frequent.len(),
            ArcList::RecentGhost => state.recent_ghost.len(),
            ArcList::FrequentGhost => state.frequent_ghost.len(),
        }
    }

    /// The live list holding `frame_id`, if the frame is tracked.
    pub fn frame_list(&self, frame_id: FrameId) -> Option<ArcList> {
        self.state.lock().alive.get(&frame_id).map(|s| s.list)
    }

    /// The ghost list remembering `page_id`, if any.
    pub fn ghost_list(&self, page_id: PageId) -> Option<ArcList> {
        self.state.lock().ghosts.get(&page_id).map(|g| g.list)
    }

    /// Frame ids of a live list from hottest to coldest.
    pub fn frames_in(&self, list: ArcList) -> Vec<FrameId> {
        let state = self.state.lock();
        match list {
            ArcList::Recent => state.recent.iter().collect(),
            ArcList::Frequent => state.frequent.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Page ids of a ghost list from most to least recently evicted.
    pub fn ghosts_in(&self, list: ArcList) -> Vec<PageId> {
        let state = self.state.lock();
        match list {
            ArcList::RecentGhost => state.recent_ghost.iter().collect(),
            ArcList::FrequentGhost => state.frequent_ghost.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Panics if any list or counter invariant is broken.
    pub fn debug_validate_invariants(&self) {
        let state = self.state.lock();
        let cap = state.capacity;

        assert!(state.target <= cap, "target {} exceeds capacity {}", state.target, cap);
        assert!(
            state.recent.len() + state.recent_ghost.len() <= cap,
            "|Recent| + |RecentGhost| exceeds capacity"
        );
        assert!(state.total_len() <= 2 * cap, "lists exceed twice the capacity");
        assert!(state.size <= cap, "size {} exceeds capacity {}", state.size, cap);

        assert_eq!(state.alive.len(), state.recent.len() + state.frequent.len());
        assert_eq!(
            state.ghosts.len(),
            state.recent_ghost.len() + state.frequent_ghost.len()
        );
        for (frame_id, status) in &state.alive {
            let (mine, other) = match status.list {
                ArcList::Recent => (&state.recent, &state.frequent),
                _ => (&state.frequent, &state.recent),
            };
            assert!(mine.contains(frame_id), "{} missing from its list", frame_id);
            assert!(!other.contains(frame_id), "{} in both live lists", frame_id);
            assert!(
                !state.ghosts.contains_key(&status.page_id),
                "{} is both resident and a ghost",
                status.page_id
            );
        }
        for (page_id, ghost) in &state.ghosts {
            let list = match ghost.list {
                ArcList::RecentGhost => &state.recent_ghost,
                _ => &state.frequent_ghost,
            };
            assert!(list.contains(page_id), "{} missing from its ghost list", page_id);
        }

        let evictable = state.alive.values().filter(|s| s.evictable).count();
        assert_eq!(state.size, evictable, "size counter out of sync");
        assert_eq!(state.recent.iter().count(), state.recent.len());
        assert_eq!(state.frequent.iter_from_back().count(), state.frequent.len());
    }
}

impl Replacer for ArcReplacer {
    fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();

        if state.recent.len() < state.target {
            state
                .evict_from(ArcList::Frequent)
                .or_else(|| state.evict_from(ArcList::Recent))
        } else {
            state
                .evict_from(ArcList::Recent)
                .or_else(|| state.evict_from(ArcList::Frequent))
        }
    }

    fn record_access(&self, frame_id: FrameId, page_id: PageId) {
        let mut state = self.state.lock();
        if frame_id.as_usize() >= state.capacity {
            warn!(%frame_id, capacity = state.capacity, "access to frame outside replacer range");
            return;
        }
        state.record_access(frame_id, page_id);
    }

    fn restore(&self, frame_id: FrameId, page_id: PageId) {
        let mut state = self.state.lock();
        if frame_id.as_usize() >= state.capacity {
            warn!(%frame_id, capacity = state.capacity, "restore of frame outside replacer range");
            return;
        }
        state.restore(frame_id, page_id);
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let status = state
            .alive
            .get_mut(&frame_id)
            .ok_or(ArborError::InvalidFrameId(frame_id))?;

        if status.evictable != evictable {
            status.evictable = evictable;
            if evictable {
                state.size += 1;
            } else {
                state.size -= 1;
            }
        }
        Ok(())
    }

    fn remove(&self, frame_id: FrameId) -> Result<()> {
        let mut state = self.state.lock();
        let Some(status) = state.alive.get(&frame_id).copied() else {
            return Ok(());
        };
        if !status.evictable {
            return Err(ArborError::FrameNotEvictable(frame_id));
        }

        state.live_list_mut(status.list).remove(&frame_id);
        state.alive.remove(&frame_id);
        state.size -= 1;
        Ok(())
    }

    fn size(&self) -> usize {
        self.state.lock().size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(replacer: &ArcReplacer, frame: u32, page: u32) {
        replacer.record_access(FrameId::new(frame), PageId::new(page));
    }

    #[test]
    fn test_arc_replacer_new() {
        let replacer = ArcReplacer::new(4);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.target_size(), 0);
        assert_eq!(replacer.capacity(), 4);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_arc_replacer_second_access_promotes() {
        let replacer = ArcReplacer::new(4);
        access(&replacer, 0, 10);
        assert_eq!(replacer.frame_list(FrameId::new(0)), Some(ArcList::Recent));

        access(&replacer, 0, 10);
        assert_eq!(replacer.frame_list(FrameId::new(0)), Some(ArcList::Frequent));
        assert_eq!(replacer.list_len(ArcList::Recent), 0);

        access(&replacer, 1, 11);
        access(&replacer, 1, 11);
        access(&replacer, 0, 10);
        assert_eq!(
            replacer.frames_in(ArcList::Frequent),
            vec![FrameId::new(0), FrameId::new(1)]
        );
        replacer.debug_validate_invariants();
    }

    #[test]
    fn test_arc_replacer_evict_moves_to_ghost() {
        let replacer = ArcReplacer::new(3);
        access(&replacer, 0, 10);
        access(&replacer, 1, 11);

        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.ghost_list(PageId::new(10)), Some(ArcList::RecentGhost));
        assert_eq!(replacer.frame_list(FrameId::new(0)), None);
        assert_eq!(replacer.size(), 1);
        replacer.debug_validate_invariants();
    }

    #[test]
    fn test_arc_replacer_falls_back_to_other_side() {
        let replacer = ArcReplacer::new(3);
        access(&replacer, 0, 10);
        access(&replacer, 1, 11);
        access(&replacer, 1, 11);

        // Recent is preferred (target 0) but its only frame is pinned
        replacer.set_evictable(FrameId::new(0), false).unwrap();
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.ghost_list(PageId::new(11)), Some(ArcList::FrequentGhost));

        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_arc_replacer_set_evictable_unknown_frame() {
        let replacer = ArcReplacer::new(3);
        assert!(matches!(
            replacer.set_evictable(FrameId::new(2), true),
            Err(ArborError::InvalidFrameId(_))
        ));
    }

    #[test]
    fn test_arc_replacer_remove() {
        let replacer = ArcReplacer::new(3);
        access(&replacer, 0, 10);
        access(&replacer, 1, 11);
        replacer.set_evictable(FrameId::new(1), false).unwrap();

        assert!(matches!(
            replacer.remove(FrameId::new(1)),
            Err(ArborError::FrameNotEvictable(_))
        ));
        replacer.remove(FrameId::new(0)).unwrap();
        replacer.remove(FrameId::new(2)).unwrap();

        assert_eq!(replacer.size(), 0);
        // Removal leaves no history behind
        assert_eq!(replacer.ghost_list(PageId::new(10)), None);
        replacer.debug_validate_invariants();
    }

    #[test]
    fn test_arc_replacer_restore_keeps_target() {
        let replacer = ArcReplacer::new(3);
        access(&replacer, 0, 10);
        access(&replacer, 1, 11);
        access(&replacer, 1, 11);
        access(&replacer, 2, 12);

        let victim = replacer.evict().unwrap();
        assert_eq!(victim, FrameId::new(0));
        replacer.restore(victim, PageId::new(10));

        assert_eq!(replacer.target_size(), 0);
        assert_eq!(replacer.ghost_list(PageId::new(10)), None);
        assert_eq!(replacer.frame_list(victim), Some(ArcList::Recent));
        assert_eq!(replacer.size(), 3);
        // Still the coldest page, so it goes first again
        assert_eq!(replacer.evict(), Some(victim));
        replacer.debug_validate_invariants();
    }

    #[test]
    fn test_arc_replacer_restore_frequent_victim() {
        let replacer = ArcReplacer::new(2);
        access(&replacer, 0, 10);
        access(&replacer, 0, 10);
        access(&replacer, 1, 11);
        replacer.set_evictable(FrameId::new(1), false).unwrap();

        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.ghost_list(PageId::new(10)), Some(ArcList::FrequentGhost));

        replacer.restore(FrameId::new(0), PageId::new(10));
        assert_eq!(replacer.frame_list(FrameId::new(0)), Some(ArcList::Frequent));
        assert_eq!(replacer.list_len(ArcList::FrequentGhost), 0);
        assert_eq!(replacer.target_size(), 0);
        assert_eq!(replacer.size(), 1);
        replacer.debug_validate_invariants();
    }

    #[test]
    fn test_arc_replacer_ignores_out_of_range_frame() {
        let replacer = ArcReplacer::new(2);
        access(&replacer, 5, 10);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_key_list_links() {
        let mut list = KeyList::new();
        list.push_front(1u32);
        list.push_front(2);
        list.push_front(3);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![3, 2, 1]);

        assert!(list.remove(&2));
        assert!(!list.remove(&2));
        assert_eq!(list.iter_from_back().collect::<Vec<_>>(), vec![1, 3]);

        list.push_front(1);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![1, 3]);
        list.push_back(4);
        list.push_back(1);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![3, 4, 1]);
        assert_eq!(list.pop_back(), Some(1));
        assert_eq!(list.pop_back(), Some(4));
        assert_eq!(list.pop_back(), Some(3));
        assert_eq!(list.pop_back(), Some(1));
        assert_eq!(list.pop_back(), None);
        assert_eq!(list.len(), 0);
    }
}
