use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::common::{ArborError, FrameId, PageId, Result};

use super::Replacer;

#[derive(Debug, Clone, Copy, Default)]
struct ClockSlot {
    tracked: bool,
    evictable: bool,
    referenced: bool,
}

#[derive(Debug)]
struct ClockState {
    slots: Vec<ClockSlot>,
    hand: usize,
    size: usize,
}

/// Second-chance clock policy.
///
/// Every access sets the frame's reference bit. The hand sweeps the frames in
/// order, clearing reference bits, and evicts the first evictable frame whose
/// bit is already clear. There is no adaptation and no history.
pub struct ClockReplacer {
    state: Mutex<ClockState>,
}

impl ClockReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            state: Mutex::new(ClockState {
                slots: vec![ClockSlot::default(); num_frames],
                hand: 0,
                size: 0,
            }),
        }
    }

    /// Position of the clock hand.
    pub fn hand(&self) -> usize {
        self.state.lock().hand
    }
}

impl Replacer for ClockReplacer {
    fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        let n = state.slots.len();
        if state.size == 0 || n == 0 {
            return None;
        }

        // Two sweeps suffice: the first clears every reference bit
        for _ in 0..2 * n {
            let hand = state.hand;
            state.hand = (hand + 1) % n;

            let slot = &mut state.slots[hand];
            if !slot.tracked || !slot.evictable {
                continue;
            }
            if slot.referenced {
                slot.referenced = false;
                continue;
            }

            *slot = ClockSlot::default();
            state.size -= 1;
            let frame_id = FrameId::new(hand as u32);
            trace!(%frame_id, "clock evicted frame");
            return Some(frame_id);
        }
        None
    }

    fn record_access(&self, frame_id: FrameId, _page_id: PageId) {
        let mut state = self.state.lock();
        let idx = frame_id.as_usize();
        if idx >= state.slots.len() {
            warn!(%frame_id, "access to frame outside replacer range");
            return;
        }

        let slot = &mut state.slots[idx];
        slot.referenced = true;
        if !slot.tracked {
            slot.tracked = true;
            slot.evictable = true;
            state.size += 1;
        }
    }

    fn restore(&self, frame_id: FrameId, _page_id: PageId) {
        let mut state = self.state.lock();
        let idx = frame_id.as_usize();
        if idx >= state.slots.len() {
            warn!(%frame_id, "restore of frame outside replacer range");
            return;
        }
        if state.slots[idx].tracked {
            return;
        }

        // No reference bit: the frame stays first in line
        state.slots[idx] = ClockSlot {
            tracked: true,
            evictable: true,
            referenced: false,
        };
        state.size += 1;
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state
            .slots
            .get_mut(frame_id.as_usize())
            .filter(|slot| slot.tracked)
            .ok_or(ArborError::InvalidFrameId(frame_id))?;

        if slot.evictable == evictable {
            return Ok(());
        }
        slot.evictable = evictable;
        if evictable {
            state.size += 1;
        } else {
            state.size -= 1;
        }
        Ok(())
    }

    fn remove(&self, frame_id: FrameId) -> Result<()> {
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get(frame_id.as_usize()).copied() else {
            return Ok(());
        };
        if !slot.tracked {
            return Ok(());
        }
        if !slot.evictable {
            return Err(ArborError::FrameNotEvictable(frame_id));
        }

        state.slots[frame_id.as_usize()] = ClockSlot::default();
        state.size -= 1;
        Ok(())
    }

    fn size(&self) -> usize {
        self.state.lock().size
    }
}
