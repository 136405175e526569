//! Anchor
//!
//! The anchor is the single 64-bit word through which every state change of a super-block is committed. It packs the
//! head of the in-block free list, the number of free slots, the occupancy state, and a monotonic tag into one word so
//! that a single compare-exchange serializes allocation and release without locks.
//!
//! The tag increases on every successful update of one descriptor; together with the hazard-deferred recycling of
//! descriptor records it protects the compare-exchange from ABA on the `(avail, count, state)` triple.

use core::sync::atomic::{AtomicU64, Ordering};

/// Occupancy state of a super-block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum State {
    /// No free slot left.
    Full,
    /// Some, but not all, slots are free.
    Partial,
    /// Every slot is free; the super-block is about to be returned to the platform.
    Empty,
}

impl State {
    fn from_bits(bits: u64) -> State {
        match bits {
            0 => State::Full,
            1 => State::Partial,
            _ => State::Empty,
        }
    }

    fn into_bits(self) -> u64 {
        match self {
            State::Full => 0,
            State::Partial => 1,
            State::Empty => 2,
        }
    }
}

/// Packed `(avail, count, state, tag)` tuple.
///
/// Layout, from the least significant bit: 10 bits of `avail`, 10 bits of `count`, 2 bits of `state`, 42 bits of
/// `tag`. The 10-bit fields bound the number of slots of a super-block to [`Anchor::MAX_SLOT_COUNT`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Anchor(u64);

impl Anchor {
    /// Largest number of slots a super-block may be carved into.
    pub(crate) const MAX_SLOT_COUNT: usize = FIELD_MASK as usize;

    /// Creates an anchor from its parts.
    pub(crate) fn new(avail: u32, count: u32, state: State, tag: u64) -> Anchor {
        debug_assert!(u64::from(avail) <= FIELD_MASK);
        debug_assert!(u64::from(count) <= FIELD_MASK);

        Anchor(
            u64::from(avail)
                | u64::from(count) << COUNT_SHIFT
                | state.into_bits() << STATE_SHIFT
                | (tag & TAG_MASK) << TAG_SHIFT,
        )
    }

    /// Index of the head of the in-block free list; meaningless when the state is `Full`.
    pub(crate) fn avail(self) -> u32 { (self.0 & FIELD_MASK) as u32 }

    /// Number of free slots.
    pub(crate) fn count(self) -> u32 { (self.0 >> COUNT_SHIFT & FIELD_MASK) as u32 }

    /// Occupancy state.
    pub(crate) fn state(self) -> State { State::from_bits(self.0 >> STATE_SHIFT & STATE_MASK) }

    /// Update counter.
    pub(crate) fn tag(self) -> u64 { self.0 >> TAG_SHIFT }

    /// Returns the anchor after handing out the slot at `avail`.
    ///
    /// `next` is the index following `avail` on the free list; it is ignored when the last slot is handed out.
    pub(crate) fn allocated(self, next: u32) -> Anchor {
        debug_assert!(self.state() == State::Partial);
        debug_assert!(self.count() > 0);

        let count = self.count() - 1;
        let (avail, state) = if count == 0 { (0, State::Full) } else { (next, State::Partial) };

        Anchor::new(avail, count, state, self.tag().wrapping_add(1))
    }

    /// Returns the anchor after the slot at `slot` came back.
    pub(crate) fn released(self, slot: u32, slot_count: u32) -> Anchor {
        //  A release on an all-free super-block is a double free.
        debug_assert!(self.state() != State::Empty);
        debug_assert!(self.count() < slot_count);

        let count = self.count() + 1;
        let state = if count == slot_count { State::Empty } else { State::Partial };

        Anchor::new(slot, count, state, self.tag().wrapping_add(1))
    }

    /// Returns the anchor with the state forced to `Empty`.
    ///
    /// Only meaningful on a privately held descriptor about to be retired without ever having been published.
    pub(crate) fn drained(self) -> Anchor {
        Anchor::new(self.avail(), self.count(), State::Empty, self.tag())
    }
}

/// Atomically updated anchor word.
#[derive(Debug)]
pub(crate) struct AtomicAnchor(AtomicU64);

impl AtomicAnchor {
    /// Creates an instance.
    pub(crate) fn new(anchor: Anchor) -> AtomicAnchor { AtomicAnchor(AtomicU64::new(anchor.0)) }

    /// Loads the anchor.
    ///
    /// The acquire ordering guarantees that reads of the slot pointed to by `avail` happen-after this load.
    pub(crate) fn load(&self) -> Anchor { Anchor(self.0.load(Ordering::Acquire)) }

    /// Overwrites the anchor; only sound while the descriptor is privately held.
    pub(crate) fn store(&self, anchor: Anchor) { self.0.store(anchor.0, Ordering::Release) }

    /// Attempts to move the anchor from `current` to `new`; returns the observed anchor on failure.
    pub(crate) fn compare_exchange(&self, current: Anchor, new: Anchor) -> Result<(), Anchor> {
        //  An empty super-block is on its way out; no transition revives it.
        debug_assert!(current.state() != State::Empty || new.state() == State::Empty);

        self.0
            .compare_exchange(current.0, new.0, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(Anchor)
    }
}

//
//  Implementation
//

const FIELD_BITS: u32 = 10;
const FIELD_MASK: u64 = (1 << FIELD_BITS) - 1;

const COUNT_SHIFT: u32 = FIELD_BITS;
const STATE_SHIFT: u32 = 2 * FIELD_BITS;
const STATE_MASK: u64 = 0b11;
const TAG_SHIFT: u32 = 2 * FIELD_BITS + 2;
const TAG_MASK: u64 = (1 << (64 - TAG_SHIFT)) - 1;

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn anchor_round_trip() {
    fn round_trip(avail: u32, count: u32, state: State, tag: u64) {
        let anchor = Anchor::new(avail, count, state, tag);

        assert_eq!(avail, anchor.avail());
        assert_eq!(count, anchor.count());
        assert_eq!(state, anchor.state());
        assert_eq!(tag, anchor.tag());
    }

    round_trip(0, 0, State::Full, 0);
    round_trip(1, 254, State::Partial, 3);
    round_trip(1022, 1023, State::Empty, 42);
    round_trip(17, 1, State::Partial, (1 << 42) - 1);
}

#[test]
fn anchor_allocated_keeps_partial() {
    let anchor = Anchor::new(3, 5, State::Partial, 7);
    let updated = anchor.allocated(9);

    assert_eq!(9, updated.avail());
    assert_eq!(4, updated.count());
    assert_eq!(State::Partial, updated.state());
    assert_eq!(8, updated.tag());
}

#[test]
fn anchor_allocated_reaches_full() {
    let anchor = Anchor::new(3, 1, State::Partial, 7);
    let updated = anchor.allocated(1023);

    assert_eq!(0, updated.count());
    assert_eq!(State::Full, updated.state());
    assert_eq!(8, updated.tag());
}

#[test]
fn anchor_released_from_full() {
    let anchor = Anchor::new(0, 0, State::Full, 11);
    let updated = anchor.released(6, 255);

    assert_eq!(6, updated.avail());
    assert_eq!(1, updated.count());
    assert_eq!(State::Partial, updated.state());
    assert_eq!(12, updated.tag());
}

#[test]
fn anchor_released_reaches_empty() {
    let anchor = Anchor::new(4, 254, State::Partial, 11);
    let updated = anchor.released(6, 255);

    assert_eq!(255, updated.count());
    assert_eq!(State::Empty, updated.state());
    assert_eq!(12, updated.tag());
}

#[test]
fn anchor_tag_increases_across_updates() {
    let mut anchor = Anchor::new(1, 254, State::Partial, 0);
    let mut last_tag = anchor.tag();

    for slot in 0..4 {
        anchor = anchor.allocated(slot + 2);
        assert!(anchor.tag() > last_tag);
        last_tag = anchor.tag();
    }

    for slot in 0..4 {
        anchor = anchor.released(slot, 255);
        assert!(anchor.tag() > last_tag);
        last_tag = anchor.tag();
    }
}

#[test]
fn atomic_anchor_compare_exchange() {
    let initial = Anchor::new(1, 254, State::Partial, 0);
    let atomic = AtomicAnchor::new(initial);

    let updated = initial.allocated(2);
    assert_eq!(Ok(()), atomic.compare_exchange(initial, updated));
    assert_eq!(updated, atomic.load());

    //  Stale expectation fails and reports the current value.
    assert_eq!(Err(updated), atomic.compare_exchange(initial, initial.allocated(3)));
    assert_eq!(updated, atomic.load());
}

} // mod tests
