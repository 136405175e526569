//! Consistency checking
//!
//! A read-only audit of a heap: the active descriptor and every descriptor on the class's partial list are checked
//! against the structural invariants. State must match count, the in-block free list must be a clean chain, and no
//! reachable descriptor may simultaneously sit in the free pool.
//!
//! The walk takes no locks and moves nothing, which is only sound while nothing else runs; callers guarantee
//! quiescence.

use crate::{Configuration, ConsistencyError, Heap, Platform, SizeClass};
use crate::internals::anchor::{Anchor, State};
use crate::internals::descriptor::Descriptor;
use crate::internals::slab::Slab;
use crate::internals::super_block;

/// Audits the heap's reachable descriptors.
///
/// #   Safety
///
/// -   Assumes a quiescent domain: no concurrent allocation, release, or reclamation.
pub(crate) unsafe fn check_heap<C, P>(slab: &Slab<C, P>, heap: &Heap<'_, C>) -> Result<(), ConsistencyError>
where
    C: Configuration,
    P: Platform,
{
    let size_class = heap.size_class();

    if let Some(active) = heap.active().load() {
        if active.as_ref().anchor().load().state() != State::Partial {
            return Err(ConsistencyError::ActiveNotPartial);
        }

        check_descriptor(slab, size_class, active.as_ref())?;
    }

    for descriptor in size_class.partial().iter() {
        let record = descriptor.as_ref();

        //  Drained descriptors linger on the list until popped; full ones must never be published.
        if record.anchor().load().state() == State::Full {
            return Err(ConsistencyError::ListedFull);
        }

        check_descriptor(slab, size_class, record)?;
    }

    Ok(())
}

//  Internal; checks one descriptor's invariants and free list.
unsafe fn check_descriptor<C, P>(
    slab: &Slab<C, P>,
    size_class: &SizeClass<C>,
    record: &Descriptor,
) -> Result<(), ConsistencyError>
where
    C: Configuration,
    P: Platform,
{
    if slab.pool().contains(record.into()) {
        return Err(ConsistencyError::DescriptorInPool);
    }

    if record.slot_size() as usize != size_class.slot_size() {
        return Err(ConsistencyError::SlotSizeMismatch {
            descriptor: record.slot_size() as usize,
            class: size_class.slot_size(),
        });
    }

    let anchor = record.anchor().load();
    let slot_count = record.slot_count();

    let count_matches = match anchor.state() {
        State::Full => anchor.count() == 0,
        State::Partial => anchor.count() > 0 && anchor.count() < slot_count,
        State::Empty => anchor.count() == slot_count,
    };

    if !count_matches {
        return Err(ConsistencyError::CountStateMismatch {
            count: anchor.count() as usize,
            slot_count: slot_count as usize,
        });
    }

    check_free_list(record, anchor)
}

//  Internal; walks the in-block free list, which must chain `count` distinct in-range slots.
unsafe fn check_free_list(record: &Descriptor, anchor: Anchor) -> Result<(), ConsistencyError> {
    let payload = record.super_block().expect("live descriptors are paired with a super-block");
    let slot_size = record.slot_size();
    let slot_count = record.slot_count();

    let mut linked = [false; Anchor::MAX_SLOT_COUNT];
    let mut index = anchor.avail();

    for _ in 0..anchor.count() {
        if index >= slot_count {
            return Err(ConsistencyError::LinkOutOfRange {
                index: index as usize,
                slot_count: slot_count as usize,
            });
        }

        if linked[index as usize] {
            return Err(ConsistencyError::LinkRevisited { index: index as usize });
        }

        linked[index as usize] = true;
        index = super_block::read_link(payload, index, slot_size);
    }

    Ok(())
}
