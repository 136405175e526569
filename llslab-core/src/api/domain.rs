//! Domain
//!
//! A Domain is the process-wide backbone of the allocator: the platform memory comes in through it, the descriptor
//! pool and the hazard table live in it, and every heap and thread that exchange memory must do so through the same
//! Domain instance.
//!
//! Typically, applications will use a single global Domain.

use core::{fmt, ptr::NonNull};

use crate::{Configuration, Heap, Platform, ThreadHandle};
use crate::internals::{consistency, slab::Slab};

/// Process-wide allocator state: platform, descriptor pool, and hazard table.
pub struct Domain<C, P> {
    slab: Slab<C, P>,
}

impl<C, P> Domain<C, P> {
    /// Creates a Domain allocating from, and returning memory to, `platform`.
    pub const fn new(platform: P) -> Domain<C, P> { Domain { slab: Slab::new(platform) } }
}

impl<C, P> Domain<C, P>
where
    C: Configuration,
    P: Platform,
{
    /// Registers the calling thread, granting it the hazard slots the hot paths need.
    ///
    /// Returns None once the domain's registration capacity is exhausted.
    #[cold]
    pub fn acquire_thread(&self) -> Option<ThreadHandle<'_>> {
        self.slab.hazard().claim_record().map(ThreadHandle::new)
    }

    /// Returns a thread registration, making it claimable by other threads.
    #[cold]
    pub fn release_thread(&self, thread: ThreadHandle<'_>) {
        //  Safety:
        //  -   The handle's record was claimed from this domain's hazard table, per the handle's lifetime.
        unsafe { self.slab.hazard().release_record(thread.into_record()) };
    }

    /// Produces a pointer to `slot_size` uninitialized bytes of the heap's size class.
    ///
    /// Returns None only on platform memory exhaustion; contention is retried internally. Thread-safe.
    ///
    /// #   Safety
    ///
    /// `allocate` assumes that:
    /// -   `thread` was acquired from this domain, and `heap`'s memory flows through this domain only.
    /// -   `heap` stays at a stable address for as long as any of its allocations lives.
    #[inline(always)]
    pub unsafe fn allocate(&self, heap: &Heap<'_, C>, thread: &ThreadHandle<'_>) -> Option<NonNull<u8>> {
        self.slab.allocate(heap, thread)
    }

    /// Returns a slot to the super-block it was carved from.
    ///
    /// Thread-safe; the slot may be handed back from any registered thread, not only the allocating one.
    ///
    /// #   Safety
    ///
    /// The caller should no longer reference the memory after calling this function.
    ///
    /// `deallocate` assumes that:
    /// -   `ptr` was returned by `allocate` on this domain, and has not been released since.
    /// -   `thread` was acquired from this domain.
    #[inline(always)]
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, thread: &ThreadHandle<'_>) {
        self.slab.deallocate(ptr, thread)
    }

    /// Runs every deferred descriptor operation whose target no hazard covers.
    ///
    /// Reclamation also runs opportunistically as retirements accumulate; this merely forces a pass, which tests
    /// and shutdown paths use to drain the domain.
    ///
    /// Returns the number of descriptors processed.
    pub fn reclaim(&self) -> usize { self.slab.reclaim() }

    /// Audits the heap's reachable descriptors against the structural invariants.
    ///
    /// The walk is read-only and leaves the partial list untouched.
    ///
    /// #   Safety
    ///
    /// -   Assumes a quiescent domain: no concurrent allocation, release, or reclamation.
    pub unsafe fn check_consistency(&self, heap: &Heap<'_, C>) -> Result<(), ConsistencyError> {
        consistency::check_heap(&self.slab, heap)
    }
}

impl<C, P> Default for Domain<C, P>
where
    P: Default,
{
    fn default() -> Self { Self::new(P::default()) }
}

#[cfg(test)]
impl<C, P> Domain<C, P> {
    pub(crate) fn slab(&self) -> &Slab<C, P> { &self.slab }
}

/// A structural invariant violation found by [`Domain::check_consistency`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConsistencyError {
    /// The heap's active descriptor is not in the partial state.
    ActiveNotPartial,
    /// A full descriptor sits on the partial list.
    ListedFull,
    /// A descriptor reachable from the heap also sits in the free pool.
    DescriptorInPool,
    /// A descriptor's slot size differs from its size class's.
    SlotSizeMismatch {
        /// Slot size recorded in the descriptor.
        descriptor: usize,
        /// Slot size of the size class.
        class: usize,
    },
    /// A descriptor's free count contradicts its state.
    CountStateMismatch {
        /// Free count recorded in the anchor.
        count: usize,
        /// Number of slots of the super-block.
        slot_count: usize,
    },
    /// An in-block free-list link points outside the super-block.
    LinkOutOfRange {
        /// The offending slot index.
        index: usize,
        /// Number of slots of the super-block.
        slot_count: usize,
    },
    /// The in-block free list visits a slot twice.
    LinkRevisited {
        /// The revisited slot index.
        index: usize,
    },
}

impl fmt::Display for ConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyError::ActiveNotPartial => {
                write!(f, "active descriptor is not partial")
            }
            ConsistencyError::ListedFull => {
                write!(f, "full descriptor published on the partial list")
            }
            ConsistencyError::DescriptorInPool => {
                write!(f, "reachable descriptor is also in the free pool")
            }
            ConsistencyError::SlotSizeMismatch { descriptor, class } => {
                write!(f, "descriptor serves {}-byte slots in a {}-byte size class", descriptor, class)
            }
            ConsistencyError::CountStateMismatch { count, slot_count } => {
                write!(f, "free count {} of {} slots contradicts the descriptor state", count, slot_count)
            }
            ConsistencyError::LinkOutOfRange { index, slot_count } => {
                write!(f, "free-list link {} outside the {} slots of its super-block", index, slot_count)
            }
            ConsistencyError::LinkRevisited { index } => {
                write!(f, "free list visits slot {} twice", index)
            }
        }
    }
}
