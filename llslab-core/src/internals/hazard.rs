//! Hazard pointers
//!
//! Descriptor records are recycled, so a thread about to compare-exchange on a descriptor it fished out of a shared
//! location must keep the record from being handed to a new super-block under its feet. Each registered thread owns a
//! record of hazard slots; publishing a pointer in a slot blocks the deferred reclamation of its pointee until the
//! slot is cleared.
//!
//! Retired descriptors accumulate on a domain-wide list together with the operation to run on them, pool
//! re-insertion or partial-list publication, and a sweep executes every operation whose target no slot covers.

use core::{
    ptr::{self, NonNull},
    sync::atomic::{self, AtomicBool, AtomicUsize, Ordering},
};

use crate::internals::atomic::AtomicPtr;
use crate::internals::descriptor::{DeferredOp, Descriptor, DescriptorStack};

/// Number of thread registrations a domain can serve.
pub(crate) const MAX_THREADS: usize = 128;

/// Number of hazard slots per registered thread.
pub(crate) const POINTERS_PER_THREAD: usize = 2;

//  Pending retirements beyond which the next retirement triggers a sweep.
const SWEEP_THRESHOLD: usize = 32;

/// A single hazard slot.
pub(crate) struct HazardPointer(atomic::AtomicPtr<()>);

impl HazardPointer {
    /// Creates a clear slot.
    pub(crate) const fn new() -> HazardPointer { HazardPointer(atomic::AtomicPtr::new(ptr::null_mut())) }

    /// Reads `source` and publishes the value as hazardous.
    ///
    /// On return the pointee, if any, is guaranteed not to be reclaimed until the slot is cleared or overwritten:
    /// the value was still reachable through `source` after the publication became visible.
    pub(crate) fn protect<T>(&self, source: &AtomicPtr<T>) -> Option<NonNull<T>> {
        loop {
            let candidate = source.load();

            self.0.store(as_raw(candidate), Ordering::SeqCst);
            atomic::fence(Ordering::SeqCst);

            if source.load() == candidate {
                return candidate;
            }
        }
    }

    /// Releases the protection.
    pub(crate) fn clear(&self) { self.0.store(ptr::null_mut(), Ordering::Release) }

    fn get(&self) -> *mut () { self.0.load(Ordering::SeqCst) }
}

/// Hazard slots of one registered thread.
pub(crate) struct HazardRecord {
    pointers: [HazardPointer; POINTERS_PER_THREAD],
    claimed: AtomicBool,
}

impl HazardRecord {
    const UNCLAIMED: HazardRecord = HazardRecord {
        pointers: [HazardPointer::new(), HazardPointer::new()],
        claimed: AtomicBool::new(false),
    };

    /// Returns the hazard slot at `index`.
    pub(crate) fn pointer(&self, index: usize) -> &HazardPointer { &self.pointers[index] }
}

/// Domain-wide hazard table and reclamation list.
pub(crate) struct HazardDomain {
    records: [HazardRecord; MAX_THREADS],
    pending: DescriptorStack,
    pending_count: AtomicUsize,
}

impl HazardDomain {
    /// Creates a domain with every record unclaimed.
    pub(crate) const fn new() -> HazardDomain {
        HazardDomain {
            records: [HazardRecord::UNCLAIMED; MAX_THREADS],
            pending: DescriptorStack::new(),
            pending_count: AtomicUsize::new(0),
        }
    }

    /// Claims a hazard record for the calling thread; None once all records are taken.
    pub(crate) fn claim_record(&self) -> Option<NonNull<HazardRecord>> {
        for record in &self.records {
            if record
                .claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(NonNull::from(record));
            }
        }

        None
    }

    /// Returns a record, making it claimable again.
    ///
    /// #   Safety
    ///
    /// -   Assumes `record` was claimed from `self` and is no longer used by its thread.
    pub(crate) unsafe fn release_record(&self, record: NonNull<HazardRecord>) {
        let record = record.as_ref();

        for pointer in &record.pointers {
            pointer.clear();
        }

        let was = record.claimed.swap(false, Ordering::AcqRel);
        debug_assert!(was);
    }

    /// Queues a descriptor for deferred processing.
    ///
    /// Returns true when enough retirements accumulated for a sweep to be worthwhile.
    ///
    /// The descriptor must already be unlinked from every shared location: nothing may hand out new references to it
    /// while it sits on the reclamation list.
    pub(crate) fn retire(&self, descriptor: NonNull<Descriptor>, op: DeferredOp) -> bool {
        //  Safety:
        //  -   `descriptor` points to a valid record, and the lifetime is bounded.
        unsafe { descriptor.as_ref() }.set_deferred(op);

        self.pending.push(descriptor);

        self.pending_count.fetch_add(1, Ordering::Relaxed) + 1 >= SWEEP_THRESHOLD
    }

    /// Detaches the reclamation list and splits off every descriptor no hazard slot covers.
    ///
    /// Covered descriptors are re-queued; the rest are returned, unlinked, ready for their deferred operation.
    pub(crate) fn sweep(&self) -> ReclaimChain {
        let mut pending = self.pending.take_all();
        let mut reclaimable = None;

        //  Order matters: the list was detached before the slots are scanned, so a slot published after the scan can
        //  only refer to a descriptor that was no longer reachable, which registration forbids.
        atomic::fence(Ordering::SeqCst);

        while let Some(descriptor) = pending {
            //  Safety:
            //  -   Descriptors on the reclamation list are exclusively owned by the detacher.
            let record = unsafe { descriptor.as_ref() };

            pending = record.next().load();

            if self.is_covered(descriptor.cast()) {
                record.next().store(None);
                self.pending.push(descriptor);
            } else {
                record.next().store(reclaimable);
                reclaimable = Some(descriptor);
            }
        }

        //  The count only throttles sweeps; resetting it outside the detach window is good enough.
        self.pending_count.store(0, Ordering::Relaxed);

        ReclaimChain(reclaimable)
    }

    /// Returns whether no hazard slot currently covers `target`.
    ///
    /// Only meaningful for a pointer already unlinked from every shared location: for those, new coverage cannot
    /// form, so a clear scan stays clear.
    pub(crate) fn is_clear(&self, target: NonNull<()>) -> bool {
        atomic::fence(Ordering::SeqCst);

        !self.is_covered(target)
    }

    fn is_covered(&self, target: NonNull<()>) -> bool {
        for record in &self.records {
            for pointer in &record.pointers {
                if pointer.get() == target.as_ptr() {
                    return true;
                }
            }
        }

        false
    }
}

/// Chain of descriptors cleared for reclamation.
pub(crate) struct ReclaimChain(Option<NonNull<Descriptor>>);

impl Iterator for ReclaimChain {
    type Item = (NonNull<Descriptor>, DeferredOp);

    fn next(&mut self) -> Option<(NonNull<Descriptor>, DeferredOp)> {
        let descriptor = self.0?;

        //  Safety:
        //  -   Chained descriptors are exclusively owned by the chain.
        let record = unsafe { descriptor.as_ref() };

        self.0 = record.next().load();
        record.next().store(None);

        Some((descriptor, record.deferred()))
    }
}

//
//  Implementation
//

fn as_raw<T>(ptr: Option<NonNull<T>>) -> *mut () {
    ptr.map(|p| p.as_ptr() as *mut ()).unwrap_or_else(ptr::null_mut)
}

// mod tests
