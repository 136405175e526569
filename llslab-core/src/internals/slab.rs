//! Slab
//!
//! The slab ties the pieces together: it owns the platform, the descriptor pool, and the hazard table, and runs the
//! allocation and release protocols over heaps and size classes.
//!
//! Both protocols funnel every super-block state change through the anchor compare-exchange; the code here only
//! decides where descriptors travel around those updates: the active slot, the partial list, or retirement.


use core::{alloc::Layout, marker::PhantomData, ptr::NonNull};

use crate::{Configuration, Heap, Platform, SizeClass, ThreadHandle};
use crate::internals::anchor::{Anchor, State};
use crate::internals::descriptor::{DeferredOp, Descriptor};
use crate::internals::hazard::HazardDomain;
use crate::internals::pool::DescriptorPool;
use crate::internals::super_block;

//  Hazard slot assignment: partial-list pops use slot 0, descriptor-pool pops use slot 1.
pub(crate) const PARTIAL_HAZARD: usize = 0;
pub(crate) const POOL_HAZARD: usize = 1;

//  Number of non-empty descriptors the cooperative cleanup re-publishes before giving up. A throttle, not an
//  invariant: it merely bounds how much of the partial list a single release walks.
const PURGE_KEEP: usize = 2;

/// The state shared by every heap of a domain.
pub(crate) struct Slab<C, P> {
    platform: P,
    pool: DescriptorPool,
    hazard: HazardDomain,
    _configuration: PhantomData<*const C>,
}

//  Safety:
//  -   The PhantomData only pins the configuration type; everything else is thread-safe by construction.
unsafe impl<C, P: Send> Send for Slab<C, P> {}
unsafe impl<C, P: Sync> Sync for Slab<C, P> {}

impl<C, P> Slab<C, P> {
    /// Creates a slab over the given platform.
    pub(crate) const fn new(platform: P) -> Slab<C, P> {
        Slab {
            platform,
            pool: DescriptorPool::new(),
            hazard: HazardDomain::new(),
            _configuration: PhantomData,
        }
    }

    pub(crate) fn platform(&self) -> &P { &self.platform }

    pub(crate) fn hazard(&self) -> &HazardDomain { &self.hazard }

    pub(crate) fn pool(&self) -> &DescriptorPool { &self.pool }
}

impl<C, P> Slab<C, P>
where
    C: Configuration,
    P: Platform,
{
    /// Produces one free slot of the heap's size class.
    ///
    /// Returns None only when the platform is out of memory; contention is retried internally.
    ///
    /// #   Safety
    ///
    /// -   Assumes `heap` and `thread` are used with this slab only.
    /// -   Assumes `heap` stays at a stable address for as long as its allocations live.
    pub(crate) unsafe fn allocate(&self, heap: &Heap<'_, C>, thread: &ThreadHandle<'_>) -> Option<NonNull<u8>> {
        loop {
            if let Some(slot) = self.allocate_reused(heap, thread) {
                return Some(slot);
            }

            match self.allocate_fresh(heap, thread) {
                Fresh::Slot(slot) => return Some(slot),
                //  Another thread installed a fresh super-block first; use theirs.
                Fresh::Lost => continue,
                Fresh::OutOfMemory => return None,
            }
        }
    }

    /// Returns a slot to its super-block.
    ///
    /// #   Safety
    ///
    /// -   Assumes `ptr` was returned by `allocate` on this slab and has not been released since.
    /// -   Assumes the memory behind `ptr` is no longer in use.
    pub(crate) unsafe fn deallocate(&self, ptr: NonNull<u8>, thread: &ThreadHandle<'_>) {
        let descriptor = super_block::descriptor_of::<C>(ptr);

        //  Safety:
        //  -   The descriptor of a live slot stays valid until every slot of its super-block is released.
        let record = descriptor.as_ref();

        let payload = record.super_block().expect("live descriptors are paired with a super-block");
        let slot_size = record.slot_size();
        let slot_count = record.slot_count();

        debug_assert!(
            super_block::region_of::<C>(payload).as_ptr() as usize
                == C::SUPER_BLOCK_SIZE.round_down(ptr.as_ptr() as usize)
        );

        let slot = super_block::slot_index(payload, ptr, slot_size);
        debug_assert!(slot < slot_count);

        //  Captured ahead of the committing exchange: right after it, a racing claimer may retire the record and
        //  pair it with another heap.
        let heap = heap_of::<C>(record.owner().expect("live descriptors have an owner"));

        let mut current;
        let mut updated;

        loop {
            current = record.anchor().load();

            //  Thread the slot onto the free list; re-done on every retry since the head may have moved.
            super_block::write_link(payload, slot, slot_size, current.avail());

            updated = current.released(slot, slot_count);

            if record.anchor().compare_exchange(current, updated).is_ok() {
                break;
            }
        }

        if updated.state() == State::Empty {
            self.dispose_empty(heap, descriptor, current.state(), thread);
        } else if current.state() == State::Full {
            //  The super-block was unreachable while full; someone has to re-publish it.
            debug_assert!(updated.state() == State::Partial);

            self.reinstall_active(heap, descriptor);
        }
    }

    /// Runs every deferred descriptor operation whose target is no longer hazardous.
    ///
    /// Returns the number of descriptors processed.
    pub(crate) fn reclaim(&self) -> usize {
        let mut processed = 0;

        for (descriptor, op) in self.hazard.sweep() {
            self.run_deferred(descriptor, op);
            processed += 1;
        }

        processed
    }

    //  Internal; executes a descriptor's deferred operation.
    fn run_deferred(&self, descriptor: NonNull<Descriptor>, op: DeferredOp) {
        match op {
            DeferredOp::ReturnToPool => self.pool.release(descriptor),
            DeferredOp::PublishPartial => {
                //  Safety:
                //  -   The descriptor is exclusively owned by the caller.
                let owner = unsafe { descriptor.as_ref() }.owner();

                //  Safety:
                //  -   Live descriptors point back to a live heap.
                let heap = unsafe { heap_of::<C>(owner.expect("published descriptors have an owner")) };

                heap.size_class().partial().push(descriptor);
            }
        }
    }

    //  Internal; allocates from the active descriptor, or from the partial list.
    //
    //  Returns None when both are dry and a fresh super-block is called for.
    unsafe fn allocate_reused(&self, heap: &Heap<'_, C>, thread: &ThreadHandle<'_>) -> Option<NonNull<u8>> {
        loop {
            let descriptor = match heap.active().swap(None) {
                Some(descriptor) => descriptor,
                None => self.pop_partial(heap.size_class(), thread)?,
            };

            //  The descriptor is privately owned from here to re-publication.

            match self.allocate_slot(descriptor) {
                Some((slot, State::Partial)) => {
                    //  Still has free slots: back into the active slot, or onto the partial list.
                    self.reinstall_active(heap, descriptor);

                    return Some(slot);
                }
                Some((slot, _)) => return Some(slot),
                None => {
                    //  Drained by a racing release before we could claim a slot; only the private owner may free it.
                    self.retire_descriptor(descriptor);
                }
            }
        }
    }

    //  Internal; the anchor allocation step.
    //
    //  Returns the claimed slot and the post-update state, or None if the super-block drained.
    unsafe fn allocate_slot(&self, descriptor: NonNull<Descriptor>) -> Option<(NonNull<u8>, State)> {
        let record = descriptor.as_ref();

        let payload = record.super_block().expect("live descriptors are paired with a super-block");
        let slot_size = record.slot_size();

        loop {
            let current = record.anchor().load();

            if current.state() == State::Empty {
                return None;
            }

            debug_assert!(current.state() == State::Partial);
            debug_assert!(current.count() > 0);

            let head = current.avail();
            debug_assert!(head < record.slot_count());

            //  The link is only meaningful while other free slots remain; the terminal link is never read.
            let next = if current.count() == 1 {
                0
            } else {
                let next = super_block::read_link(payload, head, slot_size);
                debug_assert!(next < record.slot_count());
                next
            };

            let updated = current.allocated(next);

            if record.anchor().compare_exchange(current, updated).is_ok() {
                let slot = super_block::slot(payload, head, slot_size);
                return Some((slot, updated.state()));
            }
        }
    }

    //  Internal; carves a fresh super-block and installs it as the heap's active descriptor.
    unsafe fn allocate_fresh(&self, heap: &Heap<'_, C>, thread: &ThreadHandle<'_>) -> Fresh {
        let Some(descriptor) = self.pool.acquire(&self.platform, thread.hazard(POOL_HAZARD)) else {
            return Fresh::OutOfMemory;
        };

        let Some(region) = self.platform.allocate(Self::super_block_layout()) else {
            self.discard_descriptor(descriptor);
            return Fresh::OutOfMemory;
        };

        let payload = super_block::format::<C>(region, descriptor);

        let size_class = heap.size_class();
        let slot_size = size_class.slot_size() as u32;
        let slot_count = size_class.slot_count() as u32;

        super_block::carve::<C>(payload, slot_size, slot_count);

        //  Slot 0 goes straight to the caller.
        let state = if slot_count == 1 { State::Full } else { State::Partial };
        let avail = if slot_count == 1 { 0 } else { 1 };
        let anchor = Anchor::new(avail, slot_count - 1, state, 0);

        let owner = NonNull::new_unchecked(heap.as_owner());
        descriptor.as_ref().prepare(owner, payload, slot_size, slot_count, anchor);

        //  A one-slot block is born full: it is never installed, and its release retires it.
        if slot_count == 1 {
            return Fresh::Slot(payload);
        }

        if heap.active().compare_exchange(None, Some(descriptor)).is_ok() {
            Fresh::Slot(payload)
        } else {
            descriptor.as_ref().anchor().store(anchor.drained());
            self.retire_descriptor(descriptor);
            Fresh::Lost
        }
    }

    //  Internal; hands a non-full descriptor back: into the heap's active slot, or onto the partial list.
    //
    //  A release may drain the super-block right before the install and find nothing to claim out of the active
    //  slot; re-checking after the install picks the drained descriptor back up instead of stranding it.
    unsafe fn reinstall_active(&self, heap: &Heap<'_, C>, descriptor: NonNull<Descriptor>) {
        if heap.active().compare_exchange(None, Some(descriptor)).is_err() {
            self.publish_partial(descriptor);
            return;
        }

        if descriptor.as_ref().anchor().load().state() == State::Empty
            && heap.active().compare_exchange(Some(descriptor), None).is_ok()
        {
            self.retire_descriptor(descriptor);
        }
    }

    //  Internal; pops the first non-empty descriptor off the class's partial list, retiring drained ones.
    fn pop_partial(&self, size_class: &SizeClass<C>, thread: &ThreadHandle<'_>) -> Option<NonNull<Descriptor>> {
        loop {
            let descriptor = size_class.partial().pop(thread.hazard(PARTIAL_HAZARD))?;

            //  Safety:
            //  -   A popped descriptor is exclusively owned.
            if unsafe { descriptor.as_ref() }.anchor().load().state() != State::Empty {
                return Some(descriptor);
            }

            self.retire_descriptor(descriptor);
        }
    }

    //  Internal; routes a drained descriptor toward retirement.
    //
    //  `previous` is the state the final release transitioned away from.
    unsafe fn dispose_empty(
        &self,
        heap: &Heap<'_, C>,
        descriptor: NonNull<Descriptor>,
        previous: State,
        thread: &ThreadHandle<'_>,
    ) {
        debug_assert!(previous != State::Empty);

        if heap.active().compare_exchange(Some(descriptor), None).is_ok() {
            //  It was the active descriptor; claiming it out grants ownership.
            self.retire_descriptor(descriptor);
        } else if previous == State::Full {
            //  A full super-block is referenced by no shared structure: the releaser owns it outright.
            self.retire_descriptor(descriptor);
        } else {
            //  Someone else holds it and will notice the drain; help by weeding out drained descriptors that pile
            //  up on the partial list meanwhile.
            self.purge_empty(heap.size_class(), thread);
        }
    }

    //  Internal; pops descriptors off the partial list, retiring drained ones, until `PURGE_KEEP` healthy ones
    //  were seen and re-published.
    fn purge_empty(&self, size_class: &SizeClass<C>, thread: &ThreadHandle<'_>) {
        let mut kept = 0;

        while kept < PURGE_KEEP {
            let Some(descriptor) = size_class.partial().pop(thread.hazard(PARTIAL_HAZARD)) else { return };

            //  Safety:
            //  -   A popped descriptor is exclusively owned.
            if unsafe { descriptor.as_ref() }.anchor().load().state() == State::Empty {
                self.retire_descriptor(descriptor);
            } else {
                debug_assert!({
                    //  Safety:
                    //  -   Partial-listed descriptors belong to a heap of this class.
                    let heap = unsafe { heap_of::<C>(descriptor.as_ref().owner().expect("owned")) };
                    core::ptr::eq(heap.size_class(), size_class)
                });

                self.publish_partial(descriptor);
                kept += 1;
            }
        }
    }

    //  Internal; returns the super-block to the platform and schedules the record for pool re-insertion.
    fn retire_descriptor(&self, descriptor: NonNull<Descriptor>) {
        //  Safety:
        //  -   The caller exclusively owns the descriptor.
        let record = unsafe { descriptor.as_ref() };

        debug_assert!(record.anchor().load().state() == State::Empty);

        record.mark_idle();

        let payload = record.super_block().expect("retired descriptors still reference their super-block");

        //  Safety:
        //  -   `payload` was produced by `format` on a region of `super_block_layout`.
        //  -   Every slot is free, so nothing references the region anymore.
        unsafe {
            let region = super_block::region_of::<C>(payload);
            self.platform.deallocate(region, Self::super_block_layout());
        }

        self.defer(descriptor, DeferredOp::ReturnToPool);
    }

    //  Internal; schedules a record that never got a super-block back to the pool.
    fn discard_descriptor(&self, descriptor: NonNull<Descriptor>) {
        //  Safety:
        //  -   The caller exclusively owns the descriptor.
        let record = unsafe { descriptor.as_ref() };

        record.anchor().store(Anchor::new(0, 0, State::Empty, 0));
        record.mark_idle();

        self.defer(descriptor, DeferredOp::ReturnToPool);
    }

    //  Internal; schedules a descriptor for publication on its class's partial list.
    fn publish_partial(&self, descriptor: NonNull<Descriptor>) {
        //  Safety:
        //  -   The caller exclusively owns the descriptor.
        debug_assert!(unsafe { descriptor.as_ref() }.anchor().load().state() != State::Full);

        self.defer(descriptor, DeferredOp::PublishPartial);
    }

    //  Internal; runs the operation right away when no hazard slot covers the descriptor, and queues it otherwise.
    //
    //  The descriptor is already unreachable, so no new hazard can form: a clear scan is final.
    fn defer(&self, descriptor: NonNull<Descriptor>, op: DeferredOp) {
        if self.hazard.is_clear(descriptor.cast()) {
            self.run_deferred(descriptor, op);
        } else if self.hazard.retire(descriptor, op) {
            self.reclaim();
        }
    }

    fn super_block_layout() -> Layout {
        //  Safety:
        //  -   The super-block size is a power of 2, and trivially a multiple of itself.
        unsafe { Layout::from_size_align_unchecked(C::SUPER_BLOCK_SIZE.value(), C::SUPER_BLOCK_SIZE.value()) }
    }
}

//  Reconstructs the heap behind the type-erased owner pointer of a descriptor.
//
//  #   Safety
//
//  -   Assumes `owner` was produced by `Heap::as_owner` on a heap that is still live.
pub(crate) unsafe fn heap_of<'x, C>(owner: NonNull<()>) -> &'x Heap<'x, C> {
    &*(owner.as_ptr() as *const Heap<'x, C>)
}

enum Fresh {
    /// Slot 0 of a freshly carved super-block.
    Slot(NonNull<u8>),
    /// A racing thread installed its super-block first; the fresh one was rolled back.
    Lost,
    OutOfMemory,
}
