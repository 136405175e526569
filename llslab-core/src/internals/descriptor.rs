//! Descriptor
//!
//! One descriptor controls one super-block: it records the block's slot geometry, its owning heap, and the anchor
//! word through which all occupancy changes are committed.
//!
//! Descriptor records are carved in batches, recycled through a free pool, and never returned to the platform while
//! the domain lives. A record travels through at most one intrusive list at a time (the free pool, a size class's
//! partial list, or the reclamation list), all linked through the same `next` word.

use core::{
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering},
};

use crate::internals::anchor::{Anchor, AtomicAnchor, State};
use crate::internals::atomic::AtomicPtr;
use crate::internals::hazard::HazardPointer;

/// Operation to run on a retired descriptor once no hazard pointer covers it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum DeferredOp {
    /// Hand the record back to the descriptor free pool.
    ReturnToPool,
    /// Publish the descriptor on its size class's partial list.
    PublishPartial,
}

impl DeferredOp {
    fn from_bits(bits: u8) -> DeferredOp {
        if bits == 0 { DeferredOp::ReturnToPool } else { DeferredOp::PublishPartial }
    }

    fn into_bits(self) -> u8 {
        match self {
            DeferredOp::ReturnToPool => 0,
            DeferredOp::PublishPartial => 1,
        }
    }
}

/// Control record of one super-block.
#[repr(C)]
pub(crate) struct Descriptor {
    //  Intrusive link; the record sits on at most one list at a time.
    next: AtomicPtr<Descriptor>,
    anchor: AtomicAnchor,
    //  The owning `Heap`, type-erased.
    owner: AtomicPtr<()>,
    //  Payload base of the super-block, one header past the mapped region.
    super_block: AtomicPtr<u8>,
    slot_size: AtomicU32,
    slot_count: AtomicU32,
    //  What to do with the record once hazards drain.
    deferred: AtomicU8,
    //  Debug aid only; not a synchronization primitive.
    in_use: AtomicBool,
}

impl Descriptor {
    /// Creates a blank record.
    pub(crate) fn new() -> Descriptor {
        Descriptor {
            next: AtomicPtr::new(),
            anchor: AtomicAnchor::new(Anchor::new(0, 0, State::Empty, 0)),
            owner: AtomicPtr::new(),
            super_block: AtomicPtr::new(),
            slot_size: AtomicU32::new(0),
            slot_count: AtomicU32::new(0),
            deferred: AtomicU8::new(0),
            in_use: AtomicBool::new(false),
        }
    }

    /// Pairs the record with a freshly carved super-block.
    ///
    /// #   Safety
    ///
    /// -   Assumes the record is privately held: popped from the pool and not yet published.
    pub(crate) unsafe fn prepare(
        &self,
        owner: NonNull<()>,
        super_block: NonNull<u8>,
        slot_size: u32,
        slot_count: u32,
        anchor: Anchor,
    ) {
        self.owner.store(Some(owner));
        self.super_block.store(Some(super_block));
        self.slot_size.store(slot_size, Ordering::Release);
        self.slot_count.store(slot_count, Ordering::Release);
        self.anchor.store(anchor);
    }

    pub(crate) fn anchor(&self) -> &AtomicAnchor { &self.anchor }

    pub(crate) fn next(&self) -> &AtomicPtr<Descriptor> { &self.next }

    pub(crate) fn owner(&self) -> Option<NonNull<()>> { self.owner.load() }

    pub(crate) fn super_block(&self) -> Option<NonNull<u8>> { self.super_block.load() }

    pub(crate) fn slot_size(&self) -> u32 { self.slot_size.load(Ordering::Acquire) }

    pub(crate) fn slot_count(&self) -> u32 { self.slot_count.load(Ordering::Acquire) }

    pub(crate) fn set_deferred(&self, op: DeferredOp) { self.deferred.store(op.into_bits(), Ordering::Relaxed) }

    pub(crate) fn deferred(&self) -> DeferredOp { DeferredOp::from_bits(self.deferred.load(Ordering::Relaxed)) }

    /// Flags the record as checked out of the pool.
    pub(crate) fn mark_in_use(&self) {
        let was = self.in_use.swap(true, Ordering::Relaxed);
        debug_assert!(!was);
    }

    /// Flags the record as no longer backing a live super-block.
    pub(crate) fn mark_idle(&self) {
        let was = self.in_use.swap(false, Ordering::Relaxed);
        debug_assert!(was);
    }

    pub(crate) fn is_in_use(&self) -> bool { self.in_use.load(Ordering::Relaxed) }
}

/// Intrusive lock-free LIFO of descriptors.
///
/// The structure backs the partial lists, the descriptor free pool, and the reclamation list. Popping is protected by
/// a hazard pointer; pushing a descriptor that a concurrent popper may still cover must instead go through the hazard
/// domain's deferral, otherwise the popper could commit a stale `next` link.
pub(crate) struct DescriptorStack(AtomicPtr<Descriptor>);

impl DescriptorStack {
    /// Creates an empty stack.
    pub(crate) const fn new() -> DescriptorStack { DescriptorStack(AtomicPtr::new()) }

    /// Pushes a descriptor on top.
    ///
    /// The descriptor must not be reachable by any concurrent popper of this or any other stack.
    pub(crate) fn push(&self, descriptor: NonNull<Descriptor>) {
        //  Safety:
        //  -   `descriptor` points to a valid record, and the lifetime is bounded.
        let link = unsafe { descriptor.as_ref() }.next();

        debug_assert!(link.load().is_none());

        let mut head = self.0.load();

        loop {
            link.store(head);

            match self.0.compare_exchange(head, Some(descriptor)) {
                Ok(()) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Installs a pre-linked chain, if and only if the stack is currently empty.
    pub(crate) fn install(&self, first: NonNull<Descriptor>) -> bool {
        self.0.compare_exchange(None, Some(first)).is_ok()
    }

    /// Pops the top descriptor, if any.
    ///
    /// The returned descriptor is exclusively owned by the caller and its link word is reset.
    pub(crate) fn pop(&self, hazard: &HazardPointer) -> Option<NonNull<Descriptor>> {
        loop {
            let Some(head) = hazard.protect(&self.0) else { return None };

            //  Safety:
            //  -   The hazard keeps `head` from being recycled, so the record stays readable.
            let next = unsafe { head.as_ref() }.next().load();

            //  The hazard also keeps `head` from re-entering the stack, so success here proves `next` is not stale.
            if self.0.compare_exchange(Some(head), next).is_ok() {
                hazard.clear();

                //  Safety:
                //  -   `head` is now exclusively owned.
                unsafe { head.as_ref() }.next().store(None);

                return Some(head);
            }
        }
    }

    /// Detaches the whole chain, returning its head.
    pub(crate) fn take_all(&self) -> Option<NonNull<Descriptor>> { self.0.swap(None) }

    /// Walks the stack without detaching anything.
    ///
    /// #   Safety
    ///
    /// -   Assumes no concurrent pushes or pops; only meaningful on a quiescent domain.
    pub(crate) unsafe fn iter(&self) -> DescriptorIter { DescriptorIter(self.0.load()) }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool { self.0.load().is_none() }
}

/// Read-only cursor over a quiescent stack.
pub(crate) struct DescriptorIter(Option<NonNull<Descriptor>>);

impl Iterator for DescriptorIter {
    type Item = NonNull<Descriptor>;

    fn next(&mut self) -> Option<NonNull<Descriptor>> {
        let current = self.0?;

        //  Safety:
        //  -   The stack is quiescent, per the contract of `DescriptorStack::iter`.
        self.0 = unsafe { current.as_ref() }.next().load();

        Some(current)
    }
}

#[cfg(test)]
mod tests {

use std::vec::Vec;

use llslab_test::LockstepBuilder;

use super::*;

fn descriptors(count: usize) -> Vec<Descriptor> {
    (0..count).map(|_| Descriptor::new()).collect()
}

#[test]
fn stack_push_pop_is_lifo() {
    let store = descriptors(3);
    let hazard = HazardPointer::new();

    let stack = DescriptorStack::new();
    assert!(stack.is_empty());
    assert_eq!(None, stack.pop(&hazard));

    for descriptor in &store {
        stack.push(NonNull::from(descriptor));
    }

    assert_eq!(Some(NonNull::from(&store[2])), stack.pop(&hazard));
    assert_eq!(Some(NonNull::from(&store[1])), stack.pop(&hazard));

    //  The link word of a popped descriptor is reset, ready for the next list.
    assert!(store[2].next().load().is_none());

    assert_eq!(Some(NonNull::from(&store[0])), stack.pop(&hazard));
    assert_eq!(None, stack.pop(&hazard));
    assert!(stack.is_empty());
}

#[test]
fn stack_install_requires_empty() {
    let store = descriptors(2);
    let hazard = HazardPointer::new();

    let stack = DescriptorStack::new();
    assert!(stack.install(NonNull::from(&store[0])));
    assert!(!stack.install(NonNull::from(&store[1])));

    assert_eq!(Some(NonNull::from(&store[0])), stack.pop(&hazard));
}

#[test]
fn stack_iter_walks_in_order() {
    let store = descriptors(3);

    let stack = DescriptorStack::new();
    for descriptor in &store {
        stack.push(NonNull::from(descriptor));
    }

    let walked: Vec<_> = unsafe { stack.iter() }.collect();
    let expected: Vec<_> = store.iter().rev().map(NonNull::from).collect();

    assert_eq!(expected, walked);
}

#[test]
fn stack_concurrent_push_pop_fuzzing() {
    //  Each thread pushes its own descriptor then pops some descriptor; after both steps ran everywhere, the stack
    //  must be empty again and every pop must have produced a record.
    struct Local {
        descriptor: NonNull<Descriptor>,
        hazard: HazardPointer,
    }

    //  Safety:
    //  -   Each Local owns its descriptor exclusively between iterations.
    unsafe impl Send for Local {}

    let store = std::boxed::Box::leak(descriptors(4).into_boxed_slice());

    let locals: Vec<_> = store
        .iter()
        .map(|descriptor| Local { descriptor: NonNull::from(descriptor), hazard: HazardPointer::new() })
        .collect();

    let mut builder = LockstepBuilder::new(DescriptorStack::new(), locals);

    builder.step(|| |stack: &DescriptorStack, local: &mut Local| {
        stack.push(local.descriptor);
    });

    builder.step(|| |stack: &DescriptorStack, local: &mut Local| {
        local.descriptor = stack.pop(&local.hazard).expect("one descriptor per pusher");
    });

    builder.step(|| |stack: &DescriptorStack, local: &mut Local| {
        assert_eq!(None, stack.pop(&local.hazard));
    });

    builder.launch(100).join();
}

} // mod tests
