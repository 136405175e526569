//! Heap
//!
//! A heap is an allocation endpoint bound to one size class. Its single piece of state is the *active* descriptor
//! slot: a one-slot, mutex-free hand-off. Whoever atomically swaps the slot to null privately owns the descriptor and
//! may run the allocation step on it; everyone else falls back to the class's partial list.
//!
//! Several heaps may share a size class to spread contention on the active slot.

use crate::{Configuration, SizeClass};
use crate::internals::atomic::AtomicPtr;
use crate::internals::descriptor::Descriptor;

/// An allocation endpoint over a size class.
pub struct Heap<'a, C> {
    size_class: &'a SizeClass<C>,
    active: AtomicPtr<Descriptor>,
}

impl<'a, C> Heap<'a, C>
where
    C: Configuration,
{
    /// Creates a heap drawing from `size_class`.
    pub fn new(size_class: &'a SizeClass<C>) -> Heap<'a, C> {
        Heap { size_class, active: AtomicPtr::new() }
    }

    /// Returns the size class this heap draws from.
    pub fn size_class(&self) -> &SizeClass<C> { self.size_class }

    pub(crate) fn active(&self) -> &AtomicPtr<Descriptor> { &self.active }

    //  Type-erased self-pointer, stored in descriptors so the release path can find its way back.
    pub(crate) fn as_owner(&self) -> *mut () { self as *const Self as *mut () }
}

#[cfg(test)]
mod tests {

use crate::PowerOf2;

use super::*;

struct TestConfiguration;

impl Configuration for TestConfiguration {
    const SUPER_BLOCK_SIZE: PowerOf2 = unsafe { PowerOf2::new_unchecked(16384) };
}

#[test]
fn new_heap_has_no_active_descriptor() {
    let size_class = SizeClass::<TestConfiguration>::new(64).unwrap();
    let heap = Heap::new(&size_class);

    assert!(heap.active().load().is_none());
    assert_eq!(64, heap.size_class().slot_size());
}

} // mod tests
