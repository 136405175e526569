//! Allocator

use core::ptr::NonNull;

use llslab_core::{ConsistencyError, Domain, Heap, Properties, SizeClass, SizeClassError, ThreadHandle};

use crate::{LLConfiguration, LLPlatform};

/// A lock-free pool of fixed-size slots, carved out of 16 KiB super-blocks.
///
/// All instances share one process-wide domain: descriptor records, hazard slots, and reclamation are pooled.
/// Threads are registered with the domain transparently, on their first allocator call; the domain serves up to 128
/// concurrently live threads, and a call from a thread beyond that panics.
///
/// The size class and heap behind an instance are allocated for the life of the process; create one `LLSlab` per
/// slot size and share it, rather than creating them in a loop.
pub struct LLSlab {
    heap: &'static Heap<'static, LLConfiguration>,
}

impl LLSlab {
    /// Creates a pool serving `slot_size`-byte slots.
    ///
    /// The size must be a multiple of 4, no smaller than 16 bytes, and no larger than the 8184-byte small-object
    /// limit; route bigger objects to a dedicated large-object path.
    pub fn new(slot_size: usize) -> Result<LLSlab, SizeClassError> {
        if slot_size > Properties::<LLConfiguration>::small_object_limit() {
            return Err(SizeClassError::TooLarge);
        }

        let size_class = Box::leak(Box::new(SizeClass::new(slot_size)?));
        let heap = Box::leak(Box::new(Heap::new(size_class)));

        Ok(LLSlab { heap })
    }

    /// Returns the slot size served by this pool.
    pub fn slot_size(&self) -> usize { self.heap.size_class().slot_size() }

    /// Registers the calling thread with the domain ahead of its first allocation.
    ///
    /// Returns Err if the domain's registration capacity is exhausted.
    #[cold]
    pub fn warm_up(&self) -> Result<(), ()> {
        THREAD.with(|guard| guard.0.as_ref().map(|_| ()).ok_or(()))
    }

    /// Returns a pointer to `slot_size` uninitialized bytes.
    ///
    /// Returns None when the system is out of memory. Thread-safe and lock-free.
    pub fn allocate(&self) -> Option<NonNull<u8>> {
        with_thread(|thread| unsafe { DOMAIN.allocate(self.heap, thread) })
    }

    /// Returns a slot to the pool.
    ///
    /// Any thread may release a slot, not only the allocating one.
    ///
    /// #   Safety
    ///
    /// -   Assumes `ptr` was returned by `allocate` on this pool and has not been released since.
    /// -   Assumes the memory behind `ptr` is no longer in use.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        with_thread(|thread| DOMAIN.deallocate(ptr, thread))
    }

    /// Forces a pass of deferred descriptor reclamation, returning the number of records processed.
    pub fn reclaim(&self) -> usize { DOMAIN.reclaim() }

    /// Audits the pool's descriptors against the allocator's structural invariants.
    ///
    /// #   Safety
    ///
    /// -   Assumes no thread concurrently allocates or deallocates, on any pool of the process.
    pub unsafe fn check_consistency(&self) -> Result<(), ConsistencyError> {
        DOMAIN.check_consistency(self.heap)
    }
}

//
//  Implementation
//

static DOMAIN: Domain<LLConfiguration, LLPlatform> = Domain::new(LLPlatform::new());

std::thread_local! {
    static THREAD: ThreadGuard = ThreadGuard(DOMAIN.acquire_thread());
}

//  Registration of the current thread, returned to the domain when the thread exits.
struct ThreadGuard(Option<ThreadHandle<'static>>);

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            DOMAIN.release_thread(handle);
        }
    }
}

fn with_thread<R>(f: impl FnOnce(&ThreadHandle<'static>) -> R) -> R {
    THREAD.with(|guard| {
        let handle = guard.0.as_ref().expect("thread registration capacity of the allocator domain exhausted");
        f(handle)
    })
}
