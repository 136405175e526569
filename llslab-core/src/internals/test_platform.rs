//! An instrumented platform for unit tests, backed by the test harness's own allocator.

use core::{
    alloc::Layout,
    ptr::NonNull,
    sync::atomic::{AtomicIsize, AtomicUsize, Ordering},
};

use crate::Platform;

/// Counts live allocations, distinguishing super-blocks from descriptor batches by their alignment.
pub(crate) struct TestPlatform {
    live_blocks: AtomicUsize,
    live_batches: AtomicUsize,
    budget: AtomicIsize,
}

impl TestPlatform {
    /// Creates a platform with no allocation limit.
    pub(crate) fn new() -> TestPlatform { TestPlatform::with_budget(isize::MAX) }

    /// Creates a platform refusing requests once `budget` allocations are live.
    pub(crate) fn with_budget(budget: isize) -> TestPlatform {
        TestPlatform {
            live_blocks: AtomicUsize::new(0),
            live_batches: AtomicUsize::new(0),
            budget: AtomicIsize::new(budget),
        }
    }

    /// Raises the allocation budget by `extra`.
    pub(crate) fn grant(&self, extra: isize) { self.budget.fetch_add(extra, Ordering::Relaxed); }

    /// Number of live super-block regions.
    pub(crate) fn live_super_blocks(&self) -> usize { self.live_blocks.load(Ordering::Relaxed) }

    /// Number of live allocations of any kind.
    pub(crate) fn live_allocations(&self) -> usize {
        self.live_blocks.load(Ordering::Relaxed) + self.live_batches.load(Ordering::Relaxed)
    }

    fn counter(&self, layout: Layout) -> &AtomicUsize {
        //  Super-blocks are the only requests aligned beyond the descriptor record.
        if layout.align() >= 1024 { &self.live_blocks } else { &self.live_batches }
    }
}

impl Platform for TestPlatform {
    unsafe fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if self.budget.fetch_sub(1, Ordering::Relaxed) <= 0 {
            self.budget.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let region = NonNull::new(std::alloc::alloc_zeroed(layout))?;

        self.counter(layout).fetch_add(1, Ordering::Relaxed);

        Some(region)
    }

    unsafe fn deallocate(&self, pointer: NonNull<u8>, layout: Layout) {
        self.counter(layout).fetch_sub(1, Ordering::Relaxed);
        self.budget.fetch_add(1, Ordering::Relaxed);

        std::alloc::dealloc(pointer.as_ptr(), layout);
    }
}
