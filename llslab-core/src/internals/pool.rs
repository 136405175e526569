//! Descriptor pool
//!
//! Descriptor records come from the platform in batches and are recycled through a lock-free LIFO for the rest of
//! the domain's life. Recycling is always routed through the hazard domain: a record may only re-enter the pool once
//! no thread can still commit a compare-exchange against it.

use core::{
    alloc::Layout,
    mem,
    ptr::{self, NonNull},
    sync::atomic::{self, Ordering},
};

use crate::Platform;
use crate::internals::descriptor::{Descriptor, DescriptorStack};
use crate::internals::hazard::HazardPointer;

/// Number of records acquired from the platform at a time.
pub(crate) const DESCRIPTOR_BATCH: usize = 64;

/// Lock-free pool of free descriptor records.
pub(crate) struct DescriptorPool {
    available: DescriptorStack,
}

impl DescriptorPool {
    /// Creates an empty pool.
    pub(crate) const fn new() -> DescriptorPool { DescriptorPool { available: DescriptorStack::new() } }

    /// Checks out a record, replenishing the pool from the platform when dry.
    ///
    /// Returns None if the platform cannot provide a batch.
    pub(crate) fn acquire<P>(&self, platform: &P, hazard: &HazardPointer) -> Option<NonNull<Descriptor>>
    where
        P: Platform,
    {
        loop {
            if let Some(descriptor) = self.available.pop(hazard) {
                //  Safety:
                //  -   A popped descriptor is exclusively owned.
                unsafe { descriptor.as_ref() }.mark_in_use();
                return Some(descriptor);
            }

            //  Safety:
            //  -   The batch layout has a power-of-2 alignment and a size that is a multiple of it.
            let region = unsafe { platform.allocate(Self::batch_layout()) }?;

            if let Some(first) = self.carve_batch(region) {
                //  Safety:
                //  -   `first` is the head of the fresh batch, exclusively owned.
                unsafe { first.as_ref() }.mark_in_use();
                return Some(first);
            }

            //  A peer replenished the pool first; hand the unused batch back and pop from theirs.
            //  Safety:
            //  -   The batch was never published.
            unsafe { platform.deallocate(region, Self::batch_layout()) };
        }
    }

    /// Returns a record to the pool.
    ///
    /// The record must be invisible to concurrent poppers: fresh, never published, or routed through the hazard
    /// domain's reclamation.
    pub(crate) fn release(&self, descriptor: NonNull<Descriptor>) {
        //  Safety:
        //  -   The caller owns the record.
        let record = unsafe { descriptor.as_ref() };

        debug_assert!(!record.is_in_use());

        self.available.push(descriptor);
    }

    /// Returns whether the record currently sits in the pool.
    ///
    /// #   Safety
    ///
    /// -   Assumes a quiescent domain.
    pub(crate) unsafe fn contains(&self, descriptor: NonNull<Descriptor>) -> bool {
        self.available.iter().any(|pooled| pooled == descriptor)
    }

    //  Internal; writes a fresh batch of records into `region`, installs all but the first on the pool, and returns
    //  the first. Returns None without installing anything if the pool is no longer empty.
    fn carve_batch(&self, region: NonNull<u8>) -> Option<NonNull<Descriptor>> {
        let first = region.cast::<Descriptor>();

        for index in 0..DESCRIPTOR_BATCH {
            //  Safety:
            //  -   The region holds `DESCRIPTOR_BATCH` records and is exclusively owned until installed.
            unsafe { ptr::write(first.as_ptr().add(index), Descriptor::new()) };
        }

        //  Link all records but the first into a chain.
        for index in 1..DESCRIPTOR_BATCH - 1 {
            //  Safety:
            //  -   `index` and `index + 1` are in range.
            unsafe {
                let record = &*first.as_ptr().add(index);
                record.next().store(Some(NonNull::new_unchecked(first.as_ptr().add(index + 1))));
            }
        }

        //  The records must be fully written before the chain becomes reachable.
        atomic::fence(Ordering::Release);

        //  Safety:
        //  -   Index 1 is in range.
        let second = unsafe { NonNull::new_unchecked(first.as_ptr().add(1)) };

        self.available.install(second).then_some(first)
    }

    fn batch_layout() -> Layout {
        //  Safety:
        //  -   The alignment of a type is a non-zero power of 2, and the array size is a multiple of it.
        unsafe {
            Layout::from_size_align_unchecked(
                mem::size_of::<Descriptor>() * DESCRIPTOR_BATCH,
                mem::align_of::<Descriptor>(),
            )
        }
    }
}

#[cfg(test)]
mod tests {

use crate::internals::test_platform::TestPlatform;

use super::*;

#[test]
fn acquire_installs_batch() {
    let platform = TestPlatform::new();
    let pool = DescriptorPool::new();
    let hazard = HazardPointer::new();

    let first = pool.acquire(&platform, &hazard).expect("fresh batch");
    assert!(unsafe { first.as_ref() }.is_in_use());
    assert_eq!(1, platform.live_allocations());

    //  The rest of the batch serves without touching the platform again.
    for _ in 1..DESCRIPTOR_BATCH {
        assert!(pool.acquire(&platform, &hazard).is_some());
    }
    assert_eq!(1, platform.live_allocations());

    //  A drained pool triggers a second batch.
    assert!(pool.acquire(&platform, &hazard).is_some());
    assert_eq!(2, platform.live_allocations());
}

#[test]
fn acquire_reports_platform_exhaustion() {
    let platform = TestPlatform::with_budget(0);
    let pool = DescriptorPool::new();
    let hazard = HazardPointer::new();

    assert_eq!(None, pool.acquire(&platform, &hazard));
}

#[test]
fn release_recycles_in_lifo_order() {
    let platform = TestPlatform::new();
    let pool = DescriptorPool::new();
    let hazard = HazardPointer::new();

    let first = pool.acquire(&platform, &hazard).unwrap();
    let second = pool.acquire(&platform, &hazard).unwrap();

    unsafe { first.as_ref() }.mark_idle();
    unsafe { second.as_ref() }.mark_idle();

    pool.release(first);
    pool.release(second);

    assert!(unsafe { pool.contains(first) });
    assert!(unsafe { pool.contains(second) });

    assert_eq!(Some(second), pool.acquire(&platform, &hazard));
    assert_eq!(Some(first), pool.acquire(&platform, &hazard));
    assert!(!unsafe { pool.contains(first) });
}

} // mod tests
