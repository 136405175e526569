//! Multi-threaded stress over shared published slots.
//!
//! Threads walk a shared array with coprime strides; a null entry is filled with a fresh stamped allocation, a
//! claimed entry is verified and released. Slots therefore keep changing hands across threads, super-blocks keep
//! draining and refilling, and descriptor recycling is hammered from all sides.

use std::{
    ptr,
    ptr::NonNull,
    sync::{Barrier, atomic::{AtomicPtr, Ordering}},
    thread,
};

use serial_test::serial;

use llslab::LLSlab;

const NUM_ENTRIES: usize = 1024;

#[serial]
#[test]
fn two_threads_interleaved() {
    churn(&[1, 3], number_iterations(100_000));
}

#[serial]
#[test]
fn four_threads_interleaved() {
    churn(&[1, 2, 3, 5], number_iterations(200_000));
}

fn churn(strides: &[usize], iterations: usize) {
    let slab = LLSlab::new(64).unwrap();

    let entries: Vec<AtomicPtr<u8>> = (0..NUM_ENTRIES).map(|_| AtomicPtr::new(ptr::null_mut())).collect();

    let start = Barrier::new(strides.len());

    thread::scope(|scope| {
        for stride in strides {
            let (slab, entries, start) = (&slab, &entries, &start);

            scope.spawn(move || {
                slab.warm_up().expect("registration capacity available");

                start.wait();

                let mut index = 0;

                for _ in 0..iterations {
                    let entry = &entries[index];

                    let published = entry.load(Ordering::Acquire);

                    if published.is_null() {
                        let slot = slab.allocate().expect("memory available");
                        write_stamp(slot, index);

                        if entry
                            .compare_exchange(ptr::null_mut(), slot.as_ptr(), Ordering::AcqRel, Ordering::Acquire)
                            .is_err()
                        {
                            //  Someone published this entry first; hand the fresh slot straight back.
                            unsafe { slab.deallocate(slot) };
                        }
                    } else if entry
                        .compare_exchange(published, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        let slot = NonNull::new(published).unwrap();
                        assert_eq!(index, read_stamp(slot));
                        unsafe { slab.deallocate(slot) };
                    }

                    index += stride;
                    while index >= NUM_ENTRIES {
                        index -= NUM_ENTRIES;
                    }
                }
            });
        }
    });

    //  Drain every slot still published, then audit.
    for entry in &entries {
        if let Some(slot) = NonNull::new(entry.swap(ptr::null_mut(), Ordering::AcqRel)) {
            unsafe { slab.deallocate(slot) };
        }
    }

    slab.reclaim();

    unsafe { slab.check_consistency() }.expect("quiescent heap is consistent");
}

//  The stamp encodes the entry index, shifted to stand out from small integers scribbled by bugs.
fn write_stamp(slot: NonNull<u8>, index: usize) {
    unsafe { slot.cast::<u32>().as_ptr().write((index as u32) << 10) };
}

fn read_stamp(slot: NonNull<u8>) -> usize {
    (unsafe { slot.cast::<u32>().as_ptr().read() } >> 10) as usize
}

fn number_iterations(default: usize) -> usize {
    for (name, value) in std::env::vars() {
        if name == "LLSLAB_STRESS_ITERATIONS" {
            if let Ok(result) = value.parse() {
                return result;
            }
        }
    }

    default
}
