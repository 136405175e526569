use std::ptr::NonNull;

use serial_test::serial;

use llslab::{LLSlab, SizeClassError};

const SUPER_BLOCK_SIZE: usize = 16384;

fn block_base(ptr: NonNull<u8>) -> usize {
    ptr.as_ptr() as usize & !(SUPER_BLOCK_SIZE - 1)
}

fn stamp(ptr: NonNull<u8>, value: u32) {
    unsafe { ptr.cast::<u32>().as_ptr().write(value) };
}

fn read_stamp(ptr: NonNull<u8>) -> u32 {
    unsafe { ptr.cast::<u32>().as_ptr().read() }
}

#[test]
fn rejected_slot_sizes() {
    assert_eq!(Err(SizeClassError::TooSmall), LLSlab::new(4).map(|_| ()));
    assert_eq!(Err(SizeClassError::TooSmall), LLSlab::new(12).map(|_| ()));
    assert_eq!(Err(SizeClassError::Misaligned), LLSlab::new(62).map(|_| ()));
    assert_eq!(Err(SizeClassError::TooLarge), LLSlab::new(8192).map(|_| ()));
}

#[serial]
#[test]
fn warm_up() {
    let slab = LLSlab::new(64).expect("supported slot size");
    slab.warm_up().expect("registration capacity available");
}

#[serial]
#[test]
fn single_slot_churn() {
    let slab = LLSlab::new(64).unwrap();

    for iteration in 0..10_000u32 {
        let slot = slab.allocate().expect("memory available");

        stamp(slot, iteration);
        assert_eq!(iteration, read_stamp(slot));

        unsafe { slab.deallocate(slot) };
    }

    slab.reclaim();

    unsafe { slab.check_consistency() }.expect("quiescent heap is consistent");
}

#[serial]
#[test]
fn fill_one_super_block_then_spill() {
    //  (16384 - 16) / 64 slots per super-block.
    let slots_per_block = 255;

    let slab = LLSlab::new(64).unwrap();

    let mut slots = Vec::new();
    for index in 0..slots_per_block as u32 {
        let slot = slab.allocate().expect("memory available");
        stamp(slot, index);
        slots.push(slot);
    }

    //  One super-block serves them all, one slot each.
    let base = block_base(slots[0]);
    for slot in &slots {
        assert_eq!(base, block_base(*slot));
        assert_eq!(0, (slot.as_ptr() as usize - base - 16) % 64);
    }

    let mut addresses: Vec<_> = slots.iter().map(|slot| slot.as_ptr() as usize).collect();
    addresses.sort_unstable();
    addresses.dedup();
    assert_eq!(slots_per_block, addresses.len());

    //  The next allocation comes from a second super-block.
    let spilled = slab.allocate().expect("memory available");
    assert_ne!(base, block_base(spilled));

    for (index, slot) in slots.iter().enumerate() {
        assert_eq!(index as u32, read_stamp(*slot));
    }

    slots.push(spilled);
    for slot in slots {
        unsafe { slab.deallocate(slot) };
    }

    slab.reclaim();

    unsafe { slab.check_consistency() }.expect("quiescent heap is consistent");
}

#[serial]
#[test]
fn pools_do_not_cross_slots() {
    let small = LLSlab::new(32).unwrap();
    let large = LLSlab::new(256).unwrap();

    let a = small.allocate().unwrap();
    let b = large.allocate().unwrap();

    assert_ne!(block_base(a), block_base(b));

    unsafe {
        small.deallocate(a);
        large.deallocate(b);
    }

    small.reclaim();

    unsafe { small.check_consistency() }.expect("quiescent heap is consistent");
    unsafe { large.check_consistency() }.expect("quiescent heap is consistent");
}
