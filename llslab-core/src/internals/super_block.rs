//! Super-block layout
//!
//! A super-block is a `Configuration::SUPER_BLOCK_SIZE`-sized region aligned on its own size. Its first
//! [`HEADER_SIZE`] bytes hold a single word: the owning descriptor. The rest is carved into equal slots, and any
//! address inside a slot maps back to the descriptor by masking off the low bits. That mask is the only ownership
//! lookup the release path ever needs.
//!
//! Free slots double as free-list nodes: the first 4 bytes of a free slot store the index of the next free slot.
//! A release writes its own slot's link while allocations may still read a value they are about to discard, so the
//! link words are accessed through relaxed atomics, with all ordering provided by the anchor.

use core::{
    ptr::{self, NonNull},
    sync::atomic::{self, AtomicU32, Ordering},
};

use crate::{Configuration, utils};
use crate::internals::descriptor::Descriptor;

/// Bytes reserved at the base of a super-block for the descriptor back-pointer.
pub(crate) const HEADER_SIZE: usize = 16;

/// Link value written into the terminal slot of a freshly carved block.
///
/// The value is never followed: the free list is only ever walked `count` links deep. A broken walk that does reach
/// it trips the range check instead of wandering through stale memory.
pub(crate) const LINK_END: u32 = u32::MAX;

/// Writes the descriptor back-pointer into a fresh region, returning the payload base.
///
/// #   Safety
///
/// -   Assumes `region` spans `C::SUPER_BLOCK_SIZE` exclusively owned bytes, aligned on that same size.
pub(crate) unsafe fn format<C>(region: NonNull<u8>, descriptor: NonNull<Descriptor>) -> NonNull<u8>
where
    C: Configuration,
{
    debug_assert!(utils::is_aligned_to(region.as_ptr(), C::SUPER_BLOCK_SIZE));

    #[allow(clippy::cast_ptr_alignment)]
    ptr::write(region.as_ptr() as *mut *mut Descriptor, descriptor.as_ptr());

    //  The back-pointer must be visible before any address within the block is published.
    atomic::fence(Ordering::Release);

    NonNull::new_unchecked(region.as_ptr().add(HEADER_SIZE))
}

/// Recovers the owning descriptor of any address inside a super-block's payload.
///
/// #   Safety
///
/// -   Assumes `ptr` points strictly inside a live, formatted super-block.
pub(crate) unsafe fn descriptor_of<C>(ptr: NonNull<u8>) -> NonNull<Descriptor>
where
    C: Configuration,
{
    let base = C::SUPER_BLOCK_SIZE.round_down(ptr.as_ptr() as usize);

    #[allow(clippy::cast_ptr_alignment)]
    let descriptor = ptr::read(base as *const *mut Descriptor);

    debug_assert!(!descriptor.is_null());

    NonNull::new_unchecked(descriptor)
}

/// Returns the mapped region of a super-block, given its payload base.
///
/// #   Safety
///
/// -   Assumes `payload` was returned by `format`.
pub(crate) unsafe fn region_of<C>(payload: NonNull<u8>) -> NonNull<u8>
where
    C: Configuration,
{
    let region = NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE));

    debug_assert!(utils::is_aligned_to(region.as_ptr(), C::SUPER_BLOCK_SIZE));

    region
}

/// Chains every slot but the first into the in-block free list.
///
/// Slot 0 is excluded: it is handed to the caller that carves the block. The terminal slot links to [`LINK_END`].
///
/// #   Safety
///
/// -   Assumes `payload` spans `slot_count * slot_size` exclusively owned bytes.
pub(crate) unsafe fn carve<C>(payload: NonNull<u8>, slot_size: u32, slot_count: u32)
where
    C: Configuration,
{
    for index in 1..slot_count.saturating_sub(1) {
        write_link(payload, index, slot_size, index + 1);
    }

    if slot_count > 1 {
        write_link(payload, slot_count - 1, slot_size, LINK_END);
    }
}

/// Returns the address of the slot at `index`.
///
/// #   Safety
///
/// -   Assumes `index` is within the block.
pub(crate) unsafe fn slot(payload: NonNull<u8>, index: u32, slot_size: u32) -> NonNull<u8> {
    NonNull::new_unchecked(payload.as_ptr().add(index as usize * slot_size as usize))
}

/// Returns the slot index of an address within the block.
///
/// #   Safety
///
/// -   Assumes `ptr` points within the block's payload.
pub(crate) unsafe fn slot_index(payload: NonNull<u8>, ptr: NonNull<u8>, slot_size: u32) -> u32 {
    let offset = ptr.as_ptr() as usize - payload.as_ptr() as usize;

    debug_assert!(offset % slot_size as usize == 0);

    (offset / slot_size as usize) as u32
}

/// Reads the free-list link of the slot at `index`.
///
/// #   Safety
///
/// -   Assumes `index` is within the block, and the slot is free.
pub(crate) unsafe fn read_link(payload: NonNull<u8>, index: u32, slot_size: u32) -> u32 {
    link_word(payload, index, slot_size).load(Ordering::Relaxed)
}

/// Writes the free-list link of the slot at `index`.
///
/// #   Safety
///
/// -   Assumes `index` is within the block, and the slot is owned by the caller.
pub(crate) unsafe fn write_link(payload: NonNull<u8>, index: u32, slot_size: u32, link: u32) {
    link_word(payload, index, slot_size).store(link, Ordering::Relaxed);
}

//  Internal; views the first 4 bytes of a slot as its link word.
unsafe fn link_word<'a>(payload: NonNull<u8>, index: u32, slot_size: u32) -> &'a AtomicU32 {
    let address = slot(payload, index, slot_size).as_ptr();

    debug_assert!(address as usize % 4 == 0);

    #[allow(clippy::cast_ptr_alignment)]
    &*(address as *const AtomicU32)
}

// mod tests
