//! Implementation of the Platform trait over `mmap`.
//!
//! Super-blocks must be aligned on their own size, which exceeds what `mmap` guarantees. An exact-sized mapping is
//! tried first, since it often comes back suitably aligned; otherwise the request is over-allocated and trimmed down
//! to an aligned window.

use core::{alloc::Layout, ptr, ptr::NonNull};

use llslab_core::{Platform, PowerOf2};

//  Smallest alignment `mmap` guarantees by itself.
const PAGE_SIZE: PowerOf2 = unsafe { PowerOf2::new_unchecked(4096) };

/// Implementation of the Platform trait, for Linux.
#[derive(Default)]
pub(crate) struct LLPlatform;

impl LLPlatform {
    /// Creates an instance.
    pub(crate) const fn new() -> Self { Self }
}

impl Platform for LLPlatform {
    unsafe fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.align().count_ones() == 1);
        debug_assert!(layout.size() > 0);

        if layout.align() <= PAGE_SIZE.value() {
            return mmap_allocate(layout.size());
        }

        //  Safety:
        //  -   `layout.align()` is a power of 2.
        let alignment = PowerOf2::new_unchecked(layout.align());

        mmap_aligned_exact(layout.size(), alignment).or_else(|| mmap_aligned_over(layout.size(), alignment))
    }

    unsafe fn deallocate(&self, pointer: NonNull<u8>, layout: Layout) {
        munmap_deallocate(pointer.as_ptr(), layout.size());
    }
}

//  Attempts an exact-sized mapping, keeping it only if it happens to be aligned.
//
//  If None is returned, the memory has been unmapped.
fn mmap_aligned_exact(size: usize, alignment: PowerOf2) -> Option<NonNull<u8>> {
    let pointer = mmap_allocate(size)?;

    if pointer.as_ptr() as usize % alignment == 0 {
        return Some(pointer);
    }

    //  Safety:
    //  -   `pointer` maps `size` bytes, no longer in use.
    unsafe { munmap_deallocate(pointer.as_ptr(), size) };

    None
}

//  Over-allocates by one alignment unit, then trims the misaligned front and the excess back.
fn mmap_aligned_over(size: usize, alignment: PowerOf2) -> Option<NonNull<u8>> {
    let over_size = size + alignment.value();
    let front_pointer = mmap_allocate(over_size)?;

    let front_size = alignment.round_up(front_pointer.as_ptr() as usize) - front_pointer.as_ptr() as usize;
    let back_size = alignment.value() - front_size;

    debug_assert!(front_size + size + back_size == over_size);

    //  Safety:
    //  -   `front_size` is less than `over_size`, so the result stays within the mapping.
    let aligned_pointer = unsafe { front_pointer.as_ptr().add(front_size) };

    debug_assert!(aligned_pointer as usize % alignment == 0);

    if front_size > 0 {
        //  Safety:
        //  -   `[front_pointer, front_pointer + front_size)` is mapped and unused.
        unsafe { munmap_deallocate(front_pointer.as_ptr(), front_size) };
    }

    if back_size > 0 {
        //  Safety:
        //  -   `aligned_pointer + size` stays within the mapping.
        //  -   `[aligned_pointer + size, aligned_pointer + size + back_size)` is mapped and unused.
        unsafe { munmap_deallocate(aligned_pointer.add(size), back_size) };
    }

    //  Safety:
    //  -   `aligned_pointer` is not null.
    Some(unsafe { NonNull::new_unchecked(aligned_pointer) })
}

//  Wrapper around `mmap`; returns page-aligned memory with no further guarantee.
fn mmap_allocate(size: usize) -> Option<NonNull<u8>> {
    const FAILURE: *mut u8 = !0 as *mut u8;

    const PROT_READ: i32 = 1;
    const PROT_WRITE: i32 = 2;

    const MAP_PRIVATE: i32 = 0x2;
    const MAP_ANONYMOUS: i32 = 0x20;

    let prot = PROT_READ | PROT_WRITE;
    let flags = MAP_PRIVATE | MAP_ANONYMOUS;

    //  No address hint; fd and offset as mandated for MAP_ANONYMOUS.
    //
    //  Safety:
    //  -   `addr`, `fd`, and `offset` are suitable for MAP_ANONYMOUS.
    let result = unsafe { mmap(ptr::null_mut(), size, prot, flags, -1, 0) };

    if result == FAILURE { None } else { NonNull::new(result) }
}

//  Wrapper around `munmap`.
//
//  #   Panics
//
//  If `munmap` reports an error; there is no sane way to continue after losing track of a mapping.
//
//  #   Safety
//
//  -   Assumes `[addr, addr + size)` is mapped and no longer in use.
unsafe fn munmap_deallocate(addr: *mut u8, size: usize) {
    let result = munmap(addr, size);
    assert!(result == 0, "munmap({:x}, {}) failed: {}", addr as usize, size, result);
}

#[link(name = "c")]
extern "C" {
    //  Refer to: https://man7.org/linux/man-pages/man2/mmap.2.html
    fn mmap(addr: *mut u8, length: usize, prot: i32, flags: i32, fd: i32, offset: isize) -> *mut u8;

    //  Refer to: https://man7.org/linux/man-pages/man2/mmap.2.html
    fn munmap(addr: *mut u8, length: usize) -> i32;
}
