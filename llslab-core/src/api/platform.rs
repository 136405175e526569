//! Platform
//!
//! The Platform trait is the allocator's sole source of memory: super-blocks and descriptor batches both come from
//! it. Abstracting it keeps the core portable across OSes and bare-metal targets, and lets tests substitute an
//! instrumented provider.

use core::{alloc::Layout, ptr::NonNull};

/// Abstraction of platform-specific memory allocation and deallocation.
pub trait Platform {
    /// Allocates a fresh block of memory as per the specified layout.
    ///
    /// Returns None if the request cannot be satisfied; the caller is expected to surface the exhaustion rather
    /// than retry blindly.
    ///
    /// #   Safety
    ///
    /// The caller may assume that if a pointer is returned then:
    /// -   The number of usable bytes is greater than or equal to `layout.size()`.
    /// -   The pointer is at least aligned to `layout.align()`.
    ///
    /// `allocate` assumes that:
    /// -   `layout.align()` is non-zero, and a power of 2.
    /// -   `layout.size()` is non-zero.
    unsafe fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Deallocates the supplied block of memory.
    ///
    /// #   Safety
    ///
    /// The caller should no longer reference the memory after calling this function.
    ///
    /// `deallocate` assumes that:
    /// -   `pointer` was returned by `allocate` on this instance, with the same `layout`.
    unsafe fn deallocate(&self, pointer: NonNull<u8>, layout: Layout);
}
