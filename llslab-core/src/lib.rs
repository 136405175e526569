#![no_std]

#![deny(missing_docs)]

//! Building blocks for a lock-free slab allocator of small fixed-size objects.
//!
//! llslab-core carves platform memory into aligned super-blocks, each split into equal slots and governed by a
//! descriptor whose packed anchor word commits every allocation and release through a single compare-exchange.
//! It contains:
//! -   A platform trait, used to obtain aligned raw memory to be carved up.
//! -   Size classes and heaps, the user-facing endpoints, generic over a compile-time configuration.
//! -   A domain tying them together: descriptor pool, hazard-pointer table, and deferred reclamation.

#[cfg(test)]
extern crate std;

mod api;
mod internals;
mod utils;

pub use api::*;
