#![deny(missing_docs)]

//! A lock-free slab allocator for small fixed-size objects.
//!
//! The type `LLSlab` hands out fixed-size slots carved from 16 KiB super-blocks, with every state transition
//! committed by a single compare-and-swap: no locks, no blocking, and safe release from any thread.
//!
//! #   Warning
//!
//! This is a slab allocator, not a malloc replacement: one `LLSlab` serves exactly one slot size. Map object sizes
//! to pools, and route objects above the small-object limit elsewhere.

mod allocator;
mod platform;

pub use allocator::LLSlab;

pub use llslab_core::{ConsistencyError, SizeClassError};

use platform::{LLConfiguration, LLPlatform};
