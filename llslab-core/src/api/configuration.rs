//! The configuration of llslab-core.
//!
//! A single Configuration type should be shared by the size classes, heaps, and domain that exchange memory: it pins
//! down the super-block geometry everything else derives from.

use crate::internals::anchor::Anchor;
use crate::internals::super_block;

pub use crate::utils::PowerOf2;

/// Compile-time geometry of the allocator.
pub trait Configuration {
    /// The size of super-blocks, which is also their alignment.
    ///
    /// The recommended value is 16 KiB. Values below 1 KiB leave little usable payload behind the header.
    const SUPER_BLOCK_SIZE: PowerOf2;
}

/// Properties
///
/// Derived properties of a given Configuration.
///
/// Work-around for the inability to implement static methods directly on a trait.
pub struct Properties<C>(C);

impl<C> Properties<C>
where
    C: Configuration,
{
    /// Returns the number of payload bytes of a super-block.
    pub fn usable_size() -> usize { C::SUPER_BLOCK_SIZE.value() - super_block::HEADER_SIZE }

    /// Returns the smallest slot size a size class may serve.
    ///
    /// Two constraints meet here: a free slot must fit a 4-byte link, and the slot count of a super-block must fit
    /// the anchor's 10-bit fields.
    pub fn minimum_slot_size() -> usize {
        let fit_link = 4;
        let fit_anchor = Self::usable_size() / (Anchor::MAX_SLOT_COUNT + 1) + 1;

        round_up_to_link(fit_link.max(fit_anchor))
    }

    /// Returns the largest slot size a size class may serve.
    ///
    /// A single slot may span the whole payload; anything larger cannot be carved out of one super-block.
    pub fn maximum_slot_size() -> usize { Self::usable_size() }

    /// Returns the conventional cut-off under which an allocation counts as small.
    ///
    /// Callers serving general size requests should route anything larger to a dedicated large-object path rather
    /// than burn half a super-block per slot.
    pub fn small_object_limit() -> usize { C::SUPER_BLOCK_SIZE.value() / 2 - 8 }

    /// Returns the number of slots a super-block yields for a given slot size.
    pub fn slot_count_of(slot_size: usize) -> usize {
        debug_assert!(slot_size >= Self::minimum_slot_size());

        Self::usable_size() / slot_size
    }
}

//
//  Implementation
//

fn round_up_to_link(size: usize) -> usize { (size + 3) & !3 }

#[cfg(test)]
mod tests {

use super::*;

struct TestConfiguration;

impl Configuration for TestConfiguration {
    const SUPER_BLOCK_SIZE: PowerOf2 = unsafe { PowerOf2::new_unchecked(16384) };
}

type TestProperties = Properties<TestConfiguration>;

struct SmallConfiguration;

impl Configuration for SmallConfiguration {
    const SUPER_BLOCK_SIZE: PowerOf2 = unsafe { PowerOf2::new_unchecked(1024) };
}

#[test]
fn properties_usable_size() {
    assert_eq!(16368, TestProperties::usable_size());
    assert_eq!(1008, Properties::<SmallConfiguration>::usable_size());
}

#[test]
fn properties_slot_size_bounds() {
    //  16368 / 16 = 1023 slots, which just fits the anchor fields.
    assert_eq!(16, TestProperties::minimum_slot_size());
    assert_eq!(16368, TestProperties::maximum_slot_size());
    assert_eq!(8184, TestProperties::small_object_limit());

    //  Small blocks are only bounded by the link width.
    assert_eq!(4, Properties::<SmallConfiguration>::minimum_slot_size());
}

#[test]
fn properties_slot_count_of() {
    assert_eq!(1023, TestProperties::slot_count_of(16));
    assert_eq!(255, TestProperties::slot_count_of(64));
    assert_eq!(2, TestProperties::slot_count_of(8184));
    assert_eq!(1, TestProperties::slot_count_of(16368));
}

} // mod tests
