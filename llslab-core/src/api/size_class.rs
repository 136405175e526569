//! Size class
//!
//! A size class groups every super-block carved into one particular slot size. Heaps draw slots from it, and its
//! partial list is where descriptors with free slots wait for the next taker, shared by however many heaps point at
//! the class.

use core::{fmt, marker::PhantomData};

use crate::{Configuration, Properties};
use crate::internals::descriptor::DescriptorStack;

/// A class of allocations sharing one slot size.
pub struct SizeClass<C> {
    slot_size: u32,
    slot_count: u32,
    partial: DescriptorStack,
    _configuration: PhantomData<*const C>,
}

impl<C> SizeClass<C>
where
    C: Configuration,
{
    /// Creates a size class serving `slot_size`-byte slots.
    ///
    /// The size must be a multiple of 4 (free slots store a 4-byte link) and must fall within
    /// [`Properties::minimum_slot_size`] and [`Properties::maximum_slot_size`].
    pub fn new(slot_size: usize) -> Result<SizeClass<C>, SizeClassError> {
        if slot_size % 4 != 0 {
            return Err(SizeClassError::Misaligned);
        }

        if slot_size < Properties::<C>::minimum_slot_size() {
            return Err(SizeClassError::TooSmall);
        }

        if slot_size > Properties::<C>::maximum_slot_size() {
            return Err(SizeClassError::TooLarge);
        }

        Ok(SizeClass {
            slot_size: slot_size as u32,
            slot_count: Properties::<C>::slot_count_of(slot_size) as u32,
            partial: DescriptorStack::new(),
            _configuration: PhantomData,
        })
    }

    /// Returns the slot size served by this class.
    pub fn slot_size(&self) -> usize { self.slot_size as usize }

    /// Returns the number of slots each of this class's super-blocks holds.
    pub fn slot_count(&self) -> usize { self.slot_count as usize }

    pub(crate) fn partial(&self) -> &DescriptorStack { &self.partial }
}

//  Safety:
//  -   The PhantomData only pins the configuration type; the shared state is the partial list, which is thread-safe.
unsafe impl<C> Send for SizeClass<C> {}
unsafe impl<C> Sync for SizeClass<C> {}

/// Reason a slot size cannot be served.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SizeClassError {
    /// The slot size is not a multiple of the free-list link width.
    Misaligned,
    /// Slots that small cannot hold a free-list link, or would overflow the anchor's slot-count field.
    TooSmall,
    /// Slots that large cannot be carved out of one super-block.
    TooLarge,
}

impl fmt::Display for SizeClassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeClassError::Misaligned => write!(f, "slot size must be a multiple of 4"),
            SizeClassError::TooSmall => write!(f, "slot size below the minimum of this configuration"),
            SizeClassError::TooLarge => write!(f, "slot size exceeds a super-block's payload"),
        }
    }
}

#[cfg(test)]
mod tests {

use crate::PowerOf2;

use super::*;

struct TestConfiguration;

impl Configuration for TestConfiguration {
    const SUPER_BLOCK_SIZE: PowerOf2 = unsafe { PowerOf2::new_unchecked(16384) };
}

type TestSizeClass = SizeClass<TestConfiguration>;

#[test]
fn new_accepts_supported_sizes() {
    let class = TestSizeClass::new(64).unwrap();
    assert_eq!(64, class.slot_size());
    assert_eq!(255, class.slot_count());

    assert_eq!(1023, TestSizeClass::new(16).unwrap().slot_count());
    assert_eq!(1, TestSizeClass::new(16368).unwrap().slot_count());
}

#[test]
fn new_rejects_unsupported_sizes() {
    assert_eq!(Err(SizeClassError::Misaligned), TestSizeClass::new(62).map(|_| ()));
    assert_eq!(Err(SizeClassError::TooSmall), TestSizeClass::new(4).map(|_| ()));
    assert_eq!(Err(SizeClassError::TooSmall), TestSizeClass::new(12).map(|_| ()));
    assert_eq!(Err(SizeClassError::TooLarge), TestSizeClass::new(16372).map(|_| ()));
}

} // mod tests
