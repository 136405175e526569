//! An integer guaranteed to be a power of 2.

use core::{num, ops};

/// PowerOf2
///
/// An integral guaranteed to be non-zero and a power of 2.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PowerOf2(num::NonZeroUsize);

impl PowerOf2 {
    /// Creates a new instance of PowerOf2, or nothing if the value is not a power of 2.
    pub fn new(value: usize) -> Option<PowerOf2> {
        if value.count_ones() == 1 {
            //  Safety:
            //  -   `value` is a power of 2, as per the check above.
            Some(unsafe { PowerOf2::new_unchecked(value) })
        } else {
            None
        }
    }

    /// Creates a new instance of PowerOf2.
    ///
    /// #   Safety
    ///
    /// Assumes that the value is a power of 2.
    pub const unsafe fn new_unchecked(value: usize) -> PowerOf2 {
        //  Safety:
        //  -   A power of 2 cannot be 0.
        PowerOf2(num::NonZeroUsize::new_unchecked(value))
    }

    /// Returns the inner value.
    pub const fn value(&self) -> usize { self.0.get() }

    /// Rounds `n` up to the nearest multiple of `self`.
    pub const fn round_up(&self, n: usize) -> usize {
        let mask = self.mask();

        (n + mask) & !mask
    }

    /// Rounds `n` down to the nearest multiple of `self`.
    pub const fn round_down(&self, n: usize) -> usize { n & !self.mask() }

    const fn mask(&self) -> usize { self.value() - 1 }
}

impl ops::Div<PowerOf2> for usize {
    type Output = usize;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: PowerOf2) -> usize { self >> rhs.value().trailing_zeros() }
}

impl ops::Rem<PowerOf2> for usize {
    type Output = usize;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn rem(self, rhs: PowerOf2) -> usize { self & rhs.mask() }
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn power_of_2_new() {
    fn new(value: usize) -> Option<usize> {
        PowerOf2::new(value).map(|p| p.value())
    }

    assert_eq!(None, new(0));
    assert_eq!(Some(1), new(1));
    assert_eq!(Some(2), new(2));
    assert_eq!(None, new(3));
    assert_eq!(None, new(12));
    assert_eq!(Some(16384), new(16384));
    assert_eq!(None, new(16383));
}

#[test]
fn power_of_2_round_up_down() {
    let sixteen = PowerOf2::new(16).unwrap();

    assert_eq!(0, sixteen.round_up(0));
    assert_eq!(16, sixteen.round_up(1));
    assert_eq!(16, sixteen.round_up(16));
    assert_eq!(32, sixteen.round_up(17));

    assert_eq!(0, sixteen.round_down(15));
    assert_eq!(16, sixteen.round_down(16));
    assert_eq!(16, sixteen.round_down(31));
    assert_eq!(32, sixteen.round_down(32));
}

#[test]
fn power_of_2_div_rem() {
    let sixteen = PowerOf2::new(16).unwrap();

    assert_eq!(0, 15usize / sixteen);
    assert_eq!(1, 16usize / sixteen);
    assert_eq!(2, 47usize / sixteen);

    assert_eq!(15, 15usize % sixteen);
    assert_eq!(0, 16usize % sixteen);
    assert_eq!(15, 47usize % sixteen);
}

} // mod tests
