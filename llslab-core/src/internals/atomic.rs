//! A pointer-typed atomic cell, trading raw pointers for `Option<NonNull>`.

use core::{
    ptr::{self, NonNull},
    sync::atomic::{self, Ordering},
};

//  Loads synchronize with the release half of stores and exchanges, so that whatever was written behind a pointer
//  before publication is visible to the reader.
pub(crate) struct AtomicPtr<T>(atomic::AtomicPtr<T>);

impl<T> AtomicPtr<T> {
    /// Creates a null instance.
    pub(crate) const fn new() -> Self { Self(atomic::AtomicPtr::new(ptr::null_mut())) }

    pub(crate) fn load(&self) -> Option<NonNull<T>> { NonNull::new(self.0.load(Ordering::Acquire)) }

    pub(crate) fn store(&self, ptr: Option<NonNull<T>>) { self.0.store(as_raw(ptr), Ordering::Release) }

    /// Replaces the current pointer, returning it.
    pub(crate) fn swap(&self, ptr: Option<NonNull<T>>) -> Option<NonNull<T>> {
        NonNull::new(self.0.swap(as_raw(ptr), Ordering::AcqRel))
    }

    /// Installs `new` if the current pointer is `current`; the observed pointer is returned on failure.
    pub(crate) fn compare_exchange(
        &self,
        current: Option<NonNull<T>>,
        new: Option<NonNull<T>>,
    ) -> Result<(), Option<NonNull<T>>> {
        self.0
            .compare_exchange(as_raw(current), as_raw(new), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(NonNull::new)
    }
}

impl<T> Default for AtomicPtr<T> {
    fn default() -> Self { Self::new() }
}

//
//  Implementation
//

fn as_raw<T>(ptr: Option<NonNull<T>>) -> *mut T {
    ptr.map(NonNull::as_ptr).unwrap_or_else(ptr::null_mut)
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn atomic_ptr_load_store_swap() {
    let value = 42u64;
    let other = 43u64;
    let (a, b) = (NonNull::from(&value), NonNull::from(&other));

    let ptr = AtomicPtr::new();
    assert_eq!(None, ptr.load());

    ptr.store(Some(a));
    assert_eq!(Some(a), ptr.load());

    assert_eq!(Some(a), ptr.swap(Some(b)));
    assert_eq!(Some(b), ptr.swap(None));
    assert_eq!(None, ptr.load());
}

#[test]
fn atomic_ptr_compare_exchange() {
    let value = 42u64;
    let a = NonNull::from(&value);

    let ptr = AtomicPtr::default();

    assert_eq!(Err(None), ptr.compare_exchange(Some(a), None));
    assert_eq!(Ok(()), ptr.compare_exchange(None, Some(a)));
    assert_eq!(Err(Some(a)), ptr.compare_exchange(None, Some(a)));
    assert_eq!(Ok(()), ptr.compare_exchange(Some(a), None));
}

} // mod tests
