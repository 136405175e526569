//! Thread Handle
//!
//! Every thread that allocates or releases through a domain first registers with it, claiming a record of hazard
//! slots. The handle is deliberately not `Send`: it stands for the calling thread's registration, and the hazard
//! protocol relies on one thread per record.

use core::{marker::PhantomData, ptr::NonNull};

use crate::internals::hazard::{HazardPointer, HazardRecord};

/// A thread's registration with a domain.
pub struct ThreadHandle<'a> {
    record: NonNull<HazardRecord>,
    _marker: PhantomData<&'a HazardRecord>,
}

impl<'a> ThreadHandle<'a> {
    pub(crate) fn new(record: NonNull<HazardRecord>) -> ThreadHandle<'a> {
        ThreadHandle { record, _marker: PhantomData }
    }

    pub(crate) fn into_record(self) -> NonNull<HazardRecord> { self.record }

    pub(crate) fn hazard(&self, index: usize) -> &HazardPointer {
        //  Safety:
        //  -   The record outlives the handle, per the lifetime on `self`.
        unsafe { self.record.as_ref() }.pointer(index)
    }
}
