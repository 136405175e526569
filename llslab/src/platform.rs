//! Platform-specific memory acquisition.

mod linux;

pub(crate) use linux::LLPlatform;

use llslab_core::{Configuration, PowerOf2};

/// Production configuration: 16 KiB super-blocks.
#[derive(Default)]
pub(crate) struct LLConfiguration;

impl Configuration for LLConfiguration {
    const SUPER_BLOCK_SIZE: PowerOf2 = unsafe { PowerOf2::new_unchecked(16384) };
}
