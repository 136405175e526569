//! The API of llslab-core.

mod configuration;
mod domain;
mod heap;
mod platform;
mod size_class;
mod thread;

pub use configuration::{Configuration, PowerOf2, Properties};
pub use domain::{ConsistencyError, Domain};
pub use heap::Heap;
pub use platform::Platform;
pub use size_class::{SizeClass, SizeClassError};
pub use thread::ThreadHandle;
