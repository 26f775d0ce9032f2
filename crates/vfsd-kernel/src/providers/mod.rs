//! Built-in providers.
//!
//! Service adapters live outside the core; the only provider shipped here
//! is the in-memory one, which also serves as the default `extends` target
//! for local provider manifests.

mod memory;

pub use memory::MemoryProvider;
