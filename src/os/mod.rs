//! OS layer - signal-safe primitives, process launching, signal catalog.
//!
//! Everything that talks to the kernel on behalf of the engine lives here.
//! The rest of the crate never installs signal handlers or calls blocking
//! syscalls directly.

pub mod signals;

#[cfg(unix)]
pub mod launch;
#[cfg(unix)]
pub mod unix;
