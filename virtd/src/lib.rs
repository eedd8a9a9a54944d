#![deny(missing_copy_implementations)]

//! Supervisor daemon for QEMU virtual machines.
//!
//! A single local client talks to the daemon over a Unix socket to
//! launch, kill and inspect VM processes. Each VM is pinned to its own
//! slice of host CPUs.

pub mod affinity;
pub mod client;
pub mod codec;
pub mod config;
pub mod defs;
mod error;
pub mod event_loop;
pub mod logging;
pub mod pidfile;
pub mod profile;
pub mod registry;
pub mod session;
pub mod shutdown;
pub mod supervisor;

pub use crate::client::Client;
pub use crate::config::Config;
pub use crate::error::VirtdError;
pub use crate::event_loop::Daemon;
pub use crate::registry::VmId;
pub use crate::shutdown::ShutdownHandle;

#[macro_export]
macro_rules! time_it {
	($block:block) => {{
		let t = std::time::Instant::now();
		($block, t.elapsed())
	}};
}
