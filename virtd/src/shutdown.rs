use crate::VirtdError;
use std::os::unix::io::{AsRawFd, RawFd};
use vmm_sys_util::eventfd::EventFd;

/// Event fd watched by the event loop. Any write asks the loop to
/// return after the current iteration.
#[derive(Debug)]
pub struct ShutdownEvent(EventFd);

impl ShutdownEvent {
	pub fn new() -> Result<Self, VirtdError> {
		let fd = EventFd::new(libc::EFD_NONBLOCK | libc::EFD_CLOEXEC)?;
		Ok(Self(fd))
	}

	pub fn handle(&self) -> Result<ShutdownHandle, VirtdError> {
		Ok(ShutdownHandle(self.0.try_clone()?))
	}

	/// Clears a pending request, returning whether there was one.
	pub fn consume(&self) -> bool {
		self.0.read().is_ok()
	}
}

impl AsRawFd for ShutdownEvent {
	fn as_raw_fd(&self) -> RawFd {
		self.0.as_raw_fd()
	}
}

/// Cloneable trigger for [`ShutdownEvent`], usable from other threads.
#[derive(Debug)]
pub struct ShutdownHandle(EventFd);

impl ShutdownHandle {
	pub fn shutdown(&self) -> Result<(), VirtdError> {
		self.0.write(1)?;
		Ok(())
	}

	pub fn try_clone(&self) -> Result<Self, VirtdError> {
		Ok(Self(self.0.try_clone()?))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_trigger() {
		let ev = ShutdownEvent::new().unwrap();
		assert!(!ev.consume());

		let handle = ev.handle().unwrap();
		handle.try_clone().unwrap().shutdown().unwrap();
		assert!(ev.consume());
		assert!(!ev.consume());
	}

	#[test]
	fn test_not_inherited_by_children() {
		let ev = ShutdownEvent::new().unwrap();
		let handle = ev.handle().unwrap();
		for fd in [ev.as_raw_fd(), handle.0.as_raw_fd()] {
			// SAFETY: fd is owned by a live EventFd.
			let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
			assert!(flags >= 0);
			assert_ne!(flags & libc::FD_CLOEXEC, 0);
		}
	}
}
