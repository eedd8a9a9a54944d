use crate::registry::VmId;
use nix::unistd::Pid;
use std::io;

#[derive(Debug)]
pub enum VirtdError {
	Io(io::Error),
	Nix(nix::Error),
	EventManager(event_manager::Error),
	Config(toml::de::Error),
	InvalidConfig(&'static str),
	/// The peer closed the connection or a read came up short.
	Disconnected,
	Protocol(&'static str),
	VmIdOutOfRange(i32),
	VmExists(VmId),
	VmNotFound(VmId),
	PidInUse(Pid),
	AffinityRange {
		vm_id: VmId,
		end: usize,
		host_cpus: usize,
	},
	Spawn(io::Error),
}

impl From<io::Error> for VirtdError {
	fn from(err: io::Error) -> Self {
		match err.kind() {
			io::ErrorKind::UnexpectedEof
			| io::ErrorKind::BrokenPipe
			| io::ErrorKind::ConnectionReset => Self::Disconnected,
			_ => Self::Io(err),
		}
	}
}

impl From<nix::Error> for VirtdError {
	fn from(err: nix::Error) -> Self {
		Self::Nix(err)
	}
}

impl From<event_manager::Error> for VirtdError {
	fn from(err: event_manager::Error) -> Self {
		Self::EventManager(err)
	}
}

impl From<toml::de::Error> for VirtdError {
	fn from(err: toml::de::Error) -> Self {
		Self::Config(err)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_peer_loss_maps_to_disconnected() {
		for kind in [
			io::ErrorKind::UnexpectedEof,
			io::ErrorKind::BrokenPipe,
			io::ErrorKind::ConnectionReset,
		] {
			let err = VirtdError::from(io::Error::from(kind));
			assert!(matches!(err, VirtdError::Disconnected));
		}

		let err = VirtdError::from(io::Error::from(
			io::ErrorKind::PermissionDenied,
		));
		assert!(matches!(err, VirtdError::Io(_)));
	}
}
