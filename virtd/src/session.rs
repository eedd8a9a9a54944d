//! The single client session and its request dispatch.

use crate::codec::{self, MessageKind};
use crate::defs::wire::CANCELLED_VM_ID;
use crate::registry::VmId;
use crate::supervisor::Supervisor;
use crate::VirtdError;
use std::io::{Read, Write};
use tracing::{debug, info, warn};

/// Connection slot holding at most one client stream.
#[derive(Debug)]
pub struct Session<S> {
	stream: Option<S>,
}

impl<S> Default for Session<S> {
	fn default() -> Self {
		Self { stream: None }
	}
}

impl<S: Read + Write> Session<S> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_connected(&self) -> bool {
		self.stream.is_some()
	}

	pub fn stream(&self) -> Option<&S> {
		self.stream.as_ref()
	}

	/// Takes ownership of a new client stream. The stream is handed
	/// back when a session is already active.
	pub fn attach(&mut self, stream: S) -> Result<(), S> {
		if self.stream.is_some() {
			return Err(stream);
		}
		self.stream = Some(stream);
		info!("client connected");
		Ok(())
	}

	/// Ends the session, returning the stream so the caller can
	/// deregister it before it is closed. Safe to call repeatedly.
	pub fn detach(&mut self) -> Option<S> {
		match self.stream.take() {
			Some(stream) => {
				info!("client disconnected");
				Some(stream)
			}
			None => {
				info!("client already disconnected");
				None
			}
		}
	}

	/// Serves one request from the client. Any error means the session
	/// is no longer usable and must be detached.
	pub fn handle(&mut self, sup: &mut Supervisor) -> Result<(), VirtdError> {
		let Some(stream) = self.stream.as_mut() else {
			return Err(VirtdError::Disconnected);
		};
		dispatch(stream, sup)
	}
}

/// Reads one message kind, acknowledges it and runs the exchange that
/// belongs to it.
pub fn dispatch<S: Read + Write>(
	stream: &mut S,
	sup: &mut Supervisor,
) -> Result<(), VirtdError> {
	let word = codec::read_word(stream)?;
	codec::send_ack(stream)?;

	let kind = MessageKind::from_word(word);
	debug!(?kind, "received message");

	match kind {
		Some(MessageKind::QueryStatus) => {
			let text = sup.status_report();
			codec::write_payload(stream, &text)?;
		}
		Some(MessageKind::Launch) => {
			if let Some(vm_id) = read_vm_id(stream, sup.config().max_vm)? {
				// Failures are logged by the supervisor and are not
				// reported on the wire.
				let _ = sup.launch(vm_id);
			}
		}
		Some(MessageKind::Kill) => {
			if let Some(vm_id) = read_vm_id(stream, sup.config().max_vm)? {
				let _ = sup.kill(vm_id);
			}
		}
		Some(MessageKind::GetAffinity) => {
			let text = match read_vm_id(stream, sup.config().max_vm)? {
				Some(vm_id) => sup.affinity_report(vm_id),
				None => crate::affinity::placeholder(),
			};
			codec::write_payload(stream, &text)?;
		}
		None | Some(MessageKind::Ack) => {
			warn!(kind = word, "unknown message kind");
		}
	}
	Ok(())
}

/// Reads and acknowledges a VM id. Cancelled and out-of-range ids
/// yield `None`.
fn read_vm_id<S: Read + Write>(
	stream: &mut S,
	max_vm: u32,
) -> Result<Option<VmId>, VirtdError> {
	let raw = codec::read_word(stream)?;
	codec::send_ack(stream)?;

	if raw == CANCELLED_VM_ID {
		debug!("request cancelled by client");
		return Ok(None);
	}
	let vm_id = VmId::new(raw, max_vm);
	if vm_id.is_none() {
		warn!(vm_id = raw, max_vm, "vm id out of range");
	}
	Ok(vm_id)
}
