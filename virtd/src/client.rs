//! Client half of the control protocol, for front ends and tests.

use crate::codec::{self, MessageKind, Word};
use crate::defs::wire::CANCELLED_VM_ID;
use crate::VirtdError;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

#[derive(Debug)]
pub struct Client<S> {
	stream: S,
}

impl Client<UnixStream> {
	pub fn connect<P: AsRef<Path>>(path: P) -> Result<Self, VirtdError> {
		let stream = UnixStream::connect(path)?;
		Ok(Self::new(stream))
	}
}

impl<S: Read + Write> Client<S> {
	pub fn new(stream: S) -> Self {
		Self { stream }
	}

	pub fn into_inner(self) -> S {
		self.stream
	}

	fn announce(&mut self, kind: MessageKind) -> Result<(), VirtdError> {
		codec::write_word(&mut self.stream, kind.to_word())?;
		codec::expect_ack(&mut self.stream)
	}

	fn send_vm_id(&mut self, vm_id: Word) -> Result<(), VirtdError> {
		codec::write_word(&mut self.stream, vm_id)?;
		codec::expect_ack(&mut self.stream)
	}

	pub fn query_status(&mut self) -> Result<String, VirtdError> {
		self.announce(MessageKind::QueryStatus)?;
		codec::read_payload(&mut self.stream)
	}

	/// Requests a launch. The daemon gives no indication of whether the
	/// VM was actually started; use [`Client::query_status`] for that.
	pub fn launch(&mut self, vm_id: Word) -> Result<(), VirtdError> {
		self.announce(MessageKind::Launch)?;
		self.send_vm_id(vm_id)
	}

	pub fn kill(&mut self, vm_id: Word) -> Result<(), VirtdError> {
		self.announce(MessageKind::Kill)?;
		self.send_vm_id(vm_id)
	}

	/// Completes a kill exchange without naming a VM.
	pub fn cancel_kill(&mut self) -> Result<(), VirtdError> {
		self.kill(CANCELLED_VM_ID)
	}

	pub fn get_affinity(&mut self, vm_id: Word) -> Result<String, VirtdError> {
		self.announce(MessageKind::GetAffinity)?;
		self.send_vm_id(vm_id)?;
		codec::read_payload(&mut self.stream)
	}
}
