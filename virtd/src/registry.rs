use crate::VirtdError;
use nix::unistd::Pid;
use std::fmt;

/// Identifier of a VM slot, always below the configured VM limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmId(u32);

impl VmId {
	/// Validates a raw wire value against the VM limit.
	pub fn new(raw: i32, max_vm: u32) -> Option<Self> {
		u32::try_from(raw)
			.ok()
			.filter(|id| *id < max_vm)
			.map(Self)
	}

	pub fn get(self) -> u32 {
		self.0
	}
}

impl fmt::Display for VmId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmEntry {
	pub vm_id: VmId,
	pid: Option<Pid>,
}

impl VmEntry {
	pub fn pid(&self) -> Option<Pid> {
		self.pid
	}
}

/// In-memory table of known VMs, kept in insertion order.
///
/// The number of entries is bounded by the VM limit, so lookups are
/// plain scans over a vector.
#[derive(Debug, Default)]
pub struct VmRegistry {
	entries: Vec<VmEntry>,
}

impl VmRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Adds an entry with no process attached yet.
	pub fn insert_if_absent(
		&mut self,
		vm_id: VmId,
	) -> Result<&VmEntry, VirtdError> {
		if self.find(vm_id).is_some() {
			return Err(VirtdError::VmExists(vm_id));
		}
		self.entries.push(VmEntry { vm_id, pid: None });
		Ok(&self.entries[self.entries.len() - 1])
	}

	pub fn find(&self, vm_id: VmId) -> Option<&VmEntry> {
		self.entries.iter().find(|e| e.vm_id == vm_id)
	}

	pub fn find_by_pid(&self, pid: Pid) -> Option<&VmEntry> {
		self.entries.iter().find(|e| e.pid == Some(pid))
	}

	/// Records the process backing `vm_id`. A pid can only be set once
	/// per entry and never while another live entry holds it.
	pub fn set_pid(
		&mut self,
		vm_id: VmId,
		pid: Pid,
	) -> Result<(), VirtdError> {
		if let Some(other) = self.find_by_pid(pid) {
			if other.vm_id != vm_id {
				return Err(VirtdError::PidInUse(pid));
			}
		}
		let entry = self
			.entries
			.iter_mut()
			.find(|e| e.vm_id == vm_id)
			.ok_or(VirtdError::VmNotFound(vm_id))?;
		if entry.pid.is_some() {
			return Err(VirtdError::PidInUse(pid));
		}
		entry.pid = Some(pid);
		Ok(())
	}

	pub fn remove(&mut self, vm_id: VmId) -> Option<VmEntry> {
		let pos = self.entries.iter().position(|e| e.vm_id == vm_id)?;
		Some(self.entries.remove(pos))
	}

	pub fn remove_by_pid(&mut self, pid: Pid) -> Option<VmEntry> {
		let pos =
			self.entries.iter().position(|e| e.pid == Some(pid))?;
		Some(self.entries.remove(pos))
	}

	pub fn iter(&self) -> impl Iterator<Item = &VmEntry> {
		self.entries.iter()
	}
}
