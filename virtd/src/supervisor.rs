//! Spawning, killing and reaping VM processes.
//!
//! All registry changes happen here, on the event loop's thread. Child
//! exits are only ever observed by polling [`Supervisor::reap`], never
//! from a signal handler.

use crate::affinity;
use crate::config::Config;
use crate::defs::text::STATUS_HEADER;
use crate::profile::LaunchProfile;
use crate::registry::{VmId, VmRegistry};
use crate::VirtdError;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::fmt::Write;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct Supervisor {
	config: Config,
	registry: VmRegistry,
	host_cpus: usize,
}

impl Supervisor {
	pub fn new(config: Config) -> Self {
		let host_cpus = affinity::host_cpu_count();
		Self::with_host_cpus(config, host_cpus)
	}

	pub fn with_host_cpus(config: Config, host_cpus: usize) -> Self {
		Self {
			config,
			registry: VmRegistry::new(),
			host_cpus,
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn registry(&self) -> &VmRegistry {
		&self.registry
	}

	pub fn host_cpus(&self) -> usize {
		self.host_cpus
	}

	/// Starts the VM for `vm_id` and pins it to its CPU range.
	///
	/// A failed spawn rolls the registry entry back. Pinning failures
	/// leave the VM running unpinned.
	pub fn launch(&mut self, vm_id: VmId) -> Result<Pid, VirtdError> {
		if self.registry.find(vm_id).is_some() {
			warn!(%vm_id, "VM already launched");
			return Err(VirtdError::VmExists(vm_id));
		}

		let profile = LaunchProfile::new(&self.config, vm_id);
		self.registry.insert_if_absent(vm_id)?;
		debug!(%vm_id, "created registry entry");

		let child = match profile.command().spawn() {
			Ok(child) => child,
			Err(e) => {
				self.registry.remove(vm_id);
				error!(
					%vm_id,
					program = %profile.program.display(),
					error = %e,
					"failed to spawn VM, entry rolled back"
				);
				return Err(VirtdError::Spawn(e));
			}
		};
		// The child is reaped through waitpid, not through the handle.
		let pid = Pid::from_raw(child.id() as i32);
		drop(child);

		if let Err(e) = self.registry.set_pid(vm_id, pid) {
			error!(%vm_id, %pid, error = ?e, "could not record VM pid");
			self.registry.remove(vm_id);
			let _ = kill(pid, Signal::SIGKILL);
			return Err(e);
		}
		info!(%vm_id, %pid, "launched VM");

		self.pin(vm_id, pid);
		Ok(pid)
	}

	fn pin(&self, vm_id: VmId, pid: Pid) {
		let range = match affinity::allocate(
			vm_id,
			self.config.cpus_per_vm,
			self.host_cpus,
		) {
			Ok(range) => range,
			Err(e) => {
				warn!(%vm_id, %pid, error = ?e, "no CPU range for VM, leaving it unpinned");
				return;
			}
		};
		match affinity::apply(pid, range) {
			Ok(()) => info!(%vm_id, %pid, cpus = ?range.cpus(), "pinned VM"),
			Err(e) => {
				warn!(%vm_id, %pid, cpus = ?range.cpus(), error = ?e, "failed to pin VM")
			}
		}
	}

	/// Forgets `vm_id` and sends its process SIGKILL.
	pub fn kill(&mut self, vm_id: VmId) -> Result<Option<Pid>, VirtdError> {
		// Removal comes first so a concurrent exit cannot be reaped
		// against an entry that is already going away.
		let Some(entry) = self.registry.remove(vm_id) else {
			warn!(%vm_id, "no running VM with this id");
			return Err(VirtdError::VmNotFound(vm_id));
		};
		let Some(pid) = entry.pid() else {
			return Ok(None);
		};
		info!(%vm_id, %pid, "killing VM");
		if let Err(e) = kill(pid, Signal::SIGKILL) {
			warn!(%vm_id, %pid, error = %e, "failed to signal VM");
		}
		Ok(Some(pid))
	}

	/// Collects every exited child without blocking and drops the
	/// matching registry entries. Returns the number of children reaped.
	pub fn reap(&mut self) -> usize {
		let mut reaped = 0;
		loop {
			let status = match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
				Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
				Err(Errno::EINTR) => continue,
				Err(e) => {
					warn!(error = %e, "waitpid failed");
					break;
				}
				Ok(status) => status,
			};
			let Some(pid) = status.pid() else {
				break;
			};
			reaped += 1;
			match self.registry.remove_by_pid(pid) {
				Some(entry) => {
					info!(vm_id = %entry.vm_id, %pid, ?status, "VM process exited")
				}
				None => debug!(%pid, ?status, "reaped untracked child"),
			}
		}
		reaped
	}

	/// Text listing of every known VM, in launch order.
	pub fn status_report(&self) -> String {
		let mut out = String::from(STATUS_HEADER);
		for entry in self.registry.iter() {
			let _ = match entry.pid() {
				Some(pid) => writeln!(out, "\t{}\t{}", entry.vm_id, pid),
				None => writeln!(out, "\t{}\t-", entry.vm_id),
			};
		}
		out
	}

	/// Live CPU mask of the VM's process, or the placeholder when there
	/// is nothing to report.
	pub fn affinity_report(&self, vm_id: VmId) -> String {
		let Some(pid) = self.registry.find(vm_id).and_then(|e| e.pid())
		else {
			warn!(%vm_id, "affinity requested for unknown VM");
			return affinity::placeholder();
		};
		match affinity::query(pid, self.host_cpus) {
			Ok(mask) => affinity::format_mask(&mask),
			Err(e) => {
				warn!(%vm_id, %pid, error = ?e, "failed to read VM affinity");
				affinity::placeholder()
			}
		}
	}
}
