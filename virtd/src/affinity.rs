//! CPU pinning policy for VM processes.
//!
//! VM `v` owns the contiguous range `[v * per_vm, v * per_vm + per_vm)`.
//! A range that does not fit the host is never applied, so a bad
//! mapping leaves the VM runnable on every CPU instead of none.

use crate::defs::text::{AFFINITY_HEADER, CPU_ABSENT, CPU_PRESENT};
use crate::registry::VmId;
use crate::VirtdError;
use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuRange {
	start: usize,
	len: usize,
}

impl CpuRange {
	pub fn start(&self) -> usize {
		self.start
	}

	pub fn end(&self) -> usize {
		self.start + self.len
	}

	pub fn cpus(&self) -> Range<usize> {
		self.start..self.end()
	}

	fn cpu_set(&self) -> Result<CpuSet, VirtdError> {
		let mut set = CpuSet::new();
		for cpu in self.cpus() {
			set.set(cpu)?;
		}
		Ok(set)
	}
}

/// Number of CPUs configured on the host, capped to what a `CpuSet`
/// can describe.
pub fn host_cpu_count() -> usize {
	// SAFETY: sysconf only reads a system constant.
	let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
	usize::try_from(n).unwrap_or(1).clamp(1, CpuSet::count())
}

pub fn allocate(
	vm_id: VmId,
	per_vm: usize,
	host_cpus: usize,
) -> Result<CpuRange, VirtdError> {
	let end = (vm_id.get() as usize)
		.checked_mul(per_vm)
		.and_then(|start| start.checked_add(per_vm));
	match end {
		Some(end) if end <= host_cpus => Ok(CpuRange {
			start: end - per_vm,
			len: per_vm,
		}),
		_ => Err(VirtdError::AffinityRange {
			vm_id,
			end: end.unwrap_or(usize::MAX),
			host_cpus,
		}),
	}
}

pub fn apply(pid: Pid, range: CpuRange) -> Result<(), VirtdError> {
	let set = range.cpu_set()?;
	sched_setaffinity(pid, &set)?;
	Ok(())
}

/// Reads the live mask of `pid`, one flag per host CPU.
pub fn query(pid: Pid, host_cpus: usize) -> Result<Vec<bool>, VirtdError> {
	let set = sched_getaffinity(pid)?;
	(0..host_cpus)
		.map(|cpu| set.is_set(cpu).map_err(VirtdError::from))
		.collect()
}

pub fn format_mask(mask: &[bool]) -> String {
	let mut out = String::with_capacity(AFFINITY_HEADER.len() + mask.len() + 1);
	out.push_str(AFFINITY_HEADER);
	out.extend(mask.iter().map(|on| if *on { CPU_PRESENT } else { CPU_ABSENT }));
	out.push('\n');
	out
}

/// Response sent when there is no mask to report.
pub fn placeholder() -> String {
	format!("{AFFINITY_HEADER}\n")
}

#[cfg(test)]
mod test {
	use super::*;

	fn id(raw: i32) -> VmId {
		VmId::new(raw, 64).unwrap()
	}

	#[test]
	fn test_allocation_is_contiguous() {
		for raw in 0..8 {
			let range = allocate(id(raw), 2, 16).unwrap();
			assert_eq!(range.start(), raw as usize * 2);
			assert_eq!(range.cpus().len(), 2);
		}

		let range = allocate(id(5), 2, 16).unwrap();
		assert_eq!(range.cpus(), 10..12);

		let range = allocate(id(3), 4, 16).unwrap();
		assert_eq!(range.cpus(), 12..16);
	}

	#[test]
	fn test_allocation_fails_open() {
		// The last CPU of the range would be 16 on a 16-CPU host.
		assert!(matches!(
			allocate(id(8), 2, 16),
			Err(VirtdError::AffinityRange { end: 18, host_cpus: 16, .. })
		));
		// Start fits but the end does not.
		assert!(allocate(id(7), 3, 22).is_err());
		assert!(allocate(id(0), 2, 1).is_err());
	}

	#[test]
	fn test_allocation_overflow_is_rejected() {
		let huge = 1usize << (usize::BITS - 2);
		assert!(matches!(
			allocate(id(4), huge, 16),
			Err(VirtdError::AffinityRange { end: usize::MAX, .. })
		));
		assert!(matches!(
			allocate(id(1), usize::MAX, 16),
			Err(VirtdError::AffinityRange { end: usize::MAX, .. })
		));
	}

	#[test]
	fn test_format_mask() {
		let mut mask = vec![false; 16];
		mask[10] = true;
		mask[11] = true;
		assert_eq!(
			format_mask(&mask),
			"cpu affinity:----------yy----\n"
		);
		assert_eq!(placeholder(), "cpu affinity:\n");
	}

	#[test]
	fn test_query_self() {
		let host = host_cpu_count();
		let mask = query(Pid::this(), host).unwrap();
		assert_eq!(mask.len(), host);
		assert!(mask.iter().any(|on| *on));
	}
}
