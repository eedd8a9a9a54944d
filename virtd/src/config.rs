//! Daemon settings, loaded from an optional TOML file.
//!
//! Every key is optional; missing keys fall back to the compiled-in
//! defaults from [`crate::defs`].

use crate::defs::{self, paths};
use crate::VirtdError;
use nix::sched::CpuSet;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
	/// Path of the local control socket.
	pub socket_path: PathBuf,
	pub qemu_bin: PathBuf,
	/// Directory holding the `vm-NNN` disk images.
	pub image_dir: PathBuf,
	/// VM ids are accepted in `[0, max_vm)`.
	pub max_vm: u32,
	pub cpus_per_vm: usize,
	pub memory_mib: u32,
	pub spice_base_port: u16,
	pub poll_timeout_ms: u64,
	pub log_file: Option<PathBuf>,
	pub pid_file: Option<PathBuf>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			socket_path: PathBuf::from(paths::SOCKET),
			qemu_bin: PathBuf::from(paths::QEMU_BIN),
			image_dir: PathBuf::from(paths::IMAGE_DIR),
			max_vm: defs::MAX_VM,
			cpus_per_vm: defs::PER_CPU,
			memory_mib: defs::DEFAULT_MEM_MIB,
			spice_base_port: defs::SPICE_BASE_PORT,
			poll_timeout_ms: defs::POLL_TIMEOUT_MS,
			log_file: None,
			pid_file: None,
		}
	}
}

impl Config {
	pub fn from_toml(s: &str) -> Result<Self, VirtdError> {
		let config: Self = toml::from_str(s)?;
		config.validate()?;
		Ok(config)
	}

	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, VirtdError> {
		let content = std::fs::read_to_string(path)?;
		Self::from_toml(&content)
	}

	pub fn validate(&self) -> Result<(), VirtdError> {
		if self.max_vm == 0 {
			return Err(VirtdError::InvalidConfig("max_vm must be positive"));
		}
		if self.cpus_per_vm == 0 {
			return Err(VirtdError::InvalidConfig(
				"cpus_per_vm must be positive",
			));
		}
		if self.cpus_per_vm > CpuSet::count() {
			return Err(VirtdError::InvalidConfig(
				"cpus_per_vm exceeds the CPU set size",
			));
		}
		if self.poll_timeout_ms == 0 || self.poll_timeout_ms > i32::MAX as u64 {
			return Err(VirtdError::InvalidConfig(
				"poll_timeout_ms out of range",
			));
		}
		if u32::from(self.spice_base_port) + self.max_vm > u32::from(u16::MAX) {
			return Err(VirtdError::InvalidConfig(
				"spice ports exceed 65535",
			));
		}
		Ok(())
	}

	pub fn poll_timeout(&self) -> Duration {
		Duration::from_millis(self.poll_timeout_ms)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_empty_file_is_default() {
		let config = Config::from_toml("").unwrap();
		assert_eq!(config, Config::default());
		assert_eq!(config.max_vm, 20);
		assert_eq!(config.cpus_per_vm, 2);
		assert_eq!(config.poll_timeout(), Duration::from_secs(60));
	}

	#[test]
	fn test_partial_file() {
		let config = Config::from_toml(
			r#"
			socket_path = "/tmp/virtd.socket"
			max_vm = 4
			log_file = "/tmp/virtd.log"
			"#,
		)
		.unwrap();
		assert_eq!(config.socket_path, PathBuf::from("/tmp/virtd.socket"));
		assert_eq!(config.max_vm, 4);
		assert_eq!(config.log_file, Some(PathBuf::from("/tmp/virtd.log")));
		assert_eq!(config.memory_mib, 2048);
		assert_eq!(config.pid_file, None);
	}

	#[test]
	fn test_rejects_unknown_and_invalid() {
		assert!(matches!(
			Config::from_toml("max_vms = 3"),
			Err(VirtdError::Config(_))
		));
		assert!(matches!(
			Config::from_toml("cpus_per_vm = 0"),
			Err(VirtdError::InvalidConfig(_))
		));
		assert!(matches!(
			Config::from_toml("cpus_per_vm = 4611686018427387904"),
			Err(VirtdError::InvalidConfig(_))
		));
		assert!(matches!(
			Config::from_toml("spice_base_port = 65530"),
			Err(VirtdError::InvalidConfig(_))
		));
		assert!(matches!(
			Config::from_toml("poll_timeout_ms = 0"),
			Err(VirtdError::InvalidConfig(_))
		));
	}

	#[test]
	fn test_load_from_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("virtd.toml");
		std::fs::write(&path, "memory_mib = 1024\n").unwrap();

		let config = Config::load(&path).unwrap();
		assert_eq!(config.memory_mib, 1024);

		assert!(Config::load(dir.path().join("missing.toml")).is_err());
	}
}
