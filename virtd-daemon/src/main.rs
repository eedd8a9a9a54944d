use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use virtd::{Config, Daemon, VirtdError};

/// Local supervisor for QEMU virtual machines
#[derive(Parser, Debug)]
#[command(name = "virtd", version, about)]
struct Args {
	/// TOML configuration file
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Control socket path
	#[arg(short, long)]
	socket: Option<PathBuf>,

	/// QEMU binary used to start VMs
	#[arg(long)]
	qemu_bin: Option<PathBuf>,

	/// Directory holding the vm-NNN disk images
	#[arg(long)]
	image_dir: Option<PathBuf>,

	/// Append log lines to this file as well as stderr
	#[arg(long)]
	log_file: Option<PathBuf>,

	/// Write the daemon pid to this file
	#[arg(long)]
	pid_file: Option<PathBuf>,

	/// Accept VM ids in [0, MAX_VM)
	#[arg(long)]
	max_vm: Option<u32>,
}

impl Args {
	fn into_config(self) -> Result<Config, VirtdError> {
		let mut config = match &self.config {
			Some(path) => Config::load(path)?,
			None => Config::default(),
		};
		if let Some(v) = self.socket {
			config.socket_path = v;
		}
		if let Some(v) = self.qemu_bin {
			config.qemu_bin = v;
		}
		if let Some(v) = self.image_dir {
			config.image_dir = v;
		}
		if let Some(v) = self.log_file {
			config.log_file = Some(v);
		}
		if let Some(v) = self.pid_file {
			config.pid_file = Some(v);
		}
		if let Some(v) = self.max_vm {
			config.max_vm = v;
		}
		config.validate()?;
		Ok(config)
	}
}

fn main() -> Result<(), VirtdError> {
	let config = Args::parse().into_config()?;
	let _log_guard = virtd::logging::init(config.log_file.as_deref());

	info!("===========   start   ==============");
	if let Some(path) = &config.pid_file {
		match virtd::pidfile::write(path) {
			Ok(pid) => info!(pid, path = %path.display(), "wrote pid file"),
			Err(e) => warn!(path = %path.display(), error = ?e, "could not write pid file"),
		}
	}
	info!(pid = std::process::id(), "virtd running");

	let daemon = Daemon::bind(config).map_err(|e| {
		error!(error = ?e, "could not set up control socket");
		e
	})?;
	daemon.run()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_cli_overrides() {
		let args = Args::parse_from([
			"virtd",
			"--socket",
			"/tmp/v.socket",
			"--max-vm",
			"4",
			"--pid-file",
			"/tmp/v.pid",
		]);
		let config = args.into_config().unwrap();
		assert_eq!(config.socket_path, PathBuf::from("/tmp/v.socket"));
		assert_eq!(config.max_vm, 4);
		assert_eq!(config.pid_file, Some(PathBuf::from("/tmp/v.pid")));
		assert_eq!(config.cpus_per_vm, 2);
	}

	#[test]
	fn test_invalid_override() {
		let args = Args::parse_from(["virtd", "--max-vm", "0"]);
		assert!(matches!(
			args.into_config(),
			Err(VirtdError::InvalidConfig(_))
		));
	}
}
