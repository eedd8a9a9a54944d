//! Drives a real daemon over its control socket, with a shell script
//! standing in for QEMU.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serial_test::serial;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use virtd::{affinity, codec};
use virtd::{Client, Config, Daemon, ShutdownHandle, VirtdError};

struct Harness {
	_dir: TempDir,
	config: Config,
	shutdown: ShutdownHandle,
	worker: Option<JoinHandle<Result<(), VirtdError>>>,
}

impl Harness {
	fn start(vm_script: &str) -> Self {
		let dir = tempfile::tempdir().unwrap();
		let qemu = dir.path().join("fake-qemu");
		std::fs::write(&qemu, format!("#!/bin/sh\n{vm_script}\n")).unwrap();
		std::fs::set_permissions(&qemu, std::fs::Permissions::from_mode(0o755))
			.unwrap();

		let config = Config {
			socket_path: dir.path().join("virtd.socket"),
			qemu_bin: qemu,
			image_dir: dir.path().to_path_buf(),
			poll_timeout_ms: 50,
			..Config::default()
		};
		let daemon = Daemon::bind(config.clone()).unwrap();
		let shutdown = daemon.shutdown_handle().unwrap();
		let worker = thread::spawn(move || daemon.run());

		Self {
			_dir: dir,
			config,
			shutdown,
			worker: Some(worker),
		}
	}

	fn client(&self) -> Client<UnixStream> {
		Client::connect(&self.config.socket_path).unwrap()
	}

	fn stop(mut self) {
		self.shutdown.shutdown().unwrap();
		if let Some(worker) = self.worker.take() {
			worker.join().unwrap().unwrap();
		}
		assert!(!self.config.socket_path.exists());
	}
}

/// Pid listed for `vm_id` in a status response.
fn listed_pid(status: &str, vm_id: u32) -> Option<Pid> {
	status.lines().find_map(|line| {
		let mut cols = line.split('\t').filter(|c| !c.is_empty());
		let id: u32 = cols.next()?.trim().parse().ok()?;
		let pid: i32 = cols.next()?.trim().parse().ok()?;
		(id == vm_id).then(|| Pid::from_raw(pid))
	})
}

fn eventually(mut cond: impl FnMut() -> bool) -> bool {
	let deadline = Instant::now() + Duration::from_secs(5);
	while Instant::now() < deadline {
		if cond() {
			return true;
		}
		thread::sleep(Duration::from_millis(25));
	}
	false
}

#[test]
#[serial]
fn test_empty_status() {
	let h = Harness::start("exec sleep 30");
	let status = h.client().query_status().unwrap();
	assert_eq!(status, "\nNow running vm:\n\tvm_id\tpid\n");
	h.stop();
}

#[test]
#[serial]
fn test_launch_status_affinity_kill() {
	let h = Harness::start("exec sleep 30");
	let mut client = h.client();

	client.launch(5).unwrap();
	let status = client.query_status().unwrap();
	let pid = listed_pid(&status, 5).expect("VM 5 listed");
	assert!(status.contains(&format!("5\t{pid}")));
	assert_eq!(kill(pid, None), Ok(()));

	let report = client.get_affinity(5).unwrap();
	assert!(report.starts_with("cpu affinity:"));
	assert!(report.ends_with('\n'));
	let mask = report.trim_end().trim_start_matches("cpu affinity:");
	assert!(mask.chars().all(|c| c == 'y' || c == '-'));
	assert!(mask.contains('y'));

	// Wherever CPUs 10-11 exist and are usable, VM 5 owns exactly them.
	let host = affinity::host_cpu_count();
	let own = affinity::query(Pid::this(), host).unwrap();
	if host >= 12 && own[10] && own[11] {
		let expected: String = (0..host)
			.map(|i| if i == 10 || i == 11 { 'y' } else { '-' })
			.collect();
		assert_eq!(mask, expected);
	}

	client.kill(5).unwrap();
	let status = client.query_status().unwrap();
	assert!(listed_pid(&status, 5).is_none());
	assert!(eventually(|| kill(pid, None) == Err(Errno::ESRCH)));

	h.stop();
}

#[test]
#[serial]
fn test_duplicate_launch_keeps_one_entry() {
	let h = Harness::start("exec sleep 30");
	let mut client = h.client();

	client.launch(1).unwrap();
	client.launch(1).unwrap();
	let status = client.query_status().unwrap();
	assert_eq!(status.lines().filter(|l| l.starts_with("\t1\t")).count(), 1);

	client.kill(1).unwrap();
	h.stop();
}

#[test]
#[serial]
fn test_kill_then_relaunch() {
	let h = Harness::start("exec sleep 30");
	let mut client = h.client();

	client.launch(3).unwrap();
	let first = listed_pid(&client.query_status().unwrap(), 3).unwrap();
	client.kill(3).unwrap();
	client.launch(3).unwrap();
	let second = listed_pid(&client.query_status().unwrap(), 3).unwrap();
	assert_ne!(first, second);

	client.kill(3).unwrap();
	h.stop();
}

#[test]
#[serial]
fn test_exited_vm_disappears() {
	let h = Harness::start("sleep 0.2");
	let mut client = h.client();

	client.launch(2).unwrap();
	assert!(eventually(|| {
		let status = client.query_status().unwrap();
		listed_pid(&status, 2).is_none()
	}));
	h.stop();
}

#[test]
#[serial]
fn test_unknown_vm_affinity_and_cancel() {
	let h = Harness::start("exec sleep 30");
	let mut client = h.client();

	assert_eq!(client.get_affinity(7).unwrap(), "cpu affinity:\n");
	assert_eq!(client.get_affinity(-1).unwrap(), "cpu affinity:\n");
	client.cancel_kill().unwrap();
	client.kill(9).unwrap();
	client.launch(100).unwrap();

	// The session survived all of it.
	let status = client.query_status().unwrap();
	assert_eq!(status, "\nNow running vm:\n\tvm_id\tpid\n");
	h.stop();
}

#[test]
#[serial]
fn test_reconnect_after_disconnect() {
	let h = Harness::start("exec sleep 30");

	let mut first = h.client();
	first.launch(4).unwrap();
	drop(first);

	// The daemon frees the slot once it sees the hangup.
	let mut second = None;
	assert!(eventually(|| {
		let mut client = h.client();
		let ok = client.query_status().is_ok();
		if ok {
			second = Some(client);
		}
		ok
	}));
	let mut second = second.unwrap();
	assert!(listed_pid(&second.query_status().unwrap(), 4).is_some());

	second.kill(4).unwrap();
	h.stop();
}

#[test]
#[serial]
fn test_second_client_is_refused() {
	let h = Harness::start("exec sleep 30");
	let mut active = h.client();
	active.query_status().unwrap();

	let mut extra = h.client().into_inner();
	extra
		.set_read_timeout(Some(Duration::from_secs(2)))
		.unwrap();
	// The daemon closes the extra connection instead of serving it.
	let _ = codec::write_word(&mut extra, 0);
	assert!(codec::expect_ack(&mut extra).is_err());

	assert!(active.query_status().is_ok());
	h.stop();
}

#[test]
#[serial]
fn test_half_sent_request_ends_session() {
	let h = Harness::start("exec sleep 30");

	let mut raw = h.client().into_inner();
	codec::write_word(&mut raw, 1).unwrap();
	codec::expect_ack(&mut raw).unwrap();
	drop(raw);

	assert!(eventually(|| h.client().query_status().is_ok()));
	h.stop();
}
