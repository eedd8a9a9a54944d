//! Single-threaded readiness loop driving the control socket.
//!
//! Each iteration reaps exited children, waits (bounded by the poll
//! timeout) for the listener, the active client or the shutdown event
//! to become readable, dispatches what is ready and reaps once more.
//! A dispatch runs to completion and blocks the whole daemon while it
//! does, which is fine with a single client.

use crate::config::Config;
use crate::session::Session;
use crate::shutdown::{ShutdownEvent, ShutdownHandle};
use crate::supervisor::Supervisor;
use crate::VirtdError;
use event_manager::{
	EventManager, EventOps, EventSet, Events, MutEventSubscriber,
	SubscriberOps,
};
use std::io;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct Daemon {
	listener: UnixListener,
	socket_path: PathBuf,
	session: Session<UnixStream>,
	supervisor: Supervisor,
	shutdown: ShutdownEvent,
	running: bool,
}

impl Daemon {
	/// Binds the control socket, replacing any stale socket file.
	pub fn bind(config: Config) -> Result<Self, VirtdError> {
		config.validate()?;
		let socket_path = config.socket_path.clone();
		match std::fs::remove_file(&socket_path) {
			Ok(()) => debug!(path = %socket_path.display(), "removed stale socket"),
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => return Err(VirtdError::Io(e)),
		}
		let listener = UnixListener::bind(&socket_path).map_err(VirtdError::Io)?;
		listener.set_nonblocking(true).map_err(VirtdError::Io)?;
		info!(path = %socket_path.display(), "listening");

		Ok(Self {
			listener,
			socket_path,
			session: Session::new(),
			supervisor: Supervisor::new(config),
			shutdown: ShutdownEvent::new()?,
			running: true,
		})
	}

	pub fn shutdown_handle(&self) -> Result<ShutdownHandle, VirtdError> {
		self.shutdown.handle()
	}

	pub fn supervisor(&self) -> &Supervisor {
		&self.supervisor
	}

	/// Runs until a shutdown is requested or waiting for events fails.
	pub fn run(self) -> Result<(), VirtdError> {
		let timeout = self.supervisor.config().poll_timeout().as_millis() as i32;
		let socket_path = self.socket_path.clone();

		let mut mgr = EventManager::<Daemon>::new()?;
		let id = mgr.add_subscriber(self);
		info!("event loop started");

		let res = loop {
			let daemon = mgr.subscriber_mut(id)?;
			daemon.supervisor.reap();
			if !daemon.running {
				break Ok(());
			}

			// An interrupted wait comes back as Ok(0) and is simply retried.
			let (res, elapsed) = crate::time_it!({ mgr.run_with_timeout(timeout) });
			match res {
				Ok(n) => debug!(ready = n, ?elapsed, "loop iteration"),
				Err(e) => {
					error!(error = ?e, "waiting for events failed");
					break Err(VirtdError::from(e));
				}
			}

			mgr.subscriber_mut(id)?.supervisor.reap();
		};

		info!("event loop stopped");
		if let Err(e) = std::fs::remove_file(&socket_path) {
			warn!(path = %socket_path.display(), error = %e, "could not remove socket");
		}
		res
	}

	fn accept(&mut self, ops: &mut EventOps) {
		let stream = match self.listener.accept() {
			Ok((stream, _)) => stream,
			Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
			Err(e) => {
				warn!(error = %e, "accept failed");
				return;
			}
		};
		if self.session.is_connected() {
			warn!("rejecting connection, a client session is already active");
			return;
		}
		if let Err(e) = stream.set_nonblocking(false) {
			warn!(error = %e, "could not configure client socket");
			return;
		}
		if let Err(e) = ops.add(Events::new(&stream, EventSet::IN)) {
			warn!(error = ?e, "could not watch client socket");
			return;
		}
		// Checked above, the slot is free.
		let _ = self.session.attach(stream);
	}

	fn serve(&mut self, ops: &mut EventOps) {
		match self.session.handle(&mut self.supervisor) {
			Ok(()) => {}
			Err(VirtdError::Disconnected) => self.disconnect(ops),
			Err(e) => {
				warn!(error = ?e, "session failed");
				self.disconnect(ops);
			}
		}
	}

	fn disconnect(&mut self, ops: &mut EventOps) {
		if let Some(stream) = self.session.detach() {
			if let Err(e) = ops.remove(Events::new(&stream, EventSet::IN)) {
				warn!(error = ?e, "could not unwatch client socket");
			}
		}
	}
}

impl MutEventSubscriber for Daemon {
	fn init(&mut self, ops: &mut EventOps) {
		if let Err(e) = ops.add(Events::new(&self.listener, EventSet::IN)) {
			error!(error = ?e, "could not watch listening socket");
			self.running = false;
		}
		if let Err(e) = ops.add(Events::new(&self.shutdown, EventSet::IN)) {
			error!(error = ?e, "could not watch shutdown event");
			self.running = false;
		}
	}

	fn process(&mut self, events: Events, ops: &mut EventOps) {
		let fd = events.fd();
		if fd == self.listener.as_raw_fd() {
			self.accept(ops);
		} else if fd == self.shutdown.as_raw_fd() {
			if self.shutdown.consume() {
				info!("shutdown requested");
				self.running = false;
			}
		} else if self.session.stream().map(AsRawFd::as_raw_fd) == Some(fd) {
			self.serve(ops);
		} else {
			warn!(fd, "event for unknown descriptor");
			let _ = ops.remove(events);
		}
	}
}
