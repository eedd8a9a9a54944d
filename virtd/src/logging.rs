//! Log sink setup.
//!
//! Lines always go to stderr, filtered by `RUST_LOG` (default `info`).
//! When a log file is configured every line is also appended to it
//! through a non-blocking writer. A failing file never stops the
//! daemon: if it cannot be opened the daemon logs to stderr only, and
//! lines that cannot be written later are dropped.

use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the file writer alive. Hold it for the lifetime of the
/// process so buffered lines are flushed on exit.
pub struct LogGuard {
	file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl LogGuard {
	pub fn has_file(&self) -> bool {
		self.file_guard.is_some()
	}
}

fn filter() -> EnvFilter {
	EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Opens `path` for appending, creating missing parent directories.
pub fn file_appender(path: &Path) -> Result<RollingFileAppender, InitError> {
	let dir = match path.parent() {
		Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
		_ => PathBuf::from("."),
	};
	let name = path
		.file_name()
		.map(|n| n.to_string_lossy().into_owned())
		.unwrap_or_else(|| "virtd.log".to_string());

	RollingFileAppender::builder()
		.rotation(Rotation::NEVER)
		.filename_prefix(name)
		.build(dir)
}

/// Installs the global subscriber. Only the first call in a process
/// takes effect.
pub fn init(log_file: Option<&Path>) -> LogGuard {
	let appender = log_file.map(|path| (path, file_appender(path)));

	let (file_guard, failed) = match appender {
		Some((_, Ok(appender))) => {
			let (non_blocking, guard) = tracing_appender::non_blocking(appender);
			let _ = tracing_subscriber::registry()
				.with(filter())
				.with(fmt::layer().with_writer(std::io::stderr))
				.with(fmt::layer().with_writer(non_blocking).with_ansi(false))
				.try_init();
			(Some(guard), None)
		}
		other => {
			let _ = tracing_subscriber::registry()
				.with(filter())
				.with(fmt::layer().with_writer(std::io::stderr))
				.try_init();
			(None, other.and_then(|(path, res)| res.err().map(|e| (path, e))))
		}
	};

	if let Some((path, e)) = failed {
		warn!(path = %path.display(), error = %e, "could not open log file, logging to stderr only");
	}
	LogGuard { file_guard }
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_file_appender_creates_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("logs").join("virtd.log");
		file_appender(&path).unwrap();
		assert!(path.is_file());
	}

	#[test]
	fn test_unopenable_log_file_falls_back() {
		let dir = tempfile::tempdir().unwrap();
		let blocker = dir.path().join("not-a-dir");
		std::fs::write(&blocker, "").unwrap();
		let path = blocker.join("virtd.log");

		assert!(file_appender(&path).is_err());
		let guard = init(Some(&path));
		assert!(!guard.has_file());
	}
}
