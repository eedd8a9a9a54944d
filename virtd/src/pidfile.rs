use crate::VirtdError;
use std::io::Write;
use std::path::Path;

/// Writes the daemon's pid, replacing any previous content.
pub fn write<P: AsRef<Path>>(path: P) -> Result<u32, VirtdError> {
	let pid = std::process::id();
	let mut file = std::fs::File::create(path).map_err(VirtdError::Io)?;
	write!(file, "{pid}").map_err(VirtdError::Io)?;
	Ok(pid)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_write_pid() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("virtd.pid");
		std::fs::write(&path, "999999999999").unwrap();

		let pid = write(&path).unwrap();
		let content = std::fs::read_to_string(&path).unwrap();
		assert_eq!(content, pid.to_string());
		assert_eq!(pid, std::process::id());
	}
}
