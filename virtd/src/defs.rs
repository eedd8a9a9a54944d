pub const MAX_VM: u32 = 20;

/// Number of host CPUs handed to each VM, also used as its vCPU count.
pub const PER_CPU: usize = 2;

pub const DEFAULT_MEM_MIB: u32 = 2048;
pub const SPICE_BASE_PORT: u16 = 9500;

/// Upper bound for a single length-prefixed response, newline included.
pub const RESPONSE_CAP: usize = 1024;

/// Maximum time the event loop blocks before reaping children again.
pub const POLL_TIMEOUT_MS: u64 = 60_000;

pub mod paths {
	pub const SOCKET: &str = "/var/run/virtd/virtd.socket";
	pub const QEMU_BIN: &str = "/usr/local/bin/qemu-system-x86_64";
	pub const IMAGE_DIR: &str = "/var/lib/virtd/images";
}

pub mod wire {
	/// Every integer on the wire (kind, ack, VM id, length) is one
	/// of these, in host byte order.
	pub type Word = i32;

	pub const WORD_SIZE: usize = std::mem::size_of::<Word>();

	pub const KIND_QUERY_STATUS: Word = 0;
	pub const KIND_LAUNCH: Word = 1;
	pub const KIND_KILL: Word = 2;
	pub const KIND_GET_AFFINITY: Word = 3;
	pub const KIND_ACK: Word = 4;

	/// VM id sent by the front end when the user backs out of a
	/// prompt.
	pub const CANCELLED_VM_ID: Word = -1;
}

pub mod text {
	pub const STATUS_HEADER: &str = "\nNow running vm:\n\tvm_id\tpid\n";
	pub const AFFINITY_HEADER: &str = "cpu affinity:";
	pub const CPU_PRESENT: char = 'y';
	pub const CPU_ABSENT: char = '-';
}
