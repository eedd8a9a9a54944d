use crate::config::Config;
use crate::registry::VmId;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Name the VM process runs under, regardless of the binary path.
pub const PROCESS_NAME: &str = "qemu-system-x86_64";

/// Flags shared by every VM.
#[rustfmt::skip]
const COMMON_ARGS: &[&str] = &[
	"-enable-kvm",
	"-machine", "pc-i440fx-2.9,accel=kvm,usb=off",
	"-cpu", "host",
	"-realtime", "mlock=off",
	"-no-user-config",
	"-nodefaults",
	"-rtc", "base=localtime,driftfix=slew",
	"-no-hpet",
	"-boot", "strict=on",
	// USB host controllers
	"-device", "ich9-usb-ehci1,id=usb,bus=pci.0,addr=0x7.0x7",
	"-device", "ich9-usb-uhci1,masterbus=usb.0,firstport=0,bus=pci.0,multifunction=on,addr=0x7",
	"-device", "ich9-usb-uhci2,masterbus=usb.0,firstport=2,bus=pci.0,addr=0x7.0x1",
	"-device", "ich9-usb-uhci2,masterbus=usb.0,firstport=4,bus=pci.0,addr=0x7.0x2",
	"-device", "virtio-serial-pci,id=virtio-serial0,bus=pci.0,addr=0x5",
	"-net", "nic,model=virtio",
	"-net", "user,hostname=virtd",
	"-chardev", "spicevmc,id=charchannel0,name=vdagent",
	"-device", "virtserialport,bus=virtio-serial0.0,nr=1,chardev=charchannel0,id=channel0,name=com.redhat.spice.0",
	"-k", "en-us",
	"-device", "qxl-vga,id=video0,ram_size=67108864,vram_size=67108864,vgamem_mb=16,bus=pci.0",
	"-device", "intel-hda,id=sound0,bus=pci.0,addr=0x4",
	"-device", "hda-duplex,id=sound0-codec0,bus=sound0.0,cad=0",
	// USB redirection over spice
	"-chardev", "spicevmc,name=usbredir,id=usbredirchardev1",
	"-device", "usb-redir,chardev=usbredirchardev1,id=usbredirdev1,bus=usb.0,port=1",
	"-chardev", "spicevmc,name=usbredir,id=usbredirchardev2",
	"-device", "usb-redir,chardev=usbredirchardev2,id=usbredirdev2,bus=usb.0,port=2",
	"-chardev", "spicevmc,name=usbredir,id=usbredirchardev3",
	"-device", "usb-redir,chardev=usbredirchardev3,id=usbredirdev3,bus=usb.0,port=3",
	"-device", "virtio-balloon-pci,id=balloon0,bus=pci.0,addr=0x6",
];

/// Arguments used to start one VM. Rebuilt for every launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchProfile {
	pub program: PathBuf,
	pub args: Vec<String>,
}

impl LaunchProfile {
	pub fn new(config: &Config, vm_id: VmId) -> Self {
		let id = vm_id.get();
		let port = u32::from(config.spice_base_port) + id;
		let disk = config.image_dir.join(format!("vm-{id:03}"));

		let mut args: Vec<String> =
			COMMON_ARGS.iter().map(|a| a.to_string()).collect();
		args.extend([
			"-name".to_string(),
			format!("qemu-{id:03}"),
			"-m".to_string(),
			config.memory_mib.to_string(),
			"-smp".to_string(),
			config.cpus_per_vm.to_string(),
			"-drive".to_string(),
			format!(
				"file={},if=none,id=drive-virtio-disk0-0-0,format=qcow2,cache=none",
				disk.display()
			),
			"-device".to_string(),
			"virtio-blk,bus=pci.0,addr=0x8,drive=drive-virtio-disk0-0-0,id=virtio-disk0-0-0".to_string(),
			"-spice".to_string(),
			format!(
				"port={port},disable-ticketing,jpeg-wan-compression=auto,streaming-video=all"
			),
		]);

		Self {
			program: config.qemu_bin.clone(),
			args,
		}
	}

	/// Value following `flag`, if present.
	pub fn arg_value(&self, flag: &str) -> Option<&str> {
		self.args
			.iter()
			.position(|a| a == flag)
			.and_then(|i| self.args.get(i + 1))
			.map(String::as_str)
	}

	pub fn command(&self) -> Command {
		let mut cmd = Command::new(&self.program);
		cmd.arg0(PROCESS_NAME)
			.args(&self.args)
			.stdin(Stdio::null());
		cmd
	}
}
