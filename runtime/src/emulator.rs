//! Emulator command line.

use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Stdio;

use guest_harness_core::EmulatorConfig;
use tokio::process::Command;

use crate::channel::ChannelKind;

/// Fully rendered emulator invocation for one boot archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl EmulatorCommand {
    /// Render the invocation booting `initrd` under `config`.
    ///
    /// The virtio serial port is bound to the control channel's slot and
    /// the socket netdev to the network channel's slot.
    pub fn new(config: &EmulatorConfig, initrd: &Path) -> Self {
        let control_fd = ChannelKind::Control.child_fd();
        let network_fd = ChannelKind::Network.child_fd();

        let mut args: Vec<OsString> = vec!["-m".into(), OsString::from(&config.memory)];
        for flag in [
            "-vga",
            "none",
            "-nographic",
            "-nodefaults",
            "-nodefconfig",
            "-no-user-config",
            "-serial",
            "none",
        ] {
            args.push(flag.into());
        }
        if config.enable_kvm {
            args.push("-enable-kvm".into());
        }

        args.push("-kernel".into());
        args.push(config.kernel.clone().into_os_string());
        args.push("-initrd".into());
        args.push(initrd.as_os_str().to_owned());
        args.push("-append".into());
        args.push(OsString::from(&config.append));

        // Console on the emulator's stdio
        for arg in [
            "-device",
            "virtio-serial",
            "-chardev",
            "stdio,id=tty",
            "-device",
            "virtconsole,chardev=tty",
        ] {
            args.push(arg.into());
        }

        // Control channel
        args.push("-add-fd".into());
        args.push(format!("set=1,fd={}", control_fd).into());
        for arg in [
            "-chardev",
            "pipe,path=/dev/fdset/1,id=ctrl",
            "-device",
            "virtserialport,chardev=ctrl",
        ] {
            args.push(arg.into());
        }

        // Network channel
        args.push("-netdev".into());
        args.push(format!("socket,id=net0,fd={}", network_fd).into());
        args.push("-device".into());
        args.push("virtio-net-pci,netdev=net0".into());

        args.push("-no-reboot".into());
        args.extend(config.extra_args.iter().map(OsString::from));

        Self {
            program: OsString::from(&config.binary),
            args,
        }
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Command ready to spawn: stdin detached, stdout/stderr inherited,
    /// killed if the handle is dropped.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}
