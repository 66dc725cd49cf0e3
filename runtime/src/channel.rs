//! Host/guest byte channels.
//!
//! Each channel is an `AF_UNIX` stream socket pair. The host keeps one end
//! as a tokio stream; the other end is handed to the emulator as an
//! inherited descriptor at a fixed slot.

use std::fmt;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;

use guest_harness_core::error::{HarnessError, Result};
use tokio::net::UnixStream;

/// Lowest descriptor number guest ends are moved to before spawning, so
/// they never collide with the slots they are mapped onto.
const HIGH_FD_FLOOR: RawFd = 64;

/// The two channels wired into the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Raw Ethernet frames, length-prefixed.
    Network,
    /// Newline-terminated text messages.
    Control,
}

impl ChannelKind {
    /// Descriptor number the guest end occupies in the emulator process.
    pub fn child_fd(&self) -> RawFd {
        match self {
            ChannelKind::Control => 3,
            ChannelKind::Network => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Network => "network",
            ChannelKind::Control => "control",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A descriptor that will be installed at `target` in a child process.
///
/// Owns the descriptor until the child is spawned; dropping it closes the
/// host's copy.
#[derive(Debug)]
pub struct InheritableFd {
    fd: OwnedFd,
    target: RawFd,
}

impl InheritableFd {
    /// Take ownership of `fd` for installation at `target`.
    ///
    /// The descriptor is duplicated above [`HIGH_FD_FLOOR`] with
    /// close-on-exec set, so only the copy installed at `target` survives
    /// into the child.
    pub fn new(fd: OwnedFd, target: RawFd) -> Result<Self> {
        // SAFETY: fcntl on a descriptor we own; the result is a fresh fd.
        let dup = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, HIGH_FD_FLOOR) };
        if dup < 0 {
            return Err(HarnessError::Channel(format!(
                "failed to duplicate descriptor {}: {}",
                fd.as_raw_fd(),
                std::io::Error::last_os_error()
            )));
        }
        // SAFETY: `dup` is a valid descriptor exclusively owned from here on.
        let fd = unsafe { OwnedFd::from_raw_fd(dup) };
        Ok(Self { fd, target })
    }

    /// Slot in the child.
    pub fn target(&self) -> RawFd {
        self.target
    }

    /// Descriptor in this process.
    pub fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Install the descriptor at its target slot.
    ///
    /// Must only be called in a forked child before exec: it uses nothing
    /// but async-signal-safe calls.
    pub fn install(&self) -> std::io::Result<()> {
        // SAFETY: dup2 on descriptors owned by this (child) process.
        if unsafe { libc::dup2(self.fd.as_raw_fd(), self.target) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

/// One host/guest channel before the emulator starts.
#[derive(Debug)]
pub struct Channel {
    pub kind: ChannelKind,
    /// End retained by the harness.
    pub host: UnixStream,
    /// End passed to the emulator.
    pub guest: InheritableFd,
}

impl Channel {
    /// Allocate a connected socket pair for `kind`.
    ///
    /// Must be called within a tokio runtime.
    pub fn open(kind: ChannelKind) -> Result<Self> {
        let (host, guest) = StdUnixStream::pair().map_err(|e| {
            HarnessError::Channel(format!("failed to create {} socket pair: {}", kind, e))
        })?;

        host.set_nonblocking(true).map_err(|e| {
            HarnessError::Channel(format!("failed to configure {} host end: {}", kind, e))
        })?;
        let host = UnixStream::from_std(host).map_err(|e| {
            HarnessError::Channel(format!("failed to register {} host end: {}", kind, e))
        })?;

        let guest = InheritableFd::new(OwnedFd::from(guest), kind.child_fd())?;

        tracing::debug!(
            channel = %kind,
            host_fd = host.as_raw_fd(),
            guest_fd = guest.raw(),
            child_fd = guest.target(),
            "Channel allocated"
        );

        Ok(Self { kind, host, guest })
    }
}
