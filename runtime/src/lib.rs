//! Guest Harness Runtime - boots a guest test program under an emulator.
//!
//! This crate provides the engine behind the harness: compiling the guest
//! program, resolving its shared-library closure, packing the initramfs,
//! wiring the network and control channels, and supervising the emulator.

#![allow(clippy::result_large_err)]

pub mod channel;
pub mod emulator;
pub mod harness;
pub mod host_check;
pub mod initramfs;
pub mod orchestrator;
pub mod preparer;
pub mod relay;
pub mod resolver;

// Re-export common types
pub use channel::{Channel, ChannelKind, InheritableFd};
pub use emulator::EmulatorCommand;
pub use harness::{build_boot_image, write_boot_image, BootImage, Harness, PreparedRun};
pub use host_check::{check_host, check_kvm, find_program, HostReport};
pub use initramfs::{pack, read_archive, BootImageSpec, CpioEntry, InitramfsBuilder};
pub use orchestrator::{exit_code, Orchestrator, RunOutcome, RELAY_FAILURE_GRACE};
pub use preparer::GuestBuilder;
pub use relay::{
    describe_packet, read_frame, run_control_relay, run_network_relay, synthesize_reply,
    write_frame, RelayCounts, RelayOptions, RelayStats,
};
pub use resolver::{parse_library_listing, read_interpreter, DependencyResolver, Resolution};

/// Guest harness runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
