//! Boot archive (initramfs) construction.
//!
//! The archive holds the guest test program as `init`, the kernel module,
//! the dynamic linker and the executable's shared-library closure.

mod builder;
pub mod cpio;
mod layout;

pub use builder::{pack, InitramfsBuilder, DIR_MODE};
pub use cpio::{read_archive, CpioEntry, CpioWriter, EntryHeader};
pub use layout::{library_archive_name, strip_root, ArchiveFile, BootImageSpec};
