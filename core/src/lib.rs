//! Guest Harness Core - Foundational Types
//!
//! Error taxonomy, configuration and shared constants used by the
//! runtime and the CLI.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{EmulatorConfig, GuestConfig, HarnessConfig, LogLevel, RelayConfig};
pub use error::{HarnessError, Result};

/// Guest harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Archive directory holding the resolved shared libraries.
pub const LIBRARY_DIR: &str = "usr/lib";

/// Archive name of the guest test executable.
pub const INIT_NAME: &str = "init";
