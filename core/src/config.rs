use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarnessError, Result};

/// Placeholder in the guest build command replaced by the output path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// How the guest test program is compiled
    pub guest: GuestConfig,

    /// Kernel module packed next to the init binary
    pub kernel_module: PathBuf,

    /// Archive name of the kernel module
    pub kernel_module_name: String,

    /// Emulator invocation
    pub emulator: EmulatorConfig,

    /// Relay behaviour
    pub relay: RelayConfig,

    /// Deadline for the whole emulator run in seconds (None = unbounded)
    pub run_timeout_secs: Option<u64>,

    /// Persist the boot archive here instead of a temporary file
    pub keep_image: Option<PathBuf>,

    /// Linker-inspection tool used for executables without an interpreter
    pub ldd: String,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            guest: GuestConfig::default(),
            kernel_module: PathBuf::from("PF_RING/kernel/pf_ring.ko"),
            kernel_module_name: "pf_ring.ko".to_string(),
            emulator: EmulatorConfig::default(),
            relay: RelayConfig::default(),
            run_timeout_secs: None,
            keep_image: None,
            ldd: "ldd".to_string(),
            log_level: LogLevel::Info,
        }
    }
}

impl HarnessConfig {
    /// Load a configuration file (YAML; JSON is accepted as a YAML subset).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: HarnessConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.guest.build_command.is_empty() {
            return Err(HarnessError::ConfigError(
                "guest.build_command must not be empty".to_string(),
            ));
        }
        if !self
            .guest
            .build_command
            .iter()
            .any(|arg| arg.contains(OUTPUT_PLACEHOLDER))
        {
            return Err(HarnessError::ConfigError(format!(
                "guest.build_command must reference {} for the output path",
                OUTPUT_PLACEHOLDER
            )));
        }
        if self.kernel_module_name.is_empty() || self.kernel_module_name.contains('/') {
            return Err(HarnessError::ConfigError(format!(
                "kernel_module_name must be a plain file name, got {:?}",
                self.kernel_module_name
            )));
        }
        if self.relay.control_reply.contains('\n') {
            return Err(HarnessError::ConfigError(
                "relay.control_reply must be a single line".to_string(),
            ));
        }
        Ok(())
    }

    /// Whole-run deadline.
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Guest program build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    /// Build command; `{output}` is replaced with the executable path
    pub build_command: Vec<String>,

    /// Working directory of the build command
    pub workdir: Option<PathBuf>,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            build_command: ["go", "build", "-o", OUTPUT_PLACEHOLDER, "init/test.go"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            workdir: None,
        }
    }
}

/// Emulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Emulator executable
    pub binary: String,

    /// Kernel image
    pub kernel: PathBuf,

    /// Guest memory (`-m` argument)
    pub memory: String,

    /// Kernel command line
    pub append: String,

    /// Request hardware acceleration
    pub enable_kvm: bool,

    /// Extra arguments appended after the fixed flags
    pub extra_args: Vec<String>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            binary: "qemu-system-x86_64".to_string(),
            kernel: PathBuf::from("linux-4.9.135/arch/x86_64/boot/bzImage"),
            memory: "500M".to_string(),
            append: "console=hvc0".to_string(),
            enable_kvm: false,
            extra_args: Vec::new(),
        }
    }
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Per-read deadline in seconds (None = block until the peer acts)
    pub idle_timeout_secs: Option<u64>,

    /// Acknowledgement written back for every control message
    pub control_reply: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: None,
            control_reply: "yay".to_string(),
        }
    }
}

impl RelayConfig {
    /// Per-read deadline.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
