//! `guest-harness run` command - build, pack and boot the guest.

use std::path::PathBuf;

use clap::Args;
use guest_harness_core::HarnessConfig;
use guest_harness_runtime::{check_host, Harness};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Kernel image to boot
    #[arg(long)]
    pub kernel: Option<PathBuf>,

    /// Kernel module to pack into the archive
    #[arg(long)]
    pub module: Option<PathBuf>,

    /// Guest memory, e.g. 500M
    #[arg(short, long)]
    pub memory: Option<String>,

    /// Emulator executable
    #[arg(long)]
    pub emulator: Option<String>,

    /// Enable KVM acceleration
    #[arg(long)]
    pub kvm: bool,

    /// Per-read relay deadline in seconds
    #[arg(long, value_name = "SECS")]
    pub relay_timeout: Option<u64>,

    /// Deadline for the whole emulator run in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Keep the boot archive at this path
    #[arg(long, value_name = "PATH")]
    pub keep_image: Option<PathBuf>,
}

impl RunArgs {
    /// Overlay command-line flags on the file configuration.
    pub fn apply(self, config: &mut HarnessConfig) {
        if let Some(kernel) = self.kernel {
            config.emulator.kernel = kernel;
        }
        if let Some(module) = self.module {
            config.kernel_module = module;
        }
        if let Some(memory) = self.memory {
            config.emulator.memory = memory;
        }
        if let Some(emulator) = self.emulator {
            config.emulator.binary = emulator;
        }
        if self.kvm {
            config.emulator.enable_kvm = true;
        }
        if self.relay_timeout.is_some() {
            config.relay.idle_timeout_secs = self.relay_timeout;
        }
        if self.timeout.is_some() {
            config.run_timeout_secs = self.timeout;
        }
        if self.keep_image.is_some() {
            config.keep_image = self.keep_image;
        }
    }
}

pub async fn execute(
    args: RunArgs,
    mut config: HarnessConfig,
) -> Result<i32, Box<dyn std::error::Error>> {
    args.apply(&mut config);
    config.validate()?;
    check_host(&config)?;

    let outcome = Harness::new(config).run().await?;

    tracing::info!(
        code = outcome.exit_code(),
        frames = outcome.network.received,
        control_messages = outcome.control.received,
        "Run finished"
    );

    Ok(outcome.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overrides() {
        let mut config = HarnessConfig::default();
        RunArgs {
            kernel: Some(PathBuf::from("/boot/vmlinuz")),
            module: Some(PathBuf::from("/tmp/pf_ring.ko")),
            memory: Some("1G".to_string()),
            emulator: None,
            kvm: true,
            relay_timeout: Some(10),
            timeout: Some(120),
            keep_image: Some(PathBuf::from("initrd.cpio")),
        }
        .apply(&mut config);

        assert_eq!(config.emulator.kernel, PathBuf::from("/boot/vmlinuz"));
        assert_eq!(config.kernel_module, PathBuf::from("/tmp/pf_ring.ko"));
        assert_eq!(config.emulator.memory, "1G");
        assert_eq!(config.emulator.binary, "qemu-system-x86_64");
        assert!(config.emulator.enable_kvm);
        assert_eq!(config.relay.idle_timeout_secs, Some(10));
        assert_eq!(config.run_timeout_secs, Some(120));
        assert_eq!(config.keep_image, Some(PathBuf::from("initrd.cpio")));
    }

    #[test]
    fn test_absent_flags_keep_file_values() {
        let mut config = HarnessConfig {
            run_timeout_secs: Some(60),
            ..Default::default()
        };
        config.emulator.enable_kvm = true;

        RunArgs::default().apply(&mut config);
        assert_eq!(config.run_timeout_secs, Some(60));
        assert!(config.emulator.enable_kvm);
    }

    #[tokio::test]
    async fn test_missing_host_prerequisites_fail_before_build() {
        let config = HarnessConfig::default();
        let args = RunArgs {
            kernel: Some(PathBuf::from("/nonexistent/bzImage")),
            emulator: Some("sh".to_string()),
            ..Default::default()
        };
        let err = execute(args, config).await.unwrap_err();
        assert!(err.to_string().contains("Kernel image not found"));
    }
}
