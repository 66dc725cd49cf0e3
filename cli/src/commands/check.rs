//! `guest-harness check` command - verify host prerequisites.

use clap::Args;
use guest_harness_core::HarnessConfig;
use guest_harness_runtime::check_host;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Also require KVM acceleration
    #[arg(long)]
    pub kvm: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(
    args: CheckArgs,
    mut config: HarnessConfig,
) -> Result<i32, Box<dyn std::error::Error>> {
    if args.kvm {
        config.emulator.enable_kvm = true;
    }

    let report = match check_host(&config) {
        Ok(report) => report,
        Err(guest_harness_core::HarnessError::EmulatorError { message, hint }) => {
            println!("Host check failed: {message}");
            if let Some(hint) = hint {
                println!("Hint: {hint}");
            }
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(0);
    }

    println!("guest-harness version {}", guest_harness_core::VERSION);
    println!("Emulator: {}", report.emulator.display());
    println!("Kernel: {}", report.kernel.display());
    println!("Kernel module: {}", report.kernel_module.display());
    match &report.kvm {
        Some(details) => println!("Virtualization: KVM ({details})"),
        None => println!("Virtualization: not requested"),
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_check_exit_code() {
        let mut config = HarnessConfig::default();
        config.emulator.binary = "definitely-not-an-emulator-7f3a".to_string();
        let code = execute(CheckArgs { kvm: false, json: false }, config).await.unwrap();
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn test_passing_check() {
        let dir = tempfile::TempDir::new().unwrap();
        let kernel = dir.path().join("bzImage");
        let module = dir.path().join("pf_ring.ko");
        std::fs::write(&kernel, b"kernel").unwrap();
        std::fs::write(&module, b"module").unwrap();

        let mut config = HarnessConfig::default();
        config.emulator.binary = "sh".to_string();
        config.emulator.kernel = kernel;
        config.kernel_module = module;

        let code = execute(CheckArgs { kvm: false, json: false }, config).await.unwrap();
        assert_eq!(code, 0);
    }
}
