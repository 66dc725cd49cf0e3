//! Host prerequisites for booting the guest.
//!
//! Checks that the emulator can be found, that the kernel image and
//! kernel module exist, and, when hardware acceleration is requested,
//! that `/dev/kvm` is usable.

use std::path::{Path, PathBuf};

use guest_harness_core::error::{HarnessError, Result};
use guest_harness_core::HarnessConfig;
use serde::Serialize;

/// What the host provides for a run.
#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    /// Resolved emulator executable.
    pub emulator: PathBuf,
    pub kernel: PathBuf,
    pub kernel_module: PathBuf,
    /// KVM details when acceleration was requested.
    pub kvm: Option<String>,
}

/// Verify every host prerequisite of `config`.
pub fn check_host(config: &HarnessConfig) -> Result<HostReport> {
    let emulator = find_program(&config.emulator.binary).ok_or_else(|| {
        HarnessError::EmulatorError {
            message: format!("Emulator not found: {}", config.emulator.binary),
            hint: Some("Install QEMU or set emulator.binary in the config".to_string()),
        }
    })?;

    require_file(&config.emulator.kernel, "Kernel image", "Set emulator.kernel or pass --kernel")?;
    require_file(
        &config.kernel_module,
        "Kernel module",
        "Set kernel_module or pass --module",
    )?;

    let kvm = if config.emulator.enable_kvm {
        Some(check_kvm()?)
    } else {
        None
    };

    tracing::debug!(
        emulator = %emulator.display(),
        kernel = %config.emulator.kernel.display(),
        module = %config.kernel_module.display(),
        kvm = kvm.is_some(),
        "Host check passed"
    );

    Ok(HostReport {
        emulator,
        kernel: config.emulator.kernel.clone(),
        kernel_module: config.kernel_module.clone(),
        kvm,
    })
}

/// Resolve `name` the way the shell would: paths are taken as-is, bare
/// names are searched on `PATH`.
pub fn find_program(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return path.is_file().then_some(path);
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn require_file(path: &Path, what: &str, hint: &str) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    Err(HarnessError::EmulatorError {
        message: format!("{} not found: {}", what, path.display()),
        hint: Some(hint.to_string()),
    })
}

/// Check for KVM support.
#[cfg(target_os = "linux")]
pub fn check_kvm() -> Result<String> {
    let kvm_path = Path::new("/dev/kvm");

    if !kvm_path.exists() {
        return Err(HarnessError::EmulatorError {
            message: "KVM is not available: /dev/kvm not found".to_string(),
            hint: Some(
                "Load the KVM modules (modprobe kvm kvm_intel or kvm_amd) or disable emulator.enable_kvm"
                    .to_string(),
            ),
        });
    }

    match std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(kvm_path)
    {
        Ok(_) => Ok("Linux KVM hardware virtualization is available".to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(HarnessError::EmulatorError {
                message: format!("KVM access denied: {}", e),
                hint: Some("Add your user to the 'kvm' group: sudo usermod -aG kvm $USER".to_string()),
            })
        }
        Err(e) => Err(HarnessError::EmulatorError {
            message: format!("Failed to access /dev/kvm: {}", e),
            hint: None,
        }),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn check_kvm() -> Result<String> {
    Err(HarnessError::EmulatorError {
        message: "KVM acceleration is only available on Linux".to_string(),
        hint: Some("Disable emulator.enable_kvm".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_with_files(dir: &TempDir) -> HarnessConfig {
        let kernel = dir.path().join("bzImage");
        let module = dir.path().join("pf_ring.ko");
        std::fs::write(&kernel, b"kernel").unwrap();
        std::fs::write(&module, b"module").unwrap();

        let mut config = HarnessConfig::default();
        config.emulator.binary = "sh".to_string();
        config.emulator.kernel = kernel;
        config.kernel_module = module;
        config
    }

    #[test]
    fn test_find_program() {
        assert!(find_program("sh").is_some());
        assert_eq!(find_program("/bin/sh"), Some(PathBuf::from("/bin/sh")));
        assert!(find_program("definitely-not-an-emulator-7f3a").is_none());
        assert!(find_program("/nonexistent/qemu").is_none());
    }

    #[test]
    fn test_check_host_passes() {
        let dir = TempDir::new().unwrap();
        let config = config_with_files(&dir);
        let report = check_host(&config).unwrap();
        assert!(report.emulator.ends_with("sh"));
        assert!(report.kvm.is_none());
    }

    #[test]
    fn test_missing_emulator() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_files(&dir);
        config.emulator.binary = "definitely-not-an-emulator-7f3a".to_string();
        let err = check_host(&config).unwrap_err();
        assert!(err.to_string().contains("Emulator not found"));
    }

    #[test]
    fn test_missing_kernel_and_module() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_files(&dir);
        config.emulator.kernel = dir.path().join("missing-bzImage");
        assert!(check_host(&config)
            .unwrap_err()
            .to_string()
            .contains("Kernel image not found"));

        let mut config = config_with_files(&dir);
        config.kernel_module = dir.path().join("missing.ko");
        assert!(check_host(&config)
            .unwrap_err()
            .to_string()
            .contains("Kernel module not found"));
    }

    #[test]
    fn test_check_kvm() {
        // Depends on the host; only the shape of the result is checked.
        match check_kvm() {
            Ok(details) => assert!(!details.is_empty()),
            Err(e) => assert!(matches!(e, HarnessError::EmulatorError { .. })),
        }
    }
}
