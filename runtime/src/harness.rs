//! End-to-end pipeline: build, resolve, pack, boot.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use guest_harness_core::error::{HarnessError, Result};
use guest_harness_core::HarnessConfig;
use tempfile::TempPath;

use crate::initramfs::{pack, BootImageSpec};
use crate::orchestrator::{Orchestrator, RunOutcome};
use crate::preparer::GuestBuilder;
use crate::resolver::{DependencyResolver, Resolution};

/// A boot archive on disk.
#[derive(Debug)]
pub enum BootImage {
    /// Removed when dropped.
    Temporary(TempPath),
    /// Persisted at a caller-chosen path.
    Kept(PathBuf),
}

impl BootImage {
    pub fn path(&self) -> &Path {
        match self {
            BootImage::Temporary(path) => &**path,
            BootImage::Kept(path) => path.as_path(),
        }
    }
}

/// Everything produced before the emulator starts.
#[derive(Debug)]
pub struct PreparedRun {
    /// Compiled guest program; removed when dropped.
    pub executable: TempPath,
    pub resolution: Resolution,
    pub image: BootImage,
}

/// Write the archive for `spec` to `keep`, or to a temporary file.
///
/// A failed build leaves no file behind.
pub fn write_boot_image(spec: &BootImageSpec, keep: Option<&Path>) -> Result<BootImage> {
    match keep {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                HarnessError::Archive(format!("Couldn't create {}: {}", path.display(), e))
            })?;
            if let Err(e) = pack_into(spec, file) {
                let _ = std::fs::remove_file(path);
                return Err(e);
            }
            tracing::info!(path = %path.display(), "Boot image kept");
            Ok(BootImage::Kept(path.to_path_buf()))
        }
        None => {
            let tmp = tempfile::Builder::new()
                .prefix("guest-initrd-")
                .tempfile()
                .map_err(|e| HarnessError::Archive(format!("Couldn't create temp file: {}", e)))?;
            let path = tmp.into_temp_path();
            let file = File::create(&path).map_err(|e| {
                HarnessError::Archive(format!("Couldn't open {}: {}", path.display(), e))
            })?;
            pack_into(spec, file)?;
            Ok(BootImage::Temporary(path))
        }
    }
}

/// [`write_boot_image`] on the blocking thread pool.
pub async fn build_boot_image(spec: BootImageSpec, keep: Option<PathBuf>) -> Result<BootImage> {
    tokio::task::spawn_blocking(move || write_boot_image(&spec, keep.as_deref()))
        .await
        .map_err(|e| HarnessError::Other(format!("archive build task failed: {}", e)))?
}

fn pack_into(spec: &BootImageSpec, file: File) -> Result<()> {
    let mut writer = pack(spec, BufWriter::new(file))?;
    writer.flush()?;
    Ok(())
}

/// Runs the whole harness for one configuration.
#[derive(Debug, Clone)]
pub struct Harness {
    config: HarnessConfig,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Build the guest program, resolve its libraries and pack the archive.
    pub async fn prepare(&self) -> Result<PreparedRun> {
        let executable = GuestBuilder::new(&self.config.guest).build().await?;

        let resolution = DependencyResolver::new()
            .with_ldd(self.config.ldd.clone())
            .resolve_async(executable.to_path_buf())
            .await?;

        let spec = BootImageSpec {
            executable: executable.to_path_buf(),
            kernel_module: self.config.kernel_module.clone(),
            module_name: self.config.kernel_module_name.clone(),
            interpreter: resolution.interpreter.clone(),
            libraries: resolution.libraries.clone(),
        };
        let image = build_boot_image(spec, self.config.keep_image.clone()).await?;

        Ok(PreparedRun {
            executable,
            resolution,
            image,
        })
    }

    /// Prepare and boot; resolves once the emulator has exited.
    pub async fn run(&self) -> Result<RunOutcome> {
        let prepared = self.prepare().await?;
        Orchestrator::from_config(&self.config)
            .run(prepared.image.path())
            .await
    }
}
