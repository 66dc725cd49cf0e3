//! Guest program preparation.
//!
//! Compiles the guest test program into a temporary executable that later
//! becomes the archive's `init`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use guest_harness_core::config::OUTPUT_PLACEHOLDER;
use guest_harness_core::error::{HarnessError, Result};
use guest_harness_core::GuestConfig;
use tempfile::TempPath;
use tokio::process::Command;

/// Builds the guest executable with the configured command.
#[derive(Debug, Clone)]
pub struct GuestBuilder {
    command: Vec<String>,
    workdir: Option<PathBuf>,
}

impl GuestBuilder {
    pub fn new(config: &GuestConfig) -> Self {
        Self {
            command: config.build_command.clone(),
            workdir: config.workdir.clone(),
        }
    }

    /// Command line with the placeholder substituted.
    pub fn render(&self, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        self.command
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output))
            .collect()
    }

    /// Compile into a fresh temporary file.
    ///
    /// The file is removed when the returned path is dropped. Compiler
    /// output goes straight to the harness's stdout/stderr.
    pub async fn build(&self) -> Result<TempPath> {
        let output = tempfile::Builder::new()
            .prefix("guest-init-")
            .tempfile()
            .map_err(|e| {
                HarnessError::GuestBuild(format!("Failed to create output file: {}", e))
            })?
            .into_temp_path();

        let argv = self.render(&output);
        let (program, args) = argv.split_first().ok_or_else(|| {
            HarnessError::GuestBuild("build command is empty".to_string())
        })?;

        tracing::info!(command = %argv.join(" "), "Building guest program");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        let status = command.status().await.map_err(|e| {
            HarnessError::GuestBuild(format!("Failed to run {}: {}", program, e))
        })?;
        if !status.success() {
            return Err(HarnessError::GuestBuild(format!(
                "`{}` failed with {}",
                argv.join(" "),
                status
            )));
        }

        tracing::info!(executable = %output.display(), "Guest program built");
        Ok(output)
    }
}
