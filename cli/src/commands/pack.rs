//! `guest-harness pack` command - build a boot archive without booting it.

use std::path::PathBuf;

use clap::Args;
use guest_harness_core::HarnessConfig;
use guest_harness_runtime::{build_boot_image, BootImageSpec, DependencyResolver};

use crate::output::format_bytes;

#[derive(Args, Debug)]
pub struct PackArgs {
    /// Executable packed as the archive's init
    pub binary: PathBuf,

    /// Where to write the archive
    #[arg(short, long)]
    pub output: PathBuf,

    /// Kernel module to include
    #[arg(long)]
    pub module: Option<PathBuf>,
}

pub async fn execute(
    args: PackArgs,
    config: HarnessConfig,
) -> Result<i32, Box<dyn std::error::Error>> {
    let resolution = DependencyResolver::new()
        .with_ldd(config.ldd.clone())
        .resolve_async(args.binary.clone())
        .await?;

    let spec = BootImageSpec {
        executable: args.binary,
        kernel_module: args.module.unwrap_or(config.kernel_module),
        module_name: config.kernel_module_name,
        interpreter: resolution.interpreter,
        libraries: resolution.libraries,
    };
    let image = build_boot_image(spec, Some(args.output)).await?;

    let size = std::fs::metadata(image.path())?.len();
    println!(
        "Wrote {} ({})",
        image.path().display(),
        format_bytes(size)
    );

    Ok(0)
}
