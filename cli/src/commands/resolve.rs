//! `guest-harness resolve` command - show an executable's runtime dependencies.

use std::path::PathBuf;

use clap::Args;
use guest_harness_core::HarnessConfig;
use guest_harness_runtime::initramfs::library_archive_name;
use guest_harness_runtime::DependencyResolver;

use crate::output::new_table;

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Executable to inspect
    pub binary: PathBuf,

    /// Print the resolution as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(
    args: ResolveArgs,
    config: HarnessConfig,
) -> Result<i32, Box<dyn std::error::Error>> {
    let resolution = DependencyResolver::new()
        .with_ldd(config.ldd)
        .resolve_async(args.binary)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolution)?);
        return Ok(0);
    }

    match &resolution.interpreter {
        Some(interp) => println!("Interpreter: {}", interp.display()),
        None => println!("Interpreter: none (static)"),
    }

    if resolution.libraries.is_empty() {
        println!("Libraries: none");
        return Ok(0);
    }

    let mut table = new_table(&["LIBRARY", "ARCHIVE PATH"]);
    for lib in &resolution.libraries {
        table.add_row(vec![
            lib.display().to_string(),
            library_archive_name(lib)?,
        ]);
    }
    println!("{table}");

    Ok(0)
}
