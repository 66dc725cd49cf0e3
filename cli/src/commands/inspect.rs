//! `guest-harness inspect` command - list the entries of a boot archive.

use std::path::PathBuf;

use clap::Args;
use guest_harness_runtime::read_archive;

use crate::output::{format_bytes, format_mode, new_table};

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Archive to read
    pub archive: PathBuf,

    /// Print the entries as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: InspectArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(&args.archive)
        .map_err(|e| format!("Failed to read {}: {}", args.archive.display(), e))?;
    let entries = read_archive(&bytes)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(0);
    }

    let mut table = new_table(&["MODE", "SIZE", "NAME"]);
    for entry in &entries {
        table.add_row(vec![
            format_mode(entry.mode),
            format_bytes(entry.size as u64),
            entry.name.clone(),
        ]);
    }
    println!("{table}");

    let files = entries.iter().filter(|e| e.is_file()).count();
    println!(
        "{} entries ({} files, {} directories)",
        entries.len(),
        files,
        entries.len() - files
    );

    Ok(0)
}
