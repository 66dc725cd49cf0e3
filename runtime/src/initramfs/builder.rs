//! Initramfs builder.
//!
//! Streams host files into a newc archive, emitting every ancestor
//! directory exactly once and before anything inside it.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::UNIX_EPOCH;

use guest_harness_core::error::{HarnessError, Result};

use super::cpio::{CpioWriter, EntryHeader};
use super::layout::BootImageSpec;

/// Permission bits of every synthesized directory.
pub const DIR_MODE: u32 = 0o555;

/// Builder for one boot archive.
///
/// Owns the set of directories already written; a builder is used for a
/// single archive and is consumed by [`InitramfsBuilder::finish`].
pub struct InitramfsBuilder<W: Write> {
    writer: CpioWriter<W>,
    written_dirs: HashSet<String>,
}

impl<W: Write> InitramfsBuilder<W> {
    /// Start an archive; the root entry `.` is written immediately.
    pub fn new(writer: W) -> Result<Self> {
        let mut writer = CpioWriter::new(writer);
        writer.append_dir(&EntryHeader::directory(".", DIR_MODE))?;
        Ok(Self {
            writer,
            written_dirs: HashSet::new(),
        })
    }

    /// Add `source` under the archive-relative `name`.
    pub fn add_file(&mut self, name: &str, source: &Path) -> Result<()> {
        let name = name.trim_start_matches('/');
        if name.is_empty() {
            return Err(HarnessError::Archive(format!(
                "empty archive name for {}",
                source.display()
            )));
        }

        self.ensure_parents(name)?;

        let mut file = File::open(source).map_err(|e| {
            HarnessError::Archive(format!("Couldn't open {}: {}", source.display(), e))
        })?;
        let meta = file.metadata().map_err(|e| {
            HarnessError::Archive(format!("Couldn't examine {}: {}", source.display(), e))
        })?;
        if !meta.is_file() {
            return Err(HarnessError::Archive(format!(
                "{} is not a regular file",
                source.display()
            )));
        }

        let size = u32::try_from(meta.len()).map_err(|_| {
            HarnessError::Archive(format!(
                "{} is too large for a newc archive ({} bytes)",
                source.display(),
                meta.len()
            ))
        })?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        let header = EntryHeader::file(name, meta.permissions().mode(), size).with_mtime(mtime);
        self.writer.append_file(&header, &mut file)?;

        tracing::debug!(
            name,
            source = %source.display(),
            size,
            "Added file to initramfs"
        );
        Ok(())
    }

    /// Write the trailer and return the underlying writer.
    pub fn finish(self) -> Result<W> {
        self.writer.finish()
    }

    fn ensure_parents(&mut self, name: &str) -> Result<()> {
        let mut end = 0;
        while let Some(pos) = name[end..].find('/') {
            end += pos;
            let dir = &name[..end];
            if !dir.is_empty() && !self.written_dirs.contains(dir) {
                self.writer
                    .append_dir(&EntryHeader::directory(dir, DIR_MODE))?;
                self.written_dirs.insert(dir.to_string());
                tracing::trace!(dir, "Added directory to initramfs");
            }
            end += 1;
        }
        Ok(())
    }
}

/// Pack every file of `spec` into a fresh archive on `writer`.
pub fn pack<W: Write>(spec: &BootImageSpec, writer: W) -> Result<W> {
    let files = spec.files()?;

    tracing::info!(
        executable = %spec.executable.display(),
        interpreter = ?spec.interpreter,
        files = files.len(),
        "Building initramfs"
    );

    let mut builder = InitramfsBuilder::new(writer)?;
    for file in &files {
        builder.add_file(&file.name, &file.source)?;
    }
    let writer = builder.finish()?;

    tracing::info!("Initramfs built successfully");
    Ok(writer)
}
