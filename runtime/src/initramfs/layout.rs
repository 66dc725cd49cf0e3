//! Boot archive layout.
//!
//! Decides which host file lands under which archive name:
//! the test executable as `init`, the kernel module under its fixed name,
//! the interpreter under its own absolute path and every library under
//! `usr/lib/<basename>`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use guest_harness_core::error::{HarnessError, Result};
use guest_harness_core::{INIT_NAME, LIBRARY_DIR};

/// Files that make up one boot archive.
#[derive(Debug, Clone)]
pub struct BootImageSpec {
    /// Compiled guest test program.
    pub executable: PathBuf,

    /// Kernel module loaded by the guest.
    pub kernel_module: PathBuf,

    /// Archive name of the kernel module.
    pub module_name: String,

    /// Dynamic linker, if the executable requests one.
    pub interpreter: Option<PathBuf>,

    /// Resolved shared libraries.
    pub libraries: Vec<PathBuf>,
}

/// One file to be packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Archive-relative name.
    pub name: String,

    /// Host source path.
    pub source: PathBuf,
}

impl BootImageSpec {
    /// Files in archive order.
    ///
    /// A library listed twice is packed once. Two different libraries
    /// sharing a basename are rejected.
    pub fn files(&self) -> Result<Vec<ArchiveFile>> {
        let mut files = vec![
            ArchiveFile {
                name: INIT_NAME.to_string(),
                source: self.executable.clone(),
            },
            ArchiveFile {
                name: self.module_name.clone(),
                source: self.kernel_module.clone(),
            },
        ];

        if let Some(interp) = &self.interpreter {
            files.push(ArchiveFile {
                name: strip_root(interp),
                source: interp.clone(),
            });
        }

        let mut placed: HashMap<String, &Path> = HashMap::new();
        for lib in &self.libraries {
            let name = library_archive_name(lib)?;
            match placed.get(&name) {
                Some(existing) if *existing == lib.as_path() => {
                    tracing::debug!(library = %lib.display(), "Skipping duplicate library");
                }
                Some(existing) => {
                    return Err(HarnessError::LibraryCollision {
                        name,
                        first: existing.to_path_buf(),
                        second: lib.clone(),
                    });
                }
                None => {
                    placed.insert(name.clone(), lib.as_path());
                    files.push(ArchiveFile {
                        name,
                        source: lib.clone(),
                    });
                }
            }
        }

        Ok(files)
    }
}

/// Archive name of a resolved library: `usr/lib/<basename>`.
pub fn library_archive_name(lib: &Path) -> Result<String> {
    let base = lib.file_name().ok_or_else(|| {
        HarnessError::Archive(format!("library path has no file name: {}", lib.display()))
    })?;
    Ok(format!("{}/{}", LIBRARY_DIR, base.to_string_lossy()))
}

/// Absolute host path as an archive name.
pub fn strip_root(path: &Path) -> String {
    path.to_string_lossy().trim_start_matches('/').to_string()
}
