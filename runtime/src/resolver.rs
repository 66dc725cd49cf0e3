//! Dynamic dependency resolution for the guest executable.
//!
//! Finds the interpreter an executable requests (its `PT_INTERP` segment)
//! and asks it, or `ldd` for interpreter-less binaries, which shared
//! libraries the executable needs.

use std::path::{Path, PathBuf};
use std::process::Command;

use goblin::container::Ctx;
use goblin::elf::program_header::{ProgramHeader, PT_INTERP};
use goblin::elf::Elf;
use guest_harness_core::error::{HarnessError, Result};
use serde::Serialize;

/// Exit status `ldd` uses for "not a dynamic executable".
const LDD_NOT_DYNAMIC: i32 = 1;

/// Separator between library name and resolved path in listing output.
const LISTING_MARKER: &str = "=>";

/// How an executable is linked and what it needs at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Dynamic linker requested by the executable, if any.
    pub interpreter: Option<PathBuf>,

    /// Absolute library paths in listing order, duplicates included.
    pub libraries: Vec<PathBuf>,
}

impl Resolution {
    /// Whether the executable is statically linked.
    pub fn is_static(&self) -> bool {
        self.interpreter.is_none()
    }
}

/// Resolves the shared-library closure of an executable.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    /// Tool used when the executable has no interpreter.
    ldd: String,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyResolver {
    /// Create a resolver using the system `ldd`.
    pub fn new() -> Self {
        Self {
            ldd: "ldd".to_string(),
        }
    }

    /// Use a different linker-inspection tool.
    pub fn with_ldd(mut self, ldd: impl Into<String>) -> Self {
        self.ldd = ldd.into();
        self
    }

    /// Resolve the interpreter and library closure of `executable`.
    pub fn resolve(&self, executable: &Path) -> Result<Resolution> {
        let bytes = std::fs::read(executable).map_err(|e| HarnessError::ElfParse {
            path: executable.to_path_buf(),
            message: format!("failed to read: {}", e),
        })?;

        let interpreter = read_interpreter(&bytes).map_err(|err| match err {
            InterpError::Truncated {
                declared,
                available,
            } => HarnessError::InterpreterTruncated {
                path: executable.to_path_buf(),
                declared,
                available,
            },
        })?;

        let libraries = match &interpreter {
            Some(interp) => {
                tracing::debug!(
                    executable = %executable.display(),
                    interpreter = %interp.display(),
                    "Listing libraries through interpreter"
                );
                list_with_interpreter(interp, executable)?
            }
            None => {
                tracing::debug!(
                    executable = %executable.display(),
                    tool = %self.ldd,
                    "No interpreter, listing libraries with ldd"
                );
                self.list_with_ldd(executable)?
            }
        };

        tracing::info!(
            executable = %executable.display(),
            interpreter = ?interpreter,
            libraries = libraries.len(),
            "Resolved dependencies"
        );

        Ok(Resolution {
            interpreter,
            libraries,
        })
    }

    /// [`resolve`](Self::resolve) on the blocking thread pool.
    pub async fn resolve_async(self, executable: PathBuf) -> Result<Resolution> {
        tokio::task::spawn_blocking(move || self.resolve(&executable))
            .await
            .map_err(|e| HarnessError::Other(format!("dependency resolution task failed: {}", e)))?
    }

    fn list_with_ldd(&self, executable: &Path) -> Result<Vec<PathBuf>> {
        let output = Command::new(&self.ldd)
            .arg(executable)
            .output()
            .map_err(|e| HarnessError::DependencyTool {
                tool: self.ldd.clone(),
                message: format!("failed to run: {}", e),
            })?;

        if !output.status.success() {
            if output.status.code() == Some(LDD_NOT_DYNAMIC) {
                tracing::info!(
                    executable = %executable.display(),
                    "Not a dynamic executable"
                );
                return Ok(Vec::new());
            }
            return Err(HarnessError::DependencyTool {
                tool: self.ldd.clone(),
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(parse_library_listing(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }
}

/// Run the dynamic linker in listing mode against `executable`.
fn list_with_interpreter(interpreter: &Path, executable: &Path) -> Result<Vec<PathBuf>> {
    let tool = interpreter.display().to_string();
    let output = Command::new(interpreter)
        .arg("--list")
        .arg(executable)
        .output()
        .map_err(|e| HarnessError::DependencyTool {
            tool: tool.clone(),
            message: format!("failed to run: {}", e),
        })?;

    if !output.status.success() {
        return Err(HarnessError::DependencyTool {
            tool,
            message: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(parse_library_listing(&String::from_utf8_lossy(
        &output.stdout,
    )))
}

/// Failure while extracting the interpreter path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    /// The segment extends past the end of the file.
    #[error("PT_INTERP declares {declared} bytes but only {available} are present")]
    Truncated { declared: u64, available: u64 },
}

/// Extract the interpreter path from an ELF image.
///
/// Input that does not parse as ELF is treated as a static executable.
pub fn read_interpreter(bytes: &[u8]) -> std::result::Result<Option<PathBuf>, InterpError> {
    let program_headers = match parse_program_headers(bytes) {
        Some(phdrs) => phdrs,
        None => return Ok(None),
    };

    let interp = match program_headers.iter().find(|ph| ph.p_type == PT_INTERP) {
        Some(ph) => ph,
        None => return Ok(None),
    };

    if interp.p_filesz == 0 {
        return Ok(None);
    }

    let available = (bytes.len() as u64).saturating_sub(interp.p_offset);
    if interp.p_filesz > available {
        return Err(InterpError::Truncated {
            declared: interp.p_filesz,
            available,
        });
    }

    let start = interp.p_offset as usize;
    let raw = &bytes[start..start + interp.p_filesz as usize];
    let nul = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let path = String::from_utf8_lossy(&raw[..nul]).into_owned();

    if path.is_empty() {
        return Ok(None);
    }
    Ok(Some(PathBuf::from(path)))
}

fn parse_program_headers(bytes: &[u8]) -> Option<Vec<ProgramHeader>> {
    let header = Elf::parse_header(bytes).ok()?;
    let ctx = Ctx::new(header.container().ok()?, header.endianness().ok()?);
    ProgramHeader::parse(bytes, header.e_phoff as usize, header.e_phnum as usize, ctx).ok()
}

/// Parse `name => path (address)` listing output into library paths.
///
/// Lines without `=>` (headers, vDSO, statically resolved entries) are
/// skipped. The path is the right-hand side up to its first space.
pub fn parse_library_listing(output: &str) -> Vec<PathBuf> {
    output
        .split('\n')
        .filter_map(|line| line.split_once(LISTING_MARKER))
        .map(|(_, rhs)| {
            let rhs = rhs.trim();
            let end = rhs.find(' ').unwrap_or(rhs.len());
            PathBuf::from(&rhs[..end])
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Build a minimal little-endian ELF64 image with one PT_INTERP segment.
    pub(crate) fn elf_with_interp(interp: &[u8], declared_len: u64) -> Vec<u8> {
        let phoff: u64 = 64;
        let data_off: u64 = phoff + 56;
        let mut out = Vec::new();

        // e_ident
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
        out.extend_from_slice(&0x3eu16.to_le_bytes()); // e_machine = x86_64
        out.extend_from_slice(&1u32.to_le_bytes()); // e_version
        out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        out.extend_from_slice(&phoff.to_le_bytes()); // e_phoff
        out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
        out.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        assert_eq!(out.len() as u64, phoff);

        out.extend_from_slice(&PT_INTERP.to_le_bytes()); // p_type
        out.extend_from_slice(&4u32.to_le_bytes()); // p_flags
        out.extend_from_slice(&data_off.to_le_bytes()); // p_offset
        out.extend_from_slice(&0u64.to_le_bytes()); // p_vaddr
        out.extend_from_slice(&0u64.to_le_bytes()); // p_paddr
        out.extend_from_slice(&declared_len.to_le_bytes()); // p_filesz
        out.extend_from_slice(&declared_len.to_le_bytes()); // p_memsz
        out.extend_from_slice(&1u64.to_le_bytes()); // p_align
        assert_eq!(out.len() as u64, data_off);

        out.extend_from_slice(interp);
        out
    }

    /// ELF64 image without any program headers.
    pub(crate) fn static_elf() -> Vec<u8> {
        let mut out = elf_with_interp(b"", 0);
        // e_phnum = 0
        out[56] = 0;
        out.truncate(64);
        out
    }

    fn write_exe(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_read_interpreter_finds_path() {
        let image = elf_with_interp(b"/lib64/ld-linux-x86-64.so.2\0", 28);
        let interp = read_interpreter(&image).unwrap();
        assert_eq!(interp, Some(PathBuf::from("/lib64/ld-linux-x86-64.so.2")));
    }

    #[test]
    fn test_read_interpreter_truncates_at_nul() {
        let image = elf_with_interp(b"/lib/ld.so\0garbage", 18);
        let interp = read_interpreter(&image).unwrap();
        assert_eq!(interp, Some(PathBuf::from("/lib/ld.so")));
    }

    #[test]
    fn test_read_interpreter_truncated_segment() {
        let image = elf_with_interp(b"/lib/ld", 64);
        let err = read_interpreter(&image).unwrap_err();
        assert_eq!(
            err,
            InterpError::Truncated {
                declared: 64,
                available: 7
            }
        );
    }

    #[test]
    fn test_read_interpreter_without_segment() {
        assert_eq!(read_interpreter(&static_elf()).unwrap(), None);
    }

    #[test]
    fn test_read_interpreter_not_elf() {
        assert_eq!(read_interpreter(b"#!/bin/sh\necho hi\n").unwrap(), None);
        assert_eq!(read_interpreter(&[]).unwrap(), None);
    }

    #[test]
    fn test_parse_listing_single_library() {
        let libs = parse_library_listing("libc.so.6 => /lib/libc.so.6 (0x00007f0000000000)\n");
        assert_eq!(libs, vec![PathBuf::from("/lib/libc.so.6")]);
    }

    #[test]
    fn test_parse_listing_skips_lines_without_marker() {
        let output = "\tlinux-vdso.so.1 (0x00007ffd5a1f0000)\n\
                      \tlibpthread.so.0 => /lib/x86_64-linux-gnu/libpthread.so.0 (0x00007f1)\n\
                      \tlibc.so.6 => /lib/x86_64-linux-gnu/libc.so.6 (0x00007f2)\n\
                      \t/lib64/ld-linux-x86-64.so.2 (0x00007f3)\n";
        let libs = parse_library_listing(output);
        assert_eq!(
            libs,
            vec![
                PathBuf::from("/lib/x86_64-linux-gnu/libpthread.so.0"),
                PathBuf::from("/lib/x86_64-linux-gnu/libc.so.6"),
            ]
        );
    }

    #[test]
    fn test_parse_listing_vdso_only() {
        assert!(parse_library_listing("linux-vdso.so.1 (0x00007f...)\n").is_empty());
    }

    #[test]
    fn test_parse_listing_keeps_duplicates() {
        let output = "a => /lib/a.so (0x1)\nb => /lib/a.so (0x2)\n";
        assert_eq!(parse_library_listing(output).len(), 2);
    }

    #[test]
    fn test_parse_listing_path_without_address() {
        let libs = parse_library_listing("libfoo.so =>   /opt/libfoo.so  \n");
        assert_eq!(libs, vec![PathBuf::from("/opt/libfoo.so")]);
    }

    // Non-ELF input resolves as static, so `sh` stands in for ldd and
    // runs the "executable" as a script that fakes the listing.

    #[test]
    fn test_resolve_static_with_not_dynamic_status() {
        let dir = TempDir::new().unwrap();
        let exe = write_exe(
            &dir,
            "init",
            b"echo '\tnot a dynamic executable' >&2\nexit 1\n",
        );

        let resolution = DependencyResolver::new().with_ldd("sh").resolve(&exe).unwrap();
        assert!(resolution.is_static());
        assert!(resolution.libraries.is_empty());
    }

    #[test]
    fn test_resolve_static_parses_ldd_output() {
        let dir = TempDir::new().unwrap();
        let exe = write_exe(
            &dir,
            "init",
            b"printf 'libc.so.6 => /lib/libc.so.6 (0x00007f00)\\nlinux-vdso.so.1 (0x1)\\n'\n",
        );

        let resolution = DependencyResolver::new().with_ldd("sh").resolve(&exe).unwrap();
        assert_eq!(resolution.libraries, vec![PathBuf::from("/lib/libc.so.6")]);
    }

    #[tokio::test]
    async fn test_resolve_async_matches_blocking() {
        let dir = TempDir::new().unwrap();
        let exe = write_exe(
            &dir,
            "init",
            b"printf 'libc.so.6 => /lib/libc.so.6 (0x00007f00)\\n'\n",
        );

        let resolver = DependencyResolver::new().with_ldd("sh");
        let blocking = resolver.resolve(&exe).unwrap();
        let resolution = resolver.resolve_async(exe).await.unwrap();
        assert_eq!(resolution, blocking);
        assert_eq!(resolution.libraries, vec![PathBuf::from("/lib/libc.so.6")]);
    }

    #[test]
    fn test_resolve_ldd_other_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let exe = write_exe(&dir, "init", b"echo boom >&2\nexit 2\n");

        let result = DependencyResolver::new().with_ldd("sh").resolve(&exe);
        match result {
            Err(HarnessError::DependencyTool { tool, message }) => {
                assert_eq!(tool, "sh");
                assert!(message.contains("boom"));
            }
            other => panic!("expected DependencyTool error, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_static_elf_uses_ldd() {
        let dir = TempDir::new().unwrap();
        let exe = write_exe(&dir, "init", &static_elf());
        // `false` exits with the "not a dynamic executable" status
        let resolution = DependencyResolver::new().with_ldd("false").resolve(&exe).unwrap();
        assert!(resolution.is_static());
        assert!(resolution.libraries.is_empty());
    }

    #[test]
    fn test_resolve_missing_tool() {
        let dir = TempDir::new().unwrap();
        let exe = write_exe(&dir, "init", &static_elf());
        let result = DependencyResolver::new()
            .with_ldd("/nonexistent/ldd")
            .resolve(&exe);
        assert!(matches!(result, Err(HarnessError::DependencyTool { .. })));
    }

    #[test]
    fn test_resolve_through_interpreter() {
        let dir = TempDir::new().unwrap();
        // `echo --list <exe>` succeeds and prints nothing with a marker
        let image = elf_with_interp(b"/bin/echo\0", 10);
        let exe = write_exe(&dir, "init", &image);

        let resolution = DependencyResolver::new().resolve(&exe).unwrap();
        assert_eq!(resolution.interpreter, Some(PathBuf::from("/bin/echo")));
        assert!(resolution.libraries.is_empty());
    }

    #[test]
    fn test_resolve_interpreter_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let image = elf_with_interp(b"/bin/false\0", 11);
        let exe = write_exe(&dir, "init", &image);

        let result = DependencyResolver::new().resolve(&exe);
        assert!(matches!(result, Err(HarnessError::DependencyTool { .. })));
    }

    #[test]
    fn test_resolve_truncated_interpreter_is_fatal() {
        let dir = TempDir::new().unwrap();
        let exe = write_exe(&dir, "init", &elf_with_interp(b"/lib", 100));
        let result = DependencyResolver::new().resolve(&exe);
        assert!(matches!(
            result,
            Err(HarnessError::InterpreterTruncated { declared: 100, .. })
        ));
    }

    #[test]
    fn test_resolve_unreadable_executable() {
        let result = DependencyResolver::new().resolve(Path::new("/nonexistent/init"));
        assert!(matches!(result, Err(HarnessError::ElfParse { .. })));
    }
}
