//! "New ASCII" (newc, magic `070701`) cpio encoding.
//!
//! Each record is a 110-byte ASCII header of thirteen 8-digit hex fields,
//! the NUL-terminated name padded so header+name is a multiple of four,
//! then the body padded to a multiple of four. A `TRAILER!!!` record ends
//! the archive.

use std::io::{self, Read, Write};

use guest_harness_core::error::{HarnessError, Result};
use serde::Serialize;

const MAGIC: &[u8; 6] = b"070701";
const HEADER_LEN: usize = 110;
const TRAILER_NAME: &str = "TRAILER!!!";

/// File type bits.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// Metadata of one archive record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub size: u32,
}

impl EntryHeader {
    /// Header for a directory.
    pub fn directory(name: impl Into<String>, perm: u32) -> Self {
        Self {
            name: name.into(),
            mode: S_IFDIR | (perm & 0o7777),
            uid: 0,
            gid: 0,
            nlink: 2,
            mtime: 0,
            size: 0,
        }
    }

    /// Header for a regular file.
    pub fn file(name: impl Into<String>, perm: u32, size: u32) -> Self {
        Self {
            name: name.into(),
            mode: S_IFREG | (perm & 0o7777),
            uid: 0,
            gid: 0,
            nlink: 1,
            mtime: 0,
            size,
        }
    }

    pub fn with_mtime(mut self, mtime: u32) -> Self {
        self.mtime = mtime;
        self
    }
}

/// Sequential newc writer.
pub struct CpioWriter<W: Write> {
    inner: W,
    next_ino: u32,
}

impl<W: Write> CpioWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, next_ino: 1 }
    }

    /// Append a record without a body.
    pub fn append_dir(&mut self, header: &EntryHeader) -> Result<()> {
        if header.size != 0 {
            return Err(HarnessError::Archive(format!(
                "directory {} must have zero size",
                header.name
            )));
        }
        self.write_header(header, true)
            .map_err(|e| archive_io(&header.name, "header", e))
    }

    /// Append a record whose body is exactly `header.size` bytes from `body`.
    pub fn append_file<R: Read>(&mut self, header: &EntryHeader, body: &mut R) -> Result<()> {
        self.write_header(header, true)
            .map_err(|e| archive_io(&header.name, "header", e))?;

        let expected = u64::from(header.size);
        let copied = io::copy(&mut body.take(expected), &mut self.inner)
            .map_err(|e| archive_io(&header.name, "body", e))?;
        if copied != expected {
            return Err(HarnessError::Archive(format!(
                "{}: source ended after {} of {} bytes",
                header.name, copied, expected
            )));
        }

        self.inner
            .write_all(padding(copied as usize))
            .map_err(|e| archive_io(&header.name, "body", e))
    }

    /// Write the trailer record and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        let trailer = EntryHeader {
            name: TRAILER_NAME.to_string(),
            mode: 0,
            uid: 0,
            gid: 0,
            nlink: 1,
            mtime: 0,
            size: 0,
        };
        self.write_header(&trailer, false)
            .and_then(|_| self.inner.flush())
            .map_err(|e| archive_io(TRAILER_NAME, "trailer", e))?;
        Ok(self.inner)
    }

    fn write_header(&mut self, header: &EntryHeader, numbered: bool) -> io::Result<()> {
        let name_size = header.name.len() + 1;
        let ino = if numbered {
            self.next_ino += 1;
            self.next_ino - 1
        } else {
            0
        };

        let fields = [
            ino,
            header.mode,
            header.uid,
            header.gid,
            header.nlink,
            header.mtime,
            header.size,
            0, // devmajor
            0, // devminor
            0, // rdevmajor
            0, // rdevminor
            name_size as u32,
            0, // check
        ];

        let mut buf = Vec::with_capacity(HEADER_LEN + name_size + 3);
        buf.extend_from_slice(MAGIC);
        for field in fields {
            buf.extend_from_slice(format!("{:08x}", field).as_bytes());
        }
        buf.extend_from_slice(header.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(padding(buf.len()));
        self.inner.write_all(&buf)
    }
}

fn padding(len: usize) -> &'static [u8] {
    const ZEROS: [u8; 3] = [0; 3];
    &ZEROS[..(4 - len % 4) % 4]
}

fn archive_io(name: &str, what: &str, err: io::Error) -> HarnessError {
    HarnessError::Archive(format!("failed to write {} for {}: {}", what, name, err))
}

/// A record read back from an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpioEntry {
    pub name: String,
    pub ino: u32,
    pub mode: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub size: u32,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl CpioEntry {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }
}

/// Decode every record up to (not including) the trailer.
pub fn read_archive(bytes: &[u8]) -> Result<Vec<CpioEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;

    loop {
        let header = bytes
            .get(pos..pos + HEADER_LEN)
            .ok_or_else(|| HarnessError::Archive(format!("truncated header at offset {}", pos)))?;
        if &header[..6] != MAGIC {
            return Err(HarnessError::Archive(format!("bad magic at offset {}", pos)));
        }

        let field = |idx: usize| -> Result<u32> {
            let start = 6 + idx * 8;
            let text = std::str::from_utf8(&header[start..start + 8])
                .map_err(|_| HarnessError::Archive(format!("non-ASCII header at offset {}", pos)))?;
            u32::from_str_radix(text, 16)
                .map_err(|_| HarnessError::Archive(format!("bad hex field {:?}", text)))
        };

        let ino = field(0)?;
        let mode = field(1)?;
        let nlink = field(4)?;
        let mtime = field(5)?;
        let size = field(6)?;
        let name_size = field(11)? as usize;

        let name_start = pos + HEADER_LEN;
        let name_bytes = bytes
            .get(name_start..name_start + name_size)
            .ok_or_else(|| HarnessError::Archive("truncated name".to_string()))?;
        let name = String::from_utf8_lossy(name_bytes.strip_suffix(&[0]).unwrap_or(name_bytes))
            .into_owned();

        let data_start = name_start + name_size + padding(HEADER_LEN + name_size).len();
        if name == TRAILER_NAME {
            return Ok(entries);
        }

        let data_end = data_start + size as usize;
        let data = bytes
            .get(data_start..data_end)
            .ok_or_else(|| HarnessError::Archive(format!("truncated body for {}", name)))?
            .to_vec();

        entries.push(CpioEntry {
            name,
            ino,
            mode,
            nlink,
            mtime,
            size,
            data,
        });
        pos = data_end + padding(size as usize).len();
    }
}
