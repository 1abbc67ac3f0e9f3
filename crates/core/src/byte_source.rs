// crates/core/src/byte_source.rs
//
// The record reader borrows a byte source rather than owning a concrete
// file type, so the same framing/CRC logic in `record_reader.rs` serves
// plain files, memory-mapped files, and the decompressing wrapper in
// `decompress.rs` without runtime dispatch on the hot path (generic over
// `S: ByteSource`, grounded in the teacher's `StorageBackend` capability
// trait in `crates/storage/src/lib.rs`, here generalized to random-access
// reads instead of whole-object get/put).

use crate::error::TfrError;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
}

/// Capability interface for random-access read of an opaque file-like
/// region (§6). Implementations need not be thread-safe: each reader owns
/// its source, and parallel decode never touches it (§5).
pub trait ByteSource {
    fn read(&mut self, dst: &mut [u8]) -> Result<(usize, ReadStatus), TfrError>;
    fn seek(&mut self, offset: u64, origin: SeekOrigin) -> Result<u64, TfrError>;
    fn tell(&self) -> u64;
    fn size(&self) -> u64;
    /// A raw pointer into the backing storage, when the source is mapped
    /// into memory (§6). Readers may use this to skip a copy but must
    /// still keep `seek`/`tell` semantics correct.
    fn data_pointer(&self) -> Option<*const u8> {
        None
    }
    fn path(&self) -> &str;
}

/// Plain-file byte source. Unbuffered: the record reader issues its own
/// small seeks per record, so a read-ahead buffer would need to be
/// invalidated on every `seek` anyway — the teacher's `PosixBackend` makes
/// the same call for whole-object reads.
pub struct FileByteSource {
    file: File,
    path: String,
    size: u64,
    pos: u64,
}

impl FileByteSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TfrError> {
        let path_buf: PathBuf = path.as_ref().to_path_buf();
        let path_str = path_buf.display().to_string();
        let file = File::open(&path_buf).map_err(|source| TfrError::IoFailed {
            path: path_str.clone(),
            source,
        })?;
        let size = file
            .metadata()
            .map_err(|source| TfrError::IoFailed {
                path: path_str.clone(),
                source,
            })?
            .len();
        Ok(Self {
            file,
            path: path_str,
            size,
            pos: 0,
        })
    }
}

impl ByteSource for FileByteSource {
    fn read(&mut self, dst: &mut [u8]) -> Result<(usize, ReadStatus), TfrError> {
        let mut total = 0;
        while total < dst.len() {
            match self.file.read(&mut dst[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(source) => {
                    return Err(TfrError::IoFailed {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }
        self.pos += total as u64;
        let status = if total < dst.len() {
            ReadStatus::Eof
        } else {
            ReadStatus::Ok
        };
        Ok((total, status))
    }

    fn seek(&mut self, offset: u64, origin: SeekOrigin) -> Result<u64, TfrError> {
        let from = match origin {
            SeekOrigin::Start => SeekFrom::Start(offset),
            SeekOrigin::Current => SeekFrom::Current(offset as i64),
        };
        let pos = self.file.seek(from).map_err(|source| TfrError::IoFailed {
            path: self.path.clone(),
            source,
        })?;
        self.pos = pos;
        Ok(pos)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn path(&self) -> &str {
        &self.path
    }
}

/// Memory-mapped byte source. `data_pointer()` exposes the mapping so
/// readers can avoid a copy for header parsing.
pub struct MmapByteSource {
    mmap: memmap2::Mmap,
    path: String,
    pos: u64,
}

impl MmapByteSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TfrError> {
        let path_buf = path.as_ref().to_path_buf();
        let path_str = path_buf.display().to_string();
        let file = File::open(&path_buf).map_err(|source| TfrError::IoFailed {
            path: path_str.clone(),
            source,
        })?;
        // SAFETY: the mapping is read-only for the lifetime of this
        // source; callers must not mutate the underlying file concurrently.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|source| TfrError::IoFailed {
            path: path_str.clone(),
            source,
        })?;
        Ok(Self {
            mmap,
            path: path_str,
            pos: 0,
        })
    }
}

impl ByteSource for MmapByteSource {
    fn read(&mut self, dst: &mut [u8]) -> Result<(usize, ReadStatus), TfrError> {
        let avail = self.mmap.len() as u64 - self.pos;
        let n = avail.min(dst.len() as u64) as usize;
        dst[..n].copy_from_slice(&self.mmap[self.pos as usize..self.pos as usize + n]);
        self.pos += n as u64;
        let status = if n < dst.len() {
            ReadStatus::Eof
        } else {
            ReadStatus::Ok
        };
        Ok((n, status))
    }

    fn seek(&mut self, offset: u64, origin: SeekOrigin) -> Result<u64, TfrError> {
        self.pos = match origin {
            SeekOrigin::Start => offset,
            SeekOrigin::Current => (self.pos as i64 + offset as i64) as u64,
        };
        Ok(self.pos)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn data_pointer(&self) -> Option<*const u8> {
        Some(self.mmap.as_ptr())
    }

    fn path(&self) -> &str {
        &self.path
    }
}
