// crates/core/src/decompress.rs
//
// Transparent decompressing wrapper over a `ByteSource`, modeled directly
// on `original_source/sources/zlib_file.h`'s `ZlibFile`: two 256 KiB ring
// buffers (input staged from the wrapped source, output staged for the
// caller), an inflate engine advanced a chunk at a time, and `set_position`
// semantics that drain-and-discard on a forward seek but reinitialize the
// whole inflate state on a backward one (no random seek in a compressed
// stream). `flate2` stands in for the original's direct zlib bindings —
// it's the gzip/zlib crate already used across the retrieval pack.

use crate::byte_source::{ByteSource, ReadStatus, SeekOrigin};
use crate::error::TfrError;
use flate2::{Decompress, FlushDecompress, Status};

const BUF_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Gzip,
    Zlib,
}

/// Wraps `inner` and exposes the decompressed byte stream.
pub struct DecompressingByteSource<S: ByteSource> {
    inner: S,
    kind: CompressionType,
    decompress: Decompress,
    in_buf: Vec<u8>,
    in_begin: usize,
    out_buf: Vec<u8>,
    out_begin: usize,
    out_end: usize,
    src_offset: u64,
    dst_offset: u64,
}

impl<S: ByteSource> DecompressingByteSource<S> {
    pub fn new(inner: S, kind: CompressionType) -> Result<Self, TfrError> {
        let mut src = Self {
            inner,
            kind,
            decompress: Decompress::new(kind == CompressionType::Zlib),
            in_buf: Vec::with_capacity(BUF_SIZE),
            in_begin: 0,
            out_buf: vec![0u8; BUF_SIZE],
            out_begin: 0,
            out_end: 0,
            src_offset: 0,
            dst_offset: 0,
        };
        if kind == CompressionType::Gzip {
            src.skip_gzip_header()?;
        }
        Ok(src)
    }

    fn skip_gzip_header(&mut self) -> Result<(), TfrError> {
        let mut hdr = [0u8; 10];
        self.read_raw(&mut hdr)?;
        let flg = hdr[3];
        if flg & 0x04 != 0 {
            // FEXTRA
            let mut len_bytes = [0u8; 2];
            self.read_raw(&mut len_bytes)?;
            let len = u16::from_le_bytes(len_bytes) as usize;
            let mut discard = vec![0u8; len];
            self.read_raw(&mut discard)?;
        }
        if flg & 0x08 != 0 {
            self.skip_cstring()?;
        }
        if flg & 0x10 != 0 {
            self.skip_cstring()?;
        }
        if flg & 0x02 != 0 {
            let mut crc16 = [0u8; 2];
            self.read_raw(&mut crc16)?;
        }
        Ok(())
    }

    fn skip_cstring(&mut self) -> Result<(), TfrError> {
        let mut byte = [0u8; 1];
        loop {
            self.read_raw(&mut byte)?;
            if byte[0] == 0 {
                return Ok(());
            }
        }
    }

    fn read_raw(&mut self, dst: &mut [u8]) -> Result<(), TfrError> {
        let (n, _) = self.inner.read(dst)?;
        self.src_offset += n as u64;
        if n != dst.len() {
            return Err(TfrError::Corruption {
                path: self.inner.path().to_string(),
                offset: self.src_offset,
                reason: "truncated gzip header".to_string(),
            });
        }
        Ok(())
    }

    fn refill_input(&mut self) -> Result<usize, TfrError> {
        if self.in_begin > 0 {
            self.in_buf.drain(0..self.in_begin);
            self.in_begin = 0;
        }
        let old_len = self.in_buf.len();
        self.in_buf.resize(old_len + BUF_SIZE, 0);
        let (n, _) = self.inner.read(&mut self.in_buf[old_len..])?;
        self.in_buf.truncate(old_len + n);
        self.src_offset += n as u64;
        Ok(n)
    }

    /// Runs the inflate engine until `dst` is full or the stream ends.
    fn read_decompressed(&mut self, dst: &mut [u8]) -> Result<(usize, ReadStatus), TfrError> {
        if self.kind == CompressionType::None {
            let (n, status) = self.inner.read(dst)?;
            self.dst_offset += n as u64;
            return Ok((n, status));
        }

        let mut written = 0;
        loop {
            // Drain whatever's already staged in the output buffer.
            let staged = self.out_end - self.out_begin;
            if staged > 0 {
                let take = staged.min(dst.len() - written);
                dst[written..written + take]
                    .copy_from_slice(&self.out_buf[self.out_begin..self.out_begin + take]);
                self.out_begin += take;
                written += take;
                self.dst_offset += take as u64;
            }
            if written == dst.len() {
                return Ok((written, ReadStatus::Ok));
            }
            if self.out_begin == self.out_end {
                self.out_begin = 0;
                self.out_end = 0;
            }

            if self.in_begin >= self.in_buf.len() {
                let n = self.refill_input()?;
                if n == 0 && self.in_buf.is_empty() {
                    // Nothing left upstream and nothing staged: clean EOF.
                    return Ok((written, ReadStatus::Eof));
                }
            }

            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress(
                    &self.in_buf[self.in_begin..],
                    &mut self.out_buf[self.out_end..],
                    FlushDecompress::None,
                )
                .map_err(|e| TfrError::Corruption {
                    path: self.inner.path().to_string(),
                    offset: self.src_offset,
                    reason: format!("inflate failed: {e}"),
                })?;

            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;
            self.in_begin += consumed;
            self.out_end += produced;

            match status {
                Status::StreamEnd => {
                    if self.out_begin == self.out_end && produced == 0 {
                        return Ok((written, ReadStatus::Eof));
                    }
                }
                Status::BufError if consumed == 0 && produced == 0 => {
                    // Non-fatal: engine wants more input than we fed it.
                    let n = self.refill_input()?;
                    if n == 0 {
                        return Ok((written, ReadStatus::Eof));
                    }
                }
                Status::Ok | Status::BufError => {}
            }
        }
    }
}

impl<S: ByteSource> ByteSource for DecompressingByteSource<S> {
    fn read(&mut self, dst: &mut [u8]) -> Result<(usize, ReadStatus), TfrError> {
        self.read_decompressed(dst)
    }

    fn seek(&mut self, offset: u64, origin: SeekOrigin) -> Result<u64, TfrError> {
        let target = match origin {
            SeekOrigin::Start => offset,
            SeekOrigin::Current => self.dst_offset + offset,
        };
        if self.kind == CompressionType::None {
            self.inner.seek(offset, origin)?;
            self.dst_offset = target;
            return Ok(target);
        }

        if target >= self.dst_offset {
            let mut remaining = target - self.dst_offset;
            let mut scratch = [0u8; 4096];
            while remaining > 0 {
                let chunk = remaining.min(scratch.len() as u64) as usize;
                let (n, status) = self.read_decompressed(&mut scratch[..chunk])?;
                remaining -= n as u64;
                if status == ReadStatus::Eof {
                    break;
                }
            }
        } else {
            self.inner.seek(0, SeekOrigin::Start)?;
            self.decompress = Decompress::new(self.kind == CompressionType::Zlib);
            self.in_buf.clear();
            self.in_begin = 0;
            self.out_begin = 0;
            self.out_end = 0;
            self.src_offset = 0;
            self.dst_offset = 0;
            if self.kind == CompressionType::Gzip {
                self.skip_gzip_header()?;
            }
            if target > 0 {
                let mut remaining = target;
                let mut scratch = [0u8; 4096];
                while remaining > 0 {
                    let chunk = remaining.min(scratch.len() as u64) as usize;
                    let (n, status) = self.read_decompressed(&mut scratch[..chunk])?;
                    remaining -= n as u64;
                    if status == ReadStatus::Eof {
                        break;
                    }
                }
            }
        }
        Ok(self.dst_offset)
    }

    fn tell(&self) -> u64 {
        self.dst_offset
    }

    fn size(&self) -> u64 {
        // Decompressed size is unknown up front without a full scan.
        u64::MAX
    }

    fn path(&self) -> &str {
        self.inner.path()
    }
}
