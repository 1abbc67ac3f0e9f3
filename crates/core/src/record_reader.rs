// crates/core/src/record_reader.rs
//
// Integrity-checked TFR record framing, a direct port of
// `original_source/sources/record_readers.{h,cpp}`'s `RecordReader`: the
// 12-byte header (length + masked CRC of the length), a checksummed
// payload read, and a metadata scan that only ever touches headers.

use crate::byte_source::{ByteSource, ReadStatus, SeekOrigin};
use crate::crc32c;
use crate::error::TfrError;
use tracing::{debug, warn};

const HEADER_LEN: usize = 12; // 8-byte length + 4-byte CRC of the length
const FOOTER_LEN: usize = 4; // 4-byte CRC of the payload

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Metadata {
    pub file_size: u64,
    pub data_size: u64,
    pub entries: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    AtEof,
    Failed,
}

/// Frames and verifies records from a `ByteSource`. Move-only by
/// construction (no `Clone` impl) — mirrors the original's non-copyable
/// `RecordReader`.
pub struct RecordReader<S: ByteSource> {
    source: S,
    offset: u64,
    state: State,
    metadata: Option<Metadata>,
}

impl<S: ByteSource> RecordReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            offset: 0,
            state: State::Open,
            metadata: None,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn fail(&mut self, offset: u64, reason: String) -> TfrError {
        self.state = State::Failed;
        warn!(path = self.source.path(), offset, %reason, "tfr record corrupted");
        TfrError::Corruption {
            path: self.source.path().to_string(),
            offset,
            reason,
        }
    }

    /// Reads `size` payload bytes followed by their 4-byte masked CRC,
    /// verifying the payload's checksum. `offset` is only used for error
    /// reporting. Returns `Ok(None)` only when zero bytes are available at
    /// a record boundary (clean EOF); any other short read is corruption.
    fn read_checksummed(
        &mut self,
        offset: u64,
        size: usize,
        allow_eof: bool,
    ) -> Result<Option<Vec<u8>>, TfrError> {
        let mut buf = vec![0u8; size + FOOTER_LEN];
        let (n, status) = self.source.read(&mut buf)?;
        if n == 0 && status == ReadStatus::Eof && allow_eof {
            return Ok(None);
        }
        if n != buf.len() {
            return Err(self.fail(offset, "unexpected EOF mid-record".to_string()));
        }
        let masked_crc = u32::from_le_bytes(buf[size..size + 4].try_into().unwrap());
        let expected = crc32c::crc32c(&buf[..size]);
        if crc32c::unmask(masked_crc) != expected {
            return Err(self.fail(offset, "CRC32C mismatch".to_string()));
        }
        buf.truncate(size);
        Ok(Some(buf))
    }

    /// Reads the record at `offset`, advancing it past the frame on
    /// success. Returns `Ok(None)` on clean end-of-stream.
    pub fn read_record(&mut self, offset: &mut u64) -> Result<Option<Vec<u8>>, TfrError> {
        if self.state == State::Failed {
            return Err(self.fail(*offset, "reader is in a failed state".to_string()));
        }
        self.source.seek(*offset, SeekOrigin::Start)?;

        let header = match self.read_checksummed(*offset, 8, true)? {
            Some(h) => h,
            None => return Ok(None),
        };
        let length = u64::from_le_bytes(header[..8].try_into().unwrap()) as usize;

        let payload = self
            .read_checksummed(*offset + HEADER_LEN as u64, length, false)?
            .expect("payload read cannot observe clean EOF");

        *offset += HEADER_LEN as u64 + length as u64 + FOOTER_LEN as u64;
        Ok(Some(payload))
    }

    /// Reads the next record at the reader's internal cursor.
    pub fn next(&mut self) -> Result<Option<Vec<u8>>, TfrError> {
        if self.state == State::AtEof {
            return Ok(None);
        }
        let mut offset = self.offset;
        let result = self.read_record(&mut offset);
        match &result {
            Ok(Some(_)) => {
                self.offset = offset;
            }
            Ok(None) => {
                self.state = State::AtEof;
            }
            Err(_) => {}
        }
        result
    }

    /// Streams the file once, reading only headers and skipping payloads
    /// via seek, filling `{file_size, data_size, entries}` (§4.3). Cached
    /// after the first call.
    pub fn get_metadata(&mut self) -> Result<Metadata, TfrError> {
        if let Some(m) = self.metadata {
            return Ok(m);
        }
        let stat_size = self.source.size();
        self.source.seek(0, SeekOrigin::Start)?;

        let mut data_size = 0u64;
        let mut entries = 0u64;
        let mut offset = 0u64;

        while offset < stat_size {
            let header = match self.read_checksummed(offset, 8, true)? {
                Some(h) => h,
                None => break,
            };
            let length = u64::from_le_bytes(header[..8].try_into().unwrap());
            self.source.seek(length + FOOTER_LEN as u64, SeekOrigin::Current)?;
            offset += HEADER_LEN as u64 + length + FOOTER_LEN as u64;
            data_size += length;
            entries += 1;
        }

        let computed_file_size = data_size + (HEADER_LEN as u64 + FOOTER_LEN as u64) * entries;
        if computed_file_size != stat_size {
            return Err(self.fail(
                offset,
                format!(
                    "header scan computed file_size {computed_file_size} but source reports {stat_size}"
                ),
            ));
        }

        let metadata = Metadata {
            file_size: computed_file_size,
            data_size,
            entries,
        };
        debug!(?metadata, path = self.source.path(), "tfr metadata computed");
        self.metadata = Some(metadata);
        Ok(metadata)
    }
}
