// crates/core/src/yielder/basic.rs
//
// Serial traversal over a fixed file list, a direct port of
// `original_source/sources/record_yielder.h`'s `RecordYielderBasic`:
// readers are opened lazily (never more than one open at a time) and a
// file that runs out of records rolls over to the next one transparently.

use crate::byte_source::FileByteSource;
use crate::error::TfrError;
use crate::record_reader::RecordReader;
use std::path::PathBuf;

pub struct BasicYielder {
    files: Vec<PathBuf>,
    next_file: usize,
    current: Option<RecordReader<FileByteSource>>,
}

impl BasicYielder {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            next_file: 0,
            current: None,
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Returns the next record across the whole file list, or `Ok(None)`
    /// once every file has been exhausted.
    pub fn next(&mut self) -> Result<Option<Vec<u8>>, TfrError> {
        loop {
            if self.current.is_none() {
                if self.next_file >= self.files.len() {
                    return Ok(None);
                }
                let source = FileByteSource::open(&self.files[self.next_file])?;
                self.current = Some(RecordReader::new(source));
                self.next_file += 1;
            }

            let reader = self.current.as_mut().expect("just populated above");
            match reader.next()? {
                Some(record) => return Ok(Some(record)),
                None => self.current = None,
            }
        }
    }

    /// Accumulates up to `n` records. Returns fewer than `n` if the corpus
    /// ends mid-batch, and an empty `Vec` if it was already exhausted.
    pub fn next_n(&mut self, n: usize) -> Result<Vec<Vec<u8>>, TfrError> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match self.next()? {
                Some(record) => out.push(record),
                None => break,
            }
        }
        Ok(out)
    }
}
