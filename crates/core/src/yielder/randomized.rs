// crates/core/src/yielder/randomized.rs
//
// Deterministic shuffling across a multi-file record stream, a port of
// `original_source/sources/record_yielder.h`'s `RecordYielderRandomized`:
// the file list itself is permuted once up front by one `mt19937_64`
// instance, and records drawn from the resulting (still-serial) stream
// are shuffled
// through a fixed-capacity reservoir driven by a second, independently
// seeded `mt19937_64`. Both generators derive their seeds from the
// caller's `(seed, epoch)` pair the same way the original does, so the
// same pair always reproduces the same output order.

use crate::error::TfrError;
use crate::mt19937_64::Mt19937_64;
use crate::yielder::basic::BasicYielder;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

fn hash64<T: Hash>(value: T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn fisher_yates<T>(items: &mut [T], rng: &mut Mt19937_64) {
    if items.is_empty() {
        return;
    }
    for i in (1..items.len()).rev() {
        let j = rng.next_bounded((i + 1) as u64) as usize;
        items.swap(i, j);
    }
}

/// Fixed-capacity shuffle reservoir, a direct port of `record_yielder.h`'s
/// `FillBuffer`/`GetNext`: filling only ever tops the buffer up to
/// `capacity`, one input record at a time, and never evicts on its own.
/// Each insertion draws `j = rng() % (len + 1)`: a draw of `len` appends
/// the new item, any other draw moves the item currently at `j` to the
/// end of the buffer and overwrites slot `j` with the new item. Emission
/// is a plain pop from the tail and draws no randomness at all — the
/// shuffle lives entirely in how items arrived, not in how they leave.
struct ReservoirBuffer {
    capacity: usize,
    items: Vec<Vec<u8>>,
}

impl ReservoirBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    fn insert(&mut self, item: Vec<u8>, rng: &mut Mt19937_64) {
        let j = rng.next_bounded((self.items.len() + 1) as u64) as usize;
        if j == self.items.len() {
            self.items.push(item);
        } else {
            let evicted = std::mem::replace(&mut self.items[j], item);
            self.items.push(evicted);
        }
    }

    fn pop(&mut self) -> Option<Vec<u8>> {
        self.items.pop()
    }
}

pub struct RandomizedYielder {
    inner: BasicYielder,
    reservoir: ReservoirBuffer,
    reservoir_rng: Mt19937_64,
}

impl RandomizedYielder {
    pub fn new(mut files: Vec<PathBuf>, seed: u64, epoch: u64, shuffle_buffer_size: usize) -> Self {
        let shuffle_hash = hash64(seed) ^ (hash64(epoch) << 1);
        let mut permutation_rng = Mt19937_64::new(shuffle_hash);
        fisher_yates(&mut files, &mut permutation_rng);

        let reservoir_seed = hash64(shuffle_hash) ^ (hash64(seed) << 1);

        Self {
            inner: BasicYielder::new(files),
            reservoir: ReservoirBuffer::new(shuffle_buffer_size),
            reservoir_rng: Mt19937_64::new(reservoir_seed),
        }
    }

    /// Tops the reservoir up to capacity, one input record at a time,
    /// stopping early once the underlying corpus is exhausted.
    fn fill_buffer(&mut self) -> Result<(), TfrError> {
        while !self.reservoir.is_full() {
            match self.inner.next()? {
                Some(record) => self.reservoir.insert(record, &mut self.reservoir_rng),
                None => return Ok(()),
            }
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<Option<Vec<u8>>, TfrError> {
        self.fill_buffer()?;
        Ok(self.reservoir.pop())
    }

    /// Aggregates up to `n` shuffled records. Returns fewer than `n` if the
    /// corpus ends mid-batch, and an empty `Vec` once exhausted.
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
