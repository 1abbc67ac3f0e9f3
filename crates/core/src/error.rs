// crates/core/src/error.rs
//
// Typed failure classification for the TFR loader core. Callers match on
// these variants (EOF vs. corruption vs. schema mismatch); a single
// `anyhow`-style blob would hide exactly the distinction §7 requires.

use crate::schema::{DataType, TensorShape};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TfrError {
    /// Clean termination at a record boundary. Yielders convert this into
    /// an iterator-stop signal; it never reaches a top-level caller as an
    /// `Err` from `next`/`next_n`.
    #[error("end of stream")]
    EndOfStream,

    #[error("corrupted record at offset {offset} in {path}: {reason}")]
    Corruption {
        path: String,
        offset: u64,
        reason: String,
    },

    #[error("required feature '{key}' is missing")]
    MissingFeature { key: String },

    #[error("feature '{key}' is missing and default-value fill is not implemented")]
    DefaultNotSupported { key: String },

    #[error("feature '{key}': expected dtype {expected:?}, wire feature carries {actual:?}")]
    DTypeMismatch {
        key: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("feature '{key}': element count {observed} does not match expected shape {expected_shape:?}")]
    ShapeMismatch {
        key: String,
        observed: usize,
        expected_shape: TensorShape,
    },

    #[error("invalid reshape: {reason}")]
    InvalidShape { reason: String },

    #[error("I/O failure on {path}: {source}")]
    IoFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TfrError>;
