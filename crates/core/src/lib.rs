// crates/core/src/lib.rs
//
// Public surface for the TFR loader core: record framing and integrity
// checking, transparent decompression, feature decoding into dense
// tensors, and the shuffled multi-file yielders built on top.

pub mod byte_source;
pub mod crc32c;
pub mod decoder;
pub mod decompress;
pub mod error;
pub mod mt19937_64;
pub mod protobuf;
pub mod record_reader;
pub mod schema;
pub mod worker_pool;
pub mod yielder;

pub use byte_source::{ByteSource, FileByteSource, MmapByteSource, ReadStatus, SeekOrigin};
pub use decompress::{CompressionType, DecompressingByteSource};
pub use error::{Result, TfrError};
pub use record_reader::{Metadata, RecordReader};
pub use schema::{DataType, FixedLenFeature, TensorBuffer, TensorShape};
pub use worker_pool::WorkerPool;
pub use yielder::{BasicYielder, ParsedRandomizedYielder, RandomizedYielder};
