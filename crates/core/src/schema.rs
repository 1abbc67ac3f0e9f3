// crates/core/src/schema.rs
//
// Tensor dtypes, shapes, and the batch allocator the decoder writes into.
// `DataType`'s discriminants are pinned to the wire values `example.cpp`
// switches on (§6); `TensorBuffer` is the host-facing handle analogous to
// the teacher's `ndarray`-backed tensors in `frameworks/src/pytorch.rs`,
// generalized here to the four dtypes this format supports and allocated
// once per batch rather than once per sample.

use crate::error::TfrError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Invalid = 0,
    Float = 1,
    Uint8 = 4,
    String = 7,
    Int64 = 9,
}

impl DataType {
    pub fn element_size(self) -> Option<usize> {
        match self {
            DataType::Float => Some(4),
            DataType::Uint8 => Some(1),
            DataType::Int64 => Some(8),
            DataType::String | DataType::Invalid => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TensorShape(pub Vec<usize>);

impl TensorShape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self(dims)
    }

    pub fn num_elements(&self) -> usize {
        self.0.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

/// A fixed-length feature spec (§3): every example must contribute exactly
/// `shape.num_elements()` values of `dtype`, or `default_value` is used when
/// present (see `TfrError::DefaultNotSupported` for the unimplemented case).
#[derive(Debug, Clone)]
pub struct FixedLenFeature {
    pub key: String,
    pub shape: TensorShape,
    pub dtype: DataType,
    pub default_value: Option<Vec<u8>>,
}

impl FixedLenFeature {
    pub fn new(key: impl Into<String>, shape: TensorShape, dtype: DataType) -> Self {
        Self {
            key: key.into(),
            shape,
            dtype,
            default_value: None,
        }
    }

    pub fn with_default(mut self, default_value: Vec<u8>) -> Self {
        self.default_value = Some(default_value);
        self
    }
}

/// The decoded, batched output for one feature. Dense: `Int64`/`Float`/
/// `Uint8` are `batch_size * num_elements` flat, row-major; `Bytes` is one
/// `Vec<u8>` per (sample, element) pair in the same row-major order.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorBuffer {
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Uint8(Vec<u8>),
    Bytes(Vec<Vec<u8>>),
}

impl TensorBuffer {
    pub fn dtype(&self) -> DataType {
        match self {
            TensorBuffer::Int64(_) => DataType::Int64,
            TensorBuffer::Float(_) => DataType::Float,
            TensorBuffer::Uint8(_) => DataType::Uint8,
            TensorBuffer::Bytes(_) => DataType::String,
        }
    }

    fn zeroed(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::Int64 => TensorBuffer::Int64(vec![0i64; len]),
            DataType::Float => TensorBuffer::Float(vec![0.0f32; len]),
            DataType::Uint8 => TensorBuffer::Uint8(vec![0u8; len]),
            DataType::String => TensorBuffer::Bytes(vec![Vec::new(); len]),
            DataType::Invalid => TensorBuffer::Bytes(Vec::new()),
        }
    }
}

/// Allocates one zeroed `TensorBuffer` per feature, each sized for
/// `batch_size` samples (§6). Allocation happens once per batch; the
/// decoder then partitions each buffer into per-sample slices and writes
/// into them without reallocating.
pub fn allocate_batch(batch_size: usize, features: &[FixedLenFeature]) -> Vec<TensorBuffer> {
    features
        .iter()
        .map(|f| TensorBuffer::zeroed(f.dtype, batch_size * f.shape.num_elements()))
        .collect()
}

/// A disjoint, per-sample mutable view into a batch's backing buffer,
/// letting independent workers in the pool (§5) write their sample's slot
/// without synchronization.
pub enum TensorSlotMut<'a> {
    Int64(&'a mut [i64]),
    Float(&'a mut [f32]),
    Uint8(&'a mut [u8]),
    Bytes(&'a mut [Vec<u8>]),
}

/// Splits `buffer` into `batch_size` disjoint slots of `elements_per_sample`
/// each. Panics if `buffer`'s length isn't an exact multiple — a
/// programmer error in the caller, not a data-dependent failure.
pub fn partition_batch(
    buffer: &mut TensorBuffer,
    batch_size: usize,
    elements_per_sample: usize,
) -> Vec<TensorSlotMut<'_>> {
    match buffer {
        TensorBuffer::Int64(v) => v
            .chunks_mut(elements_per_sample)
            .take(batch_size)
            .map(TensorSlotMut::Int64)
            .collect(),
        TensorBuffer::Float(v) => v
            .chunks_mut(elements_per_sample)
            .take(batch_size)
            .map(TensorSlotMut::Float)
            .collect(),
        TensorBuffer::Uint8(v) => v
            .chunks_mut(elements_per_sample)
            .take(batch_size)
            .map(TensorSlotMut::Uint8)
            .collect(),
        TensorBuffer::Bytes(v) => v
            .chunks_mut(elements_per_sample)
            .take(batch_size)
            .map(TensorSlotMut::Bytes)
            .collect(),
    }
}

pub fn check_dtype(key: &str, expected: DataType, actual: DataType) -> Result<(), TfrError> {
    if expected == actual {
        Ok(())
    } else {
        Err(TfrError::DTypeMismatch {
            key: key.to_string(),
            expected,
            actual,
        })
    }
}
