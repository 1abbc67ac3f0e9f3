// crates/core/src/decoder.rs
//
// Decodes a serialized `Example` record into the schema's dense tensors,
// a direct port of `original_source/sources/example.cpp`'s `FeatureDecode`:
// walk `Features.feature` (a `map<string, Feature>`), dispatch on which
// oneof branch (`bytes_list`/`float_list`/`int64_list`) is present, and
// copy into the caller-supplied slot with the exact per-dtype validation
// rules the original enforces (including UINT8 features, which are
// encoded on the wire as a single concatenated `bytes_list` entry rather
// than per-element).

use crate::error::TfrError;
use crate::protobuf::{self, WireType};
use crate::schema::{DataType, FixedLenFeature, TensorBuffer, TensorShape, TensorSlotMut};
use std::collections::HashMap;

const EXAMPLE_FEATURES_FIELD: u32 = 1;
const FEATURES_FEATURE_FIELD: u32 = 1;
const MAP_ENTRY_KEY_FIELD: u32 = 1;
const MAP_ENTRY_VALUE_FIELD: u32 = 2;
const FEATURE_BYTES_LIST: u32 = 1;
const FEATURE_FLOAT_LIST: u32 = 2;
const FEATURE_INT64_LIST: u32 = 3;
const LIST_VALUE_FIELD: u32 = 1;

enum RawFeature {
    Bytes(Vec<Vec<u8>>),
    Float(Vec<f32>),
    Int64(Vec<i64>),
}

fn corrupt(reason: impl Into<String>) -> TfrError {
    TfrError::Corruption {
        path: String::new(),
        offset: 0,
        reason: reason.into(),
    }
}

fn parse_bytes_list(data: &[u8]) -> Result<Vec<Vec<u8>>, TfrError> {
    let mut out = Vec::new();
    for field in protobuf::iter_fields(data) {
        let field = field?;
        if field.number == LIST_VALUE_FIELD && field.wire_type == WireType::LengthDelimited {
            out.push(field.data.to_vec());
        }
    }
    Ok(out)
}

fn parse_float_list(data: &[u8]) -> Result<Vec<f32>, TfrError> {
    let mut out = Vec::new();
    for field in protobuf::iter_fields(data) {
        let field = field?;
        if field.number != LIST_VALUE_FIELD {
            continue;
        }
        match field.wire_type {
            WireType::LengthDelimited => out.extend(protobuf::packed_fixed32(field.data)?),
            WireType::Fixed32 => {
                out.push(f32::from_le_bytes(field.data.try_into().unwrap()));
            }
            _ => return Err(corrupt("float_list entry has unexpected wire type")),
        }
    }
    Ok(out)
}

fn parse_int64_list(data: &[u8]) -> Result<Vec<i64>, TfrError> {
    let mut out = Vec::new();
    for field in protobuf::iter_fields(data) {
        let field = field?;
        if field.number != LIST_VALUE_FIELD {
            continue;
        }
        match field.wire_type {
            WireType::LengthDelimited => {
                out.extend(protobuf::packed_varints(field.data)?.into_iter().map(|v| v as i64));
            }
            WireType::Varint => {
                let mut pos = 0;
                out.push(protobuf::read_varint(field.data, &mut pos)? as i64);
            }
            _ => return Err(corrupt("int64_list entry has unexpected wire type")),
        }
    }
    Ok(out)
}

/// `kind_case` dispatch (§4.6): a `Feature` message carries at most one of
/// the three oneof branches. An entirely empty `Feature` (no branch set)
/// decodes as `None`, distinct from an empty list in a present branch.
fn parse_feature(data: &[u8]) -> Result<Option<RawFeature>, TfrError> {
    for field in protobuf::iter_fields(data) {
        let field = field?;
        match field.number {
            FEATURE_BYTES_LIST => return Ok(Some(RawFeature::Bytes(parse_bytes_list(field.data)?))),
            FEATURE_FLOAT_LIST => return Ok(Some(RawFeature::Float(parse_float_list(field.data)?))),
            FEATURE_INT64_LIST => return Ok(Some(RawFeature::Int64(parse_int64_list(field.data)?))),
            _ => continue,
        }
    }
    Ok(None)
}

fn parse_map_entry<'a>(data: &'a [u8]) -> Result<(String, &'a [u8]), TfrError> {
    let mut key: Option<String> = None;
    let mut value: Option<&[u8]> = None;
    for field in protobuf::iter_fields(data) {
        let field = field?;
        match field.number {
            MAP_ENTRY_KEY_FIELD => {
                key = Some(
                    std::str::from_utf8(field.data)
                        .map_err(|_| corrupt("feature map key is not valid UTF-8"))?
                        .to_string(),
                );
            }
            MAP_ENTRY_VALUE_FIELD => value = Some(field.data),
            _ => continue,
        }
    }
    let key = key.ok_or_else(|| corrupt("feature map entry missing key"))?;
    let value = value.unwrap_or(&[]);
    Ok((key, value))
}

/// Parses a serialized `Example` into its named raw features, without
/// regard to any particular schema — shape/dtype checking happens at
/// extraction time against a `FixedLenFeature`.
fn parse_example(example_bytes: &[u8]) -> Result<HashMap<String, RawFeature>, TfrError> {
    let mut features = HashMap::new();
    for field in protobuf::iter_fields(example_bytes) {
        let field = field?;
        if field.number != EXAMPLE_FEATURES_FIELD {
            continue;
        }
        for inner in protobuf::iter_fields(field.data) {
            let inner = inner?;
            if inner.number != FEATURES_FEATURE_FIELD {
                continue;
            }
            let (key, value_bytes) = parse_map_entry(inner.data)?;
            if let Some(raw) = parse_feature(value_bytes)? {
                features.insert(key, raw);
            }
        }
    }
    Ok(features)
}

fn expected_len(shape: &TensorShape) -> usize {
    shape.num_elements()
}

fn extract(
    spec: &FixedLenFeature,
    raw: Option<&RawFeature>,
) -> Result<TensorBuffer, TfrError> {
    let raw = match raw {
        Some(r) => r,
        None => {
            return match &spec.default_value {
                Some(_) => Err(TfrError::DefaultNotSupported {
                    key: spec.key.clone(),
                }),
                None => Err(TfrError::MissingFeature {
                    key: spec.key.clone(),
                }),
            }
        }
    };

    let want = expected_len(&spec.shape);
    match (spec.dtype, raw) {
        (DataType::Int64, RawFeature::Int64(v)) => {
            check_len(&spec.key, v.len(), want, &spec.shape)?;
            Ok(TensorBuffer::Int64(v.clone()))
        }
        (DataType::Float, RawFeature::Float(v)) => {
            check_len(&spec.key, v.len(), want, &spec.shape)?;
            Ok(TensorBuffer::Float(v.clone()))
        }
        (DataType::String, RawFeature::Bytes(v)) => {
            check_len(&spec.key, v.len(), want, &spec.shape)?;
            Ok(TensorBuffer::Bytes(v.clone()))
        }
        (DataType::Uint8, RawFeature::Bytes(v)) => {
            // UINT8 tensors travel as one or more bytes_list entries,
            // concatenated in wire order; the concatenated length must
            // equal the product of the declared shape (§4.6).
            let mut concatenated = Vec::with_capacity(v.iter().map(|b| b.len()).sum());
            for entry in v {
                concatenated.extend_from_slice(entry);
            }
            check_len(&spec.key, concatenated.len(), want, &spec.shape)?;
            Ok(TensorBuffer::Uint8(concatenated))
        }
        (expected, actual) => Err(TfrError::DTypeMismatch {
            key: spec.key.clone(),
            expected,
            actual: raw_dtype(actual),
        }),
    }
}

fn raw_dtype(raw: &RawFeature) -> DataType {
    match raw {
        RawFeature::Bytes(_) => DataType::String,
        RawFeature::Float(_) => DataType::Float,
        RawFeature::Int64(_) => DataType::Int64,
    }
}

fn check_len(key: &str, observed: usize, expected: usize, shape: &TensorShape) -> Result<(), TfrError> {
    if observed == expected {
        Ok(())
    } else {
        Err(TfrError::ShapeMismatch {
            key: key.to_string(),
            observed,
            expected_shape: shape.clone(),
        })
    }
}

pub(crate) fn write_slot(slot: TensorSlotMut<'_>, value: TensorBuffer) -> Result<(), TfrError> {
    match (slot, value) {
        (TensorSlotMut::Int64(dst), TensorBuffer::Int64(src)) => dst.copy_from_slice(&src),
        (TensorSlotMut::Float(dst), TensorBuffer::Float(src)) => dst.copy_from_slice(&src),
        (TensorSlotMut::Uint8(dst), TensorBuffer::Uint8(src)) => dst.copy_from_slice(&src),
        (TensorSlotMut::Bytes(dst), TensorBuffer::Bytes(src)) => {
            for (d, s) in dst.iter_mut().zip(src.into_iter()) {
                *d = s;
            }
        }
        _ => return Err(corrupt("decoded tensor dtype does not match allocated slot")),
    }
    Ok(())
}

/// Decodes one serialized `Example` against `features`, returning one
/// owned `TensorBuffer` per feature in the same order. Used directly by
/// the parallel batch path (§5), which can't hand borrowed slots across
/// worker threads, and as the basis for [`decode_into`].
pub fn decode_example(
    features: &[FixedLenFeature],
    example_bytes: &[u8],
) -> Result<Vec<TensorBuffer>, TfrError> {
    let parsed = parse_example(example_bytes)?;
    features
        .iter()
        .map(|spec| extract(spec, parsed.get(&spec.key)))
        .collect()
}

/// Decodes one serialized `Example` against `features`, writing each
/// feature's tensor into its pre-allocated per-sample slot. `slots` must
/// contain one entry per feature, in the same order.
pub fn decode_into(
    features: &[FixedLenFeature],
    example_bytes: &[u8],
    slots: Vec<TensorSlotMut<'_>>,
) -> Result<(), TfrError> {
    let values = decode_example(features, example_bytes)?;
    for (slot, value) in slots.into_iter().zip(values.into_iter()) {
        write_slot(slot, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protobuf::WireType as WT;

    fn encode_varint(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    fn tag(field: u32, wt: WT) -> u64 {
        let wt_num = match wt {
            WT::Varint => 0,
            WT::Fixed64 => 1,
            WT::LengthDelimited => 2,
            WT::Fixed32 => 5,
        };
        ((field as u64) << 3) | wt_num
    }

    fn length_delimited(field: u32, payload: &[u8], out: &mut Vec<u8>) {
        encode_varint(tag(field, WT::LengthDelimited), out);
        encode_varint(payload.len() as u64, out);
        out.extend_from_slice(payload);
    }

    fn encode_int64_feature(values: &[i64]) -> Vec<u8> {
        let mut packed = Vec::new();
        for v in values {
            encode_varint(*v as u64, &mut packed);
        }
        let mut list = Vec::new();
        length_delimited(LIST_VALUE_FIELD, &packed, &mut list);
        let mut feature = Vec::new();
        length_delimited(FEATURE_INT64_LIST, &list, &mut feature);
        feature
    }

    fn encode_float_feature(values: &[f32]) -> Vec<u8> {
        let mut packed = Vec::new();
        for v in values {
            packed.extend_from_slice(&v.to_le_bytes());
        }
        let mut list = Vec::new();
        length_delimited(LIST_VALUE_FIELD, &packed, &mut list);
        let mut feature = Vec::new();
        length_delimited(FEATURE_FLOAT_LIST, &list, &mut feature);
        feature
    }

    fn encode_bytes_feature(values: &[&[u8]]) -> Vec<u8> {
        let mut list = Vec::new();
        for v in values {
            length_delimited(LIST_VALUE_FIELD, v, &mut list);
        }
        let mut feature = Vec::new();
        length_delimited(FEATURE_BYTES_LIST, &list, &mut feature);
        feature
    }

    fn encode_example(fields: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut features_msg = Vec::new();
        for (key, feature_bytes) in fields {
            let mut entry = Vec::new();
            length_delimited(MAP_ENTRY_KEY_FIELD, key.as_bytes(), &mut entry);
            length_delimited(MAP_ENTRY_VALUE_FIELD, feature_bytes, &mut entry);
            length_delimited(FEATURES_FEATURE_FIELD, &entry, &mut features_msg);
        }
        let mut example = Vec::new();
        length_delimited(EXAMPLE_FEATURES_FIELD, &features_msg, &mut example);
        example
    }

    #[test]
    fn decodes_int64_and_float_features() {
        let example = encode_example(&[
            ("ids", encode_int64_feature(&[1, 2, 3, 4])),
            ("score", encode_float_feature(&[0.5])),
        ]);
        let parsed = parse_example(&example).unwrap();
        match parsed.get("ids").unwrap() {
            RawFeature::Int64(v) => assert_eq!(v, &vec![1, 2, 3, 4]),
            _ => panic!("wrong variant"),
        }
        match parsed.get("score").unwrap() {
            RawFeature::Float(v) => assert_eq!(v, &vec![0.5]),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn uint8_feature_is_single_concatenated_bytes_entry() {
        let example = encode_example(&[("image", encode_bytes_feature(&[&[1, 2, 3, 4, 5, 6]]))]);
        let parsed = parse_example(&example).unwrap();
        let spec = FixedLenFeature::new("image", TensorShape::new(vec![2, 3]), DataType::Uint8);
        let buf = extract(&spec, parsed.get("image")).unwrap();
        assert_eq!(buf, TensorBuffer::Uint8(vec![1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn uint8_feature_concatenates_multiple_bytes_entries_in_wire_order() {
        let example = encode_example(&[(
            "image",
            encode_bytes_feature(&[b"abc", b"defghi", b"jkl"]),
        )]);
        let parsed = parse_example(&example).unwrap();
        let spec = FixedLenFeature::new("image", TensorShape::new(vec![12]), DataType::Uint8);
        let buf = extract(&spec, parsed.get("image")).unwrap();
        assert_eq!(buf, TensorBuffer::Uint8(b"abcdefghijkl".to_vec()));
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let example = encode_example(&[("ids", encode_int64_feature(&[1, 2]))]);
        let parsed = parse_example(&example).unwrap();
        let spec = FixedLenFeature::new("ids", TensorShape::new(vec![4]), DataType::Int64);
        let err = extract(&spec, parsed.get("ids")).unwrap_err();
        assert!(matches!(err, TfrError::ShapeMismatch { .. }));
    }

    #[test]
    fn missing_required_feature_without_default() {
        let example = encode_example(&[]);
        let parsed = parse_example(&example).unwrap();
        let spec = FixedLenFeature::new("missing", TensorShape::new(vec![1]), DataType::Int64);
        let err = extract(&spec, parsed.get("missing")).unwrap_err();
        assert!(matches!(err, TfrError::MissingFeature { .. }));
    }

    #[test]
    fn missing_feature_with_default_value_is_not_supported() {
        let example = encode_example(&[]);
        let parsed = parse_example(&example).unwrap();
        let spec = FixedLenFeature::new("missing", TensorShape::new(vec![1]), DataType::Int64)
            .with_default(vec![0, 0, 0, 0, 0, 0, 0, 0]);
        let err = extract(&spec, parsed.get("missing")).unwrap_err();
        assert!(matches!(err, TfrError::DefaultNotSupported { .. }));
    }

    #[test]
    fn dtype_mismatch_is_reported() {
        let example = encode_example(&[("ids", encode_float_feature(&[1.0]))]);
        let parsed = parse_example(&example).unwrap();
        let spec = FixedLenFeature::new("ids", TensorShape::new(vec![1]), DataType::Int64);
        let err = extract(&spec, parsed.get("ids")).unwrap_err();
        assert!(matches!(err, TfrError::DTypeMismatch { .. }));
    }

    #[test]
    fn decode_into_fills_batch_slots() {
        use crate::schema::{allocate_batch, partition_batch};

        let features = vec![FixedLenFeature::new(
            "ids",
            TensorShape::new(vec![2]),
            DataType::Int64,
        )];
        let mut batch = allocate_batch(2, &features);
        let examples = [
            encode_example(&[("ids", encode_int64_feature(&[1, 2]))]),
            encode_example(&[("ids", encode_int64_feature(&[3, 4]))]),
        ];

        let mut slots = partition_batch(&mut batch[0], 2, 2);
        let second = slots.pop().unwrap();
        let first = slots.pop().unwrap();

        decode_into(&features, &examples[0], vec![first]).unwrap();
        decode_into(&features, &examples[1], vec![second]).unwrap();

        assert_eq!(batch[0], TensorBuffer::Int64(vec![1, 2, 3, 4]));
    }
}
