// crates/core/src/protobuf.rs
//
// Minimal protobuf wire decoding for the `Example -> Features -> Feature`
// message shapes (§4.6), the inverse of the varint/length-delimited
// encoding the teacher's `tfrecord.rs` hand-rolls for its synthetic TFR
// fixtures (`encode_varint`, manual `Example` construction). No `prost`/
// `protobuf` dependency: the message surface this format actually needs is
// three nested length-delimited fields and three scalar-list kinds, not
// worth pulling in a full codegen pipeline for.

use crate::error::TfrError;

fn corrupt(reason: impl Into<String>) -> TfrError {
    TfrError::Corruption {
        path: String::new(),
        offset: 0,
        reason: reason.into(),
    }
}

/// Decodes a base-128 varint starting at `buf[*pos]`, advancing `*pos`.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, TfrError> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *buf.get(*pos).ok_or_else(|| corrupt("truncated varint"))?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(corrupt("varint too long"));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    fn from_tag(tag: u64) -> Result<(u32, WireType), TfrError> {
        let field_number = (tag >> 3) as u32;
        let wire_type = match tag & 0x7 {
            0 => WireType::Varint,
            1 => WireType::Fixed64,
            2 => WireType::LengthDelimited,
            5 => WireType::Fixed32,
            other => return Err(corrupt(format!("unsupported wire type {other}"))),
        };
        Ok((field_number, wire_type))
    }
}

pub struct Field<'a> {
    pub number: u32,
    pub wire_type: WireType,
    pub data: &'a [u8],
}

/// Iterates top-level fields of a protobuf message, yielding each field's
/// raw bytes (the payload for length-delimited fields, or the fixed-width
/// encoding otherwise). Callers re-run this over nested `data` slices to
/// walk into submessages — there is no persistent parser state.
pub fn iter_fields(buf: &[u8]) -> FieldIter<'_> {
    FieldIter { buf, pos: 0 }
}

pub struct FieldIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = Result<Field<'a>, TfrError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        Some((|| {
            let tag = read_varint(self.buf, &mut self.pos)?;
            let (number, wire_type) = WireType::from_tag(tag)?;
            let data: &'a [u8] = match wire_type {
                WireType::Varint => {
                    let start = self.pos;
                    read_varint(self.buf, &mut self.pos)?;
                    &self.buf[start..self.pos]
                }
                WireType::Fixed64 => {
                    let start = self.pos;
                    self.pos += 8;
                    self.buf
                        .get(start..self.pos)
                        .ok_or_else(|| corrupt("truncated fixed64"))?
                }
                WireType::Fixed32 => {
                    let start = self.pos;
                    self.pos += 4;
                    self.buf
                        .get(start..self.pos)
                        .ok_or_else(|| corrupt("truncated fixed32"))?
                }
                WireType::LengthDelimited => {
                    let len = read_varint(self.buf, &mut self.pos)? as usize;
                    let start = self.pos;
                    self.pos = self
                        .pos
                        .checked_add(len)
                        .ok_or_else(|| corrupt("length-delimited field overflows"))?;
                    self.buf
                        .get(start..self.pos)
                        .ok_or_else(|| corrupt("truncated length-delimited field"))?
                }
            };
            Ok(Field {
                number,
                wire_type,
                data,
            })
        })())
    }
}

/// Reads a field's contents as a little-endian `i32` (protobuf `sint32`/
/// `int32` packed-varint element) — used for the packed repeated scalar
/// lists `Feature.int64_list`/`float_list` pack internally.
pub fn packed_varints(data: &[u8]) -> Result<Vec<u64>, TfrError> {
    let mut pos = 0;
    let mut out = Vec::new();
    while pos < data.len() {
        out.push(read_varint(data, &mut pos)?);
    }
    Ok(out)
}

pub fn packed_fixed32(data: &[u8]) -> Result<Vec<f32>, TfrError> {
    if data.len() % 4 != 0 {
        return Err(corrupt("fixed32 packed list not a multiple of 4 bytes"));
    }
    Ok(data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}
