// crates/core/src/crc32c.rs
//
// CRC32C (Castagnoli) over byte ranges, plus the mask/unmask transform TFR
// stores on the wire. The mask formula matches the one the teacher's own
// `tfrecord.rs` hand-rolled for its synthetic fixtures; this module makes
// it the reusable, round-tripping primitive the reader and decoder share.

use ::crc32c::crc32c as crc32c_impl;

const MASK_DELTA: u32 = 0xa282_ead8;

/// CRC32C (Castagnoli polynomial 0x82F63B78, reflected) over `bytes`.
pub fn crc32c(bytes: &[u8]) -> u32 {
    crc32c_impl(bytes)
}

/// `((crc >> 15) | (crc << 17)) + 0xa282ead8`, modulo 2^32.
pub fn mask(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask`].
pub fn unmask(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}
