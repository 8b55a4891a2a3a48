//! Binary codec: little-endian 32-bit integers and the signed CRC32 used by
//! every on-disk record (component A).
//!
//! Every integer in the on-disk format is a 4-byte little-endian value.
//! Sequence numbers, lengths, timestamps and CRCs all share this
//! representation so a single pack/unpack pair covers the whole format.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::error::{Error, Result};

/// Size in bytes of one packed integer field.
pub const I32_SIZE: usize = 4;

/// Pack a signed 32-bit integer as little-endian bytes.
pub fn pack_i32(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Unpack a little-endian 32-bit integer from a 4-byte slice.
///
/// Panics if `bytes` is not exactly 4 bytes long; callers always slice a
/// fixed-width buffer so this is a programmer error, not an I/O condition.
pub fn unpack_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes(bytes.try_into().expect("4-byte slice"))
}

/// Read one little-endian `i32` at an absolute byte offset in `file`.
///
/// Used for one-off reads of small fixed fields (`current`, `label`,
/// `valid_start`) where opening a buffered reader would be overkill.
pub fn read_i32_at(file: &mut File, offset: u64) -> Result<i32> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    Ok(unpack_i32(&buf))
}

/// Compute the CRC32 of `payload` and reinterpret it as a signed 32-bit
/// integer, matching a wire-compatible signed CRC used across
/// architectures: values with bit 31 set are represented as their
/// two's-complement negative `i32`, not left as an unsigned overflow.
pub fn crc32_signed(payload: &[u8]) -> i32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize() as i32
}

/// Validate that `payload`'s signed CRC32 matches `expected`.
pub fn validate_crc(expected: i32, payload: &[u8]) -> Result<()> {
    if crc32_signed(payload) == expected {
        Ok(())
    } else {
        Err(Error::FileError("crc mismatch"))
    }
}
