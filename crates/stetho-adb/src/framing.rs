//! Fixed-width big-endian integer packing.
//!
//! Width four is a signed 32-bit value, matching the dumpapp length and
//! exit-code fields. Widths one and two are unsigned.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encoded size of an integer field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    One,
    Two,
    Four,
}

impl Width {
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Width::One => 1,
            Width::Two => 2,
            Width::Four => 4,
        }
    }
}

/// Append `value` to `dst` in big-endian order.
///
/// # Panics
///
/// Panics if `value` does not fit in `width`. Callers size-check their input
/// before framing it, so an overflow here is a bug.
pub fn put(dst: &mut impl BufMut, width: Width, value: i64) {
    match width {
        Width::One => dst.put_u8(u8::try_from(value).expect("value does not fit in one byte")),
        Width::Two => dst.put_u16(u16::try_from(value).expect("value does not fit in two bytes")),
        Width::Four => dst.put_i32(i32::try_from(value).expect("value does not fit in four bytes")),
    }
}

/// Encode `value` as a standalone big-endian field.
#[must_use]
pub fn pack(width: Width, value: i64) -> Bytes {
    let mut buf = BytesMut::with_capacity(width.bytes());
    put(&mut buf, width, value);
    buf.freeze()
}

/// Decode a big-endian field. Exact inverse of [`pack`].
///
/// # Panics
///
/// Panics if `bytes` is not exactly `width` bytes long.
#[must_use]
pub fn unpack(width: Width, mut bytes: &[u8]) -> i64 {
    assert_eq!(
        bytes.len(),
        width.bytes(),
        "field width mismatch: expected {} bytes, got {}",
        width.bytes(),
        bytes.len()
    );

    match width {
        Width::One => i64::from(bytes.get_u8()),
        Width::Two => i64::from(bytes.get_u16()),
        Width::Four => i64::from(bytes.get_i32()),
    }
}
