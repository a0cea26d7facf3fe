//! Variable-length integer codec.
//!
//! Most-significant-bit-first, five magnitude classes selected by the
//! leading bit pattern of the first byte:
//!
//! ```text
//! 0xxxxxxx                7-bit value, 1 byte
//! 10xxxxxx + 1 byte       14-bit value, 2 bytes
//! 110xxxxx + 2 bytes      21-bit value, 3 bytes
//! 1110xxxx + 3 bytes      28-bit value, 4 bytes
//! 11110xxx + 4 bytes      32-bit value, 5 bytes
//! ```
//!
//! Encoding always selects the minimal class that fits the value.

use crate::error::ProtocolError;

/// Number of bytes `value` occupies on the wire.
#[must_use]
pub fn encoded_len(value: u32) -> usize {
    if value < 0x80 {
        1
    } else if value < 0x4000 {
        2
    } else if value < 0x20_0000 {
        3
    } else if value < 0x1000_0000 {
        4
    } else {
        5
    }
}

/// Append the minimal-class encoding of `value` to `out`.
pub fn encode(value: u32, out: &mut Vec<u8>) {
    if value < 0x80 {
        out.push(value as u8);
    } else if value < 0x4000 {
        out.push(0x80 | (value >> 8) as u8);
        out.push(value as u8);
    } else if value < 0x20_0000 {
        out.push(0xC0 | (value >> 16) as u8);
        out.push((value >> 8) as u8);
        out.push(value as u8);
    } else if value < 0x1000_0000 {
        out.push(0xE0 | (value >> 24) as u8);
        out.push((value >> 16) as u8);
        out.push((value >> 8) as u8);
        out.push(value as u8);
    } else {
        out.push(0xF0);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

/// Decode one varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed.
///
/// # Errors
/// Returns an error if `buf` is truncated or the leading byte does not
/// match any of the five classes.
pub fn decode(buf: &[u8]) -> Result<(u32, usize), ProtocolError> {
    let first = *buf.first().ok_or(ProtocolError::TooShort { expected: 1, got: 0 })?;

    let (width, prefix_value) = if first & 0x80 == 0 {
        (1, u32::from(first))
    } else if first & 0xC0 == 0x80 {
        (2, u32::from(first & 0x3F))
    } else if first & 0xE0 == 0xC0 {
        (3, u32::from(first & 0x1F))
    } else if first & 0xF0 == 0xE0 {
        (4, u32::from(first & 0x0F))
    } else if first & 0xF8 == 0xF0 {
        (5, 0)
    } else {
        return Err(ProtocolError::VarintOverflow);
    };

    if buf.len() < width {
        return Err(ProtocolError::TooShort {
            expected: width,
            got: buf.len(),
        });
    }

    let mut value = prefix_value;
    for &b in &buf[1..width] {
        value = (value << 8) | u32::from(b);
    }
    Ok((value, width))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: u32, expected_len: usize) {
        let mut buf = Vec::new();
        encode(value, &mut buf);
        assert_eq!(buf.len(), expected_len, "length for {value}");
        assert_eq!(encoded_len(value), expected_len);
        let (decoded, consumed) = decode(&buf).expect("decode failed");
        assert_eq!(decoded, value);
        assert_eq!(consumed, expected_len);
    }

    #[test]
    fn roundtrip_class_boundaries() {
        roundtrip(0, 1);
        roundtrip(0x7F, 1);
        roundtrip(0x80, 2);
        roundtrip(0x3FFF, 2);
        roundtrip(0x4000, 3);
        roundtrip(0x1F_FFFF, 3);
        roundtrip(0x20_0000, 4);
        roundtrip(0x0FFF_FFFF, 4);
        roundtrip(0x1000_0000, 5);
        roundtrip(u32::MAX, 5);
    }

    #[test]
    fn encoding_is_minimal() {
        // A value that fits class N must never be emitted in class N+1.
        let mut buf = Vec::new();
        encode(0x7F, &mut buf);
        assert_eq!(buf, [0x7F]);
        buf.clear();
        encode(0x80, &mut buf);
        assert_eq!(buf, [0x80, 0x80]);
        buf.clear();
        encode(0x1234, &mut buf);
        assert_eq!(buf, [0x80 | 0x12, 0x34]);
    }

    #[test]
    fn decode_truncated() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0x80]).is_err());
        assert!(decode(&[0xF0, 0x00, 0x00]).is_err());
    }

    #[test]
    fn decode_rejects_reserved_lead_bytes() {
        // 0xF8..=0xFF are outside the five classes.
        assert_eq!(decode(&[0xF8, 0, 0, 0, 0]), Err(ProtocolError::VarintOverflow));
        assert_eq!(decode(&[0xFF, 0, 0, 0, 0]), Err(ProtocolError::VarintOverflow));
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let (value, consumed) = decode(&[0x05, 0xAA, 0xBB]).unwrap();
        assert_eq!(value, 5);
        assert_eq!(consumed, 1);
    }
}
