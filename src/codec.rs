//! Hex and network-order integer primitives.
//!
//! The wire carries payloads as lowercase hex strings; integer fields are
//! packed big-endian into fixed-width slots sized by the field. Reads are
//! case-insensitive, writes are lowercase.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Encodes bytes as a lowercase hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes a hex string to bytes, omitting `suffix_chars` trailing characters
/// (used to strip a next-txid / trailer suffix without copying first).
///
/// Fails on odd length or non-hex characters.
pub fn hex_to_bytes_suffixed(hex_str: &str, suffix_chars: usize) -> Result<Vec<u8>> {
    if hex_str.len() % 2 != 0 || suffix_chars % 2 != 0 {
        return Err(Error::FileStructure);
    }
    if suffix_chars > hex_str.len() {
        return Err(Error::FileStructure);
    }
    hex::decode(&hex_str[..hex_str.len() - suffix_chars]).map_err(|_| Error::FileStructure)
}

/// Decodes a full hex string to bytes.
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>> {
    hex_to_bytes_suffixed(hex_str, 0)
}

/// True if every character is a hex digit.
pub fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Packs a u32 big-endian into a 4-byte slot.
pub fn u32_to_net_bytes(v: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, v);
    buf
}

/// Packs a u16 big-endian into a 2-byte slot.
pub fn u16_to_net_bytes(v: u16) -> [u8; 2] {
    let mut buf = [0u8; 2];
    BigEndian::write_u16(&mut buf, v);
    buf
}

/// Reads a big-endian u32 from a 4-byte slot.
pub fn net_bytes_to_u32(bytes: &[u8]) -> Result<u32> {
    if bytes.len() != 4 {
        return Err(Error::Sys(format!(
            "network u32 slot must be 4 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(BigEndian::read_u32(bytes))
}

/// Reads a big-endian u16 from a 2-byte slot.
pub fn net_bytes_to_u16(bytes: &[u8]) -> Result<u16> {
    if bytes.len() != 2 {
        return Err(Error::Sys(format!(
            "network u16 slot must be 2 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(BigEndian::read_u16(bytes))
}

/// Parses a big-endian unsigned integer out of a 1-, 2-, or 4-byte hex slot.
/// Any other width is rejected; this is the stack-value numeric form used by
/// the script engine.
pub fn net_hex_to_uint(hex_str: &str) -> Result<u32> {
    match hex_str.len() {
        2 | 4 | 8 => u32::from_str_radix(hex_str, 16).map_err(|_| Error::ScriptStructure),
        _ => Err(Error::ScriptStructure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hex_suffix_strips_trailing_chars() {
        let bytes = hex_to_bytes_suffixed("68656c6c6fdeadbeef", 8).unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn hex_rejects_odd_and_nonhex() {
        assert!(hex_to_bytes("abc").is_err());
        assert!(hex_to_bytes("zz").is_err());
    }

    #[test]
    fn hex_read_is_case_insensitive() {
        assert_eq!(hex_to_bytes("DEADbeef").unwrap(), [0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn uint_slot_widths() {
        assert_eq!(net_hex_to_uint("ff").unwrap(), 255);
        assert_eq!(net_hex_to_uint("0100").unwrap(), 256);
        assert_eq!(net_hex_to_uint("00010000").unwrap(), 65536);
        assert!(net_hex_to_uint("f").is_err());
        assert!(net_hex_to_uint("010000").is_err());
    }

    proptest! {
        #[test]
        fn hex_round_trip(data: Vec<u8>) {
            let hex_str = bytes_to_hex(&data);
            prop_assert_eq!(hex_to_bytes(&hex_str).unwrap(), data);
        }

        #[test]
        fn net_u32_round_trip(v: u32) {
            prop_assert_eq!(net_bytes_to_u32(&u32_to_net_bytes(v)).unwrap(), v);
        }

        #[test]
        fn net_u16_round_trip(v: u16) {
            prop_assert_eq!(net_bytes_to_u16(&u16_to_net_bytes(v)).unwrap(), v);
        }
    }
}
