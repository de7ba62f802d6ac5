//! Protocol constants and the file metadata trailer.
//!
//! The trailer is a fixed 12-byte record at the end of the payload of a
//! file's identifier transaction (the last one broadcast, the first one
//! fetched). It is an internal Rust representation; the wire format is
//! big-endian hex, not `repr(C)`.

use crate::codec;
use crate::error::{Error, Result};

/// Protocol version written by this implementation.
pub const PROTOCOL_VERSION: u16 = 0;

/// Raw transaction identifier width.
pub const TXID_BYTES: usize = 32;
/// Hex characters of a transaction identifier.
pub const TXID_CHARS: usize = TXID_BYTES * 2;

/// Trailer width: length(4) + depth(4) + type(2) + protocol(2).
pub const METADATA_BYTES: usize = 12;
/// Hex characters of the trailer.
pub const METADATA_CHARS: usize = METADATA_BYTES * 2;

/// Opaque file.
pub const TYPE_FILE: u16 = 0;
/// Directory index (two-section path table).
pub const TYPE_DIR: u16 = 1;
/// Base value for mime-table typing; values above index the protocol's
/// `mime.types` table. The sentinel itself means "resolve from extension"
/// on the send side.
pub const TYPE_MIMESET: u16 = 2;

/// Nametag identifier prefix, also the on-chain claim marker prefix.
pub const NAMETAG_PREFIX: char = '~';
/// Maximum nametag name length in bytes.
pub const NAME_MAX_LEN: usize = 64;
/// The designated revision output/input index of a claim or revision
/// transaction; the next revision consumes this vout.
pub const REVISION_INPUT_VOUT: u32 = 1;

/// Revision-lock file name under the data directory.
pub const REVISION_LOCKS_FILE: &str = "revision_locks.json";

/// Maximum payload bytes one transaction carries, by protocol version.
/// Version 0 networks relay 220; later rules allow 222.
pub fn tx_data_bytes(protocol: u16) -> usize {
    if protocol == 0 {
        220
    } else {
        222
    }
}

/// Hex characters of [`tx_data_bytes`].
pub fn tx_data_chars(protocol: u16) -> usize {
    tx_data_bytes(protocol) * 2
}

/// Nametag script opcodes, one byte each.
///
/// `0x00` is `PUSHNO` (a no-op that still consumes its byte) and
/// `0x01..=0x4B` push that many literal bytes. Named codes descend from
/// `0xFF`; the gap up to the push range is reserved and malformed.
pub mod op {
    /// Highest literal push length; larger strings go through `PUSHSTRX`.
    pub const PUSHSTR_MAX: u8 = 0x4b;
    /// Zero-length push; consumes the opcode byte, does nothing.
    pub const PUSHNO: u8 = 0x00;

    pub const TERM: u8 = 0xff;
    pub const NEXTREV: u8 = 0xfe;
    pub const PUSHTXID: u8 = 0xfd;
    pub const PUSHCHAR: u8 = 0xfc;
    pub const PUSHSHORT: u8 = 0xfb;
    pub const PUSHINT: u8 = 0xfa;
    pub const PUSHSTRX: u8 = 0xf9;
    pub const WRITEFROMTXID: u8 = 0xf8;
    pub const WRITEFROMNAMETAG: u8 = 0xf7;
    pub const WRITEFROMPREV: u8 = 0xf6;
    pub const STOREFROMTXID: u8 = 0xf5;
    pub const STOREFROMNAMETAG: u8 = 0xf4;
    pub const STOREFROMPREV: u8 = 0xf3;
    pub const SEEKSTORED: u8 = 0xf2;
    pub const WRITEFROMSTORED: u8 = 0xf1;
    pub const WRITESOMEFROMSTORED: u8 = 0xf0;
    pub const DROPSTORED: u8 = 0xef;
    pub const WRITEPATHLINK: u8 = 0xee;
}

/// Stored-sink seek origins used by `SEEKSTORED`.
pub mod seek {
    /// From the beginning.
    pub const BEG: u8 = 0;
    /// Forward from the cursor.
    pub const CUR: u8 = 1;
    /// Backward from the cursor.
    pub const CUR_NEG: u8 = 2;
    /// Backward from the end.
    pub const END_NEG: u8 = 3;
}

/// File metadata trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Number of additional chain elements after the identifier transaction.
    pub length: u32,
    /// Tree depth under each chain element; 0 means payloads are data.
    pub depth: u32,
    /// File type (see `TYPE_*`).
    pub cw_type: u16,
    /// Protocol version the file was written with.
    pub protocol: u16,
}

impl Metadata {
    /// Fresh trailer for a single-transaction file of the given type.
    pub fn new(cw_type: u16) -> Self {
        Metadata {
            length: 0,
            depth: 0,
            cw_type,
            protocol: PROTOCOL_VERSION,
        }
    }

    /// Parses the trailer from the last [`METADATA_CHARS`] of a payload.
    /// A payload shorter than the trailer is [`Error::MetadataMissing`].
    pub fn from_payload_hex(payload_hex: &str) -> Result<Self> {
        if payload_hex.len() < METADATA_CHARS {
            return Err(Error::MetadataMissing);
        }
        let trailer = &payload_hex[payload_hex.len() - METADATA_CHARS..];
        let bytes = codec::hex_to_bytes(trailer).map_err(|_| Error::MetadataMissing)?;
        Ok(Metadata {
            length: codec::net_bytes_to_u32(&bytes[0..4])?,
            depth: codec::net_bytes_to_u32(&bytes[4..8])?,
            cw_type: codec::net_bytes_to_u16(&bytes[8..10])?,
            protocol: codec::net_bytes_to_u16(&bytes[10..12])?,
        })
    }

    /// Serializes the trailer to its 24 hex characters.
    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(METADATA_BYTES);
        bytes.extend_from_slice(&codec::u32_to_net_bytes(self.length));
        bytes.extend_from_slice(&codec::u32_to_net_bytes(self.depth));
        bytes.extend_from_slice(&codec::u16_to_net_bytes(self.cw_type));
        bytes.extend_from_slice(&codec::u16_to_net_bytes(self.protocol));
        codec::bytes_to_hex(&bytes)
    }

    /// Warns when the file signals a newer protocol than this client; the
    /// read is attempted anyway in case the upgrade is trivial.
    pub fn protocol_check(&self) {
        if self.protocol > PROTOCOL_VERSION {
            log::warn!(
                "file signals a newer cashweb protocol version than this client uses \
                 (client: CWP {PROTOCOL_VERSION}, file: CWP {}); attempting to read anyway",
                self.protocol
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn trailer_hex_layout() {
        let md = Metadata {
            length: 1,
            depth: 0,
            cw_type: TYPE_DIR,
            protocol: 0,
        };
        assert_eq!(md.to_hex(), "000000010000000000010000");
        assert_eq!(md.to_hex().len(), METADATA_CHARS);
    }

    #[test]
    fn short_payload_is_metadata_missing() {
        assert!(matches!(
            Metadata::from_payload_hex("68656c6c6f"),
            Err(Error::MetadataMissing)
        ));
    }

    #[test]
    fn trailer_parses_from_payload_end() {
        let md = Metadata::new(TYPE_FILE);
        let payload = format!("{}{}", "68656c6c6f", md.to_hex());
        assert_eq!(Metadata::from_payload_hex(&payload).unwrap(), md);
    }

    proptest! {
        #[test]
        fn trailer_round_trip(length: u32, depth: u32, cw_type: u16, protocol: u16) {
            let md = Metadata { length, depth, cw_type, protocol };
            prop_assert_eq!(Metadata::from_payload_hex(&md.to_hex()).unwrap(), md);
        }
    }
}
