//! Script builders for nametag and revision sends.
//!
//! These assemble the opcode streams the read-side engine executes. The
//! standard preamble makes a revision mutable (`NEXTREV` first, so a later
//! revision supersedes it) and optionally rebinds a path alias.

use crate::codec;
use crate::error::{Error, Result};
use crate::identifier::{is_valid_txid, Identifier};
use crate::protocol::{op, TXID_BYTES};

/// Pushes `val` with the narrowest of `PUSHCHAR`/`PUSHSHORT`/`PUSHINT`.
pub fn push_int(val: u32, script: &mut Vec<u8>) {
    if val <= u8::MAX as u32 {
        script.push(op::PUSHCHAR);
        script.push(val as u8);
    } else if val <= u16::MAX as u32 {
        script.push(op::PUSHSHORT);
        script.extend_from_slice(&(val as u16).to_be_bytes());
    } else {
        script.push(op::PUSHINT);
        script.extend_from_slice(&val.to_be_bytes());
    }
}

/// Pushes a literal string: short ones by a direct length opcode, longer
/// ones through `PUSHSTRX`.
pub fn push_str(s: &str, script: &mut Vec<u8>) {
    let bytes = s.as_bytes();
    if bytes.len() <= op::PUSHSTR_MAX as usize {
        script.push(bytes.len() as u8);
    } else {
        push_int(bytes.len() as u32, script);
        script.push(op::PUSHSTRX);
    }
    script.extend_from_slice(bytes);
}

/// Emits "write the latest revision of `name` here".
pub fn writefrom_nametag(name: &str, script: &mut Vec<u8>) {
    push_str(name, script);
    script.push(op::WRITEFROMNAMETAG);
}

/// Emits "write the file at `txid` here".
pub fn writefrom_txid(txid: &str, script: &mut Vec<u8>) -> Result<()> {
    let raw = codec::hex_to_bytes(txid).map_err(|_| bad_attach(txid))?;
    if raw.len() != TXID_BYTES {
        return Err(bad_attach(txid));
    }
    script.push(op::PUSHTXID);
    script.extend_from_slice(&raw);
    script.push(op::WRITEFROMTXID);
    Ok(())
}

/// Emits a write of whatever `id` names. Pinned-revision nametag ids cannot
/// be attached; scripts always resolve the latest.
pub fn writefrom_id(id: &str, script: &mut Vec<u8>) -> Result<()> {
    match id.parse::<Identifier>() {
        Ok(Identifier::Nametag { rev: Some(_), .. }) => Err(Error::BadCall(
            "scripting doesn't support attaching a specific revision of a nametag".into(),
        )),
        Ok(Identifier::Nametag { rev: None, name }) => {
            writefrom_nametag(&name, script);
            Ok(())
        }
        _ if is_valid_txid(id) => writefrom_txid(id, script),
        _ => Err(bad_attach(id)),
    }
}

/// Emits the directory alias pair: requests for `to_replace` follow
/// `replacement` instead.
pub fn pathlink(to_replace: &str, replacement: &str, script: &mut Vec<u8>) {
    push_str(replacement, script);
    push_str(to_replace, script);
    script.push(op::WRITEPATHLINK);
}

/// How a nametag revision is to behave.
#[derive(Debug, Clone, Default)]
pub struct RevisionPack {
    /// No further revisions: omit the `NEXTREV` preamble, the tiny-change
    /// output, and the lock.
    pub immutable: bool,
    /// Rebind this path...
    pub path_to_replace: Option<String>,
    /// ...to this one.
    pub path_replacement: Option<String>,
    /// Transfer ownership: the revision output pays this address.
    pub transfer_addr: Option<String>,
}

/// The standard revision preamble: defer to the next revision unless
/// immutable, then any path rebinding.
pub fn standard_start(rvp: &RevisionPack, script: &mut Vec<u8>) {
    if !rvp.immutable {
        script.push(op::NEXTREV);
    }
    if let (Some(path), Some(replacement)) = (&rvp.path_to_replace, &rvp.path_replacement) {
        pathlink(path, replacement, script);
    }
}

fn bad_attach(id: &str) -> Error {
    Error::BadCall(format!("invalid attach identifier for scripting: {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_int_width_selection() {
        let mut s = Vec::new();
        push_int(7, &mut s);
        push_int(0x1234, &mut s);
        push_int(0x0001_0000, &mut s);
        assert_eq!(
            s,
            vec![
                op::PUSHCHAR, 7,
                op::PUSHSHORT, 0x12, 0x34,
                op::PUSHINT, 0x00, 0x01, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn push_str_short_and_long() {
        let mut s = Vec::new();
        push_str("hi", &mut s);
        assert_eq!(s, vec![2, b'h', b'i']);

        let long = "x".repeat(100);
        let mut s = Vec::new();
        push_str(&long, &mut s);
        assert_eq!(s[..3], [op::PUSHCHAR, 100, op::PUSHSTRX]);
        assert_eq!(s.len(), 3 + 100);
    }

    #[test]
    fn writefrom_id_rejects_pinned_revisions() {
        let mut s = Vec::new();
        assert!(writefrom_id("2~name", &mut s).is_err());
        assert!(writefrom_id("~name", &mut s).is_ok());
        assert_eq!(*s.last().unwrap(), op::WRITEFROMNAMETAG);
    }
}
