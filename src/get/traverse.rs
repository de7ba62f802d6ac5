//! Chain and tree traversal: reassembling file bytes from linked payloads.
//!
//! A file is a chain of `length + 1` root payloads, each optionally the root
//! of a fan-out tree of depth `depth`. Chain elements reference the next by a
//! txid suffix; the identifier transaction's payload additionally ends with
//! the metadata trailer. Tree nodes are concatenations of child txids down to
//! the data level.
//!
//! When a chain element's tree level does not divide evenly into txids, the
//! trailing fragment carries over to the same level of the next chain
//! element. Two partial lists track this: one consumed at the current
//! element, one accumulated for the next; they swap at each element boundary.

use std::collections::VecDeque;
use std::io::Write;

use crate::codec;
use crate::error::{Error, Result};
use crate::fetch::{concat_payloads, FetchKind, Fetcher};
use crate::protocol::{Metadata, METADATA_CHARS, TXID_CHARS};

/// In-progress partial txids, one entry per tree level.
#[derive(Default)]
struct Partials {
    /// Fragments left over at the previous chain element, consumed front to
    /// back as levels descend.
    cur: VecDeque<String>,
    /// Fragments produced at this element, one per level in descent order.
    next: VecDeque<String>,
}

impl Partials {
    /// Element boundary: what was accumulated becomes what is consumed.
    fn swap(&mut self) {
        std::mem::swap(&mut self.cur, &mut self.next);
        self.next.clear();
    }
}

/// Decodes payload hex minus `suffix_chars` and writes the bytes to the sink.
fn write_hex_data(payload_hex: &str, suffix_chars: usize, sink: &mut dyn Write) -> Result<()> {
    let bytes = codec::hex_to_bytes_suffixed(payload_hex, suffix_chars)?;
    sink.write_all(&bytes).map_err(Error::Write)
}

/// Recursively expands one tree level.
///
/// `level_hex` is the concatenated payload of every node at `level`;
/// `suffix_chars` is nonzero only on a chain element's root payload, where
/// the next-txid / trailer suffix must be excluded. `partials = None` means
/// the tree is not chained and any trailing fragment is a structure error.
fn traverse_tree(
    level_hex: &str,
    mut partials: Option<&mut Partials>,
    suffix_chars: usize,
    level: u32,
    md: &Metadata,
    fetcher: &dyn Fetcher,
    sink: &mut dyn Write,
) -> Result<()> {
    let body = level_hex
        .len()
        .checked_sub(suffix_chars)
        .map(|end| &level_hex[..end])
        .ok_or(Error::FileStructure)?;

    // Complete the fragment carried over from the previous chain element
    // before parsing whole txids.
    let mut partial = match partials.as_mut() {
        Some(p) => p.cur.pop_front().unwrap_or_default(),
        None => String::new(),
    };
    let fill = (TXID_CHARS - partial.len() % TXID_CHARS) % TXID_CHARS;
    let fill = fill.min(body.len());
    partial.push_str(&body[..fill]);
    let rest = &body[fill..];

    let mut txids: Vec<String> = Vec::new();
    if partial.len() == TXID_CHARS {
        txids.push(std::mem::take(&mut partial));
    }
    let whole = rest.len() / TXID_CHARS * TXID_CHARS;
    for chunk in rest[..whole].as_bytes().chunks(TXID_CHARS) {
        // payloads are hex already; txids at index levels are plain chars
        txids.push(String::from_utf8(chunk.to_vec()).map_err(|_| Error::FileStructure)?);
    }
    let trailing = if partial.is_empty() {
        rest[whole..].to_owned()
    } else {
        partial // body exhausted before the fragment completed
    };

    if txids.is_empty() {
        if level > 0 {
            return Err(Error::FileStructure);
        }
        // whole payload folded into the fragment; keep accumulating at this
        // level from the next chain element
        match partials {
            Some(p) => {
                p.cur.push_front(trailing);
                return Ok(());
            }
            None => return Err(Error::FileStructure),
        }
    }
    for txid in &txids {
        if !codec::is_hex(txid) {
            return Err(Error::FileStructure);
        }
    }

    match partials.as_mut() {
        Some(p) => p.next.push_back(trailing),
        None if !trailing.is_empty() => return Err(Error::FileStructure),
        None => {}
    }

    let id_refs: Vec<&str> = txids.iter().map(String::as_str).collect();
    let fetched = match fetcher.fetch(&id_refs, FetchKind::ByTxid) {
        Ok(f) => f,
        Err(Error::FetchMissing) => return Err(Error::FileDepth),
        Err(e) => return Err(e),
    };
    let next_level_hex = concat_payloads(&fetched);

    if level + 1 < md.depth {
        traverse_tree(&next_level_hex, partials, 0, level + 1, md, fetcher, sink)
    } else {
        write_hex_data(&next_level_hex, 0, sink)?;
        if let Some(p) = partials {
            p.swap();
        }
        Ok(())
    }
}

/// Walks the chain of `md.length + 1` root payloads, delegating each to the
/// tree traversal when `md.depth > 0`.
fn traverse_chain(
    start_hex: &str,
    md: &Metadata,
    fetcher: &dyn Fetcher,
    sink: &mut dyn Write,
) -> Result<()> {
    let mut partials = Partials::default();
    let mut payload_hex = start_hex.to_owned();

    for i in 0..=md.length {
        // The identifier payload ends data || next_txid || metadata; middle
        // elements end with the next txid alone; the final element is pure.
        let last = i == md.length;
        let suffix_chars = if i == 0 {
            METADATA_CHARS + if !last { TXID_CHARS } else { 0 }
        } else if last {
            0
        } else {
            TXID_CHARS
        };

        if payload_hex.len() < suffix_chars {
            return Err(Error::FileStructure);
        }

        let next_hex = if !last {
            let at = payload_hex.len() - suffix_chars;
            let next_txid = &payload_hex[at..at + TXID_CHARS];
            match fetcher.fetch(&[next_txid], FetchKind::ByTxid) {
                Ok(fetched) => fetched[0].payload_hex.clone(),
                Err(Error::FetchMissing) => return Err(Error::FileLength),
                Err(e) => return Err(e),
            }
        } else {
            String::new()
        };

        if md.depth == 0 {
            write_hex_data(&payload_hex, suffix_chars, sink)?;
        } else {
            traverse_tree(
                &payload_hex,
                Some(&mut partials),
                suffix_chars,
                0,
                md,
                fetcher,
                sink,
            )?;
        }
        payload_hex = next_hex;
    }
    Ok(())
}

/// Reassembles a file's bytes from its identifier payload and metadata.
pub(crate) fn traverse_file(
    start_hex: &str,
    md: &Metadata,
    fetcher: &dyn Fetcher,
    sink: &mut dyn Write,
) -> Result<()> {
    if md.length > 0 || md.depth == 0 {
        traverse_chain(start_hex, md, fetcher, sink)
    } else {
        traverse_tree(start_hex, None, METADATA_CHARS, 0, md, fetcher, sink)
    }
}
