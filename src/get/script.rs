//! The nametag script engine.
//!
//! A revision's script executes front to back over a value stack and a stack
//! of temporary stored sinks. Execution is cooperative and single-threaded;
//! every suspension is inside the fetch adapter. Each revision frame owns its
//! stacks, so stored sinks are released on every exit path when the frame
//! unwinds.
//!
//! A malformed opcode stream does not surface immediately: the engine clears
//! the frame's stacks and falls forward to the next revision, so a bad
//! revision can be healed by publishing a fixed one. Only when the lineage is
//! exhausted does the failure report as `ScriptRetryExhausted`.

use std::io::Write;

use crate::codec;
use crate::dirindex;
use crate::error::{Error, Result};
use crate::get::nametag;
use crate::get::Ctx;
use crate::identifier::{is_valid_name, is_valid_txid};
use crate::protocol::{op, seek, TXID_BYTES};

/// Reference accumulator for info-only runs: every `WRITE*` records instead
/// of fetching, and nothing reaches the sink.
#[derive(Debug, Default)]
pub(crate) struct NametagCounter {
    /// Highest revision reached.
    pub revision: u32,
    /// Txid whose designated output would fund the next revision.
    pub revision_txid: Option<String>,
    /// Names referenced, in execution order.
    pub name_refs: Vec<String>,
    /// Txids referenced, in execution order.
    pub txid_refs: Vec<String>,
}

/// A temporary byte sink with a read cursor, the `STORE*` target.
struct Stored {
    buf: Vec<u8>,
    pos: usize,
}

impl Stored {
    fn seek(&mut self, whence: u8, offset: u32) -> Result<()> {
        let offset = offset as i64;
        let pos = match whence {
            seek::BEG => offset,
            seek::CUR => self.pos as i64 + offset,
            seek::CUR_NEG => self.pos as i64 - offset,
            seek::END_NEG => self.buf.len() as i64 - offset,
            _ => return Err(Error::ScriptStructure),
        };
        if pos < 0 {
            return Err(Error::ScriptStructure);
        }
        // positions past the end are allowed; reads there yield nothing
        self.pos = pos as usize;
        Ok(())
    }

    fn remaining(&self) -> &[u8] {
        self.buf.get(self.pos..).unwrap_or(&[])
    }
}

/// Per-invocation execution limits.
#[derive(Clone, Copy)]
struct Mode {
    /// Whether `NEXTREV` may fetch unseen revisions (forward resolution) or
    /// only replay already-loaded ones (`WRITEFROMPREV`).
    follow: bool,
    /// Revision ceiling; `NEXTREV` at this revision halts with
    /// `ScriptRevExhausted` instead of descending.
    max_rev: Option<u32>,
}

/// One nametag resolution: the revision scripts loaded so far and the
/// bookkeeping shared by nested replays.
pub(crate) struct ScriptExec<'a> {
    /// Script bytes per revision, index = revision number.
    scripts: Vec<Vec<u8>>,
    /// Carrying transaction of each revision.
    rev_txids: Vec<String>,
    /// Names in the resolution call chain, for circular-reference detection.
    fetched_names: &'a mut Vec<String>,
    counter: Option<&'a mut NametagCounter>,
}

impl<'a> ScriptExec<'a> {
    pub(crate) fn new(
        script: Vec<u8>,
        txid: String,
        fetched_names: &'a mut Vec<String>,
        counter: Option<&'a mut NametagCounter>,
    ) -> Self {
        ScriptExec {
            scripts: vec![script],
            rev_txids: vec![txid],
            fetched_names,
            counter,
        }
    }

    /// Runs the script from revision 0 toward `max_rev` (or the latest),
    /// writing whatever it emits to `sink`. `TERM` is success.
    pub(crate) fn run(
        &mut self,
        max_rev: Option<u32>,
        ctx: &Ctx<'_>,
        sink: &mut dyn Write,
    ) -> Result<()> {
        let mode = Mode {
            follow: true,
            max_rev,
        };
        match self.exec_frame(0, mode, ctx, sink) {
            Err(Error::ScriptTerminated) => Ok(()),
            other => other,
        }
    }

    /// Executes one revision's script to its end.
    fn exec_frame(
        &mut self,
        rev: u32,
        mode: Mode,
        ctx: &Ctx<'_>,
        sink: &mut dyn Write,
    ) -> Result<()> {
        let script = self.scripts[rev as usize].clone();
        let mut pos = 0usize;
        let mut stack: Vec<Vec<u8>> = Vec::new();
        let mut stored: Vec<Stored> = Vec::new();

        while pos < script.len() {
            let code = script[pos];
            pos += 1;
            match self.exec_op(code, &script, &mut pos, &mut stack, &mut stored, rev, mode, ctx, sink)
            {
                Ok(()) => {}
                Err(Error::ScriptStructure) => {
                    // invalid script: replace with the next revision if there
                    // is one, else the lineage is exhausted
                    stack.clear();
                    stored.clear();
                    return match self.next_rev(rev, mode, ctx, sink) {
                        Err(Error::ScriptRevExhausted) | Err(Error::ScriptStructure) => {
                            Err(Error::ScriptRetryExhausted)
                        }
                        other => other,
                    };
                }
                Err(Error::ScriptRevExhausted) => {
                    // requested revision reached; ignore the NEXTREV and keep
                    // executing this revision, noting the pending rev utxo
                    if mode.follow {
                        if let Some(counter) = self.counter.as_deref_mut() {
                            if counter.revision_txid.is_none() {
                                counter.revision_txid =
                                    Some(self.rev_txids[rev as usize].clone());
                            }
                        }
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// `NEXTREV`: locate (or replay) revision `rev + 1` and execute it.
    fn next_rev(
        &mut self,
        rev: u32,
        mode: Mode,
        ctx: &Ctx<'_>,
        sink: &mut dyn Write,
    ) -> Result<()> {
        if let Some(max) = mode.max_rev {
            if rev >= max {
                return Err(Error::ScriptRevExhausted);
            }
        }

        if mode.follow && self.scripts.len() as u32 == rev + 1 {
            let prev_txid = self.rev_txids[rev as usize].clone();
            let (txid, script) = match nametag::get_script_by_in_txid(&prev_txid, ctx) {
                Ok(found) => found,
                Err(Error::FetchMissing) => return Err(Error::ScriptRevExhausted),
                Err(e) => return Err(e),
            };
            self.scripts.push(script);
            self.rev_txids.push(txid);
            if let Some(counter) = self.counter.as_deref_mut() {
                counter.revision = rev + 1;
            }
        }
        self.exec_frame(rev + 1, mode, ctx, sink)
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_op(
        &mut self,
        code: u8,
        script: &[u8],
        pos: &mut usize,
        stack: &mut Vec<Vec<u8>>,
        stored: &mut Vec<Stored>,
        rev: u32,
        mode: Mode,
        ctx: &Ctx<'_>,
        sink: &mut dyn Write,
    ) -> Result<()> {
        match code {
            op::TERM => Err(Error::ScriptTerminated),

            op::NEXTREV => self.next_rev(rev, mode, ctx, sink),

            op::PUSHTXID => {
                let raw = read_bytes(script, pos, TXID_BYTES)?;
                stack.push(codec::bytes_to_hex(raw).into_bytes());
                Ok(())
            }

            op::PUSHCHAR | op::PUSHSHORT | op::PUSHINT => {
                let width = match code {
                    op::PUSHCHAR => 1,
                    op::PUSHSHORT => 2,
                    _ => 4,
                };
                let raw = read_bytes(script, pos, width)?;
                stack.push(codec::bytes_to_hex(raw).into_bytes());
                Ok(())
            }

            op::PUSHSTRX => {
                let len = pop_uint(stack)? as usize;
                push_literal(script, pos, len, stack)
            }

            op::WRITEFROMTXID => {
                let txid = pop_utf8(stack)?;
                if !is_valid_txid(&txid) {
                    return Err(Error::ScriptStructure);
                }
                if let Some(counter) = self.counter.as_deref_mut() {
                    counter.txid_refs.push(txid);
                    return Ok(());
                }
                match super::get_file_by_txid(&txid, ctx, None, sink) {
                    Err(Error::FetchMissing) => Err(Error::ScriptStructure),
                    other => other,
                }
            }

            op::WRITEFROMNAMETAG => {
                let name = pop_utf8(stack)?;
                if !is_valid_name(&name) {
                    return Err(Error::ScriptStructure);
                }
                if let Some(counter) = self.counter.as_deref_mut() {
                    counter.name_refs.push(name);
                    return Ok(());
                }
                match nametag::get_file_by_nametag(&name, None, self.fetched_names, ctx, None, sink)
                {
                    Err(Error::FetchMissing) | Err(Error::BadCall(_)) => {
                        Err(Error::ScriptStructure)
                    }
                    other => other,
                }
            }

            op::WRITEFROMPREV => {
                if rev < 1 {
                    return Err(Error::ScriptStructure);
                }
                // replay the lineage up to the previous revision; nested
                // frames get their own cursors over the shared scripts
                let replay = Mode {
                    follow: false,
                    max_rev: Some(rev - 1),
                };
                match self.exec_frame(0, replay, ctx, sink) {
                    Err(Error::ScriptTerminated) => Ok(()),
                    other => other,
                }
            }

            op::STOREFROMTXID | op::STOREFROMNAMETAG | op::STOREFROMPREV => {
                let write_op = match code {
                    op::STOREFROMTXID => op::WRITEFROMTXID,
                    op::STOREFROMNAMETAG => op::WRITEFROMNAMETAG,
                    _ => op::WRITEFROMPREV,
                };
                let mut tmp = Stored {
                    buf: Vec::new(),
                    pos: 0,
                };
                self.exec_op(write_op, script, pos, stack, stored, rev, mode, ctx, &mut tmp.buf)?;
                stored.push(tmp);
                Ok(())
            }

            op::SEEKSTORED => {
                let offset = pop_uint(stack)?;
                let whence = pop_whence(stack)?;
                let top = stored.last_mut().ok_or(Error::ScriptStructure)?;
                top.seek(whence, offset)
            }

            op::WRITEFROMSTORED | op::WRITESOMEFROMSTORED => {
                let some = if code == op::WRITESOMEFROMSTORED {
                    let n = pop_uint(stack)?;
                    if n == 0 {
                        return Err(Error::ScriptStructure);
                    }
                    Some(n as usize)
                } else {
                    None
                };
                if self.counter.is_some() {
                    return Ok(());
                }
                let top = stored.last_mut().ok_or(Error::ScriptStructure)?;
                let available = top.remaining();
                let take = some.unwrap_or(available.len());
                if available.len() < take {
                    return Err(Error::ScriptStructure);
                }
                sink.write_all(&available[..take]).map_err(Error::Write)?;
                top.pos += take;
                Ok(())
            }

            op::DROPSTORED => {
                stored.pop().map(|_| ()).ok_or(Error::ScriptStructure)
            }

            op::WRITEPATHLINK => {
                let path = pop_utf8(stack)?;
                let link = pop_utf8(stack)?;
                dirindex::write_path_link(&path, &link, sink)
            }

            op::PUSHNO => Ok(()),

            len @ 1..=op::PUSHSTR_MAX => push_literal(script, pos, len as usize, stack),

            _ => Err(Error::ScriptStructure), // reserved opcode space
        }
    }
}

/// Reads `n` bytes of the opcode stream, advancing the cursor.
fn read_bytes<'s>(script: &'s [u8], pos: &mut usize, n: usize) -> Result<&'s [u8]> {
    let end = pos.checked_add(n).ok_or(Error::ScriptStructure)?;
    let bytes = script.get(*pos..end).ok_or(Error::ScriptStructure)?;
    *pos = end;
    Ok(bytes)
}

/// Reads and pushes a literal string; embedded NULs are malformed.
fn push_literal(script: &[u8], pos: &mut usize, len: usize, stack: &mut Vec<Vec<u8>>) -> Result<()> {
    let bytes = read_bytes(script, pos, len)?;
    if bytes.contains(&0) {
        return Err(Error::ScriptStructure);
    }
    stack.push(bytes.to_vec());
    Ok(())
}

fn pop(stack: &mut Vec<Vec<u8>>) -> Result<Vec<u8>> {
    stack.pop().ok_or(Error::ScriptStructure)
}

fn pop_utf8(stack: &mut Vec<Vec<u8>>) -> Result<String> {
    String::from_utf8(pop(stack)?).map_err(|_| Error::ScriptStructure)
}

/// Pops a numeric value: the hex form of a 1-, 2-, or 4-byte big-endian
/// unsigned integer, as the `PUSHCHAR`/`PUSHSHORT`/`PUSHINT` family pushes.
fn pop_uint(stack: &mut Vec<Vec<u8>>) -> Result<u32> {
    codec::net_hex_to_uint(&pop_utf8(stack)?)
}

/// Pops a seek origin; only single-byte values qualify.
fn pop_whence(stack: &mut Vec<Vec<u8>>) -> Result<u8> {
    let hex_str = pop_utf8(stack)?;
    if hex_str.len() != 2 {
        return Err(Error::ScriptStructure);
    }
    u8::from_str_radix(&hex_str, 16).map_err(|_| Error::ScriptStructure)
}
