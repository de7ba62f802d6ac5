//! Nametag resolution: locating a name's claim script and its revision
//! lineage, then handing it to the script engine.

use std::io::Write;

use crate::error::{Error, Result};
use crate::fetch::FetchKind;
use crate::get::script::{NametagCounter, ScriptExec};
use crate::get::{traverse, Ctx};
use crate::identifier::is_valid_name;
use crate::protocol::{Metadata, NAMETAG_PREFIX};

/// Fetches and reassembles the script file claimed under `name`.
///
/// Claims are tried in confirmation order. A claim whose content fails
/// metadata or file-structure parsing is skipped silently, so a squatter
/// cannot block a name with garbage; each candidate is read into a fresh
/// buffer so a half-written bad claim cannot leak into the next. The first
/// claim that parses is the origin revision.
pub(crate) fn get_script_by_nametag(name: &str, ctx: &Ctx<'_>) -> Result<(String, Vec<u8>)> {
    if !is_valid_name(name) {
        return Err(Error::BadCall(format!(
            "invalid nametag name (maximum {} bytes): {name}",
            crate::protocol::NAME_MAX_LEN
        )));
    }
    let marker = format!("{NAMETAG_PREFIX}{name}");

    let mut nth = 1;
    loop {
        let fetched = ctx
            .fetcher
            .fetch(&[marker.as_str()], FetchKind::ByName { nth })?;
        nth += 1;

        let claim = &fetched[0];
        let txid = claim
            .txid
            .clone()
            .ok_or_else(|| Error::FetchError("claim lookup returned no txid".into()))?;

        let md = match Metadata::from_payload_hex(&claim.payload_hex) {
            Ok(md) => md,
            Err(Error::MetadataMissing) => continue,
            Err(e) => return Err(e),
        };
        md.protocol_check();

        let mut script = Vec::new();
        match traverse::traverse_file(&claim.payload_hex, &md, ctx.fetcher, &mut script) {
            Ok(()) => return Ok((txid, script)),
            Err(Error::FileStructure) | Err(Error::MetadataMissing) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Fetches and reassembles the script of the revision that consumes
/// `in_txid`'s designated revision output. Returns the revision's txid with
/// its script bytes.
pub(crate) fn get_script_by_in_txid(in_txid: &str, ctx: &Ctx<'_>) -> Result<(String, Vec<u8>)> {
    let fetched = ctx.fetcher.fetch(&[in_txid], FetchKind::ByInputTxid)?;
    let found = &fetched[0];
    let txid = found
        .txid
        .clone()
        .ok_or_else(|| Error::FetchError("revision lookup returned no txid".into()))?;

    let md = Metadata::from_payload_hex(&found.payload_hex)?;
    md.protocol_check();

    let mut script = Vec::new();
    traverse::traverse_file(&found.payload_hex, &md, ctx.fetcher, &mut script)?;
    Ok((txid, script))
}

/// Resolves `name` at `revision` (`None` = latest) and writes the result to
/// `sink`; with `counter` set, records references instead of downloading.
///
/// `fetched_names` carries every name already being resolved in this call
/// chain; re-entering one is a circular reference.
pub(crate) fn get_file_by_nametag(
    name: &str,
    revision: Option<u32>,
    fetched_names: &mut Vec<String>,
    ctx: &Ctx<'_>,
    counter: Option<&mut NametagCounter>,
    sink: &mut dyn Write,
) -> Result<()> {
    if fetched_names.iter().any(|n| n == name) {
        return Err(Error::CircularRef);
    }

    let (txid, script) = get_script_by_nametag(name, ctx)?;
    fetched_names.push(name.to_owned());

    ScriptExec::new(script, txid, fetched_names, counter).run(revision, ctx, sink)
}
