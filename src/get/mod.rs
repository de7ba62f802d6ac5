//! The read path: fetch, classify, traverse, and deliver file bytes.
//!
//! Entry points take a [`GetParams`] carrying the fetch handle and request
//! options, and a sink receiving the file bytes. Retrieval state is built per
//! request and torn down once the sink is flushed; callers may run many
//! retrievals in parallel by giving each its own adapter handle.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use crate::dirindex;
use crate::error::{Error, Result};
use crate::fetch::{FetchKind, Fetcher};
use crate::identifier::Identifier;
use crate::mime;
use crate::protocol::{Metadata, TYPE_DIR, TYPE_MIMESET};

pub(crate) mod nametag;
pub(crate) mod script;
pub(crate) mod traverse;

/// Options for a retrieval.
pub struct GetParams<'a> {
    /// Backend answering payload queries.
    pub fetcher: &'a dyn Fetcher,
    /// Path to resolve inside the target once fetched as a directory.
    pub dir_path: Option<String>,
    /// Insist the target is a directory index; deliver the raw index.
    pub force_dir: bool,
    /// Data directory for mime resolution; `None` skips it.
    pub datadir: Option<PathBuf>,
}

impl<'a> GetParams<'a> {
    pub fn new(fetcher: &'a dyn Fetcher) -> Self {
        GetParams {
            fetcher,
            dir_path: None,
            force_dir: false,
            datadir: None,
        }
    }
}

/// Metadata and mime string of a file, resolved without downloading it.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub metadata: Metadata,
    /// Resolved mime string; empty when unresolvable or not applicable.
    pub mimetype: String,
}

/// A nametag's revision state and the references its script uses, gathered
/// in info-only mode.
#[derive(Debug, Default)]
pub struct NametagInfo {
    /// Latest revision reached during resolution.
    pub revision: u32,
    /// Txid whose designated output funds the next revision, when the
    /// latest revision was requested.
    pub revision_txid: Option<String>,
    /// Names the script references, in order.
    pub name_refs: Vec<String>,
    /// Txids the script references, in order.
    pub txid_refs: Vec<String>,
}

/// Per-request context threaded through the traversals.
pub(crate) struct Ctx<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub datadir: Option<&'a Path>,
    pub force_dir: bool,
}

impl<'a> Ctx<'a> {
    fn from_params(params: &'a GetParams<'a>) -> Self {
        Ctx {
            fetcher: params.fetcher,
            datadir: params.datadir.as_deref(),
            force_dir: params.force_dir,
        }
    }

    fn with_force_dir(&self, force_dir: bool) -> Ctx<'a> {
        Ctx {
            fetcher: self.fetcher,
            datadir: self.datadir,
            force_dir,
        }
    }
}

/// Gets the file at any cashweb identifier and writes it to `sink`.
pub fn get_by_id(id: &str, params: &GetParams<'_>, sink: &mut dyn Write) -> Result<()> {
    let ctx = Ctx::from_params(params);
    get_file_by_id_path(id, params.dir_path.as_deref(), &mut Vec::new(), &ctx, sink)
}

/// Gets the file at a txid and writes it to `sink`.
pub fn get_by_txid(txid: &str, params: &GetParams<'_>, sink: &mut dyn Write) -> Result<()> {
    let ctx = Ctx::from_params(params);
    get_by_getter_path(
        Getter::Txid(txid),
        params.dir_path.as_deref(),
        &mut Vec::new(),
        &ctx,
        sink,
    )
}

/// Resolves a nametag at `revision` (`None` = latest) and writes the result.
pub fn get_by_name(
    name: &str,
    revision: Option<u32>,
    params: &GetParams<'_>,
    sink: &mut dyn Write,
) -> Result<()> {
    let ctx = Ctx::from_params(params);
    get_by_getter_path(
        Getter::Name(name, revision),
        params.dir_path.as_deref(),
        &mut Vec::new(),
        &ctx,
        sink,
    )
}

/// Reads a file's metadata (and mime string, when a data directory is
/// configured) without downloading its content.
pub fn file_info(txid: &str, params: &GetParams<'_>) -> Result<FileInfo> {
    let ctx = Ctx::from_params(params);
    let mut info = None;
    get_file_by_txid(txid, &ctx, Some(&mut info), &mut std::io::sink())?;
    info.ok_or_else(|| Error::Sys("file info was not collected".into()))
}

/// Describes a nametag without downloading it: revision state plus the
/// references its script would use, in order.
pub fn nametag_info(
    name: &str,
    revision: Option<u32>,
    params: &GetParams<'_>,
) -> Result<NametagInfo> {
    let ctx = Ctx::from_params(params);
    let mut counter = script::NametagCounter::default();
    nametag::get_file_by_nametag(
        name,
        revision,
        &mut Vec::new(),
        &ctx,
        Some(&mut counter),
        &mut std::io::sink(),
    )?;

    let mut info = NametagInfo {
        revision: counter.revision,
        revision_txid: counter.revision_txid,
        name_refs: counter.name_refs,
        txid_refs: counter.txid_refs,
    };
    // a pinned revision that exists has no pending revision utxo to report
    if let Some(requested) = revision {
        if requested <= info.revision {
            info.revision_txid = None;
        }
    }
    Ok(info)
}

/// What to resolve, carried through the directory recursion.
enum Getter<'a> {
    Id(&'a str),
    Txid(&'a str),
    Name(&'a str, Option<u32>),
}

fn get_by_getter(
    getter: &Getter<'_>,
    fetched_names: &mut Vec<String>,
    ctx: &Ctx<'_>,
    sink: &mut dyn Write,
) -> Result<()> {
    match getter {
        Getter::Id(id) => get_file_by_id(id, fetched_names, ctx, sink),
        Getter::Txid(txid) => get_file_by_txid(txid, ctx, None, sink),
        Getter::Name(name, rev) => {
            nametag::get_file_by_nametag(name, *rev, fetched_names, ctx, None, sink)
        }
    }
}

/// Resolves `getter`, then `path` inside it when given: the target is fetched
/// as a directory index, the path is looked up, and the resolved identifier
/// is fetched in turn (recursing on any sub-path). An empty path delivers
/// the index itself, as does `force_dir`.
fn get_by_getter_path(
    getter: Getter<'_>,
    path: Option<&str>,
    fetched_names: &mut Vec<String>,
    ctx: &Ctx<'_>,
    sink: &mut dyn Write,
) -> Result<()> {
    let Some(path) = path else {
        return get_by_getter(&getter, fetched_names, ctx, sink);
    };

    let mut dir_buf = Vec::new();
    get_by_getter(&getter, fetched_names, &ctx.with_force_dir(true), &mut dir_buf)?;

    if ctx.force_dir {
        return sink.write_all(&dir_buf).map_err(Error::Write);
    }

    match get_file_by_path(&dir_buf, path, fetched_names, ctx, sink) {
        // asking a directory for its root delivers the index itself
        Err(Error::InDirMissing) if path.is_empty() || path == "/" => {
            sink.write_all(&dir_buf).map_err(Error::Write)
        }
        other => other,
    }
}

/// Looks `path` up in a fetched index and follows the resolved identifier.
fn get_file_by_path(
    dir_bytes: &[u8],
    path: &str,
    fetched_names: &mut Vec<String>,
    ctx: &Ctx<'_>,
    sink: &mut dyn Write,
) -> Result<()> {
    let (sub_path, path_id) = dirindex::path_to_identifier(&mut Cursor::new(dir_bytes), path)?;
    match get_file_by_id_path(&path_id, sub_path.as_deref(), fetched_names, ctx, sink) {
        // a dangling reference inside an index is the index's fault
        Err(Error::BadCall(_)) | Err(Error::FetchMissing) => Err(Error::NotADir),
        other => other,
    }
}

fn get_file_by_id_path(
    id: &str,
    path: Option<&str>,
    fetched_names: &mut Vec<String>,
    ctx: &Ctx<'_>,
    sink: &mut dyn Write,
) -> Result<()> {
    get_by_getter_path(Getter::Id(id), path, fetched_names, ctx, sink)
}

fn get_file_by_id(
    id: &str,
    fetched_names: &mut Vec<String>,
    ctx: &Ctx<'_>,
    sink: &mut dyn Write,
) -> Result<()> {
    match id.parse::<Identifier>()? {
        Identifier::Path { inner, path } => {
            get_file_by_id_path(&inner.to_string(), Some(&path), fetched_names, ctx, sink)
        }
        Identifier::Nametag { rev, name } => {
            nametag::get_file_by_nametag(&name, rev, fetched_names, ctx, None, sink)
        }
        Identifier::Txid(txid) => get_file_by_txid(&txid, ctx, None, sink),
    }
}

/// Fetches a txid's payload and reassembles the file, or captures its
/// [`FileInfo`] when `info` is given.
pub(crate) fn get_file_by_txid(
    txid: &str,
    ctx: &Ctx<'_>,
    info: Option<&mut Option<FileInfo>>,
    sink: &mut dyn Write,
) -> Result<()> {
    let fetched = ctx.fetcher.fetch(&[txid], FetchKind::ByTxid)?;
    let payload_hex = &fetched[0].payload_hex;

    let md = Metadata::from_payload_hex(payload_hex)?;
    md.protocol_check();

    if ctx.force_dir && md.cw_type != TYPE_DIR {
        return Err(Error::NotADir);
    }

    if let Some(info) = info {
        let mimetype = match ctx.datadir {
            Some(datadir) if md.cw_type > TYPE_MIMESET => mime::mime_by_type(md.cw_type, datadir)?,
            _ => String::new(),
        };
        *info = Some(FileInfo {
            metadata: md,
            mimetype,
        });
        return Ok(());
    }

    traverse::traverse_file(payload_hex, &md, ctx.fetcher, sink)
}
