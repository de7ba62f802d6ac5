//! The write path: encoding byte streams into transaction chains and trees.
//!
//! The encoder works bottom-up. Leaf chunks are broadcast first and their
//! txids become the next level's input; the last transaction broadcast is
//! the file's identifier and carries the metadata trailer. When the tree
//! would exceed the permitted depth, tree roots are chained instead, tail
//! first, so every element can embed its successor's txid.

use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec;
use crate::error::{Error, Result};
use crate::mime;
use crate::protocol::{
    tx_data_bytes, tx_data_chars, Metadata, METADATA_BYTES, METADATA_CHARS, NAMETAG_PREFIX,
    PROTOCOL_VERSION, TXID_BYTES, TXID_CHARS, TYPE_DIR, TYPE_FILE, TYPE_MIMESET,
};
use crate::recovery::Recovery;
use crate::send::revision::{revision_utxo, LockStore};
use crate::send::rpc::WalletRpc;
use crate::send::tx::{tx_data_size, TxSender};

pub mod revision;
pub mod rpc;
pub mod script;
pub(crate) mod tx;

pub(crate) const ERR_WAIT_CYCLE: Duration = Duration::from_secs(5);

/// Options for a send.
#[derive(Debug, Clone)]
pub struct SendParams {
    /// Declared file type; [`TYPE_MIMESET`] resolves it from the file
    /// extension (path sends only).
    pub cw_type: u16,
    /// Depth at which trees give way to chaining; `None` = unlimited.
    pub max_tree_depth: Option<u32>,
    /// UTXO pre-fragmentation: `1` analyses the send to size the fan-out,
    /// `0` disables it, any other value forces that transaction count.
    pub frag_utxos: usize,
    /// Data directory (mime table, revision locks).
    pub datadir: PathBuf,
    /// Skip broadcasting the directory index after a directory send.
    pub dir_omit_index: bool,
    /// Append the tiny-change output to the last transaction even for plain
    /// file sends, reserving a future revision right.
    pub force_tiny_change: bool,
    /// Pay the revision (tiny change) output here: ownership transfer.
    pub rev_to_addr: Option<String>,
}

impl SendParams {
    pub fn new(datadir: impl Into<PathBuf>) -> Self {
        SendParams {
            cw_type: TYPE_FILE,
            max_tree_depth: None,
            frag_utxos: 1,
            datadir: datadir.into(),
            dir_omit_index: false,
            force_tiny_change: false,
            rev_to_addr: None,
        }
    }
}

/// Optional side streams of a send.
#[derive(Default)]
pub struct SendIo<'a> {
    /// Receives a resumable checkpoint if the send dies mid-way.
    pub recovery: Option<&'a mut dyn Write>,
    /// Receives a copy of the directory index built by a directory send.
    pub save_dir: Option<&'a mut dyn Write>,
}

/// What a completed send cost.
#[derive(Debug, Clone)]
pub struct SendReport {
    /// The file identifier (empty for a directory send that omitted its
    /// index).
    pub txid: String,
    /// Satoshis spent: fees plus change folded into them.
    pub funds_used: u64,
    /// Transactions broadcast.
    pub tx_count: usize,
}

// ---------------------------------------------------------------------------
// Level encoding
// ---------------------------------------------------------------------------

/// Unit sizes for a level: leaf levels hold raw bytes, higher levels hold
/// txid hex characters.
fn units(depth: u32) -> (usize, usize, usize) {
    if depth == 0 {
        (tx_data_bytes(PROTOCOL_VERSION), TXID_BYTES, METADATA_BYTES)
    } else {
        (tx_data_chars(PROTOCOL_VERSION), TXID_CHARS, METADATA_CHARS)
    }
}

/// A chunk's payload hex: leaves encode, index levels already are hex.
fn chunk_to_hex(chunk: &[u8], depth: u32) -> Result<String> {
    if depth == 0 {
        Ok(codec::bytes_to_hex(chunk))
    } else {
        String::from_utf8(chunk.to_vec())
            .map_err(|_| Error::Sys("tree level holds non-hex txid data".into()))
    }
}

/// Units the attached pushdata costs inside the payload capacity.
fn pushdata_units(pd_hex: Option<&str>, depth: u32) -> usize {
    match pd_hex {
        Some(pd) => {
            let (sz, _) = tx_data_size(pd.len());
            if depth == 0 {
                sz
            } else {
                sz * 2
            }
        }
        None => 0,
    }
}

/// Sends `data` as a chain of transactions at `tree_depth` (0 = raw data,
/// otherwise a level of txid characters), tail first so each element can
/// embed its successor. Returns the identifier (last broadcast) txid.
fn send_chain(
    sender: &mut TxSender<'_>,
    data: &[u8],
    pd_hex: Option<&str>,
    cw_type: u16,
    tree_depth: u32,
) -> Result<String> {
    let (cap, txid_units, md_units) = units(tree_depth);
    let md_len = md_units + pushdata_units(pd_hex, tree_depth);
    if md_len > cap {
        return Err(Error::BadCall(
            "attached pushdata leaves no room for payload".into(),
        ));
    }

    let mut md = Metadata::new(cw_type);
    md.depth = tree_depth;

    let mut remaining = data.len();
    let mut to_read = remaining.min(cap);
    let mut end = remaining + md_len <= cap;
    let mut first = true;
    let mut txid = String::new();

    loop {
        let chunk = &data[remaining - to_read..remaining];
        let mut payload_hex = chunk_to_hex(chunk, tree_depth)?;
        payload_hex.push_str(&txid);

        if end {
            payload_hex.push_str(&md.to_hex());
            txid = match pd_hex {
                Some(pd) => sender.send_tx(&[&payload_hex, pd], true)?,
                None => sender.send_tx(&[&payload_hex], true)?,
            };
            return Ok(txid);
        }

        txid = sender.send_tx(&[&payload_hex], false)?;
        md.length += 1;
        remaining -= to_read;
        if first {
            // later elements reserve room for the link suffix
            to_read = cap - txid_units;
            first = false;
        }
        if remaining < to_read {
            if remaining < to_read.saturating_sub(md_len) {
                end = true;
            }
            to_read = remaining;
        }
    }
}

/// Sends every chunk of one tree level forward, appending each txid to the
/// returned level buffer. When the whole input is a single chunk that fits
/// alongside the trailer, the trailer goes in and the chunk is the root.
fn send_tree_layer(
    sender: &mut TxSender<'_>,
    data: &[u8],
    pd_hex: Option<&str>,
    cw_type: u16,
    depth: u32,
) -> Result<(usize, Vec<u8>, String)> {
    let (cap, _, md_units) = units(depth);
    let md_len = md_units + pushdata_units(pd_hex, depth);
    if md_len > cap {
        return Err(Error::BadCall(
            "attached pushdata leaves no room for payload".into(),
        ));
    }

    let mut md = Metadata::new(cw_type);
    md.depth = depth;

    let mut num_txs = 0usize;
    let mut root_check = false;
    let mut offset = 0usize;
    let mut level = Vec::new();
    let mut last_txid = String::new();

    loop {
        let n = (data.len() - offset).min(cap);
        if n == 0 {
            if root_check {
                break;
            }
            if num_txs == 0 {
                // empty input still gets its metadata-only identifier
                let payload_hex = md.to_hex();
                last_txid = match pd_hex {
                    Some(pd) => sender.send_tx(&[&payload_hex, pd], true)?,
                    None => sender.send_tx(&[&payload_hex], true)?,
                };
                level.extend_from_slice(last_txid.as_bytes());
                num_txs = 1;
                break;
            }
            // input was an exact multiple of the capacity: no chunk can take
            // the trailer, so the next layer must wrap these
            num_txs += 1;
            break;
        }

        let chunk = &data[offset..offset + n];
        offset += n;
        let mut payload_hex = chunk_to_hex(chunk, depth)?;

        let mut at_md = false;
        if offset == data.len() && num_txs < 1 {
            root_check = true;
            if n + md_len <= cap {
                payload_hex.push_str(&md.to_hex());
                at_md = true;
            } else {
                num_txs += 1;
            }
        }

        last_txid = if at_md && pd_hex.is_some() {
            sender.send_tx(&[&payload_hex, pd_hex.unwrap_or_default()], true)?
        } else {
            sender.send_tx(&[&payload_hex], at_md)?
        };
        num_txs += 1;
        level.extend_from_slice(last_txid.as_bytes());
    }

    Ok((num_txs, level, last_txid))
}

/// Recursive bottom-up tree send. Past the depth limit the level is chained
/// instead. A failure above the leaf level checkpoints the level into the
/// recovery stream so the spend so far is not lost.
fn send_tree(
    sender: &mut TxSender<'_>,
    data: &[u8],
    pd_hex: Option<&str>,
    params: &SendParams,
    depth: u32,
    io: &mut SendIo<'_>,
) -> Result<String> {
    let result = if params.max_tree_depth.is_some_and(|max| depth >= max) {
        send_chain(sender, data, pd_hex, params.cw_type, depth)
    } else {
        match send_tree_layer(sender, data, pd_hex, params.cw_type, depth) {
            Ok((num_txs, level, last_txid)) => {
                if num_txs < 2 {
                    return Ok(last_txid);
                }
                return send_tree(sender, &level, pd_hex, params, depth + 1, io);
            }
            Err(e) => Err(e),
        }
    };

    if let Err(e) = &result {
        if !matches!(e, Error::BadCall(_)) && depth > 0 {
            if let Some(recovery) = io.recovery.as_deref_mut() {
                log::info!("Error met, saving recovery data...");
                let checkpoint = Recovery {
                    cw_type: params.cw_type,
                    max_tree_depth: params.max_tree_depth,
                    saved_depth: depth,
                    body: data.to_vec(),
                };
                match checkpoint.write(recovery) {
                    Ok(()) => log::info!("Recovery data saved"),
                    Err(_) => log::error!("Failed to save recovery data; progress lost"),
                }
            } else {
                log::error!("send failed mid-way with no recovery stream; progress lost");
            }
        }
    }
    result
}

fn send_data(
    sender: &mut TxSender<'_>,
    data: &[u8],
    start_depth: u32,
    pd_hex: Option<&str>,
    params: &SendParams,
    io: &mut SendIo<'_>,
) -> Result<String> {
    let mut params = params.clone();
    if params.cw_type == TYPE_MIMESET {
        if !sender.just_counting {
            log::warn!(
                "cannot determine mimetype when sending from a stream; defaulting to opaque file"
            );
        }
        params.cw_type = TYPE_FILE;
    }
    send_tree(sender, data, pd_hex, &params, start_depth, io)
}

// ---------------------------------------------------------------------------
// Send-context assembly
// ---------------------------------------------------------------------------

/// Builds the per-send wallet state: lock store loaded, stored revision
/// outpoints asserted locked, forced output applied.
fn init_sender<'a>(
    wallet: &'a dyn WalletRpc,
    params: &SendParams,
) -> Result<(TxSender<'a>, LockStore)> {
    let locks = LockStore::load(&params.datadir)?;
    locks.assert_wallet_locks(wallet)?;

    let mut sender = TxSender::new(wallet);
    sender.force_tiny_change_last = params.force_tiny_change;
    sender.force_output_addr_last = params.rev_to_addr.clone();
    Ok((sender, locks))
}

/// Pre-sizes the fan-out by dry-counting the transactions the send needs.
fn analyze_fragmentation<F>(sender: &mut TxSender<'_>, params: &SendParams, send: F) -> Result<()>
where
    F: FnOnce(&mut TxSender<'_>) -> Result<String>,
{
    if params.frag_utxos != 1 {
        sender.txs_to_send = params.frag_utxos;
        return Ok(());
    }
    sender.just_counting = true;
    sender.just_tx_counting = true;
    let result = send(sender);
    sender.just_counting = false;
    sender.just_tx_counting = false;
    sender.txs_to_send = sender.tx_count;
    sender.tx_count = 0;
    sender.cost_count = 0;
    result.map(|_| ())
}

/// Runs `send` in full counting mode, reporting `(tx_count, cost)`.
fn count_run<F>(sender: &mut TxSender<'_>, send: F) -> Result<(usize, u64)>
where
    F: FnOnce(&mut TxSender<'_>) -> Result<String>,
{
    sender.just_counting = true;
    let result = send(sender);
    sender.just_counting = false;
    let counted = (sender.tx_count, sender.cost_count);
    sender.tx_count = 0;
    sender.cost_count = 0;
    result.map(|_| counted)
}

fn read_all(stream: &mut dyn Read) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    stream
        .read_to_end(&mut data)
        .map_err(|e| Error::Sys(format!("failed reading input stream: {e}")))?;
    Ok(data)
}

// ---------------------------------------------------------------------------
// Public API: files and directories
// ---------------------------------------------------------------------------

/// Sends a byte stream as a file; the returned txid is its identifier.
pub fn send_from_stream(
    stream: &mut dyn Read,
    params: &SendParams,
    wallet: &dyn WalletRpc,
    io: &mut SendIo<'_>,
) -> Result<SendReport> {
    let data = read_all(stream)?;
    let (mut sender, _locks) = init_sender(wallet, params)?;
    analyze_fragmentation(&mut sender, params, |s| {
        send_data(s, &data, 0, None, params, &mut SendIo::default())
    })?;
    let txid = send_data(&mut sender, &data, 0, None, params, io)?;
    Ok(SendReport {
        txid,
        funds_used: sender.cost_count,
        tx_count: sender.tx_count,
    })
}

/// Estimates a stream send without broadcasting: `(tx_count, cost_sats)`.
pub fn estimate_from_stream(
    stream: &mut dyn Read,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<(usize, u64)> {
    let data = read_all(stream)?;
    let (mut sender, _locks) = init_sender(wallet, params)?;
    analyze_fragmentation(&mut sender, params, |s| {
        send_data(s, &data, 0, None, params, &mut SendIo::default())
    })?;
    count_run(&mut sender, |s| {
        send_data(s, &data, 0, None, params, &mut SendIo::default())
    })
}

/// Sends the file or directory at `path`, chosen by what it is on disk.
pub fn send_from_path(
    path: &Path,
    params: &SendParams,
    wallet: &dyn WalletRpc,
    io: &mut SendIo<'_>,
) -> Result<SendReport> {
    let (mut sender, _locks) = init_sender(wallet, params)?;
    let as_dir = path.is_dir();
    analyze_fragmentation(&mut sender, params, |s| {
        send_path_inner(s, path, as_dir, params, &mut SendIo::default())
    })?;
    let txid = send_path_inner(&mut sender, path, as_dir, params, io)?;
    Ok(SendReport {
        txid,
        funds_used: sender.cost_count,
        tx_count: sender.tx_count,
    })
}

/// Estimates a path send without broadcasting: `(tx_count, cost_sats)`.
pub fn estimate_from_path(
    path: &Path,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<(usize, u64)> {
    let (mut sender, _locks) = init_sender(wallet, params)?;
    let as_dir = path.is_dir();
    analyze_fragmentation(&mut sender, params, |s| {
        send_path_inner(s, path, as_dir, params, &mut SendIo::default())
    })?;
    count_run(&mut sender, |s| {
        send_path_inner(s, path, as_dir, params, &mut SendIo::default())
    })
}

fn send_path_inner(
    sender: &mut TxSender<'_>,
    path: &Path,
    as_dir: bool,
    params: &SendParams,
    io: &mut SendIo<'_>,
) -> Result<String> {
    if as_dir {
        send_dir_inner(sender, path, params, io)
    } else {
        send_file_inner(sender, path, params, io)
    }
}

fn send_file_inner(
    sender: &mut TxSender<'_>,
    path: &Path,
    params: &SendParams,
    io: &mut SendIo<'_>,
) -> Result<String> {
    let data =
        std::fs::read(path).map_err(|e| Error::Sys(format!("failed reading {path:?}: {e}")))?;

    let mut file_params = params.clone();
    if file_params.cw_type == TYPE_MIMESET {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        file_params.cw_type = mime::type_by_extension(name, &params.datadir)?;
        if !sender.just_counting && file_params.cw_type == TYPE_FILE {
            log::warn!("no mime.types match for {path:?}; sending as opaque file");
        }
    }
    send_tree(sender, &data, None, &file_params, 0, io)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| Error::Sys(format!("failed reading directory {dir:?}: {e}")))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| Error::Sys(format!("failed reading directory {dir:?}: {e}")))?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let p = entry.path();
        if p.is_dir() {
            collect_files(&p, out)?;
        } else if p.is_file() {
            out.push(p);
        }
    }
    Ok(())
}

/// Sends every regular file under `dir`, builds the two-section index, and
/// broadcasts the index itself as the directory's identifier (unless
/// omitted, in which case the returned identifier is empty).
fn send_dir_inner(
    sender: &mut TxSender<'_>,
    dir: &Path,
    params: &SendParams,
    io: &mut SendIo<'_>,
) -> Result<String> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;

    let mut index_text = String::new();
    let mut index_txids: Vec<u8> = Vec::new();

    for file in &files {
        let rel = file
            .strip_prefix(dir)
            .map_err(|e| Error::Sys(format!("path escape in directory walk: {e}")))?;
        let rel = rel
            .to_str()
            .ok_or_else(|| Error::Sys(format!("non-UTF-8 file name: {rel:?}")))?
            .replace(std::path::MAIN_SEPARATOR, "/");

        if !sender.just_counting {
            log::info!("Sending /{rel}...");
        }
        let txid = send_file_inner(sender, file, params, io)?;
        if !sender.just_counting {
            log::info!("/{rel} -> {txid}");
        }

        index_text.push('/');
        index_text.push_str(&rel);
        index_text.push('\n');
        index_txids.extend_from_slice(&codec::hex_to_bytes(&txid)?);
    }

    let mut index = index_text.into_bytes();
    index.push(b'\n');
    index.extend_from_slice(&index_txids);

    if let Some(save_dir) = io.save_dir.as_deref_mut() {
        if !sender.just_counting {
            save_dir.write_all(&index).map_err(Error::Write)?;
        }
    }

    if params.dir_omit_index {
        return Ok(String::new());
    }
    if !sender.just_counting {
        log::info!("Sending directory index...");
    }
    let mut index_params = params.clone();
    index_params.cw_type = TYPE_DIR;
    send_tree(sender, &index, None, &index_params, 0, io)
}

// ---------------------------------------------------------------------------
// Public API: recovery
// ---------------------------------------------------------------------------

/// Resumes a send from a recovery stream written by an earlier failure.
pub fn send_from_recovery_stream(
    stream: &mut dyn BufRead,
    params: &SendParams,
    wallet: &dyn WalletRpc,
    io: &mut SendIo<'_>,
) -> Result<SendReport> {
    let checkpoint = Recovery::read(stream)?;
    let mut params = params.clone();
    params.cw_type = checkpoint.cw_type;
    params.max_tree_depth = checkpoint.max_tree_depth;

    let (mut sender, _locks) = init_sender(wallet, &params)?;
    let data = checkpoint.body;
    let depth = checkpoint.saved_depth;
    analyze_fragmentation(&mut sender, &params, |s| {
        send_data(s, &data, depth, None, &params, &mut SendIo::default())
    })?;
    let txid = send_data(&mut sender, &data, depth, None, &params, io)?;
    Ok(SendReport {
        txid,
        funds_used: sender.cost_count,
        tx_count: sender.tx_count,
    })
}

/// Estimates a recovery resume without broadcasting.
pub fn estimate_from_recovery_stream(
    stream: &mut dyn BufRead,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<(usize, u64)> {
    let checkpoint = Recovery::read(stream)?;
    let mut params = params.clone();
    params.cw_type = checkpoint.cw_type;
    params.max_tree_depth = checkpoint.max_tree_depth;

    let (mut sender, _locks) = init_sender(wallet, &params)?;
    let data = checkpoint.body;
    let depth = checkpoint.saved_depth;
    analyze_fragmentation(&mut sender, &params, |s| {
        send_data(s, &data, depth, None, &params, &mut SendIo::default())
    })?;
    count_run(&mut sender, |s| {
        send_data(s, &data, depth, None, &params, &mut SendIo::default())
    })
}

// ---------------------------------------------------------------------------
// Public API: nametags and revisions
// ---------------------------------------------------------------------------

/// Claims `name` with the given script as its revision-0 program. Unless
/// `immutable`, a tiny-change output is reserved and locked for the next
/// revision.
pub fn send_nametag(
    name: &str,
    script_bytes: &[u8],
    immutable: bool,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<SendReport> {
    if !crate::identifier::is_valid_name(name) {
        return Err(Error::BadCall(format!(
            "invalid nametag name (maximum {} bytes): {name}",
            crate::protocol::NAME_MAX_LEN
        )));
    }

    let marker = format!("{NAMETAG_PREFIX}{name}");
    let pd_hex = codec::bytes_to_hex(marker.as_bytes());

    let mut params = params.clone();
    params.cw_type = TYPE_FILE;

    let (mut sender, mut locks) = init_sender(wallet, &params)?;
    if !immutable {
        sender.force_tiny_change_last = true;
    }

    analyze_fragmentation(&mut sender, &params, |s| {
        send_data(s, script_bytes, 0, Some(&pd_hex), &params, &mut SendIo::default())
    })?;
    let txid = send_data(
        &mut sender,
        script_bytes,
        0,
        Some(&pd_hex),
        &params,
        &mut SendIo::default(),
    )?;

    if !immutable && sender.force_output_addr_last.is_none() {
        locks.set_lock(name, revision_utxo(&txid), wallet)?;
    }
    Ok(SendReport {
        txid,
        funds_used: sender.cost_count,
        tx_count: sender.tx_count,
    })
}

/// Sends a nametag whose script just writes `attach_id`.
pub fn send_standard_nametag(
    name: &str,
    attach_id: &str,
    rvp: &script::RevisionPack,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<SendReport> {
    let mut bytes = Vec::new();
    script::standard_start(rvp, &mut bytes);
    script::writefrom_id(attach_id, &mut bytes)?;
    send_nametag(name, &bytes, rvp.immutable, &with_transfer(params, rvp), wallet)
}

/// Publishes a new revision: spends the designated output of `rev_txid`
/// (which must be held in the lock store) with the new script attached.
pub fn send_revision(
    rev_txid: &str,
    script_bytes: &[u8],
    immutable: bool,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<SendReport> {
    if !crate::identifier::is_valid_txid(rev_txid) {
        return Err(Error::BadCall(format!(
            "revision txid has invalid format: {rev_txid}"
        )));
    }

    let mut params = params.clone();
    params.cw_type = TYPE_FILE;

    let (mut sender, mut locks) = init_sender(wallet, &params)?;
    if !immutable {
        sender.force_tiny_change_last = true;
    }

    // release the revision outpoint for spending and force it as input
    let in_utxo = revision_utxo(rev_txid);
    let name = locks.unlock_by_utxo(&in_utxo, wallet)?;
    sender.force_input_last = Some(in_utxo.clone());

    let result = analyze_fragmentation(&mut sender, &params, |s| {
        send_data(s, script_bytes, 0, None, &params, &mut SendIo::default())
    })
    .and_then(|()| {
        send_data(
            &mut sender,
            script_bytes,
            0,
            None,
            &params,
            &mut SendIo::default(),
        )
    });

    let txid = match result {
        Ok(txid) => txid,
        Err(e) => {
            if matches!(e, Error::InputsConflict) {
                log::error!(
                    "RPC reporting bad UTXO(s); check that the revision UTXO is owned by this wallet"
                );
            }
            // keep the revision right on the books for another try
            if let Err(relock) = locks.set_lock(&name, in_utxo, wallet) {
                log::error!("failed to re-lock revision utxo after error: {relock}");
            }
            return Err(e);
        }
    };

    if !immutable && sender.force_output_addr_last.is_none() {
        locks.set_lock(&name, revision_utxo(&txid), wallet)?;
    }
    Ok(SendReport {
        txid,
        funds_used: sender.cost_count,
        tx_count: sender.tx_count,
    })
}

fn with_transfer(params: &SendParams, rvp: &script::RevisionPack) -> SendParams {
    let mut params = params.clone();
    if rvp.transfer_addr.is_some() {
        params.rev_to_addr = rvp.transfer_addr.clone();
    }
    params
}

/// Revision that replaces the content with `attach_id`.
pub fn send_replace_revision(
    rev_txid: &str,
    attach_id: &str,
    rvp: &script::RevisionPack,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<SendReport> {
    let mut bytes = Vec::new();
    script::standard_start(rvp, &mut bytes);
    script::writefrom_id(attach_id, &mut bytes)?;
    bytes.push(crate::protocol::op::TERM);
    send_revision(rev_txid, &bytes, rvp.immutable, &with_transfer(params, rvp), wallet)
}

/// Revision that writes `attach_id` before the previous content.
pub fn send_prepend_revision(
    rev_txid: &str,
    attach_id: &str,
    rvp: &script::RevisionPack,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<SendReport> {
    let mut bytes = Vec::new();
    script::standard_start(rvp, &mut bytes);
    script::writefrom_id(attach_id, &mut bytes)?;
    send_revision(rev_txid, &bytes, rvp.immutable, &with_transfer(params, rvp), wallet)
}

/// Revision that writes `attach_id` after the previous content.
pub fn send_append_revision(
    rev_txid: &str,
    attach_id: &str,
    rvp: &script::RevisionPack,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<SendReport> {
    let mut bytes = Vec::new();
    script::standard_start(rvp, &mut bytes);
    bytes.push(crate::protocol::op::WRITEFROMPREV);
    script::writefrom_id(attach_id, &mut bytes)?;
    bytes.push(crate::protocol::op::TERM);
    send_revision(rev_txid, &bytes, rvp.immutable, &with_transfer(params, rvp), wallet)
}

/// Revision that splices `attach_id` into the previous content at the
/// 1-based byte position.
pub fn send_insert_revision(
    rev_txid: &str,
    byte_pos: usize,
    attach_id: &str,
    rvp: &script::RevisionPack,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<SendReport> {
    if byte_pos < 1 {
        return Err(Error::BadCall("insert position is 1-based".into()));
    }
    let mut bytes = Vec::new();
    script::standard_start(rvp, &mut bytes);
    bytes.push(crate::protocol::op::STOREFROMPREV);
    script::push_int(byte_pos as u32 - 1, &mut bytes);
    bytes.push(crate::protocol::op::WRITESOMEFROMSTORED);
    script::writefrom_id(attach_id, &mut bytes)?;
    bytes.push(crate::protocol::op::WRITEFROMSTORED);
    bytes.push(crate::protocol::op::DROPSTORED);
    bytes.push(crate::protocol::op::TERM);
    send_revision(rev_txid, &bytes, rvp.immutable, &with_transfer(params, rvp), wallet)
}

/// Revision that deletes `bytes_to_del` bytes of the previous content from
/// the 1-based start position.
pub fn send_delete_revision(
    rev_txid: &str,
    start_pos: usize,
    bytes_to_del: usize,
    rvp: &script::RevisionPack,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<SendReport> {
    if start_pos < 1 || bytes_to_del < 1 {
        return Err(Error::BadCall(
            "delete range is 1-based and must be non-empty".into(),
        ));
    }
    let mut bytes = Vec::new();
    script::standard_start(rvp, &mut bytes);
    bytes.push(crate::protocol::op::STOREFROMPREV);
    script::push_int(start_pos as u32 - 1, &mut bytes);
    bytes.push(crate::protocol::op::WRITESOMEFROMSTORED);
    script::push_int(crate::protocol::seek::CUR as u32, &mut bytes);
    script::push_int(bytes_to_del as u32, &mut bytes);
    bytes.push(crate::protocol::op::SEEKSTORED);
    bytes.push(crate::protocol::op::WRITEFROMSTORED);
    bytes.push(crate::protocol::op::DROPSTORED);
    bytes.push(crate::protocol::op::TERM);
    send_revision(rev_txid, &bytes, rvp.immutable, &with_transfer(params, rvp), wallet)
}

/// Revision whose script does nothing (pending content).
pub fn send_empty_revision(
    rev_txid: &str,
    rvp: &script::RevisionPack,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<SendReport> {
    let mut bytes = Vec::new();
    script::standard_start(rvp, &mut bytes);
    if bytes.is_empty() {
        bytes.push(crate::protocol::op::PUSHNO);
    }
    send_revision(rev_txid, &bytes, rvp.immutable, &with_transfer(params, rvp), wallet)
}

// ---------------------------------------------------------------------------
// Public API: revision locks
// ---------------------------------------------------------------------------

/// Asserts every stored revision outpoint locked wallet-side.
pub fn wallet_lock_revision_utxos(params: &SendParams, wallet: &dyn WalletRpc) -> Result<()> {
    let locks = LockStore::load(&params.datadir)?;
    locks.assert_wallet_locks(wallet)
}

/// Manually locks (`unlock = false`) or unlocks a revision right. Locking
/// needs both a name and a txid; unlocking takes either.
pub fn set_revision_lock(
    name: Option<&str>,
    rev_txid: Option<&str>,
    unlock: bool,
    params: &SendParams,
    wallet: &dyn WalletRpc,
) -> Result<()> {
    let mut locks = LockStore::load(&params.datadir)?;
    if unlock {
        match (name, rev_txid) {
            (Some(name), _) => locks.unlock_by_name(name, wallet).map(|_| ()),
            (None, Some(txid)) => locks.unlock_by_utxo(&revision_utxo(txid), wallet).map(|_| ()),
            (None, None) => Err(Error::BadCall("unlock needs a name or a txid".into())),
        }
    } else {
        match (name, rev_txid) {
            (Some(name), Some(txid)) => locks.set_lock(name, revision_utxo(txid), wallet),
            _ => Err(Error::BadCall("locking needs both name and txid".into())),
        }
    }
}

/// The stored revision txid of an owned name.
pub fn stored_revision_txid(name: &str, params: &SendParams) -> Result<String> {
    let locks = LockStore::load(&params.datadir)?;
    locks
        .get(name)
        .map(|u| u.txid.clone())
        .ok_or_else(|| Error::BadCall(format!("no revision lock stored for name: {name}")))
}

/// Helper mirroring the read side's path resolution for send callers that
/// type their uploads by extension.
pub fn set_type_by_extension(file_name: &str, params: &mut SendParams) -> Result<()> {
    params.cw_type = mime::type_by_extension(file_name, &params.datadir)?;
    Ok(())
}

pub use rpc::{JsonRpcWallet, TxOutputs, Unspent, Utxo};
