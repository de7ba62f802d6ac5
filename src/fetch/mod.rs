//! The fetch capability consumed by the retrieval engine.
//!
//! A [`Fetcher`] turns a batch of identifiers into embedded data payloads.
//! Implementations may parallelise or split oversized batches internally, but
//! must present ordered results: one entry per requested id, in request
//! order. A missing member is [`Error::FetchMissing`]; backend or decoding
//! failures are [`Error::FetchError`].

use crate::error::Result;

pub mod bitdb;
pub mod rest;

/// How a batch of ids is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Fetch the payload of each transaction id.
    ByTxid,
    /// For each id `T`, fetch the transaction whose designated revision
    /// input consumes `T`'s designated revision output. Walks a nametag's
    /// revision chain.
    ByInputTxid,
    /// Look up a nametag claim by its marker output; `nth` selects the
    /// claim in confirmation order (1-based). One name per call.
    ByName { nth: usize },
}

/// One fetched transaction's data.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// The embedded payload, hex-encoded, push framing stripped.
    pub payload_hex: String,
    /// The carrying transaction's id. Always present for [`FetchKind::ByName`]
    /// and [`FetchKind::ByInputTxid`]; optional for [`FetchKind::ByTxid`]
    /// (the caller already knows it).
    pub txid: Option<String>,
}

/// Batch fetch capability. Object-safe so retrievals can share one handle.
pub trait Fetcher {
    /// Fetches payloads for `ids` per `kind`. Results are ordered to match
    /// `ids`; the result count equals the request count or the call fails.
    fn fetch(&self, ids: &[&str], kind: FetchKind) -> Result<Vec<Fetched>>;
}

impl<T: Fetcher + ?Sized> Fetcher for &T {
    fn fetch(&self, ids: &[&str], kind: FetchKind) -> Result<Vec<Fetched>> {
        (**self).fetch(ids, kind)
    }
}

/// Concatenates the payload hex of an ordered batch; the shape the chain and
/// tree traversals consume a fetched level in.
pub fn concat_payloads(results: &[Fetched]) -> String {
    results.iter().map(|f| f.payload_hex.as_str()).collect()
}
