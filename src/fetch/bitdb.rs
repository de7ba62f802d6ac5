//! BitDB HTTP endpoint adapter.
//!
//! Queries travel as base64-encoded JSON in the URL path (`/{b64}`); the
//! response carries matches in two arrays, `c` (confirmed) and `u`
//! (unconfirmed). Oversized batches come back as `414 Request-URI Too Large`
//! or an empty body; the adapter then splits the batch in half and retries,
//! transparently to the core.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::fetch::{FetchKind, Fetched, Fetcher};
use crate::protocol::{NAMETAG_PREFIX, NAME_MAX_LEN, REVISION_INPUT_VOUT};

const BITDB_API_VER: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Fetcher backed by a BitDB node HTTP endpoint.
pub struct BitDbFetcher {
    endpoint: String,
    client: reqwest::blocking::Client,
    /// Rotate a random `X-Forwarded-For` header to dodge per-address request
    /// limits on public nodes. Won't necessarily work with every server.
    pub request_limit: bool,
}

impl BitDbFetcher {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Sys(format!("failed to build HTTP client: {e}")))?;
        Ok(BitDbFetcher {
            endpoint: endpoint.into(),
            client,
            request_limit: true,
        })
    }

    fn query_json(&self, ids: &[&str], kind: FetchKind) -> Result<Value> {
        let finds: Vec<Value> = ids
            .iter()
            .map(|id| match kind {
                FetchKind::ByTxid => Ok(json!({ "tx.h": id })),
                FetchKind::ByInputTxid => Ok(json!({ "in.e.h": id })),
                FetchKind::ByName { .. } => {
                    if id.len() > NAMETAG_PREFIX.len_utf8() + NAME_MAX_LEN {
                        return Err(Error::BadCall("nametag queried is too long".into()));
                    }
                    Ok(json!({ "out.s2": id }))
                }
            })
            .collect::<Result<_>>()?;

        // jq response handler: d = first push hex, n = match key, t = txid
        let (q, f) = match kind {
            FetchKind::ByTxid => (
                json!({ "find": { "$or": finds } }),
                "[.[]|{d:.out[0].h1,n:.tx.h}]",
            ),
            FetchKind::ByInputTxid => (
                json!({ "find": { "$or": finds } }),
                "[.[]|{d:.out[0].h1,n:.in[0].e.h,i:.in[0].e.i,t:.tx.h}]",
            ),
            FetchKind::ByName { nth } => (
                json!({
                    "find": { "$or": finds },
                    "sort": { "blk.i": 1, "tx.h": 1 },
                    "limit": 1,
                    "skip": nth.saturating_sub(1),
                }),
                "[.[]|{d:.out[0].h1,n:.out[0].s2,t:.tx.h}]",
            ),
        };

        Ok(json!({ "v": BITDB_API_VER, "q": q, "r": { "f": f } }))
    }

    fn request(&self, query: &Value) -> Result<String> {
        let url = format!("{}/{}", self.endpoint, BASE64.encode(query.to_string()));
        let mut req = self.client.get(&url);
        if self.request_limit {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            req = req.header(
                "X-Forwarded-For",
                format!(
                    "{}.{}.{}.{}",
                    rng.gen_range(1..=254),
                    rng.gen_range(1..=254),
                    rng.gen_range(1..=254),
                    rng.gen_range(1..=254)
                ),
            );
        }
        let resp = req
            .send()
            .map_err(|e| Error::FetchError(format!("BitDB request failed: {e}")))?;
        resp.text()
            .map_err(|e| Error::FetchError(format!("BitDB response unreadable: {e}")))
    }

    fn fetch_batch(&self, ids: &[&str], kind: FetchKind) -> Result<Vec<Fetched>> {
        if ids.is_empty() {
            return Err(Error::FetchMissing);
        }
        // Nametag lookups carry a single name; `nth` selects the claim.
        if matches!(kind, FetchKind::ByName { .. }) && ids.len() != 1 {
            return Err(Error::BadCall(
                "only one nametag can be fetched per call".into(),
            ));
        }

        let body = self.request(&self.query_json(ids, kind)?)?;
        let resp: Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(e) => {
                // Request-URI Too Large or an empty body: split and retry.
                if (body.is_empty() && ids.len() > 1)
                    || (body.contains("URI") && body.contains("414"))
                {
                    let mid = ids.len() / 2;
                    let mut first = self.fetch_batch(&ids[..mid], kind)?;
                    first.extend(self.fetch_batch(&ids[mid..], kind)?);
                    return Ok(first);
                }
                return Err(Error::FetchError(format!(
                    "unparsable response from BitDB node: {e}"
                )));
            }
        };

        let confirmed = resp.get("c").and_then(Value::as_array);
        let unconfirmed = resp.get("u").and_then(Value::as_array);
        let matches: Vec<&Value> = confirmed
            .into_iter()
            .flatten()
            .chain(unconfirmed.into_iter().flatten())
            .collect();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let hit = matches
                .iter()
                .find(|m| {
                    if m.get("n").and_then(Value::as_str) != Some(*id) {
                        return false;
                    }
                    match kind {
                        // Revision links must consume the designated vout.
                        FetchKind::ByInputTxid => {
                            m.get("i").and_then(Value::as_u64)
                                == Some(REVISION_INPUT_VOUT as u64)
                        }
                        _ => true,
                    }
                })
                .ok_or(Error::FetchMissing)?;
            let payload_hex = hit
                .get("d")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::FetchError("BitDB match lacks data field".into()))?
                .to_lowercase();
            let txid = match kind {
                FetchKind::ByTxid => Some((*id).to_owned()),
                _ => Some(
                    hit.get("t")
                        .and_then(Value::as_str)
                        .ok_or_else(|| Error::FetchError("BitDB match lacks txid field".into()))?
                        .to_owned(),
                ),
            };
            log::debug!("bitdb fetched {id} ({} hex chars)", payload_hex.len());
            out.push(Fetched { payload_hex, txid });
        }
        Ok(out)
    }
}

impl Fetcher for BitDbFetcher {
    fn fetch(&self, ids: &[&str], kind: FetchKind) -> Result<Vec<Fetched>> {
        self.fetch_batch(ids, kind)
    }
}
