//! REST gateway adapter (`getRawTransaction`).
//!
//! Unlike BitDB, a plain REST gateway returns whole raw transactions, so this
//! adapter carries the wire-level deframing: locate the data-carrying
//! (OP_RETURN) output, strip the push-opcode framing, and present the first
//! push as the payload. Only direct txid lookups are answerable this way;
//! input- and name-keyed queries need an indexer.

use std::time::Duration;

use serde_json::{json, Value};

use crate::codec;
use crate::error::{Error, Result};
use crate::fetch::{FetchKind, Fetched, Fetcher};

const GETTX_URI: &str = "/rawtransactions/getRawTransaction";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const OP_RETURN: u8 = 0x6a;
const OP_PUSHDATA1: u8 = 0x4c;
const PUSHDATA1_THRESHOLD: usize = 75;

/// Fetcher backed by a REST gateway exposing `getRawTransaction`.
pub struct RestFetcher {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl RestFetcher {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Sys(format!("failed to build HTTP client: {e}")))?;
        Ok(RestFetcher {
            endpoint: endpoint.into(),
            client,
        })
    }
}

impl Fetcher for RestFetcher {
    fn fetch(&self, ids: &[&str], kind: FetchKind) -> Result<Vec<Fetched>> {
        if !matches!(kind, FetchKind::ByTxid) {
            return Err(Error::BadCall(
                "REST gateway can only fetch by txid; use a BitDB backend for \
                 nametag and revision queries"
                    .into(),
            ));
        }
        if ids.is_empty() {
            return Err(Error::FetchMissing);
        }

        let resp = self
            .client
            .post(format!("{}{}", self.endpoint, GETTX_URI))
            .json(&json!({ "txids": ids, "verbose": false }))
            .send()
            .map_err(|e| Error::FetchError(format!("REST request failed: {e}")))?;
        let body: Value = resp
            .json()
            .map_err(|e| Error::FetchError(format!("unparsable REST response: {e}")))?;
        let raws = body
            .as_array()
            .ok_or_else(|| Error::FetchError("REST response is not an array".into()))?;
        if raws.len() != ids.len() {
            return Err(Error::FetchMissing);
        }

        let mut out = Vec::with_capacity(ids.len());
        for (id, raw) in ids.iter().zip(raws) {
            let raw_hex = raw.as_str().ok_or(Error::FetchMissing)?;
            let payload_hex = payload_from_raw_tx(raw_hex)?;
            out.push(Fetched {
                payload_hex,
                txid: Some((*id).to_owned()),
            });
        }
        Ok(out)
    }
}

/// Extracts the embedded payload (first data push, hex) from a raw
/// transaction. [`Error::FetchMissing`] if the transaction carries no
/// data output.
pub fn payload_from_raw_tx(raw_hex: &str) -> Result<String> {
    let raw = codec::hex_to_bytes(raw_hex).map_err(|_| Error::FetchError("bad raw tx hex".into()))?;
    let mut r = SliceReader { buf: &raw, pos: 0 };

    r.skip(4)?; // version
    let n_in = r.varint()?;
    for _ in 0..n_in {
        r.skip(36)?; // outpoint
        let script_len = r.varint()? as usize;
        r.skip(script_len + 4)?; // script + sequence
    }
    let n_out = r.varint()?;
    for _ in 0..n_out {
        r.skip(8)?; // value
        let script_len = r.varint()? as usize;
        let script = r.take(script_len)?;
        if script.first() == Some(&OP_RETURN) {
            let pushes = data_pushes(&script[1..])?;
            let first = pushes.into_iter().next().ok_or(Error::FetchMissing)?;
            return Ok(codec::bytes_to_hex(&first));
        }
    }
    Err(Error::FetchMissing)
}

/// Splits an OP_RETURN script body into its pushes, framing stripped.
/// Lengths up to 75 use the single opcode byte; larger pushes use
/// OP_PUSHDATA1 (one opcode byte plus one length byte).
pub fn data_pushes(mut body: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut pushes = Vec::new();
    while let Some((&op, rest)) = body.split_first() {
        let (len, rest) = match op {
            0x01..=0x4b if op as usize <= PUSHDATA1_THRESHOLD => (op as usize, rest),
            OP_PUSHDATA1 => {
                let (&len, rest) = rest
                    .split_first()
                    .ok_or_else(|| Error::FetchError("truncated pushdata length".into()))?;
                (len as usize, rest)
            }
            _ => return Err(Error::FetchError(format!("unexpected script opcode {op:#04x}"))),
        };
        if rest.len() < len {
            return Err(Error::FetchError("truncated push data".into()));
        }
        pushes.push(rest[..len].to_vec());
        body = &rest[len..];
    }
    Ok(pushes)
}

struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl SliceReader<'_> {
    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn take(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.buf.len() - self.pos < n {
            return Err(Error::FetchError("truncated raw transaction".into()));
        }
        let out = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    fn varint(&mut self) -> Result<u64> {
        let first = self.take(1)?[0];
        let wide = match first {
            0..=0xfc => return Ok(first as u64),
            0xfd => 2,
            0xfe => 4,
            _ => 8,
        };
        let mut buf = [0u8; 8];
        buf[..wide].copy_from_slice(&self.take(wide)?);
        Ok(u64::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_push_framing() {
        let pushes = data_pushes(&[0x03, 0xaa, 0xbb, 0xcc]).unwrap();
        assert_eq!(pushes, vec![vec![0xaa, 0xbb, 0xcc]]);
    }

    #[test]
    fn pushdata1_framing() {
        let mut body = vec![OP_PUSHDATA1, 100];
        body.extend(std::iter::repeat(0x41).take(100));
        let pushes = data_pushes(&body).unwrap();
        assert_eq!(pushes[0].len(), 100);
    }

    #[test]
    fn multiple_pushes_stay_separate() {
        let body = [0x02, 0x01, 0x02, 0x03, 0x7e, 0x61, 0x62];
        let pushes = data_pushes(&body).unwrap();
        assert_eq!(pushes, vec![vec![0x01, 0x02], vec![0x7e, 0x61, 0x62]]);
    }

    #[test]
    fn extracts_payload_from_minimal_tx() {
        // version | 0 inputs | 1 output (value 0, script "6a 03 686921") | locktime
        let raw = concat!(
            "01000000",
            "00",
            "01",
            "0000000000000000",
            "05",
            "6a03686921",
            "00000000"
        );
        assert_eq!(payload_from_raw_tx(raw).unwrap(), "686921");
    }

    #[test]
    fn tx_without_data_output_is_missing() {
        // single pay-to-nobody output (script "51"), no OP_RETURN
        let raw = concat!(
            "01000000",
            "00",
            "01",
            "0100000000000000",
            "01",
            "51",
            "00000000"
        );
        assert!(matches!(payload_from_raw_tx(raw), Err(Error::FetchMissing)));
    }
}
