//! The wallet RPC seam: what the send pipeline needs from the node.
//!
//! [`WalletRpc`] is the trait the pipeline drives; [`JsonRpcWallet`] talks
//! JSON-RPC to a Bitcoin Cash node over HTTP with basic auth. Amounts cross
//! this boundary in satoshis; the JSON wire speaks coin-denominated floats,
//! converted at the edge only.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Satoshis per whole coin.
pub const COIN_SATS: u64 = 100_000_000;

/// A transaction outpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
}

/// A spendable wallet output.
#[derive(Debug, Clone)]
pub struct Unspent {
    pub txid: String,
    pub vout: u32,
    /// Value in satoshis.
    pub amount: u64,
}

/// Outputs of a data-carrying transaction: the OP_RETURN blob plus ordered
/// address outputs. Address order fixes vout assignment (data is vout 0).
#[derive(Debug, Clone, Default)]
pub struct TxOutputs {
    /// Hex blob for the data output.
    pub data_hex: String,
    /// `(address, satoshis)` pairs, in output order.
    pub addrs: Vec<(String, u64)>,
}

/// Wallet operations the send pipeline consumes. Implementations present
/// synchronous, ordered results; transient transport failures surface as
/// [`Error::Rpc`] and are retried by the pipeline.
pub trait WalletRpc {
    /// Confirmed wallet balance, satoshis.
    fn balance(&self) -> Result<u64>;
    /// Unconfirmed wallet balance, satoshis.
    fn unconfirmed_balance(&self) -> Result<u64>;
    /// Spendable outputs; `include_unconfirmed` admits 0-conf outputs.
    fn list_unspent(&self, include_unconfirmed: bool) -> Result<Vec<Unspent>>;
    /// A fresh change address.
    fn raw_change_address(&self) -> Result<String>;
    /// Estimated fee rate, satoshis per byte.
    fn estimate_fee_per_byte(&self) -> Result<f64>;
    /// Builds an unsigned raw transaction, returned as hex.
    fn create_raw_transaction(&self, inputs: &[Utxo], outputs: &TxOutputs) -> Result<String>;
    /// Signs with the wallet's keys, returning the signed hex.
    fn sign_raw_transaction(&self, raw_hex: &str) -> Result<String>;
    /// Broadcasts; returns the txid. Node-side policy rejections surface as
    /// [`Error::RpcResponseError`] with the node's message.
    fn send_raw_transaction(&self, signed_hex: &str) -> Result<String>;
    /// Confirmation count of a wallet transaction.
    fn confirmations(&self, txid: &str) -> Result<u32>;
    /// Locks (`unlock = false`) or unlocks outputs against accidental spends.
    fn lock_unspent(&self, unlock: bool, utxos: &[Utxo]) -> Result<()>;
}

impl<T: WalletRpc + ?Sized> WalletRpc for &T {
    fn balance(&self) -> Result<u64> {
        (**self).balance()
    }
    fn unconfirmed_balance(&self) -> Result<u64> {
        (**self).unconfirmed_balance()
    }
    fn list_unspent(&self, include_unconfirmed: bool) -> Result<Vec<Unspent>> {
        (**self).list_unspent(include_unconfirmed)
    }
    fn raw_change_address(&self) -> Result<String> {
        (**self).raw_change_address()
    }
    fn estimate_fee_per_byte(&self) -> Result<f64> {
        (**self).estimate_fee_per_byte()
    }
    fn create_raw_transaction(&self, inputs: &[Utxo], outputs: &TxOutputs) -> Result<String> {
        (**self).create_raw_transaction(inputs, outputs)
    }
    fn sign_raw_transaction(&self, raw_hex: &str) -> Result<String> {
        (**self).sign_raw_transaction(raw_hex)
    }
    fn send_raw_transaction(&self, signed_hex: &str) -> Result<String> {
        (**self).send_raw_transaction(signed_hex)
    }
    fn confirmations(&self, txid: &str) -> Result<u32> {
        (**self).confirmations(txid)
    }
    fn lock_unspent(&self, unlock: bool, utxos: &[Utxo]) -> Result<()> {
        (**self).lock_unspent(unlock, utxos)
    }
}

/// Retries `f` for as long as it fails with a transport-level RPC error,
/// waiting between attempts; any other outcome passes through.
pub(crate) fn retry_rpc<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut printed = false;
    loop {
        match f() {
            Err(Error::Rpc(msg)) => {
                if !printed {
                    log::warn!(
                        "RPC request failed ({msg}); please ensure the node is running and \
                         configured correctly; retrying"
                    );
                    printed = true;
                }
                std::thread::sleep(super::ERR_WAIT_CYCLE);
            }
            other => return other,
        }
    }
}

/// JSON-RPC client for a Bitcoin Cash node wallet.
pub struct JsonRpcWallet {
    url: String,
    user: String,
    pass: String,
    client: reqwest::blocking::Client,
}

impl JsonRpcWallet {
    pub fn new(server: &str, port: u16, user: &str, pass: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Sys(format!("failed to build HTTP client: {e}")))?;
        Ok(JsonRpcWallet {
            url: format!("http://{server}:{port}/"),
            user: user.to_owned(),
            pass: pass.to_owned(),
            client,
        })
    }

    fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "cashweb",
            "method": method,
            "params": params,
        });
        let resp = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&body)
            .send()
            .map_err(|e| Error::Rpc(e.to_string()))?;
        let resp: Value = resp.json().map_err(|e| Error::Rpc(e.to_string()))?;

        if let Some(err) = resp.get("error").filter(|e| !e.is_null()) {
            let msg = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error");
            return Err(Error::RpcResponseError(msg.to_owned()));
        }
        resp.get("result")
            .cloned()
            .ok_or_else(|| Error::Rpc("response carries neither result nor error".into()))
    }
}

fn coins_to_sats(coins: f64) -> u64 {
    (coins * COIN_SATS as f64).round() as u64
}

pub(crate) fn sats_to_coins(sats: u64) -> Value {
    // fixed 8-decimal rendering keeps the node's amount parser happy
    let s = format!("{}.{:08}", sats / COIN_SATS, sats % COIN_SATS);
    let n = serde_json::Number::from_f64(s.parse().unwrap_or(0.0));
    Value::Number(n.unwrap_or_else(|| serde_json::Number::from(0u64)))
}

impl WalletRpc for JsonRpcWallet {
    fn balance(&self) -> Result<u64> {
        let v = self.call("getbalance", json!([]))?;
        Ok(coins_to_sats(v.as_f64().unwrap_or(0.0)))
    }

    fn unconfirmed_balance(&self) -> Result<u64> {
        let v = self.call("getunconfirmedbalance", json!([]))?;
        Ok(coins_to_sats(v.as_f64().unwrap_or(0.0)))
    }

    fn list_unspent(&self, include_unconfirmed: bool) -> Result<Vec<Unspent>> {
        let params = if include_unconfirmed {
            json!([0])
        } else {
            json!([])
        };
        let v = self.call("listunspent", params)?;
        let arr = v
            .as_array()
            .ok_or_else(|| Error::Rpc("listunspent did not return an array".into()))?;
        arr.iter()
            .map(|u| {
                Ok(Unspent {
                    txid: u
                        .get("txid")
                        .and_then(Value::as_str)
                        .ok_or_else(|| Error::Rpc("unspent lacks txid".into()))?
                        .to_owned(),
                    vout: u.get("vout").and_then(Value::as_u64).unwrap_or(0) as u32,
                    amount: coins_to_sats(u.get("amount").and_then(Value::as_f64).unwrap_or(0.0)),
                })
            })
            .collect()
    }

    fn raw_change_address(&self) -> Result<String> {
        let v = self.call("getrawchangeaddress", json!([]))?;
        v.as_str()
            .map(str::to_owned)
            .ok_or_else(|| Error::Rpc("getrawchangeaddress did not return a string".into()))
    }

    fn estimate_fee_per_byte(&self) -> Result<f64> {
        let v = self.call("estimatefee", json!([]))?;
        let coins_per_kb = v.as_f64().unwrap_or(0.0);
        Ok(coins_per_kb * COIN_SATS as f64 / 1000.0)
    }

    fn create_raw_transaction(&self, inputs: &[Utxo], outputs: &TxOutputs) -> Result<String> {
        let ins: Vec<Value> = inputs
            .iter()
            .map(|u| json!({ "txid": u.txid, "vout": u.vout }))
            .collect();
        let mut outs = serde_json::Map::new();
        outs.insert("data".into(), Value::String(outputs.data_hex.clone()));
        for (addr, sats) in &outputs.addrs {
            outs.insert(addr.clone(), sats_to_coins(*sats));
        }
        let v = self.call("createrawtransaction", json!([ins, Value::Object(outs)]))?;
        v.as_str()
            .map(str::to_owned)
            .ok_or_else(|| Error::Rpc("createrawtransaction did not return a string".into()))
    }

    fn sign_raw_transaction(&self, raw_hex: &str) -> Result<String> {
        let v = self.call("signrawtransactionwithwallet", json!([raw_hex]))?;
        v.get("hex")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::Rpc("signed transaction lacks hex".into()))
    }

    fn send_raw_transaction(&self, signed_hex: &str) -> Result<String> {
        let v = self.call("sendrawtransaction", json!([signed_hex]))?;
        v.as_str()
            .map(str::to_owned)
            .ok_or_else(|| Error::Rpc("sendrawtransaction did not return a txid".into()))
    }

    fn confirmations(&self, txid: &str) -> Result<u32> {
        let v = self.call("getrawtransaction", json!([txid, true]))?;
        Ok(v.get("confirmations").and_then(Value::as_u64).unwrap_or(0) as u32)
    }

    fn lock_unspent(&self, unlock: bool, utxos: &[Utxo]) -> Result<()> {
        let outs: Vec<Value> = utxos
            .iter()
            .map(|u| json!({ "txid": u.txid, "vout": u.vout }))
            .collect();
        match self.call("lockunspent", json!([unlock, outs])) {
            Ok(_) => Ok(()),
            // locking an already-locked output is idempotent for our purposes
            Err(Error::RpcResponseError(msg)) if msg.contains("already locked") => Ok(()),
            Err(e) => Err(e),
        }
    }
}
