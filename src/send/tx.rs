//! Transaction assembly: fee accounting, UTXO reservation, the distribution
//! fan-out, and the retry ladder around broadcasting.
//!
//! Amount policy: greedy largest-first input selection; change below the cost
//! of one more input is folded into the fee; an estimated fee rate is fetched
//! once per send and refreshed only on a fee rejection. When the planned
//! transaction count would exceed the unconfirmed-chain limit, the first
//! transaction fans change out into enough outputs that every later
//! transaction can spend its own reservation.

use crate::codec;
use crate::error::{Error, Result};
use crate::protocol::{tx_data_bytes, PROTOCOL_VERSION, TXID_CHARS};
use crate::send::rpc::{retry_rpc, TxOutputs, Unspent, Utxo, WalletRpc};
use crate::send::ERR_WAIT_CYCLE;

pub(crate) const OP_RETURN_HEX: &str = "6a";
pub(crate) const OP_PUSHDATA1_HEX: &str = "4c";
pub(crate) const PUSHDATA1_THRESHOLD: usize = 75;

/// Network dust threshold, satoshis.
pub(crate) const DUST_SATS: u64 = 545;
/// The spendable crumb left for future revisions: dust plus one.
pub(crate) const TINY_CHANGE_SATS: u64 = DUST_SATS + 1;
/// Network policy cap on unconfirmed transaction chains.
pub(crate) const MAX_0CONF_CHAIN: usize = 25;

const TX_BASE_SZ: usize = 10;
const TX_INPUT_SZ: usize = 148;
const TX_OUTPUT_SZ: usize = 34;
const TX_DATA_BASE_SZ: usize = 10;
const TX_SZ_CAP: usize = 100_000;

/// Txid stand-in emitted by the counting modes.
pub(crate) fn synthetic_txid() -> String {
    "f".repeat(TXID_CHARS)
}

/// Bytes a payload occupies in the transaction's data region, opcode framing
/// included; `extra` reports whether a two-byte prefix was needed.
pub(crate) fn tx_data_size(hex_len: usize) -> (usize, bool) {
    let data_size = hex_len / 2;
    let added = if data_size > PUSHDATA1_THRESHOLD { 2 } else { 1 };
    (data_size + added, added > 1)
}

/// Send-scoped wallet state: reservations, counters, and the forced
/// input/output of revision sends.
pub(crate) struct TxSender<'a> {
    wallet: &'a dyn WalletRpc,
    /// Transactions this send still expects to broadcast; drives the
    /// distribution decision.
    pub txs_to_send: usize,
    /// Outputs reserved for this send, existing and newly created.
    pub reserved: Vec<Unspent>,
    /// Append the tiny-change output to the last transaction.
    pub force_tiny_change_last: bool,
    /// Force this outpoint as the last transaction's first input.
    pub force_input_last: Option<Utxo>,
    /// Send the tiny change here instead of a change address.
    pub force_output_addr_last: Option<String>,
    fee_per_byte: Option<f64>,
    /// Satoshis spent so far (fees plus folded change).
    pub cost_count: u64,
    /// Transactions accounted so far.
    pub tx_count: usize,
    /// Estimate without broadcasting; synthesise txids.
    pub just_counting: bool,
    /// Count transactions only; skip even the fee arithmetic.
    pub just_tx_counting: bool,
}

impl<'a> TxSender<'a> {
    pub(crate) fn new(wallet: &'a dyn WalletRpc) -> Self {
        TxSender {
            wallet,
            txs_to_send: 0,
            reserved: Vec::new(),
            force_tiny_change_last: false,
            force_input_last: None,
            force_output_addr_last: None,
            fee_per_byte: None,
            cost_count: 0,
            tx_count: 0,
            just_counting: false,
            just_tx_counting: false,
        }
    }

    fn check_balance(&self) -> Result<u64> {
        let wallet = self.wallet;
        let confirmed = retry_rpc(|| wallet.balance())?;
        let unconfirmed = retry_rpc(|| wallet.unconfirmed_balance())?;
        Ok(confirmed + unconfirmed)
    }

    /// Broadcasts one data transaction, riding out wallet weather per the
    /// retry policy. `hex_datas` holds one payload per push; multiple pushes
    /// share the single data output.
    pub(crate) fn send_tx(&mut self, hex_datas: &[&str], is_last: bool) -> Result<String> {
        self.tx_count += 1;
        if self.just_tx_counting {
            return Ok(synthetic_txid());
        }

        let mut printed = false;
        let mut conflict_rounds = 0;
        loop {
            let mut status = self.send_tx_attempt(hex_datas, is_last, true, true);
            loop {
                match status {
                    Ok(txid) => return Ok(txid),

                    Err(Error::InsufficientFunds) => {
                        // block until the balance strictly increases
                        let balance = self.check_balance()?;
                        if !printed {
                            log::info!("Insufficient balance, send more funds...");
                            printed = true;
                        }
                        loop {
                            std::thread::sleep(ERR_WAIT_CYCLE);
                            if self.check_balance()? > balance {
                                break;
                            }
                        }
                        break; // retry from the top
                    }

                    Err(Error::MempoolChain) => {
                        status = self.send_tx_attempt(hex_datas, is_last, false, true);
                        if matches!(status, Err(Error::MempoolChain)) {
                            if !printed {
                                log::info!("Waiting on confirmations...");
                                printed = true;
                            }
                            std::thread::sleep(ERR_WAIT_CYCLE);
                        }
                    }

                    Err(Error::FeeTooLow) => {
                        status = self.send_tx_attempt(hex_datas, is_last, true, false);
                        if matches!(status, Err(Error::FeeTooLow)) && !printed {
                            log::info!("Fee problem, attempting to resolve...");
                            printed = true;
                        }
                    }

                    Err(Error::InputsConflict) => {
                        if is_last && self.force_input_last.is_some() {
                            return Err(Error::InputsConflict);
                        }
                        status = self.send_tx_attempt(hex_datas, is_last, true, true);
                        if matches!(status, Err(Error::InputsConflict)) {
                            if !printed {
                                log::info!("Bad UTXOs, attempting to resolve...");
                                printed = true;
                            }
                            conflict_rounds += 1;
                            if self.reserved.is_empty() && conflict_rounds >= 2 {
                                return Err(Error::InputsConflict);
                            }
                        }
                    }

                    Err(Error::RpcResponseError(msg)) => {
                        log::error!("RPC response error: {msg}");
                        return Err(Error::RpcResponseError(msg));
                    }

                    Err(e) => return Err(e),
                }
            }
        }
    }

    fn send_tx_attempt(
        &mut self,
        hex_datas: &[&str],
        is_last: bool,
        use_unconfirmed: bool,
        same_fee: bool,
    ) -> Result<String> {
        let wallet = self.wallet;

        // estimated once per send; refreshed on a fee rejection
        if self.fee_per_byte.is_none() || !same_fee {
            self.fee_per_byte = Some(retry_rpc(|| wallet.estimate_fee_per_byte())?);
        }
        let rate = self.fee_per_byte.unwrap_or_default();
        let fee_for = |size: usize| (rate * size as f64).ceil() as u64;

        let use_reserved = !self.reserved.is_empty() && self.reserved.len() >= self.txs_to_send;
        let mut pool: Vec<Unspent> = if use_reserved {
            self.reserved.clone()
        } else {
            let fresh = retry_rpc(|| wallet.list_unspent(use_unconfirmed))?;
            if fresh.is_empty() && !self.just_counting {
                return Err(if use_unconfirmed {
                    Error::InsufficientFunds
                } else {
                    Error::MempoolChain
                });
            }
            fresh
        };
        pool.sort_by_key(|u| u.amount);

        // data sizing, and the self-framed blob when there are several pushes
        let mut tx_data_sz = 0usize;
        let mut blob = String::new();
        for hex_data in hex_datas {
            let (sz, extra) = tx_data_size(hex_data.len());
            tx_data_sz += sz;
            if hex_datas.len() > 1 {
                let data_sz = hex_data.len() / 2;
                if data_sz > 255 {
                    return Err(Error::Sys(
                        "pushdata over 255 bytes is not representable".into(),
                    ));
                }
                if extra {
                    blob.push_str(OP_PUSHDATA1_HEX);
                }
                blob.push_str(&codec::bytes_to_hex(&[data_sz as u8]));
                blob.push_str(hex_data);
            }
        }

        // fan change out ahead of a long send so later single-input
        // transactions stay inside the unconfirmed-chain limit
        let mut distributed = false;
        let mut reuse_out_count = 0usize;
        let mut reuse_amnt = 0u64;
        if !use_reserved && self.txs_to_send > pool.len() && self.txs_to_send >= MAX_0CONF_CHAIN {
            if use_unconfirmed && same_fee && !self.just_counting {
                log::info!("Distributing UTXOs...");
            }
            distributed = true;
            reuse_out_count = (self.txs_to_send - 1) - pool.len().saturating_sub(1);
            let reuse_tx_sz =
                TX_BASE_SZ + TX_INPUT_SZ + TX_OUTPUT_SZ + TX_DATA_BASE_SZ + tx_data_bytes(PROTOCOL_VERSION) + 2;
            reuse_amnt = fee_for(reuse_tx_sz) + TINY_CHANGE_SATS;
        }

        let tiny_change = is_last && self.force_tiny_change_last;
        let mut extra_change =
            reuse_amnt * reuse_out_count as u64 + if tiny_change { TINY_CHANGE_SATS } else { 0 };
        let change_out_count = 1 + reuse_out_count + tiny_change as usize;
        let mut size = TX_BASE_SZ + TX_OUTPUT_SZ * change_out_count + TX_DATA_BASE_SZ + tx_data_sz;

        let mut used: Vec<usize> = Vec::new();
        let mut total = 0u64;
        let mut fee = 1u64;
        let mut change = 0u64;
        let mut change_lost = 0u64;

        let forced = if is_last {
            self.force_input_last.clone()
        } else {
            None
        };
        if let Some(f) = &forced {
            let idx = pool
                .iter()
                .position(|u| u.txid == f.txid && u.vout == f.vout)
                .ok_or(Error::InputsConflict)?;
            used.push(idx);
            total += pool[idx].amount;
            size += TX_INPUT_SZ;
            fee = fee_for(size);
            change = total.saturating_sub(extra_change + fee);
            if change < fee_for(TX_INPUT_SZ) {
                fee = fee_for(size - TX_OUTPUT_SZ);
                change_lost = change;
                change = 0;
            }
        }

        // greedy largest-first accumulation
        for i in (0..pool.len()).rev() {
            if total >= extra_change + fee && (change > DUST_SATS || change == 0) && !used.is_empty()
            {
                break;
            }
            if used.contains(&i) {
                continue;
            }
            if let Some(f) = &self.force_input_last {
                // held back for the final transaction
                if pool[i].txid == f.txid && pool[i].vout == f.vout {
                    continue;
                }
            }
            used.push(i);
            total += pool[i].amount;
            size += TX_INPUT_SZ;
            fee = fee_for(size);
            change = total.saturating_sub(extra_change + fee);
            if change < fee_for(TX_INPUT_SZ) {
                // not worth a change output; fold it into the fee
                fee = fee_for(size - TX_OUTPUT_SZ);
                change_lost = change;
                change = 0;
            }
        }

        if total < fee + extra_change {
            if !self.just_counting {
                return Err(if use_unconfirmed {
                    Error::InsufficientFunds
                } else {
                    Error::MempoolChain
                });
            }
            // when counting, assume one hypothetical extra input covers it
            size += TX_INPUT_SZ;
            fee = fee_for(size);
            change_lost = 0;
        }

        if distributed {
            // inputs consumed now shrink the pool left for later
            // transactions; grow the fan-out (and pull more inputs) to match
            loop {
                let needed = (self.txs_to_send - 1).saturating_sub(pool.len() - used.len());
                if reuse_out_count >= needed {
                    break;
                }
                reuse_out_count += 1;
                extra_change += reuse_amnt;
                size += TX_OUTPUT_SZ;
                fee = fee_for(size);
                for i in (0..pool.len()).rev() {
                    if total >= extra_change + fee {
                        break;
                    }
                    if used.contains(&i) {
                        continue;
                    }
                    if let Some(f) = &self.force_input_last {
                        if pool[i].txid == f.txid && pool[i].vout == f.vout {
                            continue;
                        }
                    }
                    used.push(i);
                    total += pool[i].amount;
                    size += TX_INPUT_SZ;
                    fee = fee_for(size);
                }
                change = total.saturating_sub(extra_change + fee);
                if change < fee_for(TX_INPUT_SZ) {
                    fee = fee_for(size - TX_OUTPUT_SZ);
                    change_lost = change;
                    change = 0;
                }
            }

            // back off the fan-out while the transaction busts the size cap,
            // dropping inputs the smaller shape no longer needs
            while size >= TX_SZ_CAP && reuse_out_count > 0 {
                reuse_out_count -= 1;
                extra_change -= reuse_amnt;
                size -= TX_OUTPUT_SZ;
                fee = fee_for(size);
                let mut k = 0;
                while k < used.len() {
                    let idx = used[k];
                    let is_forced = forced
                        .as_ref()
                        .is_some_and(|f| pool[idx].txid == f.txid && pool[idx].vout == f.vout);
                    if !is_forced && total - pool[idx].amount >= extra_change + fee {
                        total -= pool[idx].amount;
                        size -= TX_INPUT_SZ;
                        fee = fee_for(size);
                        used.remove(k);
                    } else {
                        k += 1;
                    }
                }
                change = total.saturating_sub(extra_change + fee);
                if change < fee_for(TX_INPUT_SZ) {
                    fee = fee_for(size - TX_OUTPUT_SZ);
                    change_lost = change;
                    change = 0;
                }
            }
        }

        // fresh or reused, this pool is now the send's reservation
        self.reserved = pool.clone();

        if self.just_counting {
            if change <= DUST_SATS && change_lost == 0 {
                change_lost = change;
            }
            self.cost_count += fee + change_lost;
            let txid = synthetic_txid();
            self.commit_used(&mut pool, &mut used);
            self.reserved = pool;
            self.after_success(&txid, reuse_out_count, reuse_amnt, tiny_change);
            return Ok(txid);
        }

        // outputs: data at vout 0, tiny change at vout 1 (the revision
        // spend), then the fan-out outputs, then ordinary change
        let mut outputs = TxOutputs {
            data_hex: if hex_datas.len() > 1 {
                blob.clone()
            } else {
                hex_datas[0].to_owned()
            },
            addrs: Vec::new(),
        };
        if tiny_change {
            let tiny_addr = match &self.force_output_addr_last {
                Some(addr) => addr.clone(),
                None => retry_rpc(|| wallet.raw_change_address())?,
            };
            outputs.addrs.push((tiny_addr, TINY_CHANGE_SATS));
        }
        for _ in 0..reuse_out_count {
            let addr = retry_rpc(|| wallet.raw_change_address())?;
            outputs.addrs.push((addr, reuse_amnt));
        }
        if change > DUST_SATS {
            let addr = retry_rpc(|| wallet.raw_change_address())?;
            outputs.addrs.push((addr, change));
        } else if change_lost == 0 {
            change_lost = change;
        }

        let input_utxos: Vec<Utxo> = used
            .iter()
            .map(|&i| Utxo {
                txid: pool[i].txid.clone(),
                vout: pool[i].vout,
            })
            .collect();
        let mut raw = retry_rpc(|| wallet.create_raw_transaction(&input_utxos, &outputs))?;
        if hex_datas.len() > 1 {
            raw = splice_multipush(&raw, &blob, tx_data_sz)?;
        }
        let signed = match retry_rpc(|| wallet.sign_raw_transaction(&raw)) {
            Err(Error::RpcResponseError(msg)) => {
                log::error!("error signing raw transaction ({msg}); raw tx:\n{raw}");
                return Err(Error::RpcResponseError(msg));
            }
            other => other?,
        };

        match retry_rpc(|| wallet.send_raw_transaction(&signed)) {
            Ok(txid) => {
                self.cost_count += fee + change_lost;
                log::debug!("sent {txid} (fee {fee} sats)");
                self.commit_used(&mut pool, &mut used);
                self.reserved = pool;
                self.after_success(&txid, reuse_out_count, reuse_amnt, tiny_change);

                if distributed
                    && self.reserved.len() >= self.txs_to_send
                    && self.txs_to_send >= MAX_0CONF_CHAIN
                {
                    log::info!("Waiting on 1-conf...");
                    while retry_rpc(|| wallet.confirmations(&txid))? < 1 {
                        std::thread::sleep(ERR_WAIT_CYCLE);
                    }
                }
                Ok(txid)
            }
            Err(Error::RpcResponseError(msg)) => {
                let mapped = map_send_error(&msg);
                if matches!(mapped, Error::InputsConflict) {
                    // conflicting outputs are no good to anyone; drop them
                    self.commit_used(&mut pool, &mut used);
                    self.reserved = pool;
                }
                Err(mapped)
            }
            Err(e) => Err(e),
        }
    }

    /// Removes consumed outputs from the pool.
    fn commit_used(&mut self, pool: &mut Vec<Unspent>, used: &mut Vec<usize>) {
        used.sort_unstable_by(|a, b| b.cmp(a));
        for &i in used.iter() {
            pool.remove(i);
        }
    }

    /// Books a broadcast transaction: one fewer to send, and its fan-out
    /// outputs join the reservation.
    fn after_success(&mut self, txid: &str, reuse_out_count: usize, reuse_amnt: u64, tiny: bool) {
        self.txs_to_send = self.txs_to_send.saturating_sub(1);
        let vout_base = 1 + tiny as u32;
        for i in 0..reuse_out_count {
            self.reserved.push(Unspent {
                txid: txid.to_owned(),
                vout: vout_base + i as u32,
                amount: reuse_amnt,
            });
        }
    }
}

/// Maps a node's broadcast rejection message onto the retry taxonomy.
fn map_send_error(msg: &str) -> Error {
    if msg.contains("too-long-mempool-chain") {
        Error::MempoolChain
    } else if msg.contains("insufficient priority") {
        Error::FeeTooLow
    } else if msg.contains("txn-mempool-conflict") || msg.contains("Missing inputs") {
        Error::InputsConflict
    } else {
        log::error!("unhandled RPC error on sendrawtransaction: {msg}");
        Error::RpcResponseError(msg.to_owned())
    }
}

/// Rewrites a node-built raw transaction so its single data push becomes the
/// given self-framed multi-push region: fixes the output script length and
/// drops the node's own framing in front of the blob.
pub(crate) fn splice_multipush(raw_hex: &str, blob_hex: &str, tx_data_sz: usize) -> Result<String> {
    let script_len = tx_data_sz + 1; // plus the OP_RETURN byte
    if script_len > 255 {
        return Err(Error::Sys(
            "collective pushdatas too big for a one-byte script length".into(),
        ));
    }

    let blob_at = raw_hex
        .find(blob_hex)
        .ok_or_else(|| Error::Sys("attached data not found in raw transaction".into()))?;

    // walk back two chars at a time to the OP_RETURN marker
    let mut op_at = blob_at;
    loop {
        op_at = op_at
            .checked_sub(2)
            .ok_or_else(|| Error::Sys("OP_RETURN not found in raw transaction".into()))?;
        if &raw_hex[op_at..op_at + 2] == OP_RETURN_HEX {
            break;
        }
    }
    let len_at = op_at
        .checked_sub(2)
        .ok_or_else(|| Error::Sys("raw transaction truncated before OP_RETURN".into()))?;

    let mut out = String::with_capacity(raw_hex.len());
    out.push_str(&raw_hex[..len_at]);
    out.push_str(&codec::bytes_to_hex(&[script_len as u8]));
    out.push_str(OP_RETURN_HEX);
    // skip the node's own push framing; the blob frames itself
    out.push_str(&raw_hex[blob_at..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_size_accounts_for_framing() {
        assert_eq!(tx_data_size(10), (6, false)); // 5 bytes + 1 opcode
        assert_eq!(tx_data_size(150), (76, false)); // 75 bytes, threshold
        assert_eq!(tx_data_size(152), (78, true)); // 76 bytes, pushdata1
    }

    #[test]
    fn multipush_splice_rewrites_framing() {
        // two pushes: 02 aabb, 03 ccddee -> blob
        let blob = "02aabb03ccddee";
        let tx_data_sz = 3 + 4; // framed sizes
        // node tx: ...len(09) 6a push(07) blob...
        let raw = format!("00000000000000{:02x}6a07{blob}00000000", tx_data_sz + 2);
        let spliced = splice_multipush(&raw, blob, tx_data_sz).unwrap();
        assert_eq!(
            spliced,
            format!("00000000000000{:02x}6a{blob}00000000", tx_data_sz + 1)
        );
    }

    #[test]
    fn splice_fails_without_blob() {
        assert!(splice_multipush("00006a0511", "ffff", 3).is_err());
    }
}
