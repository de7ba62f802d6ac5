//! Shared test fixtures: an in-memory chain backing both sides of the
//! pipeline. `MockWallet` implements the send-side RPC seam and applies
//! broadcast transactions to the chain; `MemoryFetcher` answers read-side
//! queries from the same state, so send -> get round trips run end to end
//! with no network.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use cashweb::codec;
use cashweb::error::{Error, Result};
use cashweb::fetch::rest::data_pushes;
use cashweb::fetch::{FetchKind, Fetched, Fetcher};
use cashweb::protocol::REVISION_INPUT_VOUT;
use cashweb::send::rpc::WalletRpc;
use cashweb::send::{TxOutputs, Unspent, Utxo};

const COIN: u64 = 100_000_000;

#[derive(Debug, Clone)]
pub struct TxRecord {
    /// First data push, hex: the payload the read side consumes.
    pub payload_hex: String,
    /// All pushes, raw.
    pub pushes: Vec<Vec<u8>>,
    pub inputs: Vec<Utxo>,
}

#[derive(Default)]
pub struct ChainState {
    pub txs: HashMap<String, TxRecord>,
    /// Claim marker (`~name`) -> claiming txids in confirmation order.
    pub claims: HashMap<String, Vec<String>>,
    /// (txid, vout) consumed -> consuming txid.
    pub by_input: HashMap<(String, u32), String>,
}

pub struct MockWallet {
    state: Rc<RefCell<ChainState>>,
    pool: RefCell<Vec<Unspent>>,
    locked: RefCell<HashSet<(String, u32)>>,
    counter: RefCell<u64>,
    addr_counter: RefCell<u64>,
    pending: RefCell<Option<(Vec<Utxo>, TxOutputs)>>,
}

impl MockWallet {
    pub fn new(state: Rc<RefCell<ChainState>>, funding_utxos: usize) -> Self {
        let pool = (0..funding_utxos)
            .map(|i| Unspent {
                txid: format!("{:063x}a", i),
                vout: 0,
                amount: COIN,
            })
            .collect();
        MockWallet {
            state,
            pool: RefCell::new(pool),
            locked: RefCell::new(HashSet::new()),
            counter: RefCell::new(0),
            addr_counter: RefCell::new(0),
            pending: RefCell::new(None),
        }
    }

    fn next_txid(&self) -> String {
        let mut c = self.counter.borrow_mut();
        *c += 1;
        format!("{:064x}", *c)
    }

    /// Transactions broadcast so far.
    pub fn tx_count(&self) -> u64 {
        *self.counter.borrow()
    }
}

impl WalletRpc for MockWallet {
    fn balance(&self) -> Result<u64> {
        Ok(self.pool.borrow().iter().map(|u| u.amount).sum())
    }

    fn unconfirmed_balance(&self) -> Result<u64> {
        Ok(0)
    }

    fn list_unspent(&self, _include_unconfirmed: bool) -> Result<Vec<Unspent>> {
        let locked = self.locked.borrow();
        Ok(self
            .pool
            .borrow()
            .iter()
            .filter(|u| !locked.contains(&(u.txid.clone(), u.vout)))
            .cloned()
            .collect())
    }

    fn raw_change_address(&self) -> Result<String> {
        let mut c = self.addr_counter.borrow_mut();
        *c += 1;
        Ok(format!("qmockaddr{}", *c))
    }

    fn estimate_fee_per_byte(&self) -> Result<f64> {
        Ok(1.0)
    }

    fn create_raw_transaction(&self, inputs: &[Utxo], outputs: &TxOutputs) -> Result<String> {
        // minimal raw shape the multipush splicer understands:
        // prefix | script_len | 6a | push framing | data | suffix
        let data_bytes = outputs.data_hex.len() / 2;
        let framing = if data_bytes > 75 {
            format!("4c{data_bytes:02x}")
        } else {
            format!("{data_bytes:02x}")
        };
        let script_len = 1 + framing.len() / 2 + data_bytes;
        assert!(script_len <= 255, "mock raw tx script too long");
        let raw = format!(
            "00000000{script_len:02x}6a{framing}{}ffffffff",
            outputs.data_hex
        );
        *self.pending.borrow_mut() = Some((inputs.to_vec(), outputs.clone()));
        Ok(raw)
    }

    fn sign_raw_transaction(&self, raw_hex: &str) -> Result<String> {
        Ok(raw_hex.to_owned())
    }

    fn send_raw_transaction(&self, signed_hex: &str) -> Result<String> {
        let (inputs, outputs) = self
            .pending
            .borrow_mut()
            .take()
            .expect("send without create");

        // parse the (possibly spliced) data script back out
        let script_len =
            usize::from_str_radix(&signed_hex[8..10], 16).expect("script length byte");
        assert_eq!(&signed_hex[10..12], "6a", "data output must be OP_RETURN");
        let script_hex = &signed_hex[12..12 + (script_len - 1) * 2];
        let script = codec::hex_to_bytes(script_hex).expect("script hex");
        let pushes = data_pushes(&script).expect("push framing");
        assert!(!pushes.is_empty());

        let txid = self.next_txid();

        // spend the inputs, credit the address outputs (data is vout 0)
        let mut pool = self.pool.borrow_mut();
        for input in &inputs {
            let at = pool
                .iter()
                .position(|u| u.txid == input.txid && u.vout == input.vout)
                .expect("spend of unknown utxo");
            pool.remove(at);
        }
        for (i, (_addr, amount)) in outputs.addrs.iter().enumerate() {
            pool.push(Unspent {
                txid: txid.clone(),
                vout: i as u32 + 1,
                amount: *amount,
            });
        }
        drop(pool);

        let mut state = self.state.borrow_mut();
        if pushes.len() > 1 {
            if let Ok(marker) = String::from_utf8(pushes[1].clone()) {
                state.claims.entry(marker).or_default().push(txid.clone());
            }
        }
        for input in &inputs {
            state
                .by_input
                .insert((input.txid.clone(), input.vout), txid.clone());
        }
        state.txs.insert(
            txid.clone(),
            TxRecord {
                payload_hex: codec::bytes_to_hex(&pushes[0]),
                pushes,
                inputs,
            },
        );
        Ok(txid)
    }

    fn confirmations(&self, _txid: &str) -> Result<u32> {
        Ok(1)
    }

    fn lock_unspent(&self, unlock: bool, utxos: &[Utxo]) -> Result<()> {
        let mut locked = self.locked.borrow_mut();
        for u in utxos {
            let key = (u.txid.clone(), u.vout);
            if unlock {
                locked.remove(&key);
            } else {
                locked.insert(key);
            }
        }
        Ok(())
    }
}

/// Read-side view over the same chain.
pub struct MemoryFetcher {
    state: Rc<RefCell<ChainState>>,
}

impl MemoryFetcher {
    pub fn new(state: Rc<RefCell<ChainState>>) -> Self {
        MemoryFetcher { state }
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, ids: &[&str], kind: FetchKind) -> Result<Vec<Fetched>> {
        let state = self.state.borrow();
        ids.iter()
            .map(|id| match kind {
                FetchKind::ByTxid => {
                    let tx = state.txs.get(*id).ok_or(Error::FetchMissing)?;
                    Ok(Fetched {
                        payload_hex: tx.payload_hex.clone(),
                        txid: Some((*id).to_owned()),
                    })
                }
                FetchKind::ByInputTxid => {
                    let txid = state
                        .by_input
                        .get(&((*id).to_owned(), REVISION_INPUT_VOUT))
                        .ok_or(Error::FetchMissing)?;
                    let tx = state.txs.get(txid).ok_or(Error::FetchMissing)?;
                    Ok(Fetched {
                        payload_hex: tx.payload_hex.clone(),
                        txid: Some(txid.clone()),
                    })
                }
                FetchKind::ByName { nth } => {
                    let claims = state.claims.get(*id).ok_or(Error::FetchMissing)?;
                    let txid = claims.get(nth - 1).ok_or(Error::FetchMissing)?;
                    let tx = state.txs.get(txid).ok_or(Error::FetchMissing)?;
                    Ok(Fetched {
                        payload_hex: tx.payload_hex.clone(),
                        txid: Some(txid.clone()),
                    })
                }
            })
            .collect()
    }
}

/// One in-memory chain with both ends attached, plus a scratch data
/// directory for locks and mime tables.
pub struct TestNet {
    pub state: Rc<RefCell<ChainState>>,
    pub wallet: MockWallet,
    pub fetcher: MemoryFetcher,
    pub datadir: tempfile::TempDir,
}

impl TestNet {
    pub fn new() -> Self {
        Self::with_funding(30)
    }

    pub fn with_funding(utxos: usize) -> Self {
        let state = Rc::new(RefCell::new(ChainState::default()));
        TestNet {
            wallet: MockWallet::new(state.clone(), utxos),
            fetcher: MemoryFetcher::new(state.clone()),
            state,
            datadir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn send_params(&self) -> cashweb::SendParams {
        cashweb::SendParams::new(self.datadir.path())
    }

    pub fn get_params(&self) -> cashweb::GetParams<'_> {
        cashweb::GetParams::new(&self.fetcher)
    }
}
