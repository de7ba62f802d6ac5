//! End-to-end file encode/decode: everything sent through the mock wallet
//! must read back byte-identical through the mock fetcher.

mod common;

use common::TestNet;

use cashweb::error::{Error, Result};
use cashweb::protocol::{self, Metadata, TYPE_FILE};
use cashweb::send::rpc::{TxOutputs, Unspent, Utxo, WalletRpc};
use cashweb::{file_info, get_by_id, get_by_txid, send_from_recovery_stream, send_from_stream, SendIo};

fn send_bytes(net: &TestNet, data: &[u8], max_depth: Option<u32>) -> String {
    let mut params = net.send_params();
    params.max_tree_depth = max_depth;
    let report = send_from_stream(
        &mut std::io::Cursor::new(data),
        &params,
        &net.wallet,
        &mut SendIo::default(),
    )
    .expect("send");
    report.txid
}

fn read_back(net: &TestNet, id: &str) -> Vec<u8> {
    let mut out = Vec::new();
    get_by_id(id, &net.get_params(), &mut out).expect("get");
    out
}

fn root_payload(net: &TestNet, txid: &str) -> String {
    net.state.borrow().txs[txid].payload_hex.clone()
}

#[test]
fn single_chunk_file_layout_and_content() {
    let net = TestNet::new();
    let txid = send_bytes(&net, b"hello", None);

    // payload is the bytes followed by an all-zero trailer
    let payload = root_payload(&net, &txid);
    assert_eq!(payload, "68656c6c6f000000000000000000000000");
    assert_eq!(payload.len(), 10 + protocol::METADATA_CHARS);

    let md = Metadata::from_payload_hex(&payload).unwrap();
    assert_eq!((md.length, md.depth, md.cw_type, md.protocol), (0, 0, 0, 0));

    assert_eq!(read_back(&net, &txid), b"hello");
}

#[test]
fn two_chunk_chain_splits_at_capacity() {
    let net = TestNet::new();
    let data = vec![0x41u8; 300];
    let txid = send_bytes(&net, &data, Some(0));

    let payload = root_payload(&net, &txid);
    let md = Metadata::from_payload_hex(&payload).unwrap();
    assert_eq!((md.length, md.depth), (1, 0));
    // identifier payload: 80 data bytes + next txid + trailer
    assert_eq!(payload.len(), (80 + 32 + 12) * 2);

    assert_eq!(read_back(&net, &txid), data);
    assert_eq!(net.wallet.tx_count(), 2);
}

#[test]
fn depth_one_tree_has_five_leaves_and_a_root() {
    let net = TestNet::new();
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let txid = send_bytes(&net, &data, None);

    let payload = root_payload(&net, &txid);
    let md = Metadata::from_payload_hex(&payload).unwrap();
    assert_eq!((md.length, md.depth), (0, 1));
    // five concatenated txids plus the trailer
    assert_eq!(payload.len(), 5 * protocol::TXID_CHARS + protocol::METADATA_CHARS);

    assert_eq!(read_back(&net, &txid), data);
    assert_eq!(net.wallet.tx_count(), 6);
}

#[test]
fn boundary_exactly_fits_with_trailer() {
    let net = TestNet::new();
    let size = protocol::tx_data_bytes(protocol::PROTOCOL_VERSION) - protocol::METADATA_BYTES;
    let data = vec![0x42u8; size];
    let txid = send_bytes(&net, &data, Some(0));

    let md = Metadata::from_payload_hex(&root_payload(&net, &txid)).unwrap();
    assert_eq!((md.length, md.depth), (0, 0));
    assert_eq!(net.wallet.tx_count(), 1);
    assert_eq!(read_back(&net, &txid), data);
}

#[test]
fn boundary_one_byte_over_becomes_two_transactions() {
    let net = TestNet::new();
    let size = protocol::tx_data_bytes(protocol::PROTOCOL_VERSION) - protocol::METADATA_BYTES + 1;
    let data = vec![0x43u8; size];
    let txid = send_bytes(&net, &data, Some(0));

    let md = Metadata::from_payload_hex(&root_payload(&net, &txid)).unwrap();
    assert_eq!((md.length, md.depth), (1, 0));
    assert_eq!(net.wallet.tx_count(), 2);
    assert_eq!(read_back(&net, &txid), data);
}

#[test]
fn exact_capacity_multiple_never_sends_an_empty_payload() {
    let net = TestNet::new();
    let cap = protocol::tx_data_bytes(protocol::PROTOCOL_VERSION);
    let data = vec![0x44u8; cap * 2];
    let txid = send_bytes(&net, &data, Some(0));

    // the tail rides as a link-only identifier payload, never as empty data
    for (_, tx) in net.state.borrow().txs.iter() {
        assert!(!tx.payload_hex.is_empty());
    }
    assert_eq!(read_back(&net, &txid), data);
}

#[test]
fn empty_file_round_trips_as_metadata_only() {
    let net = TestNet::new();
    let txid = send_bytes(&net, b"", None);
    let payload = root_payload(&net, &txid);
    assert_eq!(payload.len(), protocol::METADATA_CHARS);
    assert_eq!(read_back(&net, &txid), b"");
}

#[test]
fn chained_trees_stitch_partial_txids_across_elements() {
    let net = TestNet::new();
    let data: Vec<u8> = (0..3000u32).map(|i| (i % 199) as u8).collect();
    let txid = send_bytes(&net, &data, Some(1));

    let md = Metadata::from_payload_hex(&root_payload(&net, &txid)).unwrap();
    assert_eq!(md.depth, 1);
    assert!(md.length >= 1, "a depth-limited send this big must chain");
    assert_eq!(read_back(&net, &txid), data);
}

#[test]
fn deep_tree_with_larger_input() {
    let net = TestNet::new();
    let data: Vec<u8> = (0..40_000u32).map(|i| (i % 241) as u8).collect();
    let txid = send_bytes(&net, &data, None);
    assert_eq!(read_back(&net, &txid), data);
}

#[test]
fn utxo_distribution_covers_long_sends_from_small_pools() {
    let net = TestNet::with_funding(2);
    let data: Vec<u8> = (0..6000u32).map(|i| (i % 239) as u8).collect();
    let txid = send_bytes(&net, &data, None);
    assert_eq!(read_back(&net, &txid), data);
}

#[test]
fn file_info_reports_metadata_without_download() {
    let net = TestNet::new();
    let txid = send_bytes(&net, &vec![0x45u8; 300], Some(0));
    let info = file_info(&txid, &net.get_params()).unwrap();
    assert_eq!(info.metadata.length, 1);
    assert_eq!(info.metadata.cw_type, TYPE_FILE);
    assert_eq!(info.mimetype, "");
}

#[test]
fn reading_a_nonexistent_txid_is_fetch_missing() {
    let net = TestNet::new();
    let mut out = Vec::new();
    let absent = "9".repeat(64);
    assert!(matches!(
        get_by_txid(&absent, &net.get_params(), &mut out),
        Err(Error::FetchMissing)
    ));
}

#[test]
fn estimate_counts_without_touching_the_chain() {
    let net = TestNet::new();
    let data = vec![0x46u8; 1000];
    let (tx_count, cost) = cashweb::estimate_from_stream(
        &mut std::io::Cursor::new(&data),
        &net.send_params(),
        &net.wallet,
    )
    .unwrap();
    assert_eq!(tx_count, 6);
    assert!(cost > 0);
    assert!(net.state.borrow().txs.is_empty(), "estimate must not broadcast");
}

/// Wallet that starts rejecting broadcasts after a set number of
/// transactions, for exercising the recovery checkpoint.
struct FlakyWallet<'a> {
    inner: &'a common::MockWallet,
    allow: std::cell::Cell<u32>,
}

impl WalletRpc for FlakyWallet<'_> {
    fn balance(&self) -> Result<u64> {
        self.inner.balance()
    }
    fn unconfirmed_balance(&self) -> Result<u64> {
        self.inner.unconfirmed_balance()
    }
    fn list_unspent(&self, include_unconfirmed: bool) -> Result<Vec<Unspent>> {
        self.inner.list_unspent(include_unconfirmed)
    }
    fn raw_change_address(&self) -> Result<String> {
        self.inner.raw_change_address()
    }
    fn estimate_fee_per_byte(&self) -> Result<f64> {
        self.inner.estimate_fee_per_byte()
    }
    fn create_raw_transaction(&self, inputs: &[Utxo], outputs: &TxOutputs) -> Result<String> {
        self.inner.create_raw_transaction(inputs, outputs)
    }
    fn sign_raw_transaction(&self, raw_hex: &str) -> Result<String> {
        self.inner.sign_raw_transaction(raw_hex)
    }
    fn send_raw_transaction(&self, signed_hex: &str) -> Result<String> {
        if self.allow.get() == 0 {
            return Err(Error::RpcResponseError("wallet on fire".into()));
        }
        self.allow.set(self.allow.get() - 1);
        self.inner.send_raw_transaction(signed_hex)
    }
    fn confirmations(&self, txid: &str) -> Result<u32> {
        self.inner.confirmations(txid)
    }
    fn lock_unspent(&self, unlock: bool, utxos: &[Utxo]) -> Result<()> {
        self.inner.lock_unspent(unlock, utxos)
    }
}

#[test]
fn interrupted_send_recovers_from_checkpoint() {
    let net = TestNet::new();
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let params = net.send_params();

    // let the five leaves through, fail on the depth-1 root
    let flaky = FlakyWallet {
        inner: &net.wallet,
        allow: std::cell::Cell::new(5),
    };
    let mut checkpoint = Vec::new();
    let mut io = SendIo {
        recovery: Some(&mut checkpoint),
        save_dir: None,
    };
    let err = send_from_stream(&mut std::io::Cursor::new(&data), &params, &flaky, &mut io)
        .expect_err("send must fail");
    assert!(matches!(err, Error::RpcResponseError(_)));
    assert!(!checkpoint.is_empty(), "failure above leaf level checkpoints");

    // resume against the healthy wallet and verify the whole file
    let report = send_from_recovery_stream(
        &mut std::io::Cursor::new(&checkpoint),
        &params,
        &net.wallet,
        &mut SendIo::default(),
    )
    .expect("resume");
    assert_eq!(read_back(&net, &report.txid), data);
}
