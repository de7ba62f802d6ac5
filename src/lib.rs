//! Content-addressed file storage on a UTXO blockchain.
//!
//! A file is split into fixed-size chunks embedded in the data outputs of a
//! linked sequence of transactions, each possibly the root of a fan-out tree;
//! the identifier transaction's payload ends with a 12-byte metadata trailer.
//! On top of the raw codec sit directory indices (path -> identifier tables)
//! and *nametags*: human-readable names bound to a small byte-code script
//! that resolves, and may revise, to an identifier.
//!
//! The read path ([`get_by_id`] and friends) turns an identifier into bytes
//! through a [`fetch::Fetcher`] backend; the write path ([`send_from_stream`]
//! and friends) turns bytes into broadcast transactions through a
//! [`send::rpc::WalletRpc`] wallet. Both cores are synchronous and
//! single-threaded; adapters may parallelise underneath but present ordered
//! results.

pub mod codec;
pub mod dirindex;
pub mod error;
pub mod fetch;
pub mod get;
pub mod identifier;
pub mod mime;
pub mod protocol;
pub mod recovery;
pub mod send;

pub use error::{Error, Result};
pub use get::{file_info, get_by_id, get_by_name, get_by_txid, nametag_info};
pub use get::{FileInfo, GetParams, NametagInfo};
pub use identifier::Identifier;
pub use protocol::Metadata;
pub use send::{
    estimate_from_path, estimate_from_recovery_stream, estimate_from_stream, send_from_path,
    send_from_recovery_stream, send_from_stream, send_nametag, send_revision, SendIo, SendParams,
    SendReport,
};
