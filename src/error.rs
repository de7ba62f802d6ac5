//! Unified status codes across the fetch, send, and script paths.
//!
//! Every fallible operation in the crate returns [`Error`]. The variants fall
//! into three severity groups (structural, resolution, transient); the send
//! pipeline retries transient variants, readers surface them.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The configured data directory is missing or malformed.
    #[error("unable to find a proper cashweb data directory")]
    DataDirMissing,

    /// A caller supplied an argument the protocol cannot represent
    /// (bad identifier, oversized name, invalid JSON index, ...).
    #[error("bad call to cashweb function: {0}")]
    BadCall(String),

    /// Unexpected internal failure (I/O on temporaries, formatting, ...).
    #[error("unexpected system error: {0}")]
    Sys(String),

    /// A queried transaction, claim, or revision does not exist.
    #[error("requested file doesn't exist, check identifier")]
    FetchMissing,

    /// The fetch backend failed or returned something unparsable.
    #[error("unexpected error in querying the blockchain: {0}")]
    FetchError(String),

    /// The output sink rejected a write.
    #[error("unexpected error in writing the file")]
    Write(#[source] std::io::Error),

    /// Encoded content violates the codec (bad hex, stray partial txid, ...).
    #[error("file is encoded incorrectly: invalid structuring")]
    FileStructure,

    /// A chain link was missing although `length` promised more elements.
    #[error("file is encoded incorrectly: inaccurate chain length")]
    FileLength,

    /// A tree child was missing although `depth` promised more levels.
    #[error("file is encoded incorrectly: inaccurate tree depth")]
    FileDepth,

    /// The payload is too short to carry the metadata trailer.
    #[error("file metadata is invalid or nonexistent, check identifier")]
    MetadataMissing,

    /// A nametag (or directory) referenced itself, directly or indirectly.
    #[error("file contains a circular reference (invalid scripting or directory structure)")]
    CircularRef,

    /// The requested path is not present in the directory index.
    #[error("requested file doesn't exist in specified directory")]
    InDirMissing,

    /// The requested file is not a valid directory index.
    #[error("requested file is not a valid directory index, or contains invalid reference for requested path")]
    NotADir,

    /// A nametag script is malformed or references nothing.
    #[error("nametag script is invalid or lacks a file reference")]
    ScriptStructure,

    /// `NEXTREV` was issued at the highest requested/available revision.
    /// Internal control signal; consumed by the script engine.
    #[error("nametag script has no further revision")]
    ScriptRevExhausted,

    /// A bad script had no later revision to fall back on.
    #[error("nametag script is invalid in every available revision")]
    ScriptRetryExhausted,

    /// `TERM` was executed. Internal control signal; consumed by the script
    /// engine and converted to success at the invocation boundary.
    #[error("nametag script terminated")]
    ScriptTerminated,

    /// The wallet reported conflicting or missing inputs.
    #[error("invalid UTXOs in wallet causing mempool conflict")]
    InputsConflict,

    /// The unconfirmed transaction chain hit the network policy limit.
    #[error("mempool chain too long, awaiting confirmations")]
    MempoolChain,

    /// The node rejected the fee rate.
    #[error("transaction fee too low")]
    FeeTooLow,

    /// The wallet balance cannot cover the transaction.
    #[error("insufficient funds in wallet")]
    InsufficientFunds,

    /// JSON-RPC transport failure (node unreachable, malformed response).
    #[error("failed to communicate with node via RPC: {0}")]
    Rpc(String),

    /// The node answered with a JSON-RPC error object.
    #[error("unexpected RPC response error: {0}")]
    RpcResponseError(String),
}

impl Error {
    /// Structural failures: the encoded content violates the codec.
    /// Never retryable.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::FileStructure
                | Error::FileLength
                | Error::FileDepth
                | Error::MetadataMissing
                | Error::NotADir
                | Error::ScriptStructure
        )
    }

    /// Resolution failures: the request names something that does not (yet)
    /// exist or is finite. Caller-reportable as "not found".
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Error::FetchMissing
                | Error::InDirMissing
                | Error::ScriptRevExhausted
                | Error::ScriptRetryExhausted
                | Error::CircularRef
                | Error::ScriptTerminated
        )
    }

    /// Transient failures: I/O or wallet conditions worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::FetchError(_)
                | Error::Rpc(_)
                | Error::InputsConflict
                | Error::MempoolChain
                | Error::FeeTooLow
                | Error::InsufficientFunds
                | Error::Write(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_groups_are_disjoint() {
        let samples = [
            Error::FileStructure,
            Error::FileLength,
            Error::FileDepth,
            Error::MetadataMissing,
            Error::NotADir,
            Error::ScriptStructure,
            Error::FetchMissing,
            Error::InDirMissing,
            Error::ScriptRevExhausted,
            Error::ScriptRetryExhausted,
            Error::CircularRef,
            Error::ScriptTerminated,
            Error::FetchError(String::new()),
            Error::Rpc(String::new()),
            Error::InputsConflict,
            Error::MempoolChain,
            Error::FeeTooLow,
            Error::InsufficientFunds,
        ];
        for e in &samples {
            let groups =
                e.is_structural() as u8 + e.is_resolution() as u8 + e.is_transient() as u8;
            assert_eq!(groups, 1, "{e:?} must belong to exactly one group");
        }
    }
}
