//! The revision lock store.
//!
//! A JSON file under the data directory maps each owned name to the outpoint
//! whose spend authors its next revision. On every send start the stored
//! outpoints are asserted locked on the wallet so day-to-day spending cannot
//! burn revision rights. Mutation is whole-file rewrite; a single wallet per
//! data directory is assumed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::protocol::{REVISION_INPUT_VOUT, REVISION_LOCKS_FILE};
use crate::send::rpc::{retry_rpc, Utxo, WalletRpc};

/// The on-disk name -> outpoint map.
#[derive(Debug)]
pub struct LockStore {
    path: PathBuf,
    locks: BTreeMap<String, Utxo>,
}

impl LockStore {
    /// Loads the store from the data directory; a missing file is an empty
    /// store, a missing directory is an error.
    pub fn load(datadir: &Path) -> Result<Self> {
        if !datadir.is_dir() {
            return Err(Error::DataDirMissing);
        }
        let path = datadir.join(REVISION_LOCKS_FILE);
        let locks = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| Error::Sys(format!("failed reading revision locks: {e}")))?;
            serde_json::from_str(&raw).map_err(|e| {
                Error::Sys(format!(
                    "{REVISION_LOCKS_FILE} formatting is invalid ({e}); check file in data directory"
                ))
            })?
        } else {
            BTreeMap::new()
        };
        Ok(LockStore { path, locks })
    }

    /// All locked outpoints.
    pub fn utxos(&self) -> Vec<Utxo> {
        self.locks.values().cloned().collect()
    }

    /// The stored revision outpoint of `name`, if owned.
    pub fn get(&self, name: &str) -> Option<&Utxo> {
        self.locks.get(name)
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.locks)
            .map_err(|e| Error::Sys(format!("failed encoding revision locks: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| Error::Sys(format!("failed writing revision locks: {e}")))
    }

    /// Records `name -> utxo`, wallet-locks the outpoint, and persists.
    /// Locking an already-held name or outpoint is a bad call.
    pub fn set_lock(&mut self, name: &str, utxo: Utxo, wallet: &dyn WalletRpc) -> Result<()> {
        if utxo.vout != REVISION_INPUT_VOUT {
            return Err(Error::BadCall(format!(
                "revision locks bind vout {REVISION_INPUT_VOUT}, got {}",
                utxo.vout
            )));
        }
        if self.locks.contains_key(name) || self.locks.values().any(|u| *u == utxo) {
            return Err(Error::BadCall(format!(
                "name or utxo is already locked; check {REVISION_LOCKS_FILE} in data directory"
            )));
        }
        retry_rpc(|| wallet.lock_unspent(false, std::slice::from_ref(&utxo)))?;
        self.locks.insert(name.to_owned(), utxo);
        self.save()
    }

    /// Releases the lock held under `name`, returning its outpoint.
    pub fn unlock_by_name(&mut self, name: &str, wallet: &dyn WalletRpc) -> Result<Utxo> {
        let utxo = self.locks.remove(name).ok_or_else(|| {
            Error::BadCall(format!(
                "name is not stored as a revision lock; check {REVISION_LOCKS_FILE} in data directory"
            ))
        })?;
        retry_rpc(|| wallet.lock_unspent(true, std::slice::from_ref(&utxo)))?;
        self.save()?;
        Ok(utxo)
    }

    /// Releases the lock matching `utxo`, returning the name it was under.
    pub fn unlock_by_utxo(&mut self, utxo: &Utxo, wallet: &dyn WalletRpc) -> Result<String> {
        let name = self
            .locks
            .iter()
            .find(|(_, u)| *u == utxo)
            .map(|(n, _)| n.clone())
            .ok_or_else(|| {
                Error::BadCall(format!(
                    "utxo is not stored as a revision lock; check {REVISION_LOCKS_FILE} in data directory"
                ))
            })?;
        self.locks.remove(&name);
        retry_rpc(|| wallet.lock_unspent(true, std::slice::from_ref(utxo)))?;
        self.save()?;
        Ok(name)
    }

    /// Asserts every stored outpoint locked wallet-side; called on send
    /// start so other spends cannot consume revision rights.
    pub fn assert_wallet_locks(&self, wallet: &dyn WalletRpc) -> Result<()> {
        if self.locks.is_empty() {
            return Ok(());
        }
        let utxos = self.utxos();
        retry_rpc(|| wallet.lock_unspent(false, &utxos))
    }
}

/// Builds the outpoint a fresh revision of `txid` spends.
pub fn revision_utxo(txid: &str) -> Utxo {
    Utxo {
        txid: txid.to_owned(),
        vout: REVISION_INPUT_VOUT,
    }
}
