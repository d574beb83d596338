//! Persistent UTXO index: a derived projection of the chain store mapping
//! each transaction id to its still-unspent outputs.
//!
//! Spent positions are dropped from the stored list rather than left as
//! tombstones; each surviving entry keeps its original output index so a
//! later input can still name it unambiguously.

use crate::store::ChainStore;
use crate::transaction::TxOutput;
use chain_shared::{ChainError, Hash256, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Serialize, Deserialize, Clone)]
struct IndexedOutput {
    index: u32,
    output: TxOutput,
}

pub struct UtxoIndex {
    chainstate: sled::Tree,
}

impl UtxoIndex {
    pub(crate) fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            chainstate: db.open_tree("chainstate")?,
        })
    }

    fn read_entry(&self, txid: &Hash256) -> Result<Option<Vec<IndexedOutput>>> {
        match self.chainstate.get(txid.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_entry(&self, txid: &Hash256, entries: &[IndexedOutput]) -> Result<()> {
        if entries.is_empty() {
            self.chainstate.remove(txid.as_bytes())?;
        } else {
            self.chainstate
                .insert(txid.as_bytes(), bincode::serialize(entries)?)?;
        }
        Ok(())
    }

    /// Rebuilds the entire index from scratch by walking `store` from its
    /// tip back to genesis.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the underlying tree cannot be cleared or
    /// written.
    pub fn reindex(&self, store: &ChainStore) -> Result<()> {
        self.chainstate.clear()?;

        let mut spent: HashMap<Hash256, HashSet<u32>> = HashMap::new();
        let mut outputs_by_tx: HashMap<Hash256, Vec<TxOutput>> = HashMap::new();

        for block in store.iter() {
            let block = block?;
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        let index = u32::try_from(input.prev_out_index).map_err(|_| {
                            ChainError::InvalidTransaction("negative output index".to_string())
                        })?;
                        spent.entry(input.prev_tx_id).or_default().insert(index);
                    }
                }
                outputs_by_tx.insert(tx.id, tx.outputs.clone());
            }
        }

        for (txid, outputs) in outputs_by_tx {
            let spent_indices = spent.get(&txid);
            let entries: Vec<IndexedOutput> = outputs
                .into_iter()
                .enumerate()
                .filter_map(|(i, output)| {
                    let index = i as u32;
                    let is_spent = spent_indices.is_some_and(|s| s.contains(&index));
                    (!is_spent).then_some(IndexedOutput { index, output })
                })
                .collect();
            self.write_entry(&txid, &entries)?;
        }
        Ok(())
    }

    /// Applies one newly mined/received block incrementally: drops spent
    /// output positions from their transaction's entry, then writes the
    /// block's own transactions as fully-unspent entries.
    ///
    /// # Errors
    ///
    /// Returns a storage error on read/write failure.
    pub fn update(&self, block: &crate::block::Block) -> Result<()> {
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let index = u32::try_from(input.prev_out_index).map_err(|_| {
                        ChainError::InvalidTransaction("negative output index".to_string())
                    })?;
                    if let Some(mut entries) = self.read_entry(&input.prev_tx_id)? {
                        entries.retain(|e| e.index != index);
                        self.write_entry(&input.prev_tx_id, &entries)?;
                    }
                }
            }
        }
        for tx in &block.transactions {
            let entries: Vec<IndexedOutput> = tx
                .outputs
                .iter()
                .enumerate()
                .map(|(i, output)| IndexedOutput {
                    index: i as u32,
                    output: output.clone(),
                })
                .collect();
            self.write_entry(&tx.id, &entries)?;
        }
        Ok(())
    }

    /// Scans for unspent outputs locked to `pubkey_hash`, accumulating until
    /// `amount` is reached. Returns the accumulated total and the selected
    /// `{txid -> [indices]}`.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientFunds` if the total available is less than
    /// `amount`.
    pub fn find_spendable_outputs(
        &self,
        pubkey_hash: &[u8; 20],
        amount: u64,
    ) -> Result<(u64, HashMap<Hash256, Vec<u32>>)> {
        let mut accumulated = 0u64;
        let mut selection: HashMap<Hash256, Vec<u32>> = HashMap::new();

        'scan: for item in self.chainstate.iter() {
            let (key, value) = item?;
            let txid = Hash256::try_from(key.as_ref())?;
            let entries: Vec<IndexedOutput> = bincode::deserialize(&value)?;
            for entry in entries {
                if entry.output.is_locked_with_key(pubkey_hash) {
                    accumulated += entry.output.value;
                    selection.entry(txid).or_default().push(entry.index);
                    if accumulated >= amount {
                        break 'scan;
                    }
                }
            }
        }

        if accumulated < amount {
            return Err(ChainError::InsufficientFunds);
        }
        Ok((accumulated, selection))
    }

    /// All unspent outputs locked to `pubkey_hash`.
    ///
    /// # Errors
    ///
    /// Returns a storage error on read failure.
    pub fn find_utxo(&self, pubkey_hash: &[u8; 20]) -> Result<Vec<TxOutput>> {
        let mut found = Vec::new();
        for item in self.chainstate.iter() {
            let (_, value) = item?;
            let entries: Vec<IndexedOutput> = bincode::deserialize(&value)?;
            for entry in entries {
                if entry.output.is_locked_with_key(pubkey_hash) {
                    found.push(entry.output);
                }
            }
        }
        Ok(found)
    }

    /// Sum of every unspent output locked to `pubkey_hash`.
    ///
    /// # Errors
    ///
    /// Returns a storage error on read failure.
    pub fn get_balance(&self, pubkey_hash: &[u8; 20]) -> Result<u64> {
        Ok(self.find_utxo(pubkey_hash)?.iter().map(|o| o.value).sum())
    }

    /// Number of transactions with at least one unspent output.
    ///
    /// # Errors
    ///
    /// Returns a storage error on read failure.
    pub fn count_transactions(&self) -> Result<usize> {
        Ok(self.chainstate.iter().count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChainStore;
    use chain_shared::KeyPair;
    use crate::transaction::address_from_pubkey;

    fn open_temp_store() -> (tempfile::TempDir, ChainStore, String, [u8; 20]) {
        let dir = tempfile::tempdir().unwrap();
        let keypair = KeyPair::generate().unwrap();
        let address = address_from_pubkey(keypair.public_key.as_bytes());
        let pubkey_hash = chain_shared::hash_pubkey(keypair.public_key.as_bytes());
        let store = ChainStore::create(dir.path(), &address).unwrap();
        (dir, store, address, pubkey_hash)
    }

    #[test]
    fn reindex_after_genesis_finds_subsidy() {
        let (_dir, store, _address, pubkey_hash) = open_temp_store();
        let utxo = store.utxo_index().unwrap();
        utxo.reindex(&store).unwrap();
        assert_eq!(utxo.get_balance(&pubkey_hash).unwrap(), 100);
    }

    #[test]
    fn incremental_update_matches_reindex() {
        let (_dir, store, address, pubkey_hash) = open_temp_store();
        let utxo = store.utxo_index().unwrap();
        utxo.update(&store.get_block(&store.get_tip_hash().unwrap()).unwrap())
            .unwrap();

        let reindexed = store.utxo_index().unwrap();
        reindexed.reindex(&store).unwrap();

        assert_eq!(
            utxo.get_balance(&pubkey_hash).unwrap(),
            reindexed.get_balance(&pubkey_hash).unwrap()
        );
        let _ = address;
    }

    #[test]
    fn insufficient_funds_reported() {
        let (_dir, store, _address, pubkey_hash) = open_temp_store();
        let utxo = store.utxo_index().unwrap();
        utxo.reindex(&store).unwrap();
        assert!(utxo.find_spendable_outputs(&pubkey_hash, 1_000_000).is_err());
    }
}
