//! Persistent, hash-addressed chain storage with a reserved tip pointer.

use crate::block::Block;
use crate::transaction::Transaction;
use crate::utxo::UtxoIndex;
use chain_shared::{ChainError, Hash256, Result};
use std::path::Path;

/// Reserved key under which the current tip's hash is stored; not a valid
/// block hash, so it can share the `blocks` tree without collision risk in
/// practice (a SHA-256 preimage of a single ASCII byte "l" is vanishingly
/// unlikely to occur as a block hash).
const TIP_KEY: &[u8] = b"l";

pub struct ChainStore {
    db: sled::Db,
    blocks: sled::Tree,
}

impl ChainStore {
    /// Initializes a new store, mining a genesis block that pays the fixed
    /// subsidy to `genesis_address`.
    ///
    /// # Errors
    ///
    /// Returns `StoreAlreadyExists` if a tip pointer is already present.
    pub fn create(path: impl AsRef<Path>, genesis_address: &str) -> Result<Self> {
        let db = sled::open(path)?;
        let blocks = db.open_tree("blocks")?;
        if blocks.contains_key(TIP_KEY)? {
            return Err(ChainError::StoreAlreadyExists);
        }

        let genesis = Block::genesis(genesis_address)?;
        blocks.insert(genesis.hash.as_bytes(), bincode::serialize(&genesis)?)?;
        blocks.insert(TIP_KEY, genesis.hash.as_bytes())?;
        blocks.flush()?;

        Ok(Self { db, blocks })
    }

    /// Opens an existing store.
    ///
    /// # Errors
    ///
    /// Returns `StoreMissing` if no tip pointer is present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        let blocks = db.open_tree("blocks")?;
        if !blocks.contains_key(TIP_KEY)? {
            return Err(ChainError::StoreMissing);
        }
        Ok(Self { db, blocks })
    }

    /// Opens the UTXO index sharing this store's underlying database.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the `chainstate` tree cannot be opened.
    pub fn utxo_index(&self) -> Result<UtxoIndex> {
        UtxoIndex::open(&self.db)
    }

    /// Hash of the current tip.
    ///
    /// # Errors
    ///
    /// Returns `StoreMissing` if the tip pointer is absent (should not
    /// happen on a store opened via `create`/`open`).
    pub fn get_tip_hash(&self) -> Result<Hash256> {
        let bytes = self
            .blocks
            .get(TIP_KEY)?
            .ok_or(ChainError::StoreMissing)?;
        Hash256::try_from(bytes.as_ref())
    }

    /// Height of the current tip.
    ///
    /// # Errors
    ///
    /// Propagates lookup errors from `get_tip_hash`/`get_block`.
    pub fn get_best_height(&self) -> Result<u64> {
        Ok(self.get_block(&self.get_tip_hash()?)?.height)
    }

    /// Looks up one stored block by hash.
    ///
    /// # Errors
    ///
    /// Returns `BlockNotFound` if absent.
    pub fn get_block(&self, hash: &Hash256) -> Result<Block> {
        let bytes = self
            .blocks
            .get(hash.as_bytes())?
            .ok_or_else(|| ChainError::BlockNotFound(hash.to_string()))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Mines a new block at `tip height + 1` over `txs`, verifying each
    /// first, then atomically persists it and advances the tip.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransaction` if any tx fails verification, or
    /// propagates mining/storage errors.
    pub fn mine_block(&self, txs: Vec<Transaction>) -> Result<Block> {
        for tx in &txs {
            tx.validate_basic()?;
            if !tx.verify(|txid| self.find_transaction(txid))? {
                return Err(ChainError::InvalidTransaction(format!(
                    "signature verification failed for {}",
                    tx.id
                )));
            }
        }

        let tip_hash = self.get_tip_hash()?;
        let height = self.get_block(&tip_hash)?.height + 1;
        let block = Block::mine(tip_hash, txs, height)?;

        let mut batch = sled::Batch::default();
        batch.insert(block.hash.as_bytes(), bincode::serialize(&block)?);
        batch.insert(TIP_KEY, block.hash.as_bytes());
        self.blocks.apply_batch(batch)?;
        self.blocks.flush()?;
        Ok(block)
    }

    /// Idempotently inserts a block received from a peer. Advances the tip
    /// only if `block.height` exceeds the current tip's height — this is
    /// the store's only fork-handling rule; it never reorganizes or rewinds
    /// a previously advanced tip.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        if self.blocks.contains_key(block.hash.as_bytes())? {
            return Ok(());
        }

        let mut batch = sled::Batch::default();
        batch.insert(block.hash.as_bytes(), bincode::serialize(block)?);
        let tip_height = self.get_best_height()?;
        if block.height > tip_height {
            batch.insert(TIP_KEY, block.hash.as_bytes());
        }
        self.blocks.apply_batch(batch)?;
        self.blocks.flush()?;
        Ok(())
    }

    /// Finds a transaction anywhere in the chain by id.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` if no stored block contains it.
    pub fn find_transaction(&self, txid: &Hash256) -> Result<Transaction> {
        for block in self.iter() {
            let block = block?;
            if let Some(tx) = block.transactions.into_iter().find(|tx| &tx.id == txid) {
                return Ok(tx);
            }
        }
        Err(ChainError::TransactionNotFound(txid.to_string()))
    }

    /// Hashes of every stored block, in the order a backward iteration
    /// visits them (tip first).
    ///
    /// # Errors
    ///
    /// Propagates iteration errors.
    pub fn get_block_hashes(&self) -> Result<Vec<Hash256>> {
        self.iter().map(|b| b.map(|block| block.hash)).collect()
    }

    /// A backward walk from the current tip to (and including) genesis.
    #[must_use]
    pub fn iter(&self) -> ChainIterator<'_> {
        ChainIterator {
            store: self,
            current: self.get_tip_hash().ok(),
        }
    }
}

pub struct ChainIterator<'a> {
    store: &'a ChainStore,
    current: Option<Hash256>,
}

impl<'a> Iterator for ChainIterator<'a> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;
        match self.store.get_block(&hash) {
            Ok(block) => {
                if !block.prev_block_hash.is_zero() {
                    self.current = Some(block.prev_block_hash);
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_shared::KeyPair;
    use crate::transaction::address_from_pubkey;

    fn test_address() -> String {
        let keypair = KeyPair::generate().unwrap();
        address_from_pubkey(keypair.public_key.as_bytes())
    }

    #[test]
    fn create_then_reopen_round_trips_tip() {
        let dir = tempfile::tempdir().unwrap();
        let address = test_address();
        let tip_hash = {
            let store = ChainStore::create(dir.path(), &address).unwrap();
            store.get_tip_hash().unwrap()
        };
        let reopened = ChainStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_tip_hash().unwrap(), tip_hash);
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let address = test_address();
        let _store = ChainStore::create(dir.path(), &address).unwrap();
        assert!(ChainStore::create(dir.path(), &address).is_err());
    }

    #[test]
    fn open_missing_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ChainStore::open(dir.path()).is_err());
    }

    #[test]
    fn iterate_reaches_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let address = test_address();
        let store = ChainStore::create(dir.path(), &address).unwrap();
        let blocks: Result<Vec<Block>> = store.iter().collect();
        let blocks = blocks.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].height, 0);
    }

    #[test]
    fn add_block_advances_tip_only_on_greater_height() {
        let dir = tempfile::tempdir().unwrap();
        let address = test_address();
        let store = ChainStore::create(dir.path(), &address).unwrap();
        let genesis_hash = store.get_tip_hash().unwrap();

        let coinbase = Transaction::new_coinbase(&address, "next").unwrap();
        let block = Block::mine(genesis_hash, vec![coinbase], 1).unwrap();
        store.add_block(&block).unwrap();
        assert_eq!(store.get_tip_hash().unwrap(), block.hash);

        let stale_coinbase = Transaction::new_coinbase(&address, "stale").unwrap();
        let stale_block = Block::mine(genesis_hash, vec![stale_coinbase], 1).unwrap();
        store.add_block(&stale_block).unwrap();
        assert_eq!(store.get_tip_hash().unwrap(), block.hash);
    }
}
