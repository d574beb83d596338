//! Block model: header fields plus an ordered transaction list, bound
//! together by a merkle root and a proof-of-work nonce.

use crate::pow::ProofOfWork;
use crate::transaction::Transaction;
use chain_shared::{ChainError, Hash256, Result};
use serde::{Deserialize, Serialize};

/// Text embedded in the genesis coinbase, matching the donor chain this
/// design descends from.
const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub prev_block_hash: Hash256,
    pub hash: Hash256,
    pub nonce: i64,
    pub height: u64,
}

impl Block {
    /// Merkle root over transaction ids, SHA-256, duplicating the last leaf
    /// at odd levels.
    #[must_use]
    pub fn merkle_root(&self) -> Hash256 {
        if self.transactions.is_empty() {
            return Hash256::zero();
        }
        let mut level: Vec<Hash256> = self.transactions.iter().map(|tx| tx.id).collect();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                let mut data = Vec::with_capacity(64);
                data.extend_from_slice(pair[0].as_bytes());
                if pair.len() == 2 {
                    data.extend_from_slice(pair[1].as_bytes());
                } else {
                    data.extend_from_slice(pair[0].as_bytes());
                }
                next.push(Hash256::sha256(&data));
            }
            level = next;
        }
        level[0]
    }

    /// Builds and mines a new block at `height` on top of `prev_block_hash`.
    ///
    /// # Errors
    ///
    /// Returns an error if mining exhausts the nonce bound.
    pub fn mine(prev_block_hash: Hash256, transactions: Vec<Transaction>, height: u64) -> Result<Self> {
        let mut block = Self {
            timestamp: now_unix(),
            transactions,
            prev_block_hash,
            hash: Hash256::zero(),
            nonce: 0,
            height,
        };
        let (nonce, hash) = ProofOfWork::new(&block).run()?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// Builds and mines the genesis block, minting the subsidy to `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if `address` is invalid or mining fails.
    pub fn genesis(address: &str) -> Result<Self> {
        let coinbase = Transaction::new_coinbase(address, GENESIS_COINBASE_DATA)?;
        Self::mine(Hash256::zero(), vec![coinbase], 0)
    }

    /// Structural validation: non-empty transaction list, exactly one
    /// leading coinbase, no other coinbase transactions, and a valid proof
    /// of work.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBlock` on any violation.
    pub fn validate_basic(&self) -> Result<()> {
        if self.transactions.is_empty() {
            return Err(ChainError::InvalidBlock("no transactions".to_string()));
        }
        if !self.transactions[0].is_coinbase() {
            return Err(ChainError::InvalidBlock(
                "first transaction is not coinbase".to_string(),
            ));
        }
        for tx in &self.transactions[1..] {
            if tx.is_coinbase() {
                return Err(ChainError::InvalidBlock(
                    "multiple coinbase transactions".to_string(),
                ));
            }
            tx.validate_basic()?;
        }
        if !ProofOfWork::new(self).validate() {
            return Err(ChainError::InvalidBlock(
                "proof of work does not meet target".to_string(),
            ));
        }
        Ok(())
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
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
    fn genesis_has_one_coinbase_at_height_zero() {
        let block = Block::genesis(&test_address()).unwrap();
        assert_eq!(block.height, 0);
        assert!(block.prev_block_hash.is_zero());
        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions[0].is_coinbase());
        assert!(block.validate_basic().is_ok());
    }

    #[test]
    fn merkle_root_changes_with_tx_set() {
        let address = test_address();
        let tx1 = Transaction::new_coinbase(&address, "a").unwrap();
        let tx2 = Transaction::new_coinbase(&address, "b").unwrap();

        let single = Block {
            timestamp: 0,
            transactions: vec![tx1.clone()],
            prev_block_hash: Hash256::zero(),
            hash: Hash256::zero(),
            nonce: 0,
            height: 0,
        };
        let double = Block {
            transactions: vec![tx1, tx2],
            ..single.clone()
        };
        assert_ne!(single.merkle_root(), double.merkle_root());
    }

    #[test]
    fn mined_block_hash_satisfies_validation() {
        let block = Block::genesis(&test_address()).unwrap();
        assert!(ProofOfWork::new(&block).validate());
    }
}
