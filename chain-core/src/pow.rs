//! Fixed-difficulty proof-of-work: mining loop and header serialization.

use crate::block::Block;
use chain_shared::Hash256;
use num_bigint::BigUint;

/// Fixed difficulty, expressed as required leading zero bits of the target.
/// Not negotiated on the wire and never adjusted.
pub const TARGET_BITS: i64 = 17;

/// Mining is bounded; beyond this nonce we give up rather than loop forever.
const MAX_NONCE: i64 = i64::MAX;

pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: BigUint,
}

impl<'a> ProofOfWork<'a> {
    #[must_use]
    pub fn new(block: &'a Block) -> Self {
        let target = BigUint::from(1u8) << (256 - TARGET_BITS as u32);
        Self { block, target }
    }

    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(self.block.prev_block_hash.as_bytes());
        data.extend_from_slice(self.block.merkle_root().as_bytes());
        data.extend_from_slice(&self.block.timestamp.to_be_bytes());
        data.extend_from_slice(&TARGET_BITS.to_be_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data
    }

    /// Runs the mining loop, returning the winning nonce and block hash.
    ///
    /// # Errors
    ///
    /// Returns an error if no nonce below the bound satisfies the target,
    /// which should not happen in practice at this difficulty.
    pub fn run(&self) -> chain_shared::Result<(i64, Hash256)> {
        let mut nonce: i64 = 0;
        while nonce < MAX_NONCE {
            let hash = Hash256::sha256(&self.prepare_data(nonce));
            if hash.as_big_endian() < self.target {
                return Ok((nonce, hash));
            }
            nonce += 1;
        }
        Err(chain_shared::ChainError::InvalidBlock(
            "exhausted nonce space without finding a valid hash".to_string(),
        ))
    }

    /// Recomputes the hash at the block's stored nonce and checks it meets
    /// the target.
    #[must_use]
    pub fn validate(&self) -> bool {
        let hash = Hash256::sha256(&self.prepare_data(self.block.nonce));
        hash.as_big_endian() < self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{address_from_pubkey, Transaction};
    use chain_shared::KeyPair;

    fn test_address() -> String {
        let keypair = KeyPair::generate().unwrap();
        address_from_pubkey(keypair.public_key.as_bytes())
    }

    #[test]
    fn mined_block_validates() {
        let coinbase = Transaction::new_coinbase(&test_address(), "").unwrap();
        let block = Block::mine(Hash256::zero(), vec![coinbase], 0).unwrap();
        assert!(ProofOfWork::new(&block).validate());
    }

    #[test]
    fn tampering_with_nonce_breaks_validation() {
        let coinbase = Transaction::new_coinbase(&test_address(), "").unwrap();
        let mut block = Block::mine(Hash256::zero(), vec![coinbase], 0).unwrap();
        block.nonce = block.nonce.wrapping_add(1);
        assert!(!ProofOfWork::new(&block).validate());
    }
}
