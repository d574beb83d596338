//! In-memory pool of transactions awaiting inclusion in a block.

use crate::transaction::Transaction;
use chain_shared::Hash256;
use std::collections::HashMap;

#[derive(Default)]
pub struct Mempool {
    pending: HashMap<Hash256, Transaction>,
}

impl Mempool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tx: Transaction) {
        self.pending.insert(tx.id, tx);
    }

    #[must_use]
    pub fn contains(&self, txid: &Hash256) -> bool {
        self.pending.contains_key(txid)
    }

    #[must_use]
    pub fn get(&self, txid: &Hash256) -> Option<&Transaction> {
        self.pending.get(txid)
    }

    pub fn remove(&mut self, txid: &Hash256) -> Option<Transaction> {
        self.pending.remove(txid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &Transaction> {
        self.pending.values()
    }

    /// Drains entries whose id is in `ids`.
    pub fn remove_many(&mut self, ids: &[Hash256]) {
        for id in ids {
            self.pending.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::address_from_pubkey;
    use chain_shared::KeyPair;

    #[test]
    fn insert_then_remove_round_trips() {
        let keypair = KeyPair::generate().unwrap();
        let address = address_from_pubkey(keypair.public_key.as_bytes());
        let tx = Transaction::new_coinbase(&address, "pool-test").unwrap();

        let mut pool = Mempool::new();
        assert!(pool.is_empty());
        pool.insert(tx.clone());
        assert!(pool.contains(&tx.id));
        assert_eq!(pool.len(), 1);

        pool.remove(&tx.id);
        assert!(!pool.contains(&tx.id));
    }
}
