pub mod block;
pub mod mempool;
pub mod pow;
pub mod store;
pub mod transaction;
pub mod utxo;

pub use block::Block;
pub use mempool::Mempool;
pub use pow::{ProofOfWork, TARGET_BITS};
pub use store::ChainStore;
pub use transaction::{address_from_pubkey, validate_address, Transaction, TxInput, TxOutput};
pub use utxo::UtxoIndex;

pub use chain_shared::{ChainError, Hash256, Result};
