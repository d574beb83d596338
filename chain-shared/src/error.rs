use thiserror::Error;

/// Error kinds shared by the chain store, UTXO index, transaction subsystem,
/// and gossip layer.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("store already exists")]
    StoreAlreadyExists,

    #[error("store does not exist")]
    StoreMissing,

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("invalid address")]
    InvalidAddress,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("cryptographic error: {0}")]
    CryptographicError(String),
}

impl From<bincode::Error> for ChainError {
    fn from(err: bincode::Error) -> Self {
        Self::DecodeError(err.to_string())
    }
}

impl From<sled::Error> for ChainError {
    fn from(err: sled::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}
