pub mod crypto;
pub mod error;
pub mod hash;

pub use crypto::{KeyPair, PrivateKey, PublicKey, Signature};
pub use error::ChainError;
pub use hash::{hash_pubkey, Hash256};

pub type Result<T> = std::result::Result<T, ChainError>;
