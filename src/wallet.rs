//! Wallet file persistence. Consumed only as `{private_key, public_key}`
//! pairs by the transaction subsystem — this module owns nothing about
//! signing or address *decoding*, only key storage and address encoding.

use chain_core::address_from_pubkey;
use chain_shared::{ChainError, KeyPair, PrivateKey, PublicKey, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Serialize, Deserialize)]
struct WalletRecord {
    private_key: Vec<u8>,
    public_key: Vec<u8>,
}

impl WalletRecord {
    fn from_keypair(keypair: &KeyPair) -> Self {
        Self {
            private_key: keypair.private_key.as_bytes().to_vec(),
            public_key: keypair.public_key.as_bytes().to_vec(),
        }
    }

    fn into_keypair(self) -> Result<KeyPair> {
        Ok(KeyPair {
            public_key: PublicKey::from_bytes(self.public_key)?,
            private_key: PrivateKey::from_bytes(self.private_key)?,
        })
    }
}

#[derive(Default, Serialize, Deserialize)]
pub struct Wallets {
    wallets: HashMap<String, WalletRecord>,
}

fn wallet_file_path(node_id: &str) -> PathBuf {
    PathBuf::from(format!("wallet_{node_id}.dat"))
}

impl Wallets {
    /// Loads the node's wallet file, or an empty collection if it does not
    /// yet exist.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if the file exists but cannot be parsed.
    pub fn load_from_file(node_id: &str) -> Result<Self> {
        let path = wallet_file_path(node_id);
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| ChainError::StorageError(e.to_string()))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Persists the collection to the node's wallet file.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the file cannot be written.
    pub fn save_to_file(&self, node_id: &str) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        std::fs::write(wallet_file_path(node_id), bytes)
            .map_err(|e| ChainError::StorageError(e.to_string()))
    }

    /// Generates a new keypair, stores it under its derived address, and
    /// returns that address.
    ///
    /// # Errors
    ///
    /// Propagates key-generation failures.
    pub fn create_wallet(&mut self) -> Result<String> {
        let keypair = KeyPair::generate()?;
        let address = address_from_pubkey(keypair.public_key.as_bytes());
        self.wallets
            .insert(address.clone(), WalletRecord::from_keypair(&keypair));
        Ok(address)
    }

    #[must_use]
    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    /// Reconstructs the keypair stored under `address`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` if no wallet is stored under that address.
    pub fn get_wallet(&self, address: &str) -> Result<KeyPair> {
        let record = self
            .wallets
            .get(address)
            .ok_or(ChainError::InvalidAddress)?;
        WalletRecord {
            private_key: record.private_key.clone(),
            public_key: record.public_key.clone(),
        }
        .into_keypair()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_fetch_round_trips_keys() {
        let mut wallets = Wallets::default();
        let address = wallets.create_wallet().unwrap();
        assert_eq!(wallets.get_addresses(), vec![address.clone()]);
        assert!(wallets.get_wallet(&address).is_ok());
    }

    #[test]
    fn unknown_address_is_an_error() {
        let wallets = Wallets::default();
        assert!(wallets.get_wallet("nonexistent").is_err());
    }

    #[test]
    fn save_then_load_preserves_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let mut wallets = Wallets::default();
        let address = wallets.create_wallet().unwrap();
        wallets.save_to_file("test-node").unwrap();

        let reloaded = Wallets::load_from_file("test-node").unwrap();
        assert_eq!(reloaded.get_addresses(), vec![address]);

        std::env::set_current_dir(cwd).unwrap();
    }
}
