use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// 256-bit digest used to identify blocks and transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// SHA-256 of `data`.
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// SHA-256 applied twice, used for address checksums.
    #[must_use]
    pub fn double_sha256(data: &[u8]) -> Self {
        Self::sha256(Self::sha256(data).as_bytes())
    }

    /// Interprets the digest as a big-endian unsigned integer, for
    /// comparison against a proof-of-work target.
    #[must_use]
    pub fn as_big_endian(&self) -> num_bigint::BigUint {
        num_bigint::BigUint::from_bytes_be(&self.0)
    }
}

/// RIPEMD-160(SHA-256(data)), the 20-byte public-key hash embedded in
/// every address and output lock.
#[must_use]
pub fn hash_pubkey(pubkey: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(pubkey);
    let ripe = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripe);
    out
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl TryFrom<&[u8]> for Hash256 {
    type Error = crate::ChainError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != 32 {
            return Err(crate::ChainError::DecodeError(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(bytes);
        Ok(Self(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_displays_as_all_zero_hex() {
        let hash = Hash256::zero();
        assert_eq!(hash.to_string(), "0".repeat(64));
    }

    #[test]
    fn sha256_is_deterministic_and_nonzero() {
        let a = Hash256::sha256(b"hello world");
        let b = Hash256::sha256(b"hello world");
        assert_eq!(a, b);
        assert_ne!(a, Hash256::zero());
    }

    #[test]
    fn double_sha256_differs_from_single() {
        let single = Hash256::sha256(b"payload");
        let double = Hash256::double_sha256(b"payload");
        assert_ne!(single, double);
    }

    #[test]
    fn hash_pubkey_is_twenty_bytes_and_deterministic() {
        let pubkey = [7u8; 64];
        let a = hash_pubkey(&pubkey);
        let b = hash_pubkey(&pubkey);
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn try_from_rejects_wrong_length() {
        let short = [0u8; 10];
        assert!(Hash256::try_from(&short[..]).is_err());
    }
}
