//! ECDSA over P-256, the signature scheme used to authorize spends.

use crate::{ChainError, Result};
use ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as P256Signature, SigningKey, VerifyingKey};
#[allow(unused_imports)]
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use zeroize::Zeroize;

/// Raw private scalar. Zeroized on drop.
pub struct PrivateKey {
    key_data: Vec<u8>,
}

/// Raw uncompressed public point, `X ‖ Y` (64 bytes, no SEC1 prefix).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    key_data: Vec<u8>,
}

pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// `r ‖ s`, each half left-padded to 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    data: Vec<u8>,
}

impl PublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != 64 {
            return Err(ChainError::CryptographicError(format!(
                "expected 64-byte public key, got {}",
                bytes.len()
            )));
        }
        Ok(Self { key_data: bytes })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_data
    }

    fn to_verifying_key(&self) -> Result<VerifyingKey> {
        let mut sec1 = Vec::with_capacity(65);
        sec1.push(0x04);
        sec1.extend_from_slice(&self.key_data);
        VerifyingKey::from_sec1_bytes(&sec1)
            .map_err(|e| ChainError::CryptographicError(e.to_string()))
    }
}

impl PrivateKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Ok(Self { key_data: bytes })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_data
    }

    fn to_signing_key(&self) -> Result<SigningKey> {
        SigningKey::from_bytes(self.key_data.as_slice().into())
            .map_err(|e| ChainError::CryptographicError(e.to_string()))
    }
}

impl Zeroize for PrivateKey {
    fn zeroize(&mut self) {
        self.key_data.zeroize();
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl KeyPair {
    /// Generates a new P-256 keypair.
    pub fn generate() -> Result<Self> {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        let encoded = verifying_key.to_encoded_point(false);
        let public_bytes = encoded.as_bytes()[1..].to_vec();

        Ok(Self {
            public_key: PublicKey::from_bytes(public_bytes)?,
            private_key: PrivateKey::from_bytes(signing_key.to_bytes().to_vec())?,
        })
    }

    /// Signs `message` (already the full domain-separated byte sequence —
    /// callers are responsible for building it, see the transaction
    /// subsystem's signing routine).
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let signing_key = self.private_key.to_signing_key()?;
        let signature: P256Signature = signing_key.sign(message);
        Ok(Signature {
            data: signature.to_bytes().to_vec(),
        })
    }
}

impl Signature {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() != 64 {
            return Err(ChainError::CryptographicError(format!(
                "expected 64-byte signature, got {}",
                data.len()
            )));
        }
        Ok(Self { data })
    }

    /// Verifies `self` over `message` against `public_key`.
    pub fn verify(&self, message: &[u8], public_key: &PublicKey) -> Result<bool> {
        let verifying_key = public_key.to_verifying_key()?;
        let signature = P256Signature::try_from(self.data.as_slice())
            .map_err(|e| ChainError::CryptographicError(e.to_string()))?;

        Ok(verifying_key.verify(message, &signature).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let keypair = KeyPair::generate().unwrap();
        let message = b"spend 30 to address";
        let sig = keypair.sign(message).unwrap();
        assert!(sig.verify(message, &keypair.public_key).unwrap());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let keypair = KeyPair::generate().unwrap();
        let sig = keypair.sign(b"original").unwrap();
        assert!(!sig.verify(b"tampered", &keypair.public_key).unwrap());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let keypair_a = KeyPair::generate().unwrap();
        let keypair_b = KeyPair::generate().unwrap();
        let sig = keypair_a.sign(b"message").unwrap();
        assert!(!sig.verify(b"message", &keypair_b.public_key).unwrap());
    }

    #[test]
    fn public_key_round_trips_through_bytes() {
        let keypair = KeyPair::generate().unwrap();
        let bytes = keypair.public_key.as_bytes().to_vec();
        let reconstructed = PublicKey::from_bytes(bytes).unwrap();
        assert_eq!(reconstructed, keypair.public_key);
    }
}
