//! Transaction inputs/outputs, canonical hashing, and ECDSA signing.

use chain_shared::{hash_pubkey, ChainError, Hash256, KeyPair, PublicKey, Result, Signature};
use rand::RngCore;
use serde::{Deserialize, Serialize};

const SUBSIDY: u64 = 100;
const ADDRESS_VERSION: u8 = 0x00;
const ADDRESS_CHECKSUM_LEN: usize = 4;

/// One spend reference. A coinbase input has an all-zero `prev_tx_id` and
/// `prev_out_index == -1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_tx_id: Hash256,
    pub prev_out_index: i64,
    pub signature: Vec<u8>,
    pub pubkey: Vec<u8>,
}

impl TxInput {
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.prev_tx_id.is_zero() && self.prev_out_index == -1
    }

    /// True if `pubkey` hashes to `pubkey_hash`.
    #[must_use]
    pub fn uses_key(&self, pubkey_hash: &[u8; 20]) -> bool {
        &hash_pubkey(&self.pubkey) == pubkey_hash
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub pubkey_hash: [u8; 20],
}

impl TxOutput {
    /// Locks `value` to the 20-byte hash decoded from a base58-checksummed
    /// address.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` if the address fails to base58-decode or is
    /// the wrong length.
    pub fn lock(value: u64, address: &str) -> Result<Self> {
        let payload = bs58::decode(address)
            .into_vec()
            .map_err(|_| ChainError::InvalidAddress)?;
        if payload.len() != 1 + 20 + ADDRESS_CHECKSUM_LEN {
            return Err(ChainError::InvalidAddress);
        }
        let mut pubkey_hash = [0u8; 20];
        pubkey_hash.copy_from_slice(&payload[1..21]);
        Ok(Self { value, pubkey_hash })
    }

    #[must_use]
    pub fn is_locked_with_key(&self, pubkey_hash: &[u8; 20]) -> bool {
        &self.pubkey_hash == pubkey_hash
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

/// A copy with clearable signing material, used both to compute the
/// canonical id and as the per-input signing pre-image.
#[derive(Serialize, Deserialize)]
struct TxForHashing {
    id: Hash256,
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Builds a coinbase transaction paying the fixed subsidy to `to`.
    /// `data` becomes the input's pubkey field; when empty, 20 random bytes
    /// are used instead (mirrors the reference's anti-duplication filler).
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` if `to` does not decode.
    pub fn new_coinbase(to: &str, data: &str) -> Result<Self> {
        let pubkey = if data.is_empty() {
            let mut buf = [0u8; 20];
            rand::thread_rng().fill_bytes(&mut buf);
            hex::encode(buf).into_bytes()
        } else {
            data.as_bytes().to_vec()
        };

        let input = TxInput {
            prev_tx_id: Hash256::zero(),
            prev_out_index: -1,
            signature: Vec::new(),
            pubkey,
        };
        let output = TxOutput::lock(SUBSIDY, to)?;

        let mut tx = Self {
            id: Hash256::zero(),
            inputs: vec![input],
            outputs: vec![output],
        };
        tx.id = tx.compute_id()?;
        Ok(tx)
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    fn serialize_with(id: Hash256, inputs: &[TxInput], outputs: &[TxOutput]) -> Result<Vec<u8>> {
        let view = TxForHashing {
            id,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
        };
        bincode::serialize(&view).map_err(Into::into)
    }

    /// SHA-256 of the transaction serialized with `id` cleared.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if serialization fails.
    pub fn compute_id(&self) -> Result<Hash256> {
        let bytes = Self::serialize_with(Hash256::zero(), &self.inputs, &self.outputs)?;
        Ok(Hash256::sha256(&bytes))
    }

    /// A copy with every input's signature and pubkey cleared, used as the
    /// base for both the canonical id and the signing pre-image.
    fn trimmed_copy(&self) -> Self {
        let inputs = self
            .inputs
            .iter()
            .map(|i| TxInput {
                prev_tx_id: i.prev_tx_id,
                prev_out_index: i.prev_out_index,
                signature: Vec::new(),
                pubkey: Vec::new(),
            })
            .collect();
        Self {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// The exact byte sequence that gets signed for input `index`: the
    /// lowercase-hex serialization of the trimmed copy (with that input's
    /// pubkey temporarily set to the referenced output's pubkey hash),
    /// followed by a trailing newline. This framing is load-bearing — any
    /// deviation breaks interoperability with signatures produced by this
    /// exact routine.
    fn signing_preimage(trimmed: &mut Self, index: usize, prev_pubkey_hash: &[u8; 20]) -> Result<Vec<u8>> {
        trimmed.inputs[index].pubkey = prev_pubkey_hash.to_vec();
        let serialized = bincode::serialize(&TxForHashing {
            id: trimmed.id,
            inputs: trimmed.inputs.clone(),
            outputs: trimmed.outputs.clone(),
        })?;
        let mut preimage = hex::encode(serialized).into_bytes();
        preimage.push(b'\n');
        trimmed.inputs[index].pubkey.clear();
        Ok(preimage)
    }

    /// Signs every non-coinbase input with `keypair`, resolving each
    /// referenced previous transaction through `resolve_prev_tx`.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` if a referenced previous transaction is
    /// missing, or a decode/crypto error if signing fails.
    pub fn sign<F>(&mut self, keypair: &KeyPair, mut resolve_prev_tx: F) -> Result<()>
    where
        F: FnMut(&Hash256) -> Result<Transaction>,
    {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut trimmed = self.trimmed_copy();
        for index in 0..self.inputs.len() {
            let prev_tx = resolve_prev_tx(&self.inputs[index].prev_tx_id)?;
            let prev_out_index = usize::try_from(self.inputs[index].prev_out_index)
                .map_err(|_| ChainError::InvalidTransaction("negative output index".into()))?;
            let prev_output = prev_tx.outputs.get(prev_out_index).ok_or_else(|| {
                ChainError::InvalidTransaction("dangling input reference".to_string())
            })?;

            let preimage = Self::signing_preimage(&mut trimmed, index, &prev_output.pubkey_hash)?;
            let signature = keypair.sign(&preimage)?;
            self.inputs[index].signature = signature.as_bytes().to_vec();
            self.inputs[index].pubkey = keypair.public_key.as_bytes().to_vec();
        }
        Ok(())
    }

    /// Verifies every input's signature against its referenced previous
    /// output, resolving previous transactions through `resolve_prev_tx`.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` if a referenced previous transaction is
    /// missing.
    pub fn verify<F>(&self, mut resolve_prev_tx: F) -> Result<bool>
    where
        F: FnMut(&Hash256) -> Result<Transaction>,
    {
        if self.is_coinbase() {
            return Ok(true);
        }

        let mut trimmed = self.trimmed_copy();
        for (index, input) in self.inputs.iter().enumerate() {
            let prev_tx = resolve_prev_tx(&input.prev_tx_id)?;
            let prev_out_index = usize::try_from(input.prev_out_index)
                .map_err(|_| ChainError::InvalidTransaction("negative output index".into()))?;
            let prev_output = prev_tx.outputs.get(prev_out_index).ok_or_else(|| {
                ChainError::InvalidTransaction("dangling input reference".to_string())
            })?;

            let preimage = Self::signing_preimage(&mut trimmed, index, &prev_output.pubkey_hash)?;

            if input.signature.len() != 64 {
                return Ok(false);
            }
            let signature = Signature::from_bytes(input.signature.clone())?;
            let public_key = PublicKey::from_bytes(input.pubkey.clone())?;
            if !signature.verify(&preimage, &public_key)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Basic structural validation, independent of UTXO/signature checks.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransaction` on an empty input/output list or a
    /// zero-value output.
    pub fn validate_basic(&self) -> Result<()> {
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(ChainError::InvalidTransaction(
                "empty inputs or outputs".to_string(),
            ));
        }
        for output in &self.outputs {
            if output.value == 0 {
                return Err(ChainError::InvalidTransaction(
                    "zero value output".to_string(),
                ));
            }
        }
        if !self.is_coinbase() {
            for input in &self.inputs {
                if input.is_coinbase() {
                    return Err(ChainError::InvalidTransaction(
                        "non-coinbase transaction with coinbase input".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let inputs_size: usize = self
            .inputs
            .iter()
            .map(|i| 32 + 8 + i.signature.len() + i.pubkey.len())
            .sum();
        let outputs_size = self.outputs.len() * (8 + 20);
        32 + inputs_size + outputs_size
    }
}

/// Decodes a base58-checksummed address, validating that its checksum
/// matches the embedded version byte and payload.
///
/// # Errors
///
/// Returns `InvalidAddress` on decode failure, wrong length, or checksum
/// mismatch.
pub fn validate_address(address: &str) -> Result<()> {
    let payload = bs58::decode(address)
        .into_vec()
        .map_err(|_| ChainError::InvalidAddress)?;
    if payload.len() != 1 + 20 + ADDRESS_CHECKSUM_LEN {
        return Err(ChainError::InvalidAddress);
    }
    let (version_and_hash, checksum) = payload.split_at(payload.len() - ADDRESS_CHECKSUM_LEN);
    let expected = Hash256::double_sha256(version_and_hash);
    if &expected.as_bytes()[..ADDRESS_CHECKSUM_LEN] != checksum {
        return Err(ChainError::InvalidAddress);
    }
    if version_and_hash[0] != ADDRESS_VERSION {
        return Err(ChainError::InvalidAddress);
    }
    Ok(())
}

/// Encodes a public key into a base58-checksummed address.
#[must_use]
pub fn address_from_pubkey(pubkey: &[u8]) -> String {
    let pubkey_hash = hash_pubkey(pubkey);
    let mut payload = Vec::with_capacity(1 + 20 + ADDRESS_CHECKSUM_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(&pubkey_hash);
    let checksum = Hash256::double_sha256(&payload);
    payload.extend_from_slice(&checksum.as_bytes()[..ADDRESS_CHECKSUM_LEN]);
    bs58::encode(payload).into_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_shared::KeyPair;

    fn test_address() -> (KeyPair, String) {
        let keypair = KeyPair::generate().unwrap();
        let address = address_from_pubkey(keypair.public_key.as_bytes());
        (keypair, address)
    }

    #[test]
    fn coinbase_round_trips_is_coinbase() {
        let (_, address) = test_address();
        let tx = Transaction::new_coinbase(&address, "").unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(tx.outputs[0].value, SUBSIDY);
    }

    #[test]
    fn id_is_deterministic_and_nonzero() {
        let (_, address) = test_address();
        let tx = Transaction::new_coinbase(&address, "genesis").unwrap();
        assert_eq!(tx.id, tx.compute_id().unwrap());
        assert_ne!(tx.id, Hash256::zero());
    }

    #[test]
    fn address_validates_round_trip() {
        let (_, address) = test_address();
        assert!(validate_address(&address).is_ok());
    }

    #[test]
    fn tampered_checksum_fails_validation() {
        let (_, mut address) = test_address();
        address.push('z');
        assert!(validate_address(&address).is_err());
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let (sender_keys, sender_address) = test_address();
        let (_, recipient_address) = test_address();

        let coinbase = Transaction::new_coinbase(&sender_address, "").unwrap();
        let coinbase_for_lookup = coinbase.clone();

        let mut spend = Transaction {
            id: Hash256::zero(),
            inputs: vec![TxInput {
                prev_tx_id: coinbase.id,
                prev_out_index: 0,
                signature: Vec::new(),
                pubkey: sender_keys.public_key.as_bytes().to_vec(),
            }],
            outputs: vec![TxOutput::lock(SUBSIDY, &recipient_address).unwrap()],
        };
        spend.id = spend.compute_id().unwrap();

        spend
            .sign(&sender_keys, |_| Ok(coinbase_for_lookup.clone()))
            .unwrap();

        assert!(spend.verify(|_| Ok(coinbase_for_lookup.clone())).unwrap());
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let (sender_keys, sender_address) = test_address();
        let (_, recipient_address) = test_address();

        let coinbase = Transaction::new_coinbase(&sender_address, "").unwrap();
        let coinbase_for_lookup = coinbase.clone();

        let mut spend = Transaction {
            id: Hash256::zero(),
            inputs: vec![TxInput {
                prev_tx_id: coinbase.id,
                prev_out_index: 0,
                signature: Vec::new(),
                pubkey: sender_keys.public_key.as_bytes().to_vec(),
            }],
            outputs: vec![TxOutput::lock(SUBSIDY, &recipient_address).unwrap()],
        };
        spend.id = spend.compute_id().unwrap();
        spend
            .sign(&sender_keys, |_| Ok(coinbase_for_lookup.clone()))
            .unwrap();

        spend.inputs[0].signature[0] ^= 0xFF;
        assert!(!spend.verify(|_| Ok(coinbase_for_lookup.clone())).unwrap());
    }

    #[test]
    fn validate_basic_rejects_empty_transaction() {
        let empty = Transaction {
            id: Hash256::zero(),
            inputs: vec![],
            outputs: vec![],
        };
        assert!(empty.validate_basic().is_err());
    }
}
