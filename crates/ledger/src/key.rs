//! Public-key string form and the producer-signature seam.
//!
//! Committee members are addressed by the base58 form of a 33-byte key
//! (1 version byte + 32 key bytes); the last raw byte binds the owner to a
//! shard. Signature verification sits behind a trait so the consensus
//! engine's scheme stays swappable.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::Hash32;

/// 1 version byte + 32 key bytes.
pub const PUBLIC_KEY_LEN: usize = 33;
/// Public key + transmission key.
pub const PRODUCER_ADDRESS_LEN: usize = 66;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid base58 key string")]
    Base58,
    #[error("public key must be {PUBLIC_KEY_LEN} bytes, got {0}")]
    Length(usize),
}

/// Base58 string form of a raw public key. Map keys and committee entries
/// use this form so lexicographic ordering is identical on every node.
pub fn encode_public_key(pk: &[u8]) -> String {
    bs58::encode(pk).into_string()
}

pub fn decode_public_key(s: &str) -> Result<Vec<u8>, KeyError> {
    let bytes = bs58::decode(s).into_vec().map_err(|_| KeyError::Base58)?;
    if bytes.len() != PUBLIC_KEY_LEN {
        return Err(KeyError::Length(bytes.len()));
    }
    Ok(bytes)
}

/// Shard owning the account identified by a key's last byte.
#[inline]
pub fn shard_id_from_last_byte(last_byte: u8, active_shards: usize) -> u8 {
    (last_byte as usize % active_shards) as u8
}

#[inline]
pub fn shard_id_of_key(pk: &[u8], active_shards: usize) -> u8 {
    shard_id_from_last_byte(pk.last().copied().unwrap_or(0), active_shards)
}

/// Producer identity carried in block headers: a signing public key plus a
/// transmission key. Genesis headers carry the empty address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerAddress {
    pub public_key: Vec<u8>,
    pub tx_key: Vec<u8>,
}

impl ProducerAddress {
    pub fn new(public_key: Vec<u8>, tx_key: Vec<u8>) -> Self {
        ProducerAddress { public_key, tx_key }
    }

    /// Concatenated byte form; length 0 for genesis, 66 otherwise.
    pub fn bytes_len(&self) -> usize {
        self.public_key.len() + self.tx_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.public_key.is_empty() && self.tx_key.is_empty()
    }

    /// Base58 form of the signing key, as it appears in committee lists.
    pub fn key_string(&self) -> String {
        encode_public_key(&self.public_key)
    }
}

/// Verifies a producer signature over a 32-byte header hash.
pub trait SigVerifier: Send + Sync {
    fn verify(&self, public_key: &[u8], message: &Hash32, signature: &[u8]) -> bool;
}

/// Ed25519 verification; byte 0 of the on-chain key is the version byte and
/// the remaining 32 bytes are the curve point.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Verifier;

impl SigVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8], message: &Hash32, signature: &[u8]) -> bool {
        if public_key.len() != PUBLIC_KEY_LEN {
            return false;
        }
        let key_bytes: [u8; 32] = match public_key[1..].try_into() {
            Ok(b) => b,
            Err(_) => return false,
        };
        let key = match VerifyingKey::from_bytes(&key_bytes) {
            Ok(k) => k,
            Err(_) => return false,
        };
        let sig = match Signature::from_slice(signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        key.verify(message, &sig).is_ok()
    }
}

/// Accepts every signature. Test harnesses and replay tooling only.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllVerifier;

impl SigVerifier for AcceptAllVerifier {
    fn verify(&self, _public_key: &[u8], _message: &Hash32, _signature: &[u8]) -> bool {
        true
    }
}
