//! Node key derivation from a BIP-39 mnemonic.
//!
//! The operator's 24-word mnemonic is the single root of trust for the
//! node's attestation key.
//!
//! ## Key Hierarchy
//!
//! ```text
//! BIP-39 Mnemonic (24 words)
//!         │
//!         ▼
//! bip39::Mnemonic::to_seed("")  → [u8; 64]
//!         │
//!         ▼
//! HKDF-SHA256(salt="tessera-node-v1", seed)
//!         │
//!         └─► HKDF expand("attestation-signing") → Ed25519 seed
//! ```
//!
//! The same key signs batch attestations and authenticated relay requests,
//! so a relay can check a request against the operator's registered key.

use crate::crypto::hashing::keccak256;
use crate::protocol::OperatorId;
use bip39::Mnemonic;
use hkdf::Hkdf;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

/// Domain separation salt for master key derivation (versioned for rotation)
const MASTER_SALT: &[u8] = b"tessera-node-v1";

/// HKDF info strings for purpose-specific key derivation
mod purposes {
    pub const ATTESTATION_SIGNING: &[u8] = b"attestation-signing";
}

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Errors that can occur during key derivation
#[derive(Debug, Error)]
pub enum KeyringError {
    /// Invalid BIP-39 mnemonic
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// HKDF expansion failed (should never happen with valid lengths)
    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    /// The derived seed was rejected by the signature scheme
    #[error("Key rejected: {0}")]
    KeyRejected(String),
}

/// Key material derived from the operator mnemonic.
///
/// The mnemonic itself is not stored. The derived seed is zeroized on drop.
pub struct NodeKeyring {
    /// Key epoch (derivation generation), default 1
    epoch: u64,

    /// Seed for the Ed25519 attestation key
    signing_seed: [u8; 32],
}

impl Drop for NodeKeyring {
    fn drop(&mut self) {
        self.signing_seed.zeroize();
    }
}

impl NodeKeyring {
    /// Create a keyring from a BIP-39 mnemonic phrase.
    ///
    /// # Errors
    ///
    /// - `InvalidMnemonic`: the phrase does not parse as BIP-39
    /// - `DerivationFailed`: HKDF expansion failed
    pub fn from_mnemonic(mnemonic: &str) -> Result<Self, KeyringError> {
        let parsed =
            Mnemonic::parse(mnemonic).map_err(|e| KeyringError::InvalidMnemonic(e.to_string()))?;

        // Empty BIP-39 passphrase is standard for this use case
        let mut seed = parsed.to_seed("");
        let hkdf = Hkdf::<Sha256>::new(Some(MASTER_SALT), &seed);
        seed.zeroize();

        let signing_seed = Self::derive_key(&hkdf, purposes::ATTESTATION_SIGNING)?;

        Ok(Self {
            epoch: 1,
            signing_seed,
        })
    }

    fn derive_key(hkdf: &Hkdf<Sha256>, info: &[u8]) -> Result<[u8; 32], KeyringError> {
        let mut key = [0u8; 32];
        hkdf.expand(info, &mut key)
            .map_err(|e| KeyringError::DerivationFailed(format!("{:?}", e)))?;
        Ok(key)
    }

    /// Key epoch (derivation generation). 1 for the initial derivation.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Build the attestation key pair.
    pub fn attestation_keypair(&self) -> Result<NodeKeyPair, KeyringError> {
        NodeKeyPair::from_seed(&self.signing_seed)
    }
}

/// Ed25519 key pair used for batch attestations and relay request signing.
pub struct NodeKeyPair {
    inner: Ed25519KeyPair,
}

impl std::fmt::Debug for NodeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeyPair")
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}

impl NodeKeyPair {
    /// Build a key pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, KeyringError> {
        let inner = Ed25519KeyPair::from_seed_unchecked(seed)
            .map_err(|e| KeyringError::KeyRejected(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Sign an arbitrary message (a 32-byte hash in every caller).
    pub fn sign_message(&self, message: &[u8]) -> Vec<u8> {
        self.inner.sign(message).as_ref().to_vec()
    }

    /// Raw 32-byte public key.
    pub fn public_key(&self) -> &[u8] {
        self.inner.public_key().as_ref()
    }

    /// Operator id derived from the public key: `keccak256(public_key)`.
    pub fn operator_id(&self) -> OperatorId {
        OperatorId::new(keccak256(self.public_key()))
    }
}

/// Verify an Ed25519 signature against a raw public key.
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    UnparsedPublicKey::new(&ED25519, public_key)
        .verify(message, signature)
        .is_ok()
}
