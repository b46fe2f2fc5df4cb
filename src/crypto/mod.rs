/// Cryptographic primitives used by the node and the relay
///
/// This module implements:
/// - Keccak-256 hashing with big-endian integer encoding
/// - Attestation key derivation from a BIP-39 mnemonic (keyring)
/// - Ed25519 signing and verification
pub mod hashing;
pub mod keyring;

pub use hashing::{keccak256, KeccakWriter, HASH_LEN};
pub use keyring::{verify_signature, KeyringError, NodeKeyPair, NodeKeyring, SIGNATURE_LEN};
