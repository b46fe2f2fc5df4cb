//! Batch, blob and encoding types shared by the node and the relay.

use crate::crypto::hashing::{KeccakWriter, HASH_LEN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Quorum identifier.
pub type QuorumId = u8;

/// Highest quorum id the protocol accepts.
pub const MAX_QUORUM_ID: QuorumId = 254;

/// Relay shard identifier.
pub type RelayKey = u32;

/// Bytes per encoded field element.
pub const BYTES_PER_SYMBOL: u32 = 32;

/// Blob version used when the chain supplies no parameters.
pub const DEFAULT_BLOB_VERSION: u16 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

/// Parse a fixed-size byte array from a slice.
pub(crate) fn array_from_slice<const N: usize>(bytes: &[u8]) -> Result<[u8; N], KeyParseError> {
    bytes
        .try_into()
        .map_err(|_| KeyParseError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        })
}

/// Parse a fixed-size byte array from hex, with or without `0x`.
pub(crate) fn array_from_hex<const N: usize>(s: &str) -> Result<[u8; N], KeyParseError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| KeyParseError::InvalidHex(e.to_string()))?;
    array_from_slice(&bytes)
}

/// Content-derived blob identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlobKey([u8; HASH_LEN]);

impl BlobKey {
    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyParseError> {
        array_from_slice(bytes).map(Self)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyParseError> {
        array_from_hex(s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({})", self.to_hex())
    }
}

/// Commitment to the encoded blob. The commitment itself is opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobCommitment {
    pub data_commitment: [u8; HASH_LEN],
    /// Blob length in symbols.
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    pub account_id: String,
    pub salt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHeader {
    pub version: u16,
    pub quorum_numbers: Vec<QuorumId>,
    pub commitment: BlobCommitment,
    pub payment: PaymentMetadata,
}

impl BlobHeader {
    /// Deterministic blob key.
    ///
    /// `keccak256(version ‖ quorum count ‖ quorums ‖ commitment ‖ length ‖ payment hash)`
    /// with every integer big-endian.
    pub fn blob_key(&self) -> BlobKey {
        let mut payment = KeccakWriter::new();
        payment
            .update_u32(self.payment.account_id.len() as u32)
            .update(self.payment.account_id.as_bytes())
            .update_u32(self.payment.salt);
        let payment_hash = payment.finalize();

        let mut writer = KeccakWriter::new();
        writer
            .update_u16(self.version)
            .update_u32(self.quorum_numbers.len() as u32)
            .update(&self.quorum_numbers)
            .update(&self.commitment.data_commitment)
            .update_u32(self.commitment.length)
            .update(&payment_hash);
        BlobKey(writer.finalize())
    }
}

/// A blob accepted for dispersal, with the relays holding a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobCertificate {
    pub blob_header: BlobHeader,
    pub relay_keys: Vec<RelayKey>,
}

impl BlobCertificate {
    pub fn blob_key(&self) -> BlobKey {
        self.blob_header.blob_key()
    }

    pub fn quorum_numbers(&self) -> &[QuorumId] {
        &self.blob_header.quorum_numbers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub batch_root: [u8; HASH_LEN],
    pub reference_block_number: u64,
}

impl BatchHeader {
    /// Attestation message: `keccak256(batch_root ‖ reference_block_number)`.
    pub fn hash(&self) -> [u8; HASH_LEN] {
        let mut writer = KeccakWriter::new();
        writer
            .update(&self.batch_root)
            .update_u64(self.reference_block_number);
        writer.finalize()
    }
}

/// Unit of ingestion. All certificates share the header's reference block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub header: BatchHeader,
    pub blob_certificates: Vec<BlobCertificate>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.blob_certificates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blob_certificates.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("unknown blob version {0}")]
    UnknownVersion(u16),

    #[error("invalid encoding parameters: {0}")]
    InvalidParameters(String),
}

/// Per-version encoding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobVersionParameters {
    pub coding_rate: u32,
    pub num_chunks: u32,
}

impl BlobVersionParameters {
    /// Chunk length in symbols for a blob of `blob_length` symbols:
    /// `next_pow2(ceil(blob_length * coding_rate / num_chunks))`, at least 1.
    pub fn chunk_length(&self, blob_length: u32) -> Result<u32, EncodingError> {
        if self.num_chunks == 0 || self.coding_rate == 0 {
            return Err(EncodingError::InvalidParameters(format!(
                "coding_rate={} num_chunks={}",
                self.coding_rate, self.num_chunks
            )));
        }
        let encoded = u64::from(blob_length) * u64::from(self.coding_rate);
        let per_chunk = encoded.div_ceil(u64::from(self.num_chunks)).max(1);
        let pow2 = per_chunk.next_power_of_two();
        u32::try_from(pow2).map_err(|_| {
            EncodingError::InvalidParameters(format!("chunk length {} overflows", pow2))
        })
    }

    /// Chunk size in bytes.
    pub fn chunk_size_bytes(&self, blob_length: u32) -> Result<u64, EncodingError> {
        Ok(u64::from(self.chunk_length(blob_length)?) * u64::from(BYTES_PER_SYMBOL))
    }
}

/// Versioned encoding parameters, as published on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobVersionRegistry {
    versions: BTreeMap<u16, BlobVersionParameters>,
}

impl Default for BlobVersionRegistry {
    fn default() -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(
            DEFAULT_BLOB_VERSION,
            BlobVersionParameters {
                coding_rate: 8,
                num_chunks: 8192,
            },
        );
        Self { versions }
    }
}

impl BlobVersionRegistry {
    pub fn new(versions: BTreeMap<u16, BlobVersionParameters>) -> Self {
        Self { versions }
    }

    pub fn get(&self, version: u16) -> Result<BlobVersionParameters, EncodingError> {
        self.versions
            .get(&version)
            .copied()
            .ok_or(EncodingError::UnknownVersion(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(salt: u32) -> BlobHeader {
        BlobHeader {
            version: 0,
            quorum_numbers: vec![0, 1],
            commitment: BlobCommitment {
                data_commitment: [9u8; 32],
                length: 16,
            },
            payment: PaymentMetadata {
                account_id: "0xabc".to_string(),
                salt,
            },
        }
    }

    #[test]
    fn test_blob_key_deterministic() {
        assert_eq!(header(1).blob_key(), header(1).blob_key());
        assert_ne!(
            header(1).blob_key(),
            header(2).blob_key(),
            "Payment salt must change the blob key"
        );
    }

    #[test]
    fn test_blob_key_depends_on_quorums() {
        let mut other = header(1);
        other.quorum_numbers = vec![0];
        assert_ne!(header(1).blob_key(), other.blob_key());
    }

    #[test]
    fn test_batch_header_hash_layout() {
        let header = BatchHeader {
            batch_root: [1u8; 32],
            reference_block_number: 7,
        };
        let mut expected = vec![1u8; 32];
        expected.extend_from_slice(&7u64.to_be_bytes());
        assert_eq!(header.hash(), crate::crypto::keccak256(&expected));
    }

    #[test]
    fn test_blob_key_hex_roundtrip() {
        let key = header(3).blob_key();
        assert_eq!(BlobKey::from_hex(&key.to_hex()).unwrap(), key);
        assert_eq!(
            BlobKey::from_hex(&format!("0x{}", key.to_hex())).unwrap(),
            key
        );
        assert_eq!(
            BlobKey::from_slice(&[0u8; 31]),
            Err(KeyParseError::InvalidLength {
                expected: 32,
                actual: 31
            })
        );
    }

    #[test]
    fn test_chunk_length() {
        let params = BlobVersionParameters {
            coding_rate: 8,
            num_chunks: 16,
        };
        // 16 * 8 / 16 = 8
        assert_eq!(params.chunk_length(16).unwrap(), 8);
        // 17 * 8 / 16 = 8.5 -> 9 -> 16
        assert_eq!(params.chunk_length(17).unwrap(), 16);
        // Never below one symbol
        assert_eq!(params.chunk_length(0).unwrap(), 1);
        assert_eq!(params.chunk_size_bytes(16).unwrap(), 8 * 32);
    }

    #[test]
    fn test_chunk_length_rejects_zero_chunks() {
        let params = BlobVersionParameters {
            coding_rate: 8,
            num_chunks: 0,
        };
        assert!(matches!(
            params.chunk_length(16),
            Err(EncodingError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_registry_unknown_version() {
        let registry = BlobVersionRegistry::default();
        assert!(registry.get(DEFAULT_BLOB_VERSION).is_ok());
        assert_eq!(registry.get(9), Err(EncodingError::UnknownVersion(9)));
    }
}
