//! Batch attestations.
//!
//! An attestation is the node's signature over the batch header hash. It is
//! the only artifact of a successful `store_chunks`, and is produced only
//! after the batch's bundles are committed and validated.
//!
//! ## Message Format
//!
//! ```text
//! keccak256(batch_root ‖ reference_block_number as u64 BE)
//! ```

use crate::crypto::hashing::HASH_LEN;
use crate::crypto::keyring::{verify_signature, NodeKeyPair, SIGNATURE_LEN};
use crate::protocol::{BatchHeader, OperatorId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signed receipt for one stored batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub batch_header_hash: [u8; HASH_LEN],
    pub operator_id: OperatorId,
    pub signature: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttestationError {
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    #[error("Invalid signature length: expected {expected}, got {actual}")]
    InvalidSignatureLength { expected: usize, actual: usize },

    #[error("Attestation is for a different batch header")]
    HeaderMismatch,
}

impl Attestation {
    /// Sign `header` with the node key.
    pub fn sign(header: &BatchHeader, keypair: &NodeKeyPair, operator_id: OperatorId) -> Self {
        let batch_header_hash = header.hash();
        Self {
            batch_header_hash,
            operator_id,
            signature: keypair.sign_message(&batch_header_hash),
        }
    }

    /// Wrap a signature received from a node.
    pub fn from_signature(
        header: &BatchHeader,
        operator_id: OperatorId,
        signature: Vec<u8>,
    ) -> Result<Self, AttestationError> {
        if signature.len() != SIGNATURE_LEN {
            return Err(AttestationError::InvalidSignatureLength {
                expected: SIGNATURE_LEN,
                actual: signature.len(),
            });
        }
        Ok(Self {
            batch_header_hash: header.hash(),
            operator_id,
            signature,
        })
    }

    /// Verify the signature with the operator's public key.
    pub fn verify(&self, public_key: &[u8]) -> Result<(), AttestationError> {
        if verify_signature(public_key, &self.batch_header_hash, &self.signature) {
            Ok(())
        } else {
            Err(AttestationError::SignatureVerificationFailed)
        }
    }

    /// Verify that this attestation covers `header` and is correctly signed.
    pub fn verify_for(
        &self,
        header: &BatchHeader,
        public_key: &[u8],
    ) -> Result<(), AttestationError> {
        if header.hash() != self.batch_header_hash {
            return Err(AttestationError::HeaderMismatch);
        }
        self.verify(public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(block: u64) -> BatchHeader {
        BatchHeader {
            batch_root: [5u8; 32],
            reference_block_number: block,
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = NodeKeyPair::from_seed(&[1u8; 32]).unwrap();
        let attestation = Attestation::sign(&header(10), &keypair, keypair.operator_id());

        assert_eq!(attestation.verify(keypair.public_key()), Ok(()));
        assert_eq!(
            attestation.verify_for(&header(10), keypair.public_key()),
            Ok(())
        );
    }

    #[test]
    fn test_verify_wrong_key_or_header() {
        let keypair = NodeKeyPair::from_seed(&[1u8; 32]).unwrap();
        let other = NodeKeyPair::from_seed(&[2u8; 32]).unwrap();
        let attestation = Attestation::sign(&header(10), &keypair, keypair.operator_id());

        assert_eq!(
            attestation.verify(other.public_key()),
            Err(AttestationError::SignatureVerificationFailed)
        );
        assert_eq!(
            attestation.verify_for(&header(11), keypair.public_key()),
            Err(AttestationError::HeaderMismatch)
        );
    }

    #[test]
    fn test_from_signature_checks_length() {
        let result =
            Attestation::from_signature(&header(1), OperatorId::new([0u8; 32]), vec![0u8; 10]);
        assert_eq!(
            result,
            Err(AttestationError::InvalidSignatureLength {
                expected: 64,
                actual: 10
            })
        );
    }
}
