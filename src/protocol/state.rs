//! Operator state: which chunks of which quorums an operator holds at a block.
//!
//! Chain lookups are external. [`ChainState`] is the seam; the node ships
//! [`StaticChainState`] for deployments with a fixed assignment.

use super::types::{array_from_hex, array_from_slice, KeyParseError, QuorumId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperatorId([u8; 32]);

impl OperatorId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyParseError> {
        array_from_slice(bytes).map(Self)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyParseError> {
        array_from_hex(s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperatorId({})", self.to_hex())
    }
}

/// Contiguous chunk range an operator holds for one quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub start_index: u32,
    pub num_chunks: u32,
}

impl Assignment {
    /// Exclusive end index.
    pub fn end_index(&self) -> u32 {
        self.start_index.saturating_add(self.num_chunks)
    }
}

/// One operator's responsibilities at one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorState {
    pub operator_id: OperatorId,
    pub block_number: u64,
    pub assignments: BTreeMap<QuorumId, Assignment>,
}

impl OperatorState {
    pub fn assignment(&self, quorum: QuorumId) -> Option<&Assignment> {
        self.assignments.get(&quorum)
    }

    pub fn is_member(&self, quorum: QuorumId) -> bool {
        self.assignments.contains_key(&quorum)
    }
}

#[derive(Debug, Error)]
pub enum ChainStateError {
    #[error("operator {0} is not registered")]
    NotRegistered(OperatorId),

    #[error("chain state unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of operator assignments. Results are block-scoped and
/// must not be cached across blocks by callers.
#[async_trait]
pub trait ChainState: Send + Sync {
    async fn operator_state(
        &self,
        block_number: u64,
        operator_id: &OperatorId,
    ) -> Result<OperatorState, ChainStateError>;
}

/// Fixed assignment for one operator, valid at every block.
#[derive(Debug, Clone)]
pub struct StaticChainState {
    operator_id: OperatorId,
    assignments: BTreeMap<QuorumId, Assignment>,
}

impl StaticChainState {
    pub fn new(operator_id: OperatorId, assignments: BTreeMap<QuorumId, Assignment>) -> Self {
        Self {
            operator_id,
            assignments,
        }
    }
}

#[async_trait]
impl ChainState for StaticChainState {
    async fn operator_state(
        &self,
        block_number: u64,
        operator_id: &OperatorId,
    ) -> Result<OperatorState, ChainStateError> {
        if *operator_id != self.operator_id {
            return Err(ChainStateError::NotRegistered(*operator_id));
        }
        Ok(OperatorState {
            operator_id: *operator_id,
            block_number,
            assignments: self.assignments.clone(),
        })
    }
}
