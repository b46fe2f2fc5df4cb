//! Keccak-256 helpers.

use sha3::{Digest, Keccak256};

/// Length of a Keccak-256 digest.
pub const HASH_LEN: usize = 32;

/// Hash a single byte string.
pub fn keccak256(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Incremental Keccak-256 hasher with big-endian integer helpers.
///
/// All multi-byte integers that feed a protocol hash go through
/// `update_u32`/`update_u64` so every hash in the crate uses one byte order.
#[derive(Default)]
pub struct KeccakWriter {
    inner: Keccak256,
}

impl KeccakWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    pub fn update_u8(&mut self, value: u8) -> &mut Self {
        self.inner.update([value]);
        self
    }

    pub fn update_u16(&mut self, value: u16) -> &mut Self {
        self.inner.update(value.to_be_bytes());
        self
    }

    pub fn update_u32(&mut self, value: u32) -> &mut Self {
        self.inner.update(value.to_be_bytes());
        self
    }

    pub fn update_u64(&mut self, value: u64) -> &mut Self {
        self.inner.update(value.to_be_bytes());
        self
    }

    pub fn finalize(self) -> [u8; HASH_LEN] {
        self.inner.finalize().into()
    }
}
