//! Key-value store abstraction.
//!
//! Every durable byte the node keeps goes through [`KvStore`]: chunk bundles,
//! relay certificates, relay blobs and chunk frames. The store is injected
//! as `Arc<dyn KvStore>` so tests can swap in [`MemoryStore`] or a
//! failure-injecting wrapper.
//!
//! ## Atomicity
//!
//! [`KvStore::apply`] is the only mutation primitive. A batch of operations
//! either lands entirely or not at all, and a failed apply leaves the store
//! unchanged. The convenience writers (`put`, `delete`, `write_batch`,
//! `delete_batch`) and the typed [`Batch`] builder are all expressed on top
//! of it.
//!
//! ## Backends
//!
//! - [`SqliteStore`]: durable, sqlx + SQLite (WAL)
//! - [`MemoryStore`]: `BTreeMap` behind a lock, for tests and ephemeral nodes

pub mod memory;
pub mod sqlite;
pub mod table;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use table::{prefix_successor, Table};

use async_trait::async_trait;
use std::marker::PhantomData;
use thiserror::Error;

/// Errors returned by key-value store backends.
#[derive(Debug, Error)]
pub enum KvError {
    /// `get` on a key that is not present.
    #[error("key not found")]
    NotFound,

    /// The store was shut down or destroyed.
    #[error("store is closed")]
    Closed,

    /// Malformed batch (e.g. key/value count mismatch).
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem failure (destroy, directory creation).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for KvError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => KvError::Closed,
            other => KvError::Storage(other.to_string()),
        }
    }
}

/// One staged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl WriteOp {
    pub fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// Ordered snapshot of `(key, value)` pairs returned by prefix iteration.
///
/// The snapshot is taken when the iterator is created. Writes that land
/// afterwards are not observed.
#[derive(Debug, Default)]
pub struct KvIterator {
    entries: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl KvIterator {
    /// Wrap entries that are already sorted by key.
    pub fn from_sorted(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl Iterator for KvIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

/// Durable byte-key to byte-value mapping with atomic batches.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Apply every operation atomically, in order.
    ///
    /// A later operation on the same key wins. On error nothing is applied.
    async fn apply(&self, ops: Vec<WriteOp>) -> Result<(), KvError>;

    /// Read a value.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the key is absent
    /// - `Closed`: the store was shut down
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>, KvError>;

    /// Iterate over every key starting with `prefix`, in ascending key order.
    async fn iter_prefix(&self, prefix: &[u8]) -> Result<KvIterator, KvError>;

    /// Flush and close. Further operations fail with `Closed`.
    async fn shutdown(&self) -> Result<(), KvError>;

    /// Shut down and erase all persisted data.
    async fn destroy(&self) -> Result<(), KvError>;

    /// Store a single value.
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.apply(vec![WriteOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
        .await
    }

    /// Delete a single key. Deleting an absent key is not an error.
    async fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.apply(vec![WriteOp::Delete { key: key.to_vec() }])
            .await
    }

    /// Atomically store `values[i]` under `keys[i]`.
    async fn write_batch(&self, keys: Vec<Vec<u8>>, values: Vec<Vec<u8>>) -> Result<(), KvError> {
        if keys.len() != values.len() {
            return Err(KvError::InvalidBatch(format!(
                "{} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        let ops = keys
            .into_iter()
            .zip(values)
            .map(|(key, value)| WriteOp::Put { key, value })
            .collect();
        self.apply(ops).await
    }

    /// Atomically delete every key.
    async fn delete_batch(&self, keys: Vec<Vec<u8>>) -> Result<(), KvError> {
        let ops = keys.into_iter().map(|key| WriteOp::Delete { key }).collect();
        self.apply(ops).await
    }
}

/// Key types that can be staged in a [`Batch`].
pub trait KeyCodec {
    fn encode_key(&self) -> Vec<u8>;
}

impl KeyCodec for Vec<u8> {
    fn encode_key(&self) -> Vec<u8> {
        self.clone()
    }
}

impl<const N: usize> KeyCodec for [u8; N] {
    fn encode_key(&self) -> Vec<u8> {
        self.to_vec()
    }
}

/// Typed write batch. Accumulates operations and commits them with one
/// atomic [`KvStore::apply`].
pub struct Batch<'a, K: KeyCodec> {
    store: &'a dyn KvStore,
    ops: Vec<WriteOp>,
    _key: PhantomData<fn(&K)>,
}

impl<'a, K: KeyCodec> Batch<'a, K> {
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self {
            store,
            ops: Vec::new(),
            _key: PhantomData,
        }
    }

    pub fn put(&mut self, key: &K, value: Vec<u8>) {
        self.ops.push(WriteOp::Put {
            key: key.encode_key(),
            value,
        });
    }

    pub fn delete(&mut self, key: &K) {
        self.ops.push(WriteOp::Delete {
            key: key.encode_key(),
        });
    }

    /// Number of staged operations.
    pub fn size(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Commit all staged operations. An empty batch is a no-op.
    pub async fn apply(self) -> Result<(), KvError> {
        if self.ops.is_empty() {
            return Ok(());
        }
        self.store.apply(self.ops).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_put_get_delete() {
        let store = MemoryStore::new();

        store.put(b"k", b"v").await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), b"v".to_vec());

        store.delete(b"k").await.unwrap();
        assert!(matches!(store.get(b"k").await, Err(KvError::NotFound)));

        // Deleting an absent key is fine
        store.delete(b"k").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_batch_length_mismatch() {
        let store = MemoryStore::new();
        let result = store
            .write_batch(vec![b"a".to_vec(), b"b".to_vec()], vec![b"1".to_vec()])
            .await;

        assert!(matches!(result, Err(KvError::InvalidBatch(_))));
        assert!(
            matches!(store.get(b"a").await, Err(KvError::NotFound)),
            "Rejected batch must not write anything"
        );
    }

    #[tokio::test]
    async fn test_typed_batch_size_and_apply() {
        let store = MemoryStore::new();
        store.put(b"old", b"x").await.unwrap();

        let mut batch: Batch<'_, Vec<u8>> = Batch::new(&store);
        assert!(batch.is_empty());
        batch.put(&b"a".to_vec(), b"1".to_vec());
        batch.put(&b"b".to_vec(), b"2".to_vec());
        batch.delete(&b"old".to_vec());
        assert_eq!(batch.size(), 3);

        batch.apply().await.unwrap();

        assert_eq!(store.get(b"a").await.unwrap(), b"1".to_vec());
        assert_eq!(store.get(b"b").await.unwrap(), b"2".to_vec());
        assert!(matches!(store.get(b"old").await, Err(KvError::NotFound)));
    }

    #[tokio::test]
    async fn test_later_op_on_same_key_wins() {
        let store = MemoryStore::new();
        let mut batch: Batch<'_, [u8; 2]> = Batch::new(&store);
        batch.put(&[1, 1], b"first".to_vec());
        batch.delete(&[1, 1]);
        batch.put(&[1, 1], b"second".to_vec());
        batch.apply().await.unwrap();

        assert_eq!(store.get(&[1, 1]).await.unwrap(), b"second".to_vec());
    }

    #[test]
    fn test_write_op_key() {
        let put = WriteOp::Put {
            key: vec![1],
            value: vec![2],
        };
        let delete = WriteOp::Delete { key: vec![3] };
        assert_eq!(put.key(), &[1]);
        assert_eq!(delete.key(), &[3]);
    }
}
