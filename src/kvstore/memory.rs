//! In-memory key-value store.

use super::{KvError, KvIterator, KvStore, WriteOp};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// `BTreeMap`-backed store. Ordered, so prefix iteration is a range scan.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> Result<usize, KvError> {
        self.ensure_open()?;
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, KvError> {
        Ok(self.len()? == 0)
    }

    fn ensure_open(&self) -> Result<(), KvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> KvError {
    KvError::Storage("memory store lock poisoned".to_string())
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn apply(&self, ops: Vec<WriteOp>) -> Result<(), KvError> {
        self.ensure_open()?;
        let mut entries = self.entries.write().map_err(poisoned)?;
        // Nothing below can fail, so the batch is all-or-nothing under the lock.
        for op in ops {
            match op {
                WriteOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>, KvError> {
        self.ensure_open()?;
        let entries = self.entries.read().map_err(poisoned)?;
        entries.get(key).cloned().ok_or(KvError::NotFound)
    }

    async fn iter_prefix(&self, prefix: &[u8]) -> Result<KvIterator, KvError> {
        self.ensure_open()?;
        let entries = self.entries.read().map_err(poisoned)?;
        let snapshot = entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(KvIterator::from_sorted(snapshot))
    }

    async fn shutdown(&self) -> Result<(), KvError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), KvError> {
        self.closed.store(true, Ordering::Release);
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.clear();
        Ok(())
    }
}
