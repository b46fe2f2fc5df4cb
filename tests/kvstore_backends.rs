// Integration tests for the key-value store backends
//
// The same contract is exercised against SqliteStore and MemoryStore:
// - point reads, overwrites and deletes
// - ordered, bounded prefix iteration over snapshots
// - all-or-nothing batches
// - shutdown and destroy

use std::sync::Arc;
use tempfile::TempDir;
use tessera::kvstore::{Batch, KvError, KvStore, MemoryStore, SqliteStore, Table, WriteOp};

async fn sqlite(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(dir.path().join("kv.db"))
        .await
        .expect("SQLite store should open")
}

async fn check_point_operations(store: &dyn KvStore) {
    store.put(b"alpha", b"1").await.unwrap();
    store.put(b"alpha", b"2").await.unwrap();
    assert_eq!(store.get(b"alpha").await.unwrap(), b"2".to_vec(), "Last write wins");

    assert!(matches!(store.get(b"beta").await, Err(KvError::NotFound)));

    store.delete(b"alpha").await.unwrap();
    store.delete(b"alpha").await.unwrap();
    assert!(matches!(store.get(b"alpha").await, Err(KvError::NotFound)));
}

async fn check_prefix_iteration(store: &dyn KvStore) {
    let keys: Vec<Vec<u8>> = vec![
        b"chunks/b".to_vec(),
        b"chunks/a".to_vec(),
        b"chunks0".to_vec(),
        b"chunkr".to_vec(),
        vec![0xff, 0xff],
        vec![0xff, 0xff, 0x01],
    ];
    let values: Vec<Vec<u8>> = (0..keys.len() as u8).map(|i| vec![i]).collect();
    store.write_batch(keys, values).await.unwrap();

    let listed: Vec<Vec<u8>> = store
        .iter_prefix(b"chunks/")
        .await
        .unwrap()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(listed, vec![b"chunks/a".to_vec(), b"chunks/b".to_vec()]);

    let tail: Vec<Vec<u8>> = store
        .iter_prefix(&[0xff, 0xff])
        .await
        .unwrap()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(
        tail,
        vec![vec![0xff, 0xff], vec![0xff, 0xff, 0x01]],
        "All-0xff prefix has no upper bound"
    );

    let snapshot = store.iter_prefix(b"chunks/").await.unwrap();
    store.put(b"chunks/c", b"late").await.unwrap();
    assert_eq!(snapshot.count(), 2, "Iterators are snapshots");
}

async fn check_batch_atomicity(store: &dyn KvStore) {
    store.put(b"keep", b"v").await.unwrap();

    let mismatch = store
        .write_batch(vec![b"x".to_vec(), b"y".to_vec()], vec![b"1".to_vec()])
        .await;
    assert!(matches!(mismatch, Err(KvError::InvalidBatch(_))));
    assert!(matches!(store.get(b"x").await, Err(KvError::NotFound)));

    store
        .apply(vec![
            WriteOp::Put {
                key: b"x".to_vec(),
                value: b"1".to_vec(),
            },
            WriteOp::Delete {
                key: b"keep".to_vec(),
            },
            WriteOp::Put {
                key: b"x".to_vec(),
                value: b"2".to_vec(),
            },
        ])
        .await
        .unwrap();
    assert_eq!(store.get(b"x").await.unwrap(), b"2".to_vec());
    assert!(matches!(store.get(b"keep").await, Err(KvError::NotFound)));

    store
        .delete_batch(vec![b"x".to_vec(), b"never-written".to_vec()])
        .await
        .unwrap();
    assert!(matches!(store.get(b"x").await, Err(KvError::NotFound)));
}

async fn check_typed_batch(store: &dyn KvStore) {
    let table = Table::new("relay-blob");
    let mut batch: Batch<'_, Vec<u8>> = Batch::new(store);
    batch.put(&table.key(b"one"), b"1".to_vec());
    batch.put(&table.key(b"two"), b"2".to_vec());
    batch.delete(&table.key(b"one"));
    assert_eq!(batch.size(), 3);
    batch.apply().await.unwrap();

    let rows: Vec<(Vec<u8>, Vec<u8>)> = store.iter_prefix(table.prefix()).await.unwrap().collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(table.strip(&rows[0].0), Some(&b"two"[..]));

    let empty: Batch<'_, Vec<u8>> = Batch::new(store);
    assert!(empty.is_empty());
    empty.apply().await.unwrap();
}

async fn check_shutdown(store: &dyn KvStore) {
    store.put(b"k", b"v").await.unwrap();
    store.shutdown().await.unwrap();

    assert!(matches!(store.get(b"k").await, Err(KvError::Closed)));
    assert!(matches!(store.put(b"k", b"w").await, Err(KvError::Closed)));
    assert!(matches!(store.iter_prefix(b"").await, Err(KvError::Closed)));
}

#[tokio::test]
async fn test_memory_contract() {
    check_point_operations(&MemoryStore::new()).await;
    check_prefix_iteration(&MemoryStore::new()).await;
    check_batch_atomicity(&MemoryStore::new()).await;
    check_typed_batch(&MemoryStore::new()).await;
    check_shutdown(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_sqlite_contract() {
    let dir = TempDir::new().unwrap();
    check_point_operations(&sqlite(&dir).await).await;

    let dir = TempDir::new().unwrap();
    check_prefix_iteration(&sqlite(&dir).await).await;

    let dir = TempDir::new().unwrap();
    check_batch_atomicity(&sqlite(&dir).await).await;

    let dir = TempDir::new().unwrap();
    check_typed_batch(&sqlite(&dir).await).await;

    let dir = TempDir::new().unwrap();
    check_shutdown(&sqlite(&dir).await).await;
}

#[tokio::test]
async fn test_sqlite_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = sqlite(&dir).await;
        store.put(b"durable", b"yes").await.unwrap();
        store.shutdown().await.unwrap();
    }

    let reopened = sqlite(&dir).await;
    assert_eq!(reopened.get(b"durable").await.unwrap(), b"yes".to_vec());
}

#[tokio::test]
async fn test_sqlite_destroy_removes_files() {
    let dir = TempDir::new().unwrap();
    let store = sqlite(&dir).await;
    store.put(b"k", b"v").await.unwrap();
    let path = store.path().to_path_buf();

    store.destroy().await.unwrap();

    assert!(!path.exists(), "Database file should be removed");
    assert!(matches!(store.get(b"k").await, Err(KvError::Closed)));
}

#[tokio::test]
async fn test_concurrent_batches_through_shared_handle() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn KvStore> = Arc::new(sqlite(&dir).await);

    let mut handles = Vec::new();
    for writer in 0u8..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let keys = (0u8..16).map(|i| vec![b'w', writer, i]).collect();
            let values = (0u8..16).map(|i| vec![writer, i]).collect();
            store.write_batch(keys, values).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.iter_prefix(b"w").await.unwrap().count(), 8 * 16);
}
