use super::run::{load_or_create, open_store, resolve_paths};
use tessera::node::{ChunkStore, Inventory};

/// Summarize stored bundles per quorum
pub async fn execute(
    config_path: Option<String>,
    data_dir: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config_path, data_dir) = resolve_paths(config_path, data_dir);
    let config = load_or_create(&config_path, &data_dir)?;

    let kv = open_store(&config, &data_dir).await?;
    let inventory = ChunkStore::new(kv.clone()).inventory().await;
    kv.shutdown().await?;

    println!("{}", render(&inventory?));
    Ok(())
}

fn render(inventory: &Inventory) -> String {
    let mut out = format!(
        "Blobs: {}\nTotal bytes: {}\n",
        inventory.blobs,
        inventory.total_bytes()
    );
    if inventory.by_quorum.is_empty() {
        out.push_str("No bundles stored\n");
    }
    for (quorum, usage) in &inventory.by_quorum {
        out.push_str(&format!(
            "  quorum {:>3}: {} bundles, {} bytes\n",
            quorum, usage.bundles, usage.bytes
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera::kvstore::MemoryStore;
    use tessera::node::BlobBundles;
    use tessera::protocol::{
        Batch, BatchHeader, BlobCertificate, BlobCommitment, BlobHeader, PaymentMetadata,
    };

    #[tokio::test]
    async fn test_render_counts_per_quorum() {
        let store = ChunkStore::new(Arc::new(MemoryStore::new()));
        let cert = BlobCertificate {
            blob_header: BlobHeader {
                version: 0,
                quorum_numbers: vec![0, 1],
                commitment: BlobCommitment {
                    data_commitment: [4u8; 32],
                    length: 16,
                },
                payment: PaymentMetadata {
                    account_id: "acct".to_string(),
                    salt: 1,
                },
            },
            relay_keys: vec![0],
        };
        let mut bundles = BlobBundles::new(cert.blob_key());
        bundles.bundles.insert(0, vec![1u8; 10]);
        bundles.bundles.insert(1, vec![2u8; 6]);
        let batch = Batch {
            header: BatchHeader {
                batch_root: [0u8; 32],
                reference_block_number: 1,
            },
            blob_certificates: vec![cert],
        };
        store.store_batch(&batch, &[bundles]).await.unwrap();

        let rendered = render(&store.inventory().await.unwrap());

        assert!(rendered.contains("Blobs: 1"));
        assert!(rendered.contains("Total bytes: 16"));
        assert!(rendered.contains("quorum   1: 1 bundles, 6 bytes"));
    }

    #[tokio::test]
    async fn test_execute_on_empty_data_dir() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        execute(None, Some(temp_dir.path().to_string_lossy().to_string()))
            .await
            .unwrap();
        assert!(temp_dir.path().join("config.toml").exists());
    }
}
