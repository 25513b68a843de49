use std::sync::Arc;

use bytes::Bytes;
use kova_ipfs_client::{
    ClientConfig, ErrorKind, FileMetadataStore, IpfsClient, MemoryTransport, Metadata,
    MetricsObserver, StoredItem,
};

fn client_with(node: Arc<MemoryTransport>, metadata_dir: &std::path::Path) -> IpfsClient {
    let mut config = ClientConfig::default();
    config.retry.max_attempts = 2;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.metadata_dir = metadata_dir.to_path_buf();

    IpfsClient::builder(config)
        .transport(node)
        .metadata_store(Arc::new(FileMetadataStore::new(metadata_dir)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn batch_round_trip_through_public_api() {
    let temp = tempfile::tempdir().unwrap();
    let node = Arc::new(MemoryTransport::new());
    let client = client_with(node.clone(), temp.path());

    let payloads: Vec<String> = (0..20).map(|i| format!("reading #{}", i)).collect();
    let added = client.add_batch(payloads.clone()).await;
    assert!(added.all_succeeded());

    let addresses: Vec<_> = added.into_iter().map(|r| r.unwrap()).collect();
    let fetched = client.get_batch(&addresses).await;
    for (payload, data) in payloads.iter().zip(fetched) {
        assert_eq!(data.unwrap(), Bytes::from(payload.clone()));
    }
    assert_eq!(node.pin_count(), 20);
    client.close().await;
}

#[tokio::test]
async fn metadata_survives_a_new_client() {
    let temp = tempfile::tempdir().unwrap();
    let node = Arc::new(MemoryTransport::new());

    let address = {
        let client = client_with(node.clone(), temp.path());
        let item = StoredItem::new("21.5C")
            .named("reading.txt")
            .with_metadata(Metadata::new().with("sensor", "t-01").with("calibrated", true));
        client.add(item).await.unwrap()
    };

    let client = client_with(node, temp.path());
    let metadata = client.get_metadata(&address).await.unwrap().unwrap();
    assert_eq!(metadata, Metadata::new().with("sensor", "t-01").with("calibrated", true));
    assert_eq!(client.list_metadata().await.unwrap(), vec![address]);
}

#[tokio::test]
async fn failures_carry_their_kind() {
    let temp = tempfile::tempdir().unwrap();
    let node = Arc::new(MemoryTransport::new());
    let metrics = Arc::new(MetricsObserver::new());
    let client = IpfsClient::builder(ClientConfig {
        metadata_dir: temp.path().to_path_buf(),
        ..ClientConfig::default()
    })
    .transport(node.clone())
    .metadata_store(Arc::new(FileMetadataStore::new(temp.path())))
    .observer(metrics.clone())
    .build()
    .unwrap();

    node.reject(Bytes::from_static(b"forbidden"));
    let result = client.add_batch(vec!["ok", "forbidden"]).await;
    assert_eq!(result.success_count(), 1);
    let err = result.get(1).unwrap().as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Ipfs);
    assert!(err.to_string().contains("rejected"));

    assert_eq!(metrics.snapshot().batch_items_failed, 1);
}
