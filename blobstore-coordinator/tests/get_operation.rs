//! End-to-end get operation scenarios against scripted replicas.

mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use blobstore_coordinator::wire::ServerErrorCode;
use blobstore_coordinator::{Coordinator, CoordinatorConfig, CoordinatorError};
use blobstore_types::{BlobId, DataNodeId, PartitionId};
use futures_util::TryStreamExt;

use support::{ReplicaBehavior, ScriptedPool, cluster, node, partition_id};

const TIMEOUT: Duration = Duration::from_millis(5000);

fn coordinator(
    behaviors: Vec<(DataNodeId, ReplicaBehavior)>,
) -> (Coordinator, Arc<ScriptedPool>, BlobId) {
    let nodes: Vec<_> = behaviors.iter().map(|(node, _)| node.clone()).collect();
    let pool = ScriptedPool::new(behaviors.into_iter().collect::<HashMap<_, _>>());
    let coordinator = Coordinator::with_pool(
        cluster(&nodes),
        Arc::clone(&pool) as Arc<dyn blobstore_coordinator::ConnectionPool>,
        CoordinatorConfig::default(),
    );
    (coordinator, pool, BlobId::new(partition_id()))
}

async fn collect(stream: blobstore_coordinator::PayloadStream) -> Vec<u8> {
    let chunks: Vec<_> = stream.try_collect().await.unwrap();
    chunks.concat()
}

#[tokio::test(start_paused = true)]
async fn happy_path_returns_first_payload() {
    let (coordinator, pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Blob(b"hello".to_vec())),
        (node(2, "dc1"), ReplicaBehavior::Silent),
        (node(3, "dc1"), ReplicaBehavior::Silent),
    ]);

    let stream = coordinator.get_blob(&blob_id, TIMEOUT).await.unwrap();
    assert_eq!(collect(stream).await, b"hello");

    // With parallelism 2, at most two replicas were ever contacted.
    assert!(pool.checkouts() <= 2);
}

#[tokio::test(start_paused = true)]
async fn single_tombstone_wins_over_not_found() {
    let (coordinator, _pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Error(ServerErrorCode::BlobDeleted)),
        (node(2, "dc1"), ReplicaBehavior::Error(ServerErrorCode::BlobNotFound)),
        (node(3, "dc1"), ReplicaBehavior::Silent),
    ]);

    let err = coordinator.get_blob(&blob_id, TIMEOUT).await.err().unwrap();
    assert_eq!(err, CoordinatorError::BlobDeleted);
}

#[tokio::test(start_paused = true)]
async fn unanimous_not_found_means_the_blob_does_not_exist() {
    let (coordinator, _pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Error(ServerErrorCode::BlobNotFound)),
        (node(2, "dc1"), ReplicaBehavior::Error(ServerErrorCode::BlobNotFound)),
        (node(3, "dc1"), ReplicaBehavior::Error(ServerErrorCode::BlobNotFound)),
    ]);

    let err = coordinator.get_blob(&blob_id, TIMEOUT).await.err().unwrap();
    assert_eq!(err, CoordinatorError::BlobDoesNotExist);
}

#[tokio::test(start_paused = true)]
async fn non_unanimous_not_found_is_unavailability() {
    // Only two of three replicas reported not-found; the third failed in transport,
    // so the blob may still exist there.
    let (coordinator, _pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Error(ServerErrorCode::BlobNotFound)),
        (node(2, "dc1"), ReplicaBehavior::Disconnect),
        (node(3, "dc1"), ReplicaBehavior::Error(ServerErrorCode::BlobNotFound)),
    ]);

    let err = coordinator.get_blob(&blob_id, TIMEOUT).await.err().unwrap();
    assert_eq!(err, CoordinatorError::StoreUnavailable);
}

#[tokio::test(start_paused = true)]
async fn two_expired_reports_reach_quorum() {
    let (coordinator, _pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Error(ServerErrorCode::BlobExpired)),
        (node(2, "dc1"), ReplicaBehavior::Error(ServerErrorCode::BlobExpired)),
        (node(3, "dc1"), ReplicaBehavior::Disconnect),
    ]);

    let err = coordinator.get_blob(&blob_id, TIMEOUT).await.err().unwrap();
    assert_eq!(err, CoordinatorError::BlobExpired);
}

#[tokio::test(start_paused = true)]
async fn one_expired_report_does_not_reach_quorum() {
    let (coordinator, _pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Error(ServerErrorCode::BlobExpired)),
        (node(2, "dc1"), ReplicaBehavior::Disconnect),
        (node(3, "dc1"), ReplicaBehavior::Disconnect),
    ]);

    let err = coordinator.get_blob(&blob_id, TIMEOUT).await.err().unwrap();
    assert_eq!(err, CoordinatorError::StoreUnavailable);
}

#[tokio::test(start_paused = true)]
async fn silent_replicas_hit_the_deadline() {
    let (coordinator, pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Silent),
        (node(2, "dc1"), ReplicaBehavior::Silent),
        (node(3, "dc1"), ReplicaBehavior::Silent),
    ]);

    let start = tokio::time::Instant::now();
    let err = coordinator.get_blob(&blob_id, TIMEOUT).await.err().unwrap();
    assert_eq!(err, CoordinatorError::OperationTimedOut);

    let elapsed = start.elapsed();
    assert!(elapsed >= TIMEOUT);
    assert!(elapsed < TIMEOUT + Duration::from_millis(100));

    // Abandoned attempts still hand their connections back as their I/O resolves.
    pool.drained().await;
}

#[tokio::test(start_paused = true)]
async fn a_success_wins_over_concurrent_errors() {
    let (coordinator, _pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Error(ServerErrorCode::IoError)),
        (node(2, "dc1"), ReplicaBehavior::Error(ServerErrorCode::BlobNotFound)),
        (node(3, "dc1"), ReplicaBehavior::Blob(b"still here".to_vec())),
    ]);

    let stream = coordinator.get_blob(&blob_id, TIMEOUT).await.unwrap();
    assert_eq!(collect(stream).await, b"still here");
}

#[tokio::test(start_paused = true)]
async fn remote_replicas_are_fallbacks() {
    // Both local replicas fail in transport; the remote one serves the blob.
    let (coordinator, _pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Disconnect),
        (node(2, "dc1"), ReplicaBehavior::RefuseConnect),
        (node(3, "dc2"), ReplicaBehavior::Blob(b"from afar".to_vec())),
    ]);

    let stream = coordinator.get_blob(&blob_id, TIMEOUT).await.unwrap();
    assert_eq!(collect(stream).await, b"from afar");
}

#[tokio::test(start_paused = true)]
async fn dispatch_never_exceeds_parallelism() {
    let (coordinator, pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Silent),
        (node(2, "dc1"), ReplicaBehavior::Silent),
        (node(3, "dc1"), ReplicaBehavior::Silent),
        (node(4, "dc1"), ReplicaBehavior::Silent),
    ]);

    let _ = coordinator
        .get_blob(&blob_id, Duration::from_millis(100))
        .await
        .err().unwrap();

    assert!(pool.max_open() <= 2, "max open: {}", pool.max_open());
}

#[tokio::test(start_paused = true)]
async fn connections_are_conserved_across_mixed_outcomes() {
    let (coordinator, pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Error(ServerErrorCode::IoError)),
        (node(2, "dc1"), ReplicaBehavior::Disconnect),
        (node(3, "dc1"), ReplicaBehavior::Silent),
    ]);

    let _ = coordinator
        .get_blob(&blob_id, Duration::from_millis(200))
        .await
        .err().unwrap();

    pool.drained().await;
    assert!(pool.checkouts() >= 2);
}

#[tokio::test(start_paused = true)]
async fn unexpected_server_codes_fail_the_operation() {
    let (coordinator, _pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Error(ServerErrorCode::Unknown(99))),
        (node(2, "dc1"), ReplicaBehavior::Silent),
        (node(3, "dc1"), ReplicaBehavior::Silent),
    ]);

    let err = coordinator.get_blob(&blob_id, TIMEOUT).await.err().unwrap();
    assert!(matches!(err, CoordinatorError::UnexpectedInternalError(_)));
}

#[tokio::test(start_paused = true)]
async fn properties_and_user_metadata_flavors_deserialize() {
    let (coordinator, _pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Blob(b"content".to_vec())),
        (node(2, "dc1"), ReplicaBehavior::Silent),
        (node(3, "dc1"), ReplicaBehavior::Silent),
    ]);

    let properties = coordinator
        .get_blob_properties(&blob_id, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(properties.blob_size, 7);
    assert_eq!(properties.service_id, "scripted-replica");

    let metadata = coordinator
        .get_user_metadata(&blob_id, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(metadata.as_ref(), b"content");
}

#[tokio::test(start_paused = true)]
async fn closed_coordinator_refuses_new_operations() {
    let (coordinator, pool, blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Blob(b"hello".to_vec())),
    ]);

    coordinator.close();
    assert!(coordinator.is_closed());

    let err = coordinator.get_blob(&blob_id, TIMEOUT).await.err().unwrap();
    assert_eq!(err, CoordinatorError::StoreUnavailable);
    assert_eq!(pool.checkouts(), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_partitions_read_as_missing_blobs() {
    let (coordinator, _pool, _blob_id) = coordinator(vec![
        (node(1, "dc1"), ReplicaBehavior::Blob(b"hello".to_vec())),
    ]);

    let foreign = BlobId::new(PartitionId::new(999));
    let err = coordinator.get_blob(&foreign, TIMEOUT).await.err().unwrap();
    assert_eq!(err, CoordinatorError::BlobDoesNotExist);
}
