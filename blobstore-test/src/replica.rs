//! In-process replica servers speaking the replica wire protocol.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use blobstore_coordinator::wire::{
    self, BlobProperties, GetFlags, GetRequest, GetResponse, MessageInfo, ServerErrorCode,
};
use blobstore_types::{BlobId, ClusterLayout, DataNodeId, PartitionLayout};
use bytes::BytesMut;
use tokio::net::{TcpListener, TcpStream};

/// How a mock replica answers requests for one blob.
///
/// Blobs without a scripted fate answer [`ServerErrorCode::BlobNotFound`], which is what a
/// real replica does for an id it has never seen.
#[derive(Debug, Clone)]
pub enum BlobFate {
    /// Serve this content with `NoError`.
    Served(Vec<u8>),
    /// Answer with a delete tombstone.
    Deleted,
    /// Answer as expired.
    Expired,
    /// Answer with a local I/O fault.
    IoError,
    /// Accept the request and never answer.
    Silent,
}

/// A replica server listening on a random localhost port.
#[derive(Debug)]
pub struct MockReplica {
    node: DataNodeId,
    blobs: Arc<Mutex<HashMap<BlobId, BlobFate>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockReplica {
    /// Starts a replica tagged with the given datacenter.
    pub async fn start(datacenter: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let blobs = Arc::new(Mutex::new(HashMap::new()));
        let handle = tokio::spawn(accept_loop(listener, Arc::clone(&blobs)));

        Self {
            node: DataNodeId {
                host: "127.0.0.1".into(),
                port: addr.port(),
                datacenter: datacenter.into(),
            },
            blobs,
            handle,
        }
    }

    /// The endpoint this replica listens on.
    pub fn node(&self) -> &DataNodeId {
        &self.node
    }

    /// Scripts the fate of one blob on this replica.
    pub fn put(&self, blob_id: BlobId, fate: BlobFate) {
        self.blobs.lock().unwrap().insert(blob_id, fate);
    }
}

impl Drop for MockReplica {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Builds a one-partition cluster layout over the given replicas.
pub fn layout(local_datacenter: &str, partition: u64, replicas: &[&MockReplica]) -> ClusterLayout {
    ClusterLayout {
        local_datacenter: local_datacenter.into(),
        partitions: vec![PartitionLayout {
            id: partition,
            replicas: replicas
                .iter()
                .map(|replica| replica.node().clone())
                .collect(),
        }],
    }
}

async fn accept_loop(listener: TcpListener, blobs: Arc<Mutex<HashMap<BlobId, BlobFate>>>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        tokio::spawn(serve_connection(stream, Arc::clone(&blobs)));
    }
}

/// Serves sequential requests on one connection until the peer goes away.
async fn serve_connection(mut stream: TcpStream, blobs: Arc<Mutex<HashMap<BlobId, BlobFate>>>) {
    loop {
        let Ok(frame) = wire::read_frame(&mut stream).await else {
            return;
        };
        let Ok(request) = GetRequest::decode(frame) else {
            return;
        };

        let blob_id = request.blob_ids[0];
        let fate = blobs.lock().unwrap().get(&blob_id).cloned();

        let response = match fate {
            None => GetResponse::error(request.correlation_id, ServerErrorCode::BlobNotFound),
            Some(BlobFate::Served(content)) => serve_content(&request, &content),
            Some(BlobFate::Deleted) => {
                GetResponse::error(request.correlation_id, ServerErrorCode::BlobDeleted)
            }
            Some(BlobFate::Expired) => {
                GetResponse::error(request.correlation_id, ServerErrorCode::BlobExpired)
            }
            Some(BlobFate::IoError) => {
                GetResponse::error(request.correlation_id, ServerErrorCode::IoError)
            }
            Some(BlobFate::Silent) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        };

        if wire::write_frame(&mut stream, &response.encode()).await.is_err() {
            return;
        }
    }
}

/// Builds a `NoError` response serving `content` in the flavor the request asked for.
fn serve_content(request: &GetRequest, content: &[u8]) -> GetResponse {
    let properties = BlobProperties {
        blob_size: content.len() as u64,
        service_id: "mock-replica".into(),
        content_type: Some("application/octet-stream".into()),
        creation_time_ms: 1_700_000_000_000,
        ttl_secs: None,
    };

    let mut body = BytesMut::new();
    match request.flags {
        GetFlags::Blob => wire::encode_blob_data(content, &mut body),
        GetFlags::BlobUserMetadata => wire::encode_user_metadata(content, &mut body),
        GetFlags::BlobProperties => properties.encode(&mut body),
        GetFlags::All => {
            properties.encode(&mut body);
            wire::encode_user_metadata(&[], &mut body);
            wire::encode_blob_data(content, &mut body);
        }
    }

    GetResponse {
        correlation_id: request.correlation_id,
        error: ServerErrorCode::NoError,
        message_info: vec![MessageInfo {
            blob_id: request.blob_ids[0],
            size: body.len() as u64,
            deleted: false,
            expiration_ms: None,
        }],
        body: body.freeze(),
    }
}
