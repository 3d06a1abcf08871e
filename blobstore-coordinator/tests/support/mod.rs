//! Scripted connection pool for driving get operations without real servers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use blobstore_coordinator::wire::{
    self, GetFlags, GetRequest, GetResponse, MessageInfo, ServerErrorCode,
};
use blobstore_coordinator::{Connection, ConnectionPool, PoolError};
use blobstore_types::{ClusterLayout, DataNodeId, PartitionId, PartitionLayout, StaticClusterMap};
use bytes::BytesMut;
use tokio::io::DuplexStream;

pub const PARTITION: u64 = 1;

/// What a scripted replica does with every request it receives.
#[derive(Debug, Clone)]
pub enum ReplicaBehavior {
    /// Respond with the given error code and no payload.
    Error(ServerErrorCode),
    /// Respond `NoError`, serving this blob content in the requested flavor.
    Blob(Vec<u8>),
    /// Accept the request and never respond.
    Silent,
    /// Refuse the connection outright.
    RefuseConnect,
    /// Accept the request and drop the connection without responding.
    Disconnect,
}

/// A [`ConnectionPool`] whose endpoints are scripted in-memory replicas.
///
/// Every checkout, checkin, and destroy is counted so tests can assert connection
/// conservation and the concurrency high-water mark.
#[derive(Debug)]
pub struct ScriptedPool {
    behaviors: HashMap<DataNodeId, ReplicaBehavior>,
    checkouts: AtomicUsize,
    checkins: AtomicUsize,
    destroys: AtomicUsize,
    open: AtomicUsize,
    max_open: AtomicUsize,
}

impl ScriptedPool {
    pub fn new(behaviors: HashMap<DataNodeId, ReplicaBehavior>) -> Arc<Self> {
        Arc::new(Self {
            behaviors,
            checkouts: AtomicUsize::new(0),
            checkins: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            open: AtomicUsize::new(0),
            max_open: AtomicUsize::new(0),
        })
    }

    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    /// Whether every successful checkout has been matched by a checkin or destroy.
    pub fn conserved(&self) -> bool {
        self.checkouts.load(Ordering::SeqCst)
            == self.checkins.load(Ordering::SeqCst) + self.destroys.load(Ordering::SeqCst)
    }

    /// Waits until all borrowed connections have been returned.
    pub async fn drained(&self) {
        for _ in 0..1_000 {
            if self.conserved() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("scripted pool never drained: {self:?}");
    }

    fn track_open(&self) {
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(open, Ordering::SeqCst);
    }

    fn track_close(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ConnectionPool for ScriptedPool {
    async fn checkout(
        &self,
        node: &DataNodeId,
        _timeout: Duration,
    ) -> Result<Connection, PoolError> {
        let behavior = self.behaviors.get(node).cloned().unwrap_or_else(|| {
            panic!("checkout against unscripted replica {node}");
        });

        if let ReplicaBehavior::RefuseConnect = behavior {
            return Err(PoolError::Unreachable {
                node: node.clone(),
                cause: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }

        self.checkouts.fetch_add(1, Ordering::SeqCst);
        self.track_open();

        let (client, server) = tokio::io::duplex(wire::MAX_FRAME_LEN);
        tokio::spawn(respond(server, behavior));

        Ok(Connection::new(node.clone(), Box::new(client)))
    }

    async fn checkin(&self, connection: Connection) {
        drop(connection);
        self.checkins.fetch_add(1, Ordering::SeqCst);
        self.track_close();
    }

    async fn destroy(&self, connection: Connection) {
        drop(connection);
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.track_close();
    }
}

/// Serves a single scripted request on the server half of a duplex transport.
async fn respond(mut server: DuplexStream, behavior: ReplicaBehavior) {
    let Ok(frame) = wire::read_frame(&mut server).await else {
        return;
    };
    let request = GetRequest::decode(frame).expect("scripted replica received a malformed request");

    let response = match behavior {
        ReplicaBehavior::Error(code) => GetResponse::error(request.correlation_id, code),
        ReplicaBehavior::Blob(content) => success_response(&request, &content),
        ReplicaBehavior::Silent => {
            // Hold the connection open without ever answering.
            std::future::pending::<()>().await;
            unreachable!()
        }
        ReplicaBehavior::Disconnect => return,
        ReplicaBehavior::RefuseConnect => unreachable!("refused at checkout"),
    };

    let _ = wire::write_frame(&mut server, &response.encode()).await;
    // Keep the transport open so the client can finish reading.
    std::future::pending::<()>().await;
}

/// Builds a `NoError` response serving `content` in the flavor the request asked for.
fn success_response(request: &GetRequest, content: &[u8]) -> GetResponse {
    let mut body = BytesMut::new();
    match request.flags {
        GetFlags::Blob => wire::encode_blob_data(content, &mut body),
        GetFlags::BlobUserMetadata => wire::encode_user_metadata(content, &mut body),
        GetFlags::BlobProperties | GetFlags::All => {
            let properties = wire::BlobProperties {
                blob_size: content.len() as u64,
                service_id: "scripted-replica".into(),
                content_type: None,
                creation_time_ms: 1_700_000_000_000,
                ttl_secs: None,
            };
            properties.encode(&mut body);
        }
    }

    let blob_id = request.blob_ids[0];
    GetResponse {
        correlation_id: request.correlation_id,
        error: ServerErrorCode::NoError,
        message_info: vec![MessageInfo {
            blob_id,
            size: body.len() as u64,
            deleted: false,
            expiration_ms: None,
        }],
        body: body.freeze(),
    }
}

/// A replica endpoint on the scripted test partition.
pub fn node(index: usize, datacenter: &str) -> DataNodeId {
    DataNodeId {
        host: "replica".into(),
        port: 7000 + index as u16,
        datacenter: datacenter.into(),
    }
}

/// Builds a cluster map with one partition over the given nodes, local to `dc1`.
pub fn cluster(nodes: &[DataNodeId]) -> Arc<StaticClusterMap> {
    Arc::new(StaticClusterMap::from_layout(ClusterLayout {
        local_datacenter: "dc1".into(),
        partitions: vec![PartitionLayout {
            id: PARTITION,
            replicas: nodes.to_vec(),
        }],
    }))
}

/// The partition id all scripted blobs live on.
pub fn partition_id() -> PartitionId {
    PartitionId::new(PARTITION)
}
