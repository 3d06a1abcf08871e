//! The coordinator read path of the blobstore.
//!
//! Given a blob id, the coordinator contacts the replica servers of the blob's partition in
//! parallel, interprets their responses against a quorum policy, and surfaces a single
//! definitive outcome: the requested payload, or a precise failure reason.
//!
//! It is designed as a library crate to be used by the front-end server; all of its state
//! apart from the connection pool is operation-local.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod context;
mod error;
mod get;
mod operation;
mod policy;
mod pool;
mod request;
pub mod wire;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use blobstore_types::{BlobId, ClusterMap};
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::time::Instant;

pub use crate::error::CoordinatorError;
pub use crate::get::{GetFlavor, GetPayload};
pub use crate::policy::{Completion, GetPolicy, OperationPolicy};
pub use crate::pool::{
    Connection, ConnectionPool, ConnectionStream, PoolError, TcpConnectionPool,
};
pub use crate::wire::BlobProperties;

use crate::context::OperationContext;
use crate::get::GetDecider;
use crate::operation::Operation;
use crate::wire::GetRequest;

/// Type alias for blob payload streams handed to callers.
pub type PayloadStream = BoxStream<'static, io::Result<Bytes>>;

/// Coordinator tunables.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Identifies this client process to the storage servers.
    pub client_id: String,
    /// Maximum concurrent replica attempts per get operation.
    pub get_parallelism: usize,
    /// Successful responses required to complete a get operation.
    pub get_success_target: usize,
    /// Maximum concurrent pooled connections per replica endpoint.
    pub max_connections_per_endpoint: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            client_id: concat!("blobstore-coordinator/", env!("CARGO_PKG_VERSION")).into(),
            get_parallelism: 2,
            get_success_target: 1,
            max_connections_per_endpoint: 5,
        }
    }
}

/// The client-side engine executing multi-replica operations on behalf of the front end.
///
/// Cheap to clone; all clones share the same connection pool and correlation id sequence.
#[derive(Debug, Clone)]
pub struct Coordinator(Arc<CoordinatorInner>);

#[derive(Debug)]
struct CoordinatorInner {
    cluster: Arc<dyn ClusterMap>,
    pool: Arc<dyn ConnectionPool>,
    config: CoordinatorConfig,
    correlation_ids: Arc<AtomicU32>,
    closed: AtomicBool,
}

impl Coordinator {
    /// Creates a coordinator with a process-wide TCP connection pool.
    pub fn new(cluster: Arc<dyn ClusterMap>, config: CoordinatorConfig) -> Self {
        let pool = Arc::new(TcpConnectionPool::new(config.max_connections_per_endpoint));
        Self::with_pool(cluster, pool, config)
    }

    /// Creates a coordinator over an externally provided connection pool.
    pub fn with_pool(
        cluster: Arc<dyn ClusterMap>,
        pool: Arc<dyn ConnectionPool>,
        config: CoordinatorConfig,
    ) -> Self {
        Self(Arc::new(CoordinatorInner {
            cluster,
            pool,
            config,
            correlation_ids: Arc::new(AtomicU32::new(1)),
            closed: AtomicBool::new(false),
        }))
    }

    /// Streams the blob data of the given blob.
    pub async fn get_blob(
        &self,
        blob_id: &BlobId,
        timeout: Duration,
    ) -> Result<PayloadStream, CoordinatorError> {
        match self.execute(blob_id, GetFlavor::Blob, timeout).await? {
            GetPayload::Blob(bytes) => {
                Ok(futures_util::stream::once(async move { Ok(bytes) }).boxed())
            }
            other => Err(unexpected_payload(GetFlavor::Blob, &other)),
        }
    }

    /// Fetches the properties of the given blob.
    pub async fn get_blob_properties(
        &self,
        blob_id: &BlobId,
        timeout: Duration,
    ) -> Result<BlobProperties, CoordinatorError> {
        match self
            .execute(blob_id, GetFlavor::BlobProperties, timeout)
            .await?
        {
            GetPayload::Properties(properties) => Ok(properties),
            other => Err(unexpected_payload(GetFlavor::BlobProperties, &other)),
        }
    }

    /// Fetches the user metadata of the given blob.
    pub async fn get_user_metadata(
        &self,
        blob_id: &BlobId,
        timeout: Duration,
    ) -> Result<Bytes, CoordinatorError> {
        match self
            .execute(blob_id, GetFlavor::UserMetadata, timeout)
            .await?
        {
            GetPayload::UserMetadata(bytes) => Ok(bytes),
            other => Err(unexpected_payload(GetFlavor::UserMetadata, &other)),
        }
    }

    /// Refuses new operations.
    ///
    /// Operations already in flight run to their natural deadline; their connections drain
    /// back into the pool as the underlying I/O resolves.
    pub fn close(&self) {
        if !self.0.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("coordinator closed, refusing new operations");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    async fn execute(
        &self,
        blob_id: &BlobId,
        flavor: GetFlavor,
        timeout: Duration,
    ) -> Result<GetPayload, CoordinatorError> {
        if self.is_closed() {
            return Err(CoordinatorError::StoreUnavailable);
        }

        let inner = &*self.0;
        let Some(partition) = inner.cluster.partition(blob_id.partition()) else {
            tracing::debug!(
                blob_id = %blob_id,
                partition = %blob_id.partition(),
                "blob id names a partition unknown to the cluster map"
            );
            return Err(CoordinatorError::BlobDoesNotExist);
        };

        let context = OperationContext::new(
            inner.config.client_id.clone(),
            inner.cluster.local_datacenter().to_owned(),
            Arc::clone(&inner.correlation_ids),
        );
        let policy = GetPolicy::new(
            inner.cluster.local_datacenter(),
            partition,
            inner.config.get_parallelism,
            inner.config.get_success_target,
        );
        let decider = GetDecider::new(partition.replica_count());
        let request = GetRequest {
            correlation_id: context.operation_id,
            client_id: context.client_id.clone(),
            flags: flavor.flags(),
            partition: blob_id.partition(),
            blob_ids: vec![*blob_id],
        };

        let start = Instant::now();
        let result = Operation {
            context,
            policy,
            decider,
            request,
            flavor,
            pool: Arc::clone(&inner.pool),
            channel_capacity: partition.replica_count(),
        }
        .execute(timeout)
        .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(error) => error.kind(),
        };
        merni::distribution!(
            "coordinator.get.latency"@s: start.elapsed(),
            "flavor" => flavor.kind(),
            "outcome" => outcome
        );

        result
    }
}

fn unexpected_payload(flavor: GetFlavor, payload: &GetPayload) -> CoordinatorError {
    let got = match payload {
        GetPayload::Blob(_) => "blob",
        GetPayload::Properties(_) => "blob_properties",
        GetPayload::UserMetadata(_) => "user_metadata",
    };
    CoordinatorError::UnexpectedInternalError(format!(
        "replica answered a {} request with a {got} payload",
        flavor.kind()
    ))
}
