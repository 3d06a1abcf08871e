//! Connection pooling for replica transports.
//!
//! The pool is the only resource shared across operations. Operations borrow a
//! [`Connection`] with [`ConnectionPool::checkout`], and must return every borrowed
//! connection through exactly one [`checkin`](ConnectionPool::checkin) (transport still
//! healthy) or [`destroy`](ConnectionPool::destroy) (transport no longer trusted).

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use blobstore_types::DataNodeId;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Errors produced while checking out a pooled connection.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No connection became available within the checkout timeout.
    #[error("timed out waiting for a connection to {0}")]
    Timeout(DataNodeId),

    /// The endpoint could not be reached.
    #[error("failed to connect to {node}: {cause}")]
    Unreachable {
        /// The endpoint that was dialed.
        node: DataNodeId,
        /// The underlying connect error.
        #[source]
        cause: io::Error,
    },
}

/// The byte transport underneath a pooled connection.
///
/// Production pools hand out TCP streams; tests substitute in-memory duplex transports.
pub trait ConnectionStream: AsyncRead + AsyncWrite + fmt::Debug + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + fmt::Debug + Send + Unpin> ConnectionStream for T {}

/// A transport to a single replica endpoint, borrowed from a [`ConnectionPool`].
#[derive(Debug)]
pub struct Connection {
    node: DataNodeId,
    stream: Box<dyn ConnectionStream>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    /// Creates an unpooled connection over an arbitrary transport.
    pub fn new(node: DataNodeId, stream: Box<dyn ConnectionStream>) -> Self {
        Self {
            node,
            stream,
            _permit: None,
        }
    }

    fn pooled(
        node: DataNodeId,
        stream: Box<dyn ConnectionStream>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            node,
            stream,
            _permit: Some(permit),
        }
    }

    /// The endpoint this connection talks to.
    pub fn node(&self) -> &DataNodeId {
        &self.node
    }

    /// The underlying byte transport.
    pub fn stream_mut(&mut self) -> &mut dyn ConnectionStream {
        &mut *self.stream
    }
}

/// Borrow and return transports to replica endpoints.
///
/// The pool is process-wide and internally synchronized; fairness across operations is a
/// pool concern, not the operation's.
#[async_trait::async_trait]
pub trait ConnectionPool: fmt::Debug + Send + Sync + 'static {
    /// Borrows a connection to the given endpoint, waiting at most `timeout`.
    async fn checkout(
        &self,
        node: &DataNodeId,
        timeout: Duration,
    ) -> Result<Connection, PoolError>;

    /// Returns a healthy connection for reuse.
    async fn checkin(&self, connection: Connection);

    /// Discards a connection whose transport can no longer be trusted.
    async fn destroy(&self, connection: Connection);
}

/// A process-wide TCP connection pool with per-endpoint caps and idle reuse.
#[derive(Debug)]
pub struct TcpConnectionPool {
    max_per_endpoint: usize,
    endpoints: Mutex<HashMap<DataNodeId, Endpoint>>,
}

#[derive(Debug, Clone)]
struct Endpoint {
    capacity: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<Box<dyn ConnectionStream>>>>,
}

impl Endpoint {
    fn new(max_per_endpoint: usize) -> Self {
        Self {
            capacity: Arc::new(Semaphore::new(max_per_endpoint)),
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl TcpConnectionPool {
    /// Creates a pool allowing up to `max_per_endpoint` concurrent connections per endpoint.
    pub fn new(max_per_endpoint: usize) -> Self {
        Self {
            max_per_endpoint,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    fn endpoint(&self, node: &DataNodeId) -> Endpoint {
        lock(&self.endpoints)
            .entry(node.clone())
            .or_insert_with(|| Endpoint::new(self.max_per_endpoint))
            .clone()
    }
}

#[async_trait::async_trait]
impl ConnectionPool for TcpConnectionPool {
    async fn checkout(
        &self,
        node: &DataNodeId,
        timeout: Duration,
    ) -> Result<Connection, PoolError> {
        let deadline = Instant::now() + timeout;
        let endpoint = self.endpoint(node);

        let acquire = Arc::clone(&endpoint.capacity).acquire_owned();
        let permit = match tokio::time::timeout_at(deadline, acquire).await {
            Ok(Ok(permit)) => permit,
            // The semaphore is never closed; both arms mean we ran out of time.
            Ok(Err(_)) | Err(_) => return Err(PoolError::Timeout(node.clone())),
        };

        if let Some(stream) = lock(&endpoint.idle).pop() {
            return Ok(Connection::pooled(node.clone(), stream, permit));
        }

        let connect = TcpStream::connect(node.addr());
        let stream = match tokio::time::timeout_at(deadline, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(cause)) => {
                return Err(PoolError::Unreachable {
                    node: node.clone(),
                    cause,
                });
            }
            Err(_) => return Err(PoolError::Timeout(node.clone())),
        };

        if let Err(error) = stream.set_nodelay(true) {
            tracing::debug!(node = %node, "failed to set TCP_NODELAY: {error}");
        }

        Ok(Connection::pooled(node.clone(), Box::new(stream), permit))
    }

    async fn checkin(&self, connection: Connection) {
        let endpoint = self.endpoint(&connection.node);
        lock(&endpoint.idle).push(connection.stream);
        // The permit drops after the stream is back on the idle list, so a waiter that
        // acquires it will find the stream available for reuse.
    }

    async fn destroy(&self, connection: Connection) {
        drop(connection);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    fn node_for(addr: std::net::SocketAddr) -> DataNodeId {
        DataNodeId {
            host: addr.ip().to_string(),
            port: addr.port(),
            datacenter: "dc1".into(),
        }
    }

    async fn listener() -> (TcpListener, DataNodeId) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let node = node_for(listener.local_addr().unwrap());
        (listener, node)
    }

    #[tokio::test]
    async fn checks_out_and_reuses_connections() {
        let (listener, node) = listener().await;
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1];
                    let _ = stream.read(&mut buf).await;
                });
            }
        });

        let pool = TcpConnectionPool::new(2);
        let first = pool.checkout(&node, Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.node(), &node);
        pool.checkin(first).await;

        // The checked-in stream is reused rather than dialing again.
        let endpoint = pool.endpoint(&node);
        assert_eq!(lock(&endpoint.idle).len(), 1);
        let _second = pool.checkout(&node, Duration::from_secs(1)).await.unwrap();
        assert!(lock(&endpoint.idle).is_empty());
    }

    #[tokio::test]
    async fn times_out_when_capacity_is_exhausted() {
        let (listener, node) = listener().await;
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let pool = TcpConnectionPool::new(1);
        let held = pool.checkout(&node, Duration::from_secs(1)).await.unwrap();

        let err = pool
            .checkout(&node, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Timeout(_)));

        pool.destroy(held).await;
        pool.checkout(&node, Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn reports_unreachable_endpoints() {
        let (listener, node) = listener().await;
        drop(listener);

        let pool = TcpConnectionPool::new(1);
        let err = pool.checkout(&node, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, PoolError::Unreachable { .. }));
    }
}
