//! A single attempt against a single replica.

use std::sync::Arc;

use blobstore_types::ReplicaId;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::get::{GetFlavor, GetPayload};
use crate::pool::{Connection, ConnectionPool, PoolError};
use crate::wire::{self, GetRequest, GetResponse, ServerErrorCode, WireError};

/// What a single replica attempt produced.
#[derive(Debug)]
pub(crate) enum ReplicaOutcome {
    /// A decoded server response, possibly carrying an error verdict.
    Response {
        /// The server's verdict.
        code: ServerErrorCode,
        /// The deserialized body; present exactly when the verdict is `NoError`.
        payload: Option<GetPayload>,
    },
    /// The attempt failed before a trustworthy response was decoded.
    TransportError(RequestError),
}

/// The ways a replica attempt can fail without producing a server verdict.
///
/// All of these are recovered by trying another replica.
#[derive(Debug, thiserror::Error)]
pub(crate) enum RequestError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("deadline elapsed during replica exchange")]
    DeadlineElapsed,

    #[error("correlation id mismatch: sent {sent} received {received}")]
    CorrelationMismatch { sent: u32, received: u32 },
}

/// A response delivered on the operation's aggregation channel.
#[derive(Debug)]
pub(crate) struct ReplicaResponse {
    pub replica: ReplicaId,
    pub outcome: ReplicaOutcome,
}

/// One dispatched attempt: checkout, exchange, deliver.
pub(crate) struct ReplicaRequest {
    pub pool: Arc<dyn ConnectionPool>,
    pub replica: ReplicaId,
    pub request: GetRequest,
    pub flavor: GetFlavor,
    pub deadline: Instant,
    pub results: mpsc::Sender<ReplicaResponse>,
}

impl ReplicaRequest {
    /// Runs this attempt as a background task.
    ///
    /// Exactly one [`ReplicaResponse`] is posted per attempt. If the operation has already
    /// reached an outcome and dropped its receiver, the delivery is silently discarded; the
    /// connection is still returned to the pool as the I/O resolves.
    pub(crate) fn spawn(self) {
        tokio::spawn(async move {
            let ReplicaRequest {
                pool,
                replica,
                request,
                flavor,
                deadline,
                results,
            } = self;

            tracing::trace!(
                replica = %replica,
                correlation_id = request.correlation_id,
                "dispatching replica request"
            );

            let outcome = attempt(&pool, &replica, &request, flavor, deadline).await;
            if let ReplicaOutcome::TransportError(error) = &outcome {
                tracing::debug!(
                    replica = %replica,
                    error = error as &dyn std::error::Error,
                    "replica attempt failed"
                );
            }

            let _ = results.send(ReplicaResponse { replica, outcome }).await;
        });
    }
}

async fn attempt(
    pool: &Arc<dyn ConnectionPool>,
    replica: &ReplicaId,
    request: &GetRequest,
    flavor: GetFlavor,
    deadline: Instant,
) -> ReplicaOutcome {
    let checkout_timeout = deadline.duration_since(Instant::now());
    let mut connection = match pool.checkout(&replica.node, checkout_timeout).await {
        Ok(connection) => connection,
        Err(error) => return ReplicaOutcome::TransportError(error.into()),
    };

    match tokio::time::timeout_at(deadline, exchange(&mut connection, request, flavor)).await {
        Ok(Ok((code, payload))) => {
            pool.checkin(connection).await;
            ReplicaOutcome::Response { code, payload }
        }
        Ok(Err(error)) => {
            pool.destroy(connection).await;
            ReplicaOutcome::TransportError(error)
        }
        Err(_) => {
            pool.destroy(connection).await;
            ReplicaOutcome::TransportError(RequestError::DeadlineElapsed)
        }
    }
}

/// Writes the request and decodes the response on a borrowed connection.
///
/// On a `NoError` verdict the body is deserialized here, so a corrupt payload is caught
/// while we still know which connection produced it.
async fn exchange(
    connection: &mut Connection,
    request: &GetRequest,
    flavor: GetFlavor,
) -> Result<(ServerErrorCode, Option<GetPayload>), RequestError> {
    let encoded = request.encode();

    wire::write_frame(connection.stream_mut(), &encoded).await?;
    let frame = wire::read_frame(connection.stream_mut()).await?;

    let response = GetResponse::decode(frame)?;
    if response.correlation_id != request.correlation_id {
        return Err(RequestError::CorrelationMismatch {
            sent: request.correlation_id,
            received: response.correlation_id,
        });
    }

    if response.error != ServerErrorCode::NoError {
        return Ok((response.error, None));
    }

    let (_info, body) = response.single_message_body()?;
    let payload = flavor.deserialize_body(body)?;
    Ok((ServerErrorCode::NoError, Some(payload)))
}
