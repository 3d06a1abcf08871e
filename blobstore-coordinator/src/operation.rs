//! The deadline-bounded operation skeleton.
//!
//! The driver fans out replica attempts up to the policy's parallelism, drains their
//! results one at a time from a single aggregation channel, and applies the decider to
//! every decoded server verdict. The fan-out, deadline, and channel machinery is identical
//! for every operation kind; only the policy and the decider vary.

use std::sync::Arc;
use std::time::Duration;

use blobstore_types::ReplicaId;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::context::OperationContext;
use crate::error::CoordinatorError;
use crate::get::{GetFlavor, GetPayload};
use crate::policy::{Completion, OperationPolicy};
use crate::pool::ConnectionPool;
use crate::request::{ReplicaOutcome, ReplicaRequest, ReplicaResponse};
use crate::wire::{GetRequest, ServerErrorCode};

/// How the decider classified a decoded server verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorDisposition {
    /// The verdict completes the operation successfully.
    Accept,
    /// The verdict is not terminal; try another replica.
    Retry,
}

/// Turns individual server verdicts into a terminal decision.
///
/// Quorum-defined errors are counted here; transport-level failures never reach the
/// decider and are accounted by the skeleton instead.
pub(crate) trait ResponseDecider: Send {
    fn on_server_error(
        &mut self,
        replica: &ReplicaId,
        code: ServerErrorCode,
    ) -> Result<ErrorDisposition, CoordinatorError>;
}

/// One in-flight coordinator operation.
pub(crate) struct Operation<P, D> {
    pub context: OperationContext,
    pub policy: P,
    pub decider: D,
    pub request: GetRequest,
    pub flavor: GetFlavor,
    pub pool: Arc<dyn ConnectionPool>,
    pub channel_capacity: usize,
}

impl<P: OperationPolicy, D: ResponseDecider> Operation<P, D> {
    /// Runs the operation to a single definitive outcome, bounded by `timeout`.
    pub(crate) async fn execute(
        mut self,
        timeout: Duration,
    ) -> Result<GetPayload, CoordinatorError> {
        let deadline = Instant::now() + timeout;
        let (results, mut responses) = mpsc::channel(self.channel_capacity.max(1));

        loop {
            while self.policy.may_dispatch() {
                let Some(replica) = self.policy.next_replica() else {
                    break;
                };

                let mut request = self.request.clone();
                request.correlation_id = self.context.next_attempt_id();

                ReplicaRequest {
                    pool: Arc::clone(&self.pool),
                    replica,
                    request,
                    flavor: self.flavor,
                    deadline,
                    results: results.clone(),
                }
                .spawn();
            }

            if self.policy.in_flight() == 0 {
                // Nothing outstanding and nothing left to dispatch.
                return Err(CoordinatorError::StoreUnavailable);
            }

            let response = match tokio::time::timeout_at(deadline, responses.recv()).await {
                Ok(Some(response)) => response,
                Ok(None) => {
                    return Err(CoordinatorError::UnexpectedInternalError(
                        "operation response channel closed".into(),
                    ));
                }
                Err(_) => return Err(CoordinatorError::OperationTimedOut),
            };

            if let Some(payload) = self.process(response)? {
                return Ok(payload);
            }

            if self.policy.is_complete() == Completion::Failed {
                return Err(CoordinatorError::StoreUnavailable);
            }
        }
    }

    /// Applies one replica result to the policy and the decider.
    ///
    /// Returns the payload once the operation has succeeded, `None` while it must keep
    /// going, and the terminal error once the decider has surfaced one.
    fn process(
        &mut self,
        response: ReplicaResponse,
    ) -> Result<Option<GetPayload>, CoordinatorError> {
        let ReplicaResponse { replica, outcome } = response;

        match outcome {
            ReplicaOutcome::Response { code, payload } => {
                match self.decider.on_server_error(&replica, code)? {
                    ErrorDisposition::Accept => {
                        self.policy.on_success();
                        match payload {
                            Some(payload) => Ok(Some(payload)),
                            // The worker only accepts verdicts it deserialized a body for.
                            None => Err(CoordinatorError::UnexpectedInternalError(
                                "accepted response carried no payload".into(),
                            )),
                        }
                    }
                    ErrorDisposition::Retry => {
                        self.policy.on_failure();
                        Ok(None)
                    }
                }
            }
            ReplicaOutcome::TransportError(_) => {
                self.policy.on_failure();
                Ok(None)
            }
        }
    }
}
