//! Replica selection and quorum accounting.

use std::collections::VecDeque;

use blobstore_types::{Partition, ReplicaId};

/// Whether an operation has reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Enough replicas answered successfully.
    Succeeded,
    /// All replicas are exhausted and nothing is in flight.
    Failed,
    /// The operation must keep dispatching or waiting.
    Pending,
}

/// Decides which replica to try next and whether the operation is complete.
///
/// Selection is decoupled from response interpretation so the same operation skeleton can
/// serve reads and (eventually) writes or deletes with a different quorum by swapping the
/// policy.
pub trait OperationPolicy: Send {
    /// Whether another request may be dispatched right now.
    fn may_dispatch(&self) -> bool;

    /// Takes the next replica to try, counting it as in flight.
    fn next_replica(&mut self) -> Option<ReplicaId>;

    /// Records a successful response from a replica.
    fn on_success(&mut self);

    /// Records a failed attempt against a replica.
    fn on_failure(&mut self);

    /// The number of attempts currently in flight.
    fn in_flight(&self) -> usize;

    /// Evaluates the terminal state of the operation.
    fn is_complete(&self) -> Completion;
}

/// The read policy: try local-datacenter replicas first, keep up to `parallelism` attempts
/// in flight, and succeed after `success_target` good responses.
#[derive(Debug)]
pub struct GetPolicy {
    local: VecDeque<ReplicaId>,
    remote: VecDeque<ReplicaId>,
    replica_count: usize,
    in_flight: usize,
    successes: usize,
    failures: usize,
    parallelism: usize,
    success_target: usize,
}

impl GetPolicy {
    /// Creates the policy for one operation over the given partition.
    ///
    /// Replica ordering within each datacenter group follows the partition's declaration
    /// order, which is arbitrary but stable across retries.
    pub fn new(
        local_datacenter: &str,
        partition: &Partition,
        parallelism: usize,
        success_target: usize,
    ) -> Self {
        let (local, remote) = partition
            .replicas()
            .iter()
            .cloned()
            .partition(|replica: &ReplicaId| replica.is_in_datacenter(local_datacenter));

        Self {
            local,
            remote,
            replica_count: partition.replica_count(),
            in_flight: 0,
            successes: 0,
            failures: 0,
            parallelism,
            success_target,
        }
    }

    fn remaining(&self) -> usize {
        self.local.len() + self.remote.len()
    }
}

impl OperationPolicy for GetPolicy {
    fn may_dispatch(&self) -> bool {
        self.in_flight < self.parallelism && self.remaining() > 0
    }

    fn next_replica(&mut self) -> Option<ReplicaId> {
        let replica = self.local.pop_front().or_else(|| self.remote.pop_front())?;
        self.in_flight += 1;
        debug_assert!(
            self.successes + self.failures + self.in_flight + self.remaining()
                <= self.replica_count
        );
        Some(replica)
    }

    fn on_success(&mut self) {
        self.in_flight -= 1;
        self.successes += 1;
    }

    fn on_failure(&mut self) {
        self.in_flight -= 1;
        self.failures += 1;
    }

    fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn is_complete(&self) -> Completion {
        if self.successes >= self.success_target {
            Completion::Succeeded
        } else if self.in_flight == 0 && self.remaining() == 0 {
            Completion::Failed
        } else {
            Completion::Pending
        }
    }
}
