//! Per-operation metadata.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Immutable envelope carried by every operation.
///
/// The operation id is drawn from a process-wide counter at construction. Every replica
/// attempt additionally draws its own correlation id, so retries against different replicas
/// remain distinguishable in server logs.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Identifies this client process to the storage servers.
    pub client_id: String,
    /// The datacenter this operation originates from.
    pub origin_datacenter: String,
    /// The correlation id assigned to the operation as a whole.
    pub operation_id: u32,
    correlation_ids: Arc<AtomicU32>,
}

impl OperationContext {
    pub(crate) fn new(
        client_id: String,
        origin_datacenter: String,
        correlation_ids: Arc<AtomicU32>,
    ) -> Self {
        let operation_id = correlation_ids.fetch_add(1, Ordering::Relaxed);
        Self {
            client_id,
            origin_datacenter,
            operation_id,
            correlation_ids,
        }
    }

    /// Allocates a fresh correlation id for a single replica attempt.
    pub(crate) fn next_attempt_id(&self) -> u32 {
        self.correlation_ids.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_ids_are_distinct() {
        let ids = Arc::new(AtomicU32::new(0));
        let context = OperationContext::new("client".into(), "dc1".into(), Arc::clone(&ids));

        let first = context.next_attempt_id();
        let second = context.next_attempt_id();
        assert_ne!(first, second);
        assert_ne!(first, context.operation_id);

        // A second operation keeps drawing from the same sequence.
        let other = OperationContext::new("client".into(), "dc1".into(), ids);
        assert_ne!(other.operation_id, context.operation_id);
    }
}
