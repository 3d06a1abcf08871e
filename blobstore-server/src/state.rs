//! Shared server state.

use std::sync::Arc;
use std::time::Duration;

use blobstore_coordinator::{Coordinator, CoordinatorConfig};
use blobstore_types::StaticClusterMap;

use crate::config::Config;

/// Shared handle to the server state.
pub type ServiceState = Arc<State>;

/// The state shared by all request handlers.
#[derive(Debug)]
pub struct State {
    /// The loaded server configuration.
    pub config: Config,
    /// The coordinator executing replica reads on behalf of the ingress.
    pub coordinator: Coordinator,
}

impl State {
    /// Builds the server state from its configuration.
    pub fn new(config: Config) -> ServiceState {
        let cluster = Arc::new(StaticClusterMap::from_layout(config.cluster.clone()));
        let coordinator = Coordinator::new(
            cluster,
            CoordinatorConfig {
                get_parallelism: config.coordinator.get_parallelism,
                get_success_target: config.coordinator.get_success_target,
                max_connections_per_endpoint: config.coordinator.max_connections_per_endpoint,
                ..Default::default()
            },
        );

        Arc::new(Self {
            config,
            coordinator,
        })
    }

    /// The deadline applied to every coordinator operation driven by the ingress.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.config.coordinator.operation_timeout_ms)
    }
}
