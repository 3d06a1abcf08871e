//! Cluster topology types and the read-only cluster map.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a logical partition, a group of replicas jointly responsible for a range of
/// blob ids.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PartitionId(u64);

impl PartitionId {
    /// Creates a partition id from its numeric value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The numeric value of this partition id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition-{}", self.0)
    }
}

/// Addresses one storage server process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataNodeId {
    /// The hostname the server listens on.
    pub host: String,
    /// The port the server listens on.
    pub port: u16,
    /// The datacenter the server is deployed in.
    pub datacenter: String,
}

impl DataNodeId {
    /// The `host:port` address of this node.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for DataNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One replica of a partition, hosted on a specific data node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicaId {
    /// The node hosting this replica.
    pub node: DataNodeId,
    /// The partition this replica belongs to.
    pub partition: PartitionId,
}

impl ReplicaId {
    /// Whether this replica lives in the given datacenter.
    pub fn is_in_datacenter(&self, datacenter: &str) -> bool {
        self.node.datacenter == datacenter
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.node)
    }
}

/// A partition and its replica set.
///
/// Membership is read-only for the lifetime of an operation.
#[derive(Debug, Clone)]
pub struct Partition {
    id: PartitionId,
    replicas: Vec<ReplicaId>,
}

impl Partition {
    /// Creates a partition from its replica set.
    pub fn new(id: PartitionId, replicas: Vec<ReplicaId>) -> Self {
        Self { id, replicas }
    }

    /// The id of this partition.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// The replicas of this partition, in declaration order.
    pub fn replicas(&self) -> &[ReplicaId] {
        &self.replicas
    }

    /// The number of replicas of this partition.
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }
}

/// Read-only lookup from partitions to their replica sets.
///
/// Cluster membership is managed elsewhere; during an operation the map is effectively
/// immutable and readers do not coordinate.
pub trait ClusterMap: fmt::Debug + Send + Sync + 'static {
    /// Resolves a partition by id.
    fn partition(&self, id: PartitionId) -> Option<&Partition>;

    /// The datacenter this process runs in.
    fn local_datacenter(&self) -> &str;
}

/// Declarative cluster topology, as it appears in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLayout {
    /// The datacenter this process runs in.
    pub local_datacenter: String,
    /// All partitions and their replica placements.
    pub partitions: Vec<PartitionLayout>,
}

/// The replica placement of a single partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLayout {
    /// The numeric partition id.
    pub id: u64,
    /// The nodes hosting replicas of this partition.
    pub replicas: Vec<DataNodeId>,
}

/// A [`ClusterMap`] backed by a static, in-memory topology.
#[derive(Debug)]
pub struct StaticClusterMap {
    local_datacenter: String,
    partitions: HashMap<PartitionId, Partition>,
}

impl StaticClusterMap {
    /// Builds a cluster map from a declarative layout.
    pub fn from_layout(layout: ClusterLayout) -> Self {
        let partitions = layout
            .partitions
            .into_iter()
            .map(|partition| {
                let id = PartitionId::new(partition.id);
                let replicas = partition
                    .replicas
                    .into_iter()
                    .map(|node| ReplicaId {
                        node,
                        partition: id,
                    })
                    .collect();
                (id, Partition::new(id, replicas))
            })
            .collect();

        Self {
            local_datacenter: layout.local_datacenter,
            partitions,
        }
    }
}

impl ClusterMap for StaticClusterMap {
    fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(&id)
    }

    fn local_datacenter(&self) -> &str {
        &self.local_datacenter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(port: u16, datacenter: &str) -> DataNodeId {
        DataNodeId {
            host: "localhost".into(),
            port,
            datacenter: datacenter.into(),
        }
    }

    #[test]
    fn resolves_partitions_from_layout() {
        let layout = ClusterLayout {
            local_datacenter: "dc1".into(),
            partitions: vec![PartitionLayout {
                id: 7,
                replicas: vec![node(6001, "dc1"), node(6002, "dc2")],
            }],
        };

        let map = StaticClusterMap::from_layout(layout);
        assert_eq!(map.local_datacenter(), "dc1");

        let partition = map.partition(PartitionId::new(7)).unwrap();
        assert_eq!(partition.replica_count(), 2);
        assert!(partition.replicas()[0].is_in_datacenter("dc1"));
        assert!(partition.replicas()[1].is_in_datacenter("dc2"));

        assert!(map.partition(PartitionId::new(8)).is_none());
    }
}
