//! Cluster-wide Kafka metadata.

use std::time::{Duration, Instant};

use crate::protocol::ApiError;

/// Metadata container for the entire cluster, as decoded from a single
/// metadata response.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// The ID of the controller broker.
    pub controller_id: Option<i32>,

    /// Brokers.
    pub brokers: Vec<MetadataBroker>,

    /// Topics.
    pub topics: Vec<MetadataTopic>,
}

/// Metadata for a certain broker.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataBroker {
    /// The broker ID
    pub node_id: i32,

    /// The broker hostname
    pub host: String,

    /// The broker port
    pub port: i32,

    /// Rack.
    pub rack: Option<String>,
}

/// Metadata for a certain topic.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataTopic {
    /// The topic name
    pub name: String,

    /// Topic-level error.
    pub error: Option<ApiError>,

    /// Each partition in the topic
    pub partitions: Vec<MetadataPartition>,
}

/// Metadata for a certain partition.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataPartition {
    /// The partition index
    pub partition_index: i32,

    /// The ID of the leader broker.
    ///
    /// `None` while the partition has no leader; the cluster is in
    /// transition and the caller must refresh and retry.
    pub leader_id: Option<i32>,

    /// The set of all nodes that host this partition
    pub replica_nodes: Vec<i32>,

    /// The set of all nodes that are in sync with the leader for this partition
    pub isr_nodes: Vec<i32>,

    /// Partition-level error.
    pub error: Option<ApiError>,
}

/// An immutable, timestamped view of [`Metadata`].
///
/// At most one snapshot is current at any time. The pool replaces the shared
/// pointer wholesale on refresh; readers clone the `Arc` once per operation
/// and never observe a torn update.
#[derive(Debug)]
pub struct MetadataSnapshot {
    metadata: Metadata,
    fetched_at: Instant,
}

impl MetadataSnapshot {
    pub fn new(metadata: Metadata, fetched_at: Instant) -> Self {
        Self {
            metadata,
            fetched_at,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Time since the refresh that produced this snapshot.
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn controller_id(&self) -> Option<i32> {
        self.metadata.controller_id
    }

    pub fn broker(&self, node_id: i32) -> Option<&MetadataBroker> {
        self.metadata.brokers.iter().find(|b| b.node_id == node_id)
    }

    pub fn brokers(&self) -> &[MetadataBroker] {
        &self.metadata.brokers
    }

    pub fn topic(&self, name: &str) -> Option<&MetadataTopic> {
        self.metadata.topics.iter().find(|t| t.name == name)
    }

    pub fn has_topic(&self, name: &str) -> bool {
        self.topic(name).is_some()
    }
}
