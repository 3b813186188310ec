//! The cluster façade exposed to the producer, consumer and admin layers.
//!
//! A [`Cluster`] hides the distributed messiness behind a flat API: it keeps
//! the metadata snapshot warm, routes leader-bound work to the right broker,
//! translates broker errors into refresh/retry/propagate decisions, and runs
//! every network-touching operation inside the retry harness.

use std::collections::{BTreeSet, HashMap};
use std::ops::ControlFlow;
use std::sync::Arc;

use futures::future;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backoff::Retrier;
use crate::broker::{BrokerConnection, BrokerFactory};
use crate::config::ClusterConfig;
use crate::connection::{BrokerPool, ConnectionBuilder};
use crate::error::{Error, Result};
use crate::metadata::{Metadata, MetadataPartition};
use crate::protocol::{
    default_offset, ApiError, Coordinator, CoordinatorType, IsolationLevel, ListOffsetsRequest,
    ListOffsetsRequestPartition, ListOffsetsRequestTopic,
};

/// One topic's slice of an offset query.
#[derive(Debug, Clone)]
pub struct OffsetQuery {
    pub topic: String,
    pub partitions: Vec<i32>,
    pub from_beginning: bool,
}

/// One topic's slice of an offset query result.
///
/// Partition order is the order responses merged in; callers must not assume
/// stability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicOffsets {
    pub topic: String,
    pub partitions: Vec<PartitionOffset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOffset {
    pub partition: i32,
    pub offset: i64,
}

/// Committed offsets of one group: topic → partition → offset.
pub type GroupOffsets = HashMap<String, HashMap<i32, i64>>;

#[derive(Debug)]
pub struct Cluster {
    pool: Arc<BrokerPool>,
    retrier: Retrier,
    isolation_level: IsolationLevel,

    /// Topics the higher layer wants metadata kept warm for.
    target_topics: Mutex<BTreeSet<String>>,

    /// Per-group in-memory offset bookkeeping; never read back from brokers.
    committed_offsets: Mutex<HashMap<String, GroupOffsets>>,
}

impl Cluster {
    /// Build a cluster from configuration and an injected broker factory.
    ///
    /// No sockets are opened here; call [`Cluster::connect`].
    pub fn new(config: ClusterConfig, factory: Arc<dyn BrokerFactory>) -> Result<Self> {
        let builder = Arc::new(ConnectionBuilder::new(
            factory,
            &config.brokers,
            config.connection_config(),
        )?);
        let pool = Arc::new(BrokerPool::new(
            builder,
            config.metadata_max_age,
            config.authentication_timeout,
        ));

        Ok(Self {
            pool,
            retrier: Retrier::new(config.retry),
            isolation_level: config.isolation_level,
            target_topics: Mutex::new(BTreeSet::new()),
            committed_offsets: Mutex::new(HashMap::new()),
        })
    }

    /// Materialize at least one broker connection and an initial snapshot.
    pub async fn connect(&self) -> Result<()> {
        self.retrier
            .retry_with_backoff("connect", |_| async move {
                match self.connect_attempt().await {
                    Ok(()) => ControlFlow::Break(Ok(())),
                    Err(e) if e.is_retriable() => ControlFlow::Continue(e),
                    Err(e) => ControlFlow::Break(Err(e)),
                }
            })
            .await
    }

    /// Tear down every broker connection and drop the snapshot.
    pub async fn disconnect(&self) {
        self.pool.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.pool.has_connected_brokers()
    }

    /// Force a metadata refresh covering the current target topics.
    pub async fn refresh_metadata(&self) -> Result<()> {
        self.pool
            .refresh_metadata(&self.target_topics_vec())
            .await
            .map(|_| ())
    }

    /// Refresh when the snapshot is absent, stale, or lacks a target topic.
    pub async fn refresh_metadata_if_necessary(&self) -> Result<()> {
        self.pool
            .refresh_metadata_if_necessary(&self.target_topics_vec())
            .await
            .map(|_| ())
    }

    /// Register interest in a topic, refreshing metadata when it is new.
    pub async fn add_target_topic(&self, topic: impl Into<String>) -> Result<()> {
        self.add_multiple_target_topics([topic.into()]).await
    }

    /// Register interest in several topics at once.
    pub async fn add_multiple_target_topics<I, S>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let changed = {
            let mut targets = self.target_topics.lock();
            let before = targets.len();
            for topic in topics {
                targets.insert(topic.into());
            }
            targets.len() != before
        };

        if changed || self.pool.current_snapshot().is_none() {
            debug!(changed, "target topics updated - refreshing metadata");
            self.refresh_metadata().await?;
        }
        Ok(())
    }

    /// Fetch a metadata response for `topics` from any connected broker.
    pub async fn metadata(&self, topics: &[String]) -> Result<Metadata> {
        self.retrier
            .retry_with_backoff("metadata", |_| async move {
                let attempt = async {
                    self.pool.refresh_metadata_if_necessary(topics).await?;
                    self.pool
                        .with_broker(|_, broker| async move { broker.metadata(Some(topics)).await })
                        .await
                };
                match attempt.await {
                    Ok(metadata) => ControlFlow::Break(Ok(metadata)),
                    Err(e @ Error::ServerError(ApiError::LeaderNotAvailable)) => {
                        ControlFlow::Continue(e)
                    }
                    Err(e) => ControlFlow::Break(Err(e)),
                }
            })
            .await
    }

    /// Return the broker for `node_id`.
    ///
    /// When the failure smells like stale topology the metadata is refreshed
    /// before the error surfaces, so the caller's next attempt runs against a
    /// fresh snapshot.
    pub async fn find_broker(&self, node_id: i32) -> Result<BrokerConnection> {
        match self.pool.find_broker(node_id).await {
            Ok(broker) => Ok(broker),
            Err(e) => {
                if is_stale_broker_lookup(&e) {
                    warn!(e = %e, node_id, "broker lookup failed - refreshing metadata before surfacing");
                    self.refresh_metadata_best_effort().await;
                }
                Err(e)
            }
        }
    }

    /// Return the broker currently acting as cluster controller.
    pub async fn find_controller_broker(&self) -> Result<BrokerConnection> {
        let snapshot = self.pool.current_snapshot().ok_or(Error::MetadataNotLoaded)?;
        let controller_id = snapshot.controller_id().ok_or(Error::MetadataNotLoaded)?;

        // the id may point at a broker the snapshot no longer carries if the
        // refresh raced a controller change; find_broker surfaces that as
        // BrokerNotFound after queueing a refresh
        self.find_broker(controller_id).await
    }

    /// Partition metadata of `topic` from the current snapshot.
    ///
    /// An empty list means the snapshot exists but does not carry the topic;
    /// the caller may trigger a refresh and retry.
    pub fn find_topic_partition_metadata(&self, topic: &str) -> Result<Vec<MetadataPartition>> {
        let snapshot = self
            .pool
            .current_snapshot()
            .ok_or(Error::TopicMetadataNotLoaded)?;
        Ok(snapshot
            .topic(topic)
            .map(|t| t.partitions.clone())
            .unwrap_or_default())
    }

    /// Group `partitions` of `topic` by the node id of their current leader.
    ///
    /// Partitions missing from the snapshot are omitted; a partition that is
    /// present but leaderless fails with [`Error::InvalidPartitionMetadata`].
    pub fn find_leader_for_partitions(
        &self,
        topic: &str,
        partitions: &[i32],
    ) -> Result<HashMap<i32, Vec<i32>>> {
        let partition_metadata = self.find_topic_partition_metadata(topic)?;
        let by_id: HashMap<i32, &MetadataPartition> = partition_metadata
            .iter()
            .map(|p| (p.partition_index, p))
            .collect();

        let mut leaders: HashMap<i32, Vec<i32>> = HashMap::new();
        for partition in partitions {
            let meta = match by_id.get(partition) {
                Some(meta) => meta,
                None => continue,
            };
            match meta.leader_id {
                Some(leader) => leaders.entry(leader).or_default().push(*partition),
                None => {
                    return Err(Error::InvalidPartitionMetadata {
                        topic: topic.to_owned(),
                        partition: *partition,
                    })
                }
            }
        }
        Ok(leaders)
    }

    /// Resolve the coordinator for a group and return its broker.
    pub async fn find_group_coordinator(
        &self,
        group_id: &str,
        coordinator_type: CoordinatorType,
    ) -> Result<BrokerConnection> {
        self.retrier
            .retry_with_backoff("find_group_coordinator", |_| async move {
                let attempt = async {
                    let coordinator = self
                        .find_group_coordinator_metadata(group_id, coordinator_type)
                        .await?;
                    self.pool.find_broker(coordinator.node_id).await
                };
                match attempt.await {
                    Ok(broker) => ControlFlow::Break(Ok(broker)),
                    Err(e) if is_stale_coordinator_lookup(&e) => {
                        self.refresh_metadata_best_effort().await;
                        ControlFlow::Continue(e)
                    }
                    Err(e) => ControlFlow::Break(Err(e)),
                }
            })
            .await
    }

    /// Ask any connected broker where the coordinator for a group lives.
    ///
    /// Retries only `GROUP_COORDINATOR_NOT_AVAILABLE`, refreshing metadata
    /// between attempts; exhausting those retries means the coordinator could
    /// not be found.
    pub async fn find_group_coordinator_metadata(
        &self,
        group_id: &str,
        coordinator_type: CoordinatorType,
    ) -> Result<Coordinator> {
        let result = self
            .retrier
            .retry_with_backoff("find_group_coordinator_metadata", |_| async move {
                let lookup = self
                    .pool
                    .with_broker(|_, broker| async move {
                        broker.find_group_coordinator(group_id, coordinator_type).await
                    })
                    .await;
                match lookup {
                    Ok(coordinator) => ControlFlow::Break(Ok(coordinator)),
                    Err(e @ Error::ServerError(ApiError::CoordinatorNotAvailable)) => {
                        self.refresh_metadata_best_effort().await;
                        ControlFlow::Continue(e)
                    }
                    Err(e) => ControlFlow::Break(Err(e)),
                }
            })
            .await;

        result.map_err(|e| match e {
            Error::ServerError(ApiError::CoordinatorNotAvailable) => {
                Error::GroupCoordinatorNotFound {
                    group_id: group_id.to_owned(),
                }
            }
            e => e,
        })
    }

    /// Resolve earliest/latest offsets for the queried topic-partitions.
    ///
    /// One `listOffsets` request per leader, all in parallel; any failure
    /// aborts the whole operation.
    pub async fn fetch_topics_offset(&self, queries: &[OffsetQuery]) -> Result<Vec<TopicOffsets>> {
        self.retrier
            .retry_with_backoff("fetch_topics_offset", |_| async move {
                match self.fetch_topics_offset_attempt(queries).await {
                    Ok(offsets) => ControlFlow::Break(Ok(offsets)),
                    Err(e) if e.hints_stale_metadata() => {
                        self.refresh_metadata_best_effort().await;
                        ControlFlow::Continue(e)
                    }
                    Err(e) if e.is_retriable() => ControlFlow::Continue(e),
                    Err(e) => ControlFlow::Break(Err(e)),
                }
            })
            .await
    }

    /// Committed offsets of `group_id`, empty on first access.
    pub fn committed_offsets(&self, group_id: &str) -> GroupOffsets {
        self.committed_offsets
            .lock()
            .entry(group_id.to_owned())
            .or_default()
            .clone()
    }

    /// Record an offset as committed for a group, in memory only.
    pub fn mark_offset_as_committed(
        &self,
        group_id: impl Into<String>,
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
    ) {
        let mut groups = self.committed_offsets.lock();
        groups
            .entry(group_id.into())
            .or_default()
            .entry(topic.into())
            .or_default()
            .insert(partition, offset);
    }

    async fn connect_attempt(&self) -> Result<()> {
        self.pool.connect().await?;
        self.pool
            .refresh_metadata_if_necessary(&self.target_topics_vec())
            .await?;
        Ok(())
    }

    async fn fetch_topics_offset_attempt(&self, queries: &[OffsetQuery]) -> Result<Vec<TopicOffsets>> {
        let queried_topics: Vec<String> = queries.iter().map(|q| q.topic.clone()).collect();
        self.pool
            .refresh_metadata_if_necessary(&queried_topics)
            .await?;

        // leader node id → topic → partition descriptors
        let mut by_leader: HashMap<i32, HashMap<String, Vec<ListOffsetsRequestPartition>>> =
            HashMap::new();
        for query in queries {
            let leaders = self.find_leader_for_partitions(&query.topic, &query.partitions)?;
            let timestamp = default_offset(query.from_beginning);
            for (leader, partitions) in leaders {
                by_leader
                    .entry(leader)
                    .or_default()
                    .entry(query.topic.clone())
                    .or_default()
                    .extend(partitions.into_iter().map(|partition_index| {
                        ListOffsetsRequestPartition {
                            partition_index,
                            timestamp,
                        }
                    }));
            }
        }

        let requests = by_leader.into_iter().map(|(leader, topics)| {
            let request = ListOffsetsRequest {
                isolation_level: self.isolation_level,
                topics: topics
                    .into_iter()
                    .map(|(name, partitions)| ListOffsetsRequestTopic { name, partitions })
                    .collect(),
            };
            async move {
                let broker = self.pool.find_broker(leader).await?;
                broker.list_offsets(request).await
            }
        });
        let responses = future::try_join_all(requests).await?;

        // flatten and regroup by topic
        let mut by_topic: HashMap<String, Vec<PartitionOffset>> = HashMap::new();
        for response in responses {
            for topic in response.topics {
                for partition in topic.partitions {
                    if let Some(error) = partition.error {
                        return Err(Error::ServerError(error));
                    }
                    by_topic
                        .entry(topic.name.clone())
                        .or_default()
                        .push(PartitionOffset {
                            partition: partition.partition_index,
                            offset: partition.offset,
                        });
                }
            }
        }
        Ok(by_topic
            .into_iter()
            .map(|(topic, partitions)| TopicOffsets { topic, partitions })
            .collect())
    }

    /// Refresh triggered by a topology-shaped error; its own failure is
    /// logged and swallowed because the original error is what surfaces.
    async fn refresh_metadata_best_effort(&self) {
        if let Err(e) = self.refresh_metadata().await {
            debug!(e = %e, "metadata refresh after topology error failed");
        }
    }

    fn target_topics_vec(&self) -> Vec<String> {
        self.target_topics.lock().iter().cloned().collect()
    }
}

fn is_stale_broker_lookup(e: &Error) -> bool {
    matches!(
        e,
        Error::BrokerNotFound { .. } | Error::LockTimeout { .. }
    ) || e.is_connection_refused()
}

fn is_stale_coordinator_lookup(e: &Error) -> bool {
    is_stale_broker_lookup(e) || matches!(e, Error::ServerError(ApiError::CoordinatorNotAvailable))
}
