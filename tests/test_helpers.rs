//! Fake broker machinery shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use kafka_cluster::backoff::RetryConfig;
use kafka_cluster::broker::{Broker, BrokerConnection, BrokerFactory, BrokerTarget};
use kafka_cluster::cluster::Cluster;
use kafka_cluster::config::{ClusterConfig, ConnectionConfig};
use kafka_cluster::error::Result;
use kafka_cluster::metadata::{Metadata, MetadataBroker, MetadataPartition, MetadataTopic};
use kafka_cluster::protocol::{
    Coordinator, CoordinatorType, ListOffsetsRequest, ListOffsetsResponse,
    ListOffsetsResponsePartition, ListOffsetsResponseTopic,
};

pub type MetadataFn = dyn Fn(usize) -> Result<Metadata> + Send + Sync;
pub type CoordinatorFn = dyn Fn(usize) -> Result<Coordinator> + Send + Sync;
pub type ListOffsetsFn =
    dyn Fn(&BrokerTarget, &ListOffsetsRequest) -> Result<ListOffsetsResponse> + Send + Sync;

/// Behavior and bookkeeping shared by every broker a [`FakeCluster`] builds.
struct Shared {
    metadata_fn: Mutex<Arc<MetadataFn>>,
    coordinator_fn: Mutex<Arc<CoordinatorFn>>,
    list_offsets_fn: Mutex<Arc<ListOffsetsFn>>,
    metadata_calls: AtomicUsize,
    coordinator_calls: AtomicUsize,
    list_offsets_log: Mutex<Vec<(BrokerTarget, ListOffsetsRequest)>>,
}

/// A scriptable fake cluster: acts as the injected [`BrokerFactory`] and
/// records everything its brokers are asked to do.
///
/// Call indices handed to the scripted closures are cluster-wide, so a script
/// can say "the first fetch sees X, every later one sees Y" without caring
/// which broker served it.
pub struct FakeCluster {
    shared: Arc<Shared>,
    created: Mutex<Vec<Arc<FakeBroker>>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                metadata_fn: Mutex::new(Arc::new(|_| Ok(cluster_metadata(Some(1), &[1], &[])))),
                coordinator_fn: Mutex::new(Arc::new(|_| {
                    Ok(Coordinator {
                        node_id: 1,
                        host: "kafka-1".to_owned(),
                        port: 9092,
                    })
                })),
                list_offsets_fn: Mutex::new(Arc::new(|_, request| Ok(echo_offsets(request)))),
                metadata_calls: AtomicUsize::new(0),
                coordinator_calls: AtomicUsize::new(0),
                list_offsets_log: Mutex::new(Vec::new()),
            }),
            created: Mutex::new(Vec::new()),
        })
    }

    /// Serve the same metadata on every fetch.
    pub fn serve_metadata(&self, metadata: Metadata) {
        *self.shared.metadata_fn.lock() = Arc::new(move |_| Ok(metadata.clone()));
    }

    /// Script metadata per fetch, keyed by the cluster-wide call index.
    pub fn set_metadata_fn<F>(&self, f: F)
    where
        F: Fn(usize) -> Result<Metadata> + Send + Sync + 'static,
    {
        *self.shared.metadata_fn.lock() = Arc::new(f);
    }

    /// Script coordinator discovery per lookup, keyed by call index.
    pub fn set_coordinator_fn<F>(&self, f: F)
    where
        F: Fn(usize) -> Result<Coordinator> + Send + Sync + 'static,
    {
        *self.shared.coordinator_fn.lock() = Arc::new(f);
    }

    pub fn set_list_offsets_fn<F>(&self, f: F)
    where
        F: Fn(&BrokerTarget, &ListOffsetsRequest) -> Result<ListOffsetsResponse>
            + Send
            + Sync
            + 'static,
    {
        *self.shared.list_offsets_fn.lock() = Arc::new(f);
    }

    pub fn metadata_call_count(&self) -> usize {
        self.shared.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn coordinator_call_count(&self) -> usize {
        self.shared.coordinator_calls.load(Ordering::SeqCst)
    }

    pub fn list_offsets_requests(&self) -> Vec<(BrokerTarget, ListOffsetsRequest)> {
        self.shared.list_offsets_log.lock().clone()
    }

    /// The most recently created broker bound to `address`.
    pub fn broker(&self, address: &str) -> Option<Arc<FakeBroker>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|b| b.target.to_string() == address)
            .map(Arc::clone)
    }

}

/// A cluster bootstrapping from `seed:9092` with fast test retries.
pub fn build_cluster(fake: &Arc<FakeCluster>) -> Cluster {
    build_cluster_with_config(fake, test_config())
}

pub fn build_cluster_with_config(fake: &Arc<FakeCluster>, config: ClusterConfig) -> Cluster {
    Cluster::new(config, Arc::clone(fake) as Arc<dyn BrokerFactory>).unwrap()
}

impl BrokerFactory for FakeCluster {
    fn create(&self, target: BrokerTarget, _config: &ConnectionConfig) -> BrokerConnection {
        let broker = Arc::new(FakeBroker {
            target,
            connected: AtomicBool::new(false),
            connect_attempts: AtomicUsize::new(0),
            shared: Arc::clone(&self.shared),
        });
        self.created.lock().push(Arc::clone(&broker));
        broker
    }
}

pub struct FakeBroker {
    target: BrokerTarget,
    connected: AtomicBool,
    pub connect_attempts: AtomicUsize,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for FakeBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeBroker")
            .field("target", &self.target)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Broker for FakeBroker {
    fn target(&self) -> &BrokerTarget {
        &self.target
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn metadata(&self, _topics: Option<&[String]>) -> Result<Metadata> {
        let call = self.shared.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let f = Arc::clone(&self.shared.metadata_fn.lock());
        f(call)
    }

    async fn find_group_coordinator(
        &self,
        _group_id: &str,
        _coordinator_type: CoordinatorType,
    ) -> Result<Coordinator> {
        let call = self.shared.coordinator_calls.fetch_add(1, Ordering::SeqCst);
        let f = Arc::clone(&self.shared.coordinator_fn.lock());
        f(call)
    }

    async fn list_offsets(&self, request: ListOffsetsRequest) -> Result<ListOffsetsResponse> {
        self.shared
            .list_offsets_log
            .lock()
            .push((self.target.clone(), request.clone()));
        let f = Arc::clone(&self.shared.list_offsets_fn.lock());
        f(&self.target, &request)
    }
}

/// Retry policy small enough to keep failing tests fast.
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        initial_retry_time: Duration::from_millis(1),
        max_retry_time: Duration::from_secs(5),
        multiplier: 2.,
        factor: 1.,
        retries: 3,
    }
}

pub fn test_config() -> ClusterConfig {
    let mut config = ClusterConfig::new(vec!["seed:9092".to_owned()]);
    config.retry = fast_retry();
    config
}

/// Metadata with the given controller, brokers (`kafka-<id>:9092`) and
/// topics described as `(name, [(partition, leader)])`.
pub fn cluster_metadata(
    controller_id: Option<i32>,
    brokers: &[i32],
    topics: &[(&str, &[(i32, Option<i32>)])],
) -> Metadata {
    Metadata {
        controller_id,
        brokers: brokers
            .iter()
            .map(|node_id| MetadataBroker {
                node_id: *node_id,
                host: format!("kafka-{node_id}"),
                port: 9092,
                rack: None,
            })
            .collect(),
        topics: topics
            .iter()
            .map(|(name, partitions)| MetadataTopic {
                name: (*name).to_owned(),
                error: None,
                partitions: partitions
                    .iter()
                    .map(|(partition_index, leader_id)| MetadataPartition {
                        partition_index: *partition_index,
                        leader_id: *leader_id,
                        replica_nodes: brokers.to_vec(),
                        isr_nodes: brokers.to_vec(),
                        error: None,
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Answer every queried partition with offset `1000 + partition`.
pub fn echo_offsets(request: &ListOffsetsRequest) -> ListOffsetsResponse {
    ListOffsetsResponse {
        topics: request
            .topics
            .iter()
            .map(|topic| ListOffsetsResponseTopic {
                name: topic.name.clone(),
                partitions: topic
                    .partitions
                    .iter()
                    .map(|p| ListOffsetsResponsePartition {
                        partition_index: p.partition_index,
                        offset: 1000 + i64::from(p.partition_index),
                        error: None,
                    })
                    .collect(),
            })
            .collect(),
    }
}
