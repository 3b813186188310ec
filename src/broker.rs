//! The opaque broker endpoint consumed by the pool.
//!
//! The socket-owning broker object — framing, TLS, SASL, request pipelining —
//! lives outside this crate. The coordination core only needs the operations
//! below, so they are the whole contract: the pool holds `Arc<dyn Broker>`
//! and never looks inside.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::metadata::{Metadata, MetadataBroker};
use crate::protocol::{Coordinator, CoordinatorType, ListOffsetsRequest, ListOffsetsResponse};

/// A connection to a broker
pub type BrokerConnection = Arc<dyn Broker>;

/// Address a broker endpoint is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTarget {
    /// Hostname.
    pub host: String,

    /// Port.
    pub port: u16,

    /// Node id, known only for brokers drawn from cluster metadata.
    pub node_id: Option<i32>,

    /// Rack, when metadata reported one.
    pub rack: Option<String>,
}

impl BrokerTarget {
    pub fn from_seed(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            node_id: None,
            rack: None,
        }
    }

    pub fn from_metadata(broker: &MetadataBroker) -> Self {
        Self {
            host: broker.host.clone(),
            port: broker.port as u16,
            node_id: Some(broker.node_id),
            rack: broker.rack.clone(),
        }
    }
}

impl fmt::Display for BrokerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One broker endpoint.
///
/// Implementations own the socket lifecycle; `connect` and `disconnect` are
/// idempotent, and every request-shaped method may fail with a transport
/// error once the socket dies.
#[async_trait]
pub trait Broker: Send + Sync + fmt::Debug {
    /// The address this endpoint was built for.
    fn target(&self) -> &BrokerTarget;

    /// Whether the endpoint currently holds a live, authenticated socket.
    fn is_connected(&self) -> bool;

    /// Establish the socket, completing any TLS/SASL handshake.
    async fn connect(&self) -> Result<()>;

    /// Tear down the socket; in-flight requests fail with a transport error.
    async fn disconnect(&self);

    /// Fetch cluster metadata, scoped to `topics` when given.
    async fn metadata(&self, topics: Option<&[String]>) -> Result<Metadata>;

    /// Resolve the coordinator for a consumer group or transactional id.
    async fn find_group_coordinator(
        &self,
        group_id: &str,
        coordinator_type: CoordinatorType,
    ) -> Result<Coordinator>;

    /// List offsets on the partitions this broker leads.
    async fn list_offsets(&self, request: ListOffsetsRequest) -> Result<ListOffsetsResponse>;
}

/// Builds [`Broker`] endpoints.
///
/// Injected at [`Cluster`](crate::cluster::Cluster) construction so the
/// transport implementation — and test fakes — stay out of this crate.
pub trait BrokerFactory: Send + Sync {
    fn create(&self, target: BrokerTarget, config: &ConnectionConfig) -> BrokerConnection;
}
