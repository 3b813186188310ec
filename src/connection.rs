//! Building broker endpoints from seeds and from discovered topology.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::broker::{BrokerConnection, BrokerFactory, BrokerTarget};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::metadata::MetadataBroker;

mod pool;

pub use pool::BrokerPool;

/// Pure factory for broker endpoints.
///
/// Composes transport configuration with either the next seed address in
/// round-robin order or a specific broker taken from cluster metadata. Never
/// opens sockets itself; the injected [`BrokerFactory`] owns that.
pub struct ConnectionBuilder {
    factory: Arc<dyn BrokerFactory>,

    /// Parsed seed addresses, in configuration order.
    seeds: Vec<(String, u16)>,

    /// Cursor into `seeds`; every seed build advances it.
    next_seed: AtomicUsize,

    config: ConnectionConfig,
}

impl ConnectionBuilder {
    pub fn new(
        factory: Arc<dyn BrokerFactory>,
        seed_addresses: &[String],
        config: ConnectionConfig,
    ) -> Result<Self> {
        if seed_addresses.is_empty() {
            return Err(Error::InvalidSeedAddress("list is empty".to_owned()));
        }

        let seeds = seed_addresses
            .iter()
            .map(|addr| parse_seed(addr))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            factory,
            seeds,
            next_seed: AtomicUsize::new(0),
            config,
        })
    }

    /// Build a broker bound to the next seed in round-robin order.
    pub fn from_seed(&self) -> BrokerConnection {
        let index = self.next_seed.fetch_add(1, Ordering::Relaxed) % self.seeds.len();
        let (host, port) = &self.seeds[index];
        debug!(host = host.as_str(), port, "building seed broker");
        self.factory
            .create(BrokerTarget::from_seed(host.clone(), *port), &self.config)
    }

    /// Build a broker bound to a specific cluster member.
    pub fn for_node(&self, broker: &MetadataBroker) -> BrokerConnection {
        self.factory
            .create(BrokerTarget::from_metadata(broker), &self.config)
    }
}

impl std::fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("factory", &"...")
            .field("seeds", &self.seeds)
            .field("next_seed", &self.next_seed)
            .field("config", &self.config)
            .finish()
    }
}

fn parse_seed(address: &str) -> Result<(String, u16)> {
    let invalid = || Error::InvalidSeedAddress(format!("\"{address}\" is not host:port"));

    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse().map_err(|_| invalid())?;

    Ok((host.to_owned(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use crate::metadata::Metadata;
    use crate::protocol::{
        Coordinator, CoordinatorType, ListOffsetsRequest, ListOffsetsResponse,
    };

    #[derive(Debug)]
    struct TargetOnlyBroker(BrokerTarget);

    #[async_trait]
    impl crate::broker::Broker for TargetOnlyBroker {
        fn target(&self) -> &BrokerTarget {
            &self.0
        }

        fn is_connected(&self) -> bool {
            false
        }

        async fn connect(&self) -> Result<()> {
            unreachable!()
        }

        async fn disconnect(&self) {
            unreachable!()
        }

        async fn metadata(&self, _topics: Option<&[String]>) -> Result<Metadata> {
            unreachable!()
        }

        async fn find_group_coordinator(
            &self,
            _group_id: &str,
            _coordinator_type: CoordinatorType,
        ) -> Result<Coordinator> {
            unreachable!()
        }

        async fn list_offsets(&self, _request: ListOffsetsRequest) -> Result<ListOffsetsResponse> {
            unreachable!()
        }
    }

    struct TargetOnlyFactory;

    impl BrokerFactory for TargetOnlyFactory {
        fn create(&self, target: BrokerTarget, _config: &ConnectionConfig) -> BrokerConnection {
            Arc::new(TargetOnlyBroker(target))
        }
    }

    fn test_config() -> ConnectionConfig {
        crate::config::ClusterConfig::new(vec![]).connection_config()
    }

    fn builder(seeds: &[&str]) -> Result<ConnectionBuilder> {
        ConnectionBuilder::new(
            Arc::new(TargetOnlyFactory),
            &seeds.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            test_config(),
        )
    }

    #[test]
    fn test_parse_seed() {
        assert_eq!(
            parse_seed("kafka-1:9092").unwrap(),
            ("kafka-1".to_owned(), 9092)
        );

        assert_matches!(parse_seed("kafka-1"), Err(Error::InvalidSeedAddress(_)));
        assert_matches!(parse_seed(":9092"), Err(Error::InvalidSeedAddress(_)));
        assert_matches!(
            parse_seed("kafka-1:not-a-port"),
            Err(Error::InvalidSeedAddress(_))
        );
    }

    #[test]
    fn test_empty_seed_list_is_rejected() {
        assert_matches!(builder(&[]), Err(Error::InvalidSeedAddress(_)));
    }

    #[test]
    fn test_seed_round_robin() {
        let builder = builder(&["a:1", "b:2"]).unwrap();

        let hosts: Vec<String> = (0..4)
            .map(|_| builder.from_seed().target().host.clone())
            .collect();
        assert_eq!(hosts, ["a", "b", "a", "b"]);
    }

    #[test]
    fn test_for_node_carries_metadata_identity() {
        let builder = builder(&["a:1"]).unwrap();

        let broker = builder.for_node(&MetadataBroker {
            node_id: 7,
            host: "kafka-7".to_owned(),
            port: 9092,
            rack: Some("rack-a".to_owned()),
        });

        let target = broker.target();
        assert_eq!(target.node_id, Some(7));
        assert_eq!(target.host, "kafka-7");
        assert_eq!(target.port, 9092);
        assert_eq!(target.rack.as_deref(), Some("rack-a"));
    }
}
