//! Client configuration.
//!
//! There is no process-wide state anywhere in this crate: everything an
//! operation needs — retry policy, transport credentials, socket factory —
//! travels through these structs into [`Cluster::new`](crate::cluster::Cluster::new).

use std::sync::Arc;
use std::time::Duration;

use crate::backoff::RetryConfig;
use crate::protocol::IsolationLevel;

/// TLS setup handed through to the transport, opaque to this crate.
#[cfg(feature = "transport-tls")]
pub type TlsConfig = Option<Arc<rustls::ClientConfig>>;

/// TLS setup handed through to the transport, opaque to this crate.
///
/// Enable the `transport-tls` feature to carry a real `rustls` client config.
#[cfg(not(feature = "transport-tls"))]
pub type TlsConfig = Option<()>;

/// SASL credentials handed through to the transport, opaque to this crate.
#[derive(Clone)]
pub enum SaslConfig {
    Plain { username: String, password: String },
    ScramSha256 { username: String, password: String },
    ScramSha512 { username: String, password: String },
}

impl std::fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (mechanism, username) = match self {
            Self::Plain { username, .. } => ("PLAIN", username),
            Self::ScramSha256 { username, .. } => ("SCRAM-SHA-256", username),
            Self::ScramSha512 { username, .. } => ("SCRAM-SHA-512", username),
        };
        f.debug_struct("SaslConfig")
            .field("mechanism", &mechanism)
            .field("username", username)
            .field("password", &"...")
            .finish()
    }
}

/// Top-level configuration for a [`Cluster`](crate::cluster::Cluster).
#[derive(Clone)]
pub struct ClusterConfig {
    /// Seed addresses used to bootstrap the pool, `host:port`.
    pub brokers: Vec<String>,

    /// Client id reported to brokers on every request.
    pub client_id: String,

    /// Budget for establishing a socket.
    pub connection_timeout: Duration,

    /// Budget for the full connect-and-authenticate handshake; also bounds
    /// how long a caller waits on another caller's in-flight connect to the
    /// same broker.
    pub authentication_timeout: Duration,

    /// Budget for a single in-flight request.
    pub request_timeout: Duration,

    /// Whether `request_timeout` is enforced or advisory.
    pub enforce_request_timeout: bool,

    /// Snapshot age beyond which sensitive operations refresh metadata first.
    pub metadata_max_age: Duration,

    /// Per-broker in-flight request cap; `None` is unlimited.
    pub max_in_flight_requests: Option<usize>,

    /// Whether metadata requests may auto-create the topics they name.
    pub allow_auto_topic_creation: bool,

    /// Visibility of transactional records in offset queries.
    pub isolation_level: IsolationLevel,

    /// Retry policy for every network-touching operation.
    pub retry: RetryConfig,

    /// TLS client configuration, if any.
    pub tls: TlsConfig,

    /// SASL credentials, if any.
    pub sasl: Option<SaslConfig>,
}

impl ClusterConfig {
    /// Configuration with the given seeds and defaults everywhere else.
    pub fn new(brokers: Vec<String>) -> Self {
        Self {
            brokers,
            client_id: "kafka-cluster".to_owned(),
            connection_timeout: Duration::from_secs(1),
            authentication_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            enforce_request_timeout: true,
            metadata_max_age: Duration::from_secs(300),
            max_in_flight_requests: None,
            allow_auto_topic_creation: true,
            isolation_level: IsolationLevel::default(),
            retry: RetryConfig::default(),
            tls: None,
            sasl: None,
        }
    }

    /// The slice of this config a single broker connection needs.
    pub(crate) fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            client_id: Arc::from(self.client_id.as_str()),
            connection_timeout: self.connection_timeout,
            request_timeout: self.request_timeout,
            enforce_request_timeout: self.enforce_request_timeout,
            max_in_flight_requests: self.max_in_flight_requests,
            allow_auto_topic_creation: self.allow_auto_topic_creation,
            tls: self.tls.clone(),
            sasl: self.sasl.clone(),
        }
    }
}

impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("brokers", &self.brokers)
            .field("client_id", &self.client_id)
            .field("connection_timeout", &self.connection_timeout)
            .field("authentication_timeout", &self.authentication_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("enforce_request_timeout", &self.enforce_request_timeout)
            .field("metadata_max_age", &self.metadata_max_age)
            .field("max_in_flight_requests", &self.max_in_flight_requests)
            .field("allow_auto_topic_creation", &self.allow_auto_topic_creation)
            .field("isolation_level", &self.isolation_level)
            .field("retry", &self.retry)
            .field("tls", &"...")
            .field("sasl", &self.sasl)
            .finish()
    }
}

/// Transport-facing configuration injected into every broker the factory
/// builds.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub client_id: Arc<str>,
    pub connection_timeout: Duration,
    pub request_timeout: Duration,
    pub enforce_request_timeout: bool,
    pub max_in_flight_requests: Option<usize>,
    pub allow_auto_topic_creation: bool,
    pub tls: TlsConfig,
    pub sasl: Option<SaslConfig>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("client_id", &self.client_id)
            .field("connection_timeout", &self.connection_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("enforce_request_timeout", &self.enforce_request_timeout)
            .field("max_in_flight_requests", &self.max_in_flight_requests)
            .field("allow_auto_topic_creation", &self.allow_auto_topic_creation)
            .field("tls", &"...")
            .field("sasl", &self.sasl)
            .finish()
    }
}
