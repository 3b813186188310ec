//! Error taxonomy for the coordination core.
//!
//! Errors separate into kinds rather than call sites: the retry harness and
//! the metadata-refresh policy dispatch purely on the kind, never on where
//! the error was produced.

use thiserror::Error;

use crate::protocol::ApiError;

#[derive(Debug, Error)]
pub enum Error {
    /// No metadata snapshot has been installed yet.
    #[error("cluster metadata is not loaded")]
    MetadataNotLoaded,

    /// A snapshot exists but carries no topic metadata.
    #[error("topic metadata is not loaded")]
    TopicMetadataNotLoaded,

    /// The node id is absent from the current snapshot.
    #[error("broker {node_id} is not present in cluster metadata")]
    BrokerNotFound { node_id: i32 },

    /// No broker in the pool is in the `connected` state.
    #[error("no broker in the pool is connected")]
    BrokerNotConnected,

    /// Coordinator discovery exhausted its retries.
    #[error("coordinator for group \"{group_id}\" could not be found")]
    GroupCoordinatorNotFound { group_id: String },

    /// Partition metadata exists but names no current leader.
    #[error("partition {partition} of topic \"{topic}\" has no leader")]
    InvalidPartitionMetadata { topic: String, partition: i32 },

    /// A concurrent connect to the same broker held the lock past the
    /// authentication timeout.
    #[error("timed out waiting for the connection lock of broker {node_id}")]
    LockTimeout { node_id: i32 },

    /// The seed list is empty or an address did not parse as `host:port`.
    #[error("invalid seed brokers: {0}")]
    InvalidSeedAddress(String),

    /// The broker answered with a protocol error code.
    #[error("server error: {0}")]
    ServerError(ApiError),

    /// Socket-level failure talking to a broker.
    #[error("transport error talking to broker \"{broker}\": {source}")]
    Transport {
        broker: String,
        #[source]
        source: std::io::Error,
    },

    /// The broker answered, but with something that makes no sense.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Sentinel kind that must bypass every retry harness.
    #[error("{0}")]
    NonRetriable(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the outer retry harness may run the operation again.
    ///
    /// Transport failures and retriable protocol codes are transient by
    /// definition; topology-shaped errors (`BrokerNotFound`, `LockTimeout`)
    /// are retriable because a metadata refresh may repair them.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ServerError(e) => e.is_retriable(),
            Self::Transport { .. }
            | Self::BrokerNotFound { .. }
            | Self::BrokerNotConnected
            | Self::LockTimeout { .. }
            | Self::InvalidPartitionMetadata { .. } => true,
            Self::MetadataNotLoaded
            | Self::TopicMetadataNotLoaded
            | Self::GroupCoordinatorNotFound { .. }
            | Self::InvalidSeedAddress(_)
            | Self::InvalidResponse(_)
            | Self::NonRetriable(_) => false,
        }
    }

    /// Whether this error suggests the cached topology is stale and a
    /// metadata refresh should run before the next attempt.
    pub fn hints_stale_metadata(&self) -> bool {
        match self {
            Self::BrokerNotFound { .. }
            | Self::LockTimeout { .. }
            | Self::InvalidPartitionMetadata { .. } => true,
            Self::ServerError(
                ApiError::LeaderNotAvailable
                | ApiError::NotLeaderOrFollower
                | ApiError::CoordinatorNotAvailable
                | ApiError::NotCoordinator
                | ApiError::NotController,
            ) => true,
            _ => self.is_connection_refused(),
        }
    }

    /// `true` for the `ECONNREFUSED` family of transport failures.
    pub fn is_connection_refused(&self) -> bool {
        matches!(
            self,
            Self::Transport { source, .. }
                if source.kind() == std::io::ErrorKind::ConnectionRefused
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriability_by_kind() {
        assert!(Error::ServerError(ApiError::LeaderNotAvailable).is_retriable());
        assert!(Error::BrokerNotFound { node_id: 1 }.is_retriable());
        assert!(Error::LockTimeout { node_id: 1 }.is_retriable());
        assert!(Error::Transport {
            broker: "localhost:9092".to_owned(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionReset),
        }
        .is_retriable());

        assert!(!Error::NonRetriable("paused without partitions".to_owned()).is_retriable());
        assert!(!Error::MetadataNotLoaded.is_retriable());
        assert!(!Error::ServerError(ApiError::OffsetOutOfRange).is_retriable());
    }

    #[test]
    fn test_stale_metadata_hints() {
        assert!(Error::BrokerNotFound { node_id: 3 }.hints_stale_metadata());
        assert!(Error::ServerError(ApiError::NotLeaderOrFollower).hints_stale_metadata());
        assert!(Error::Transport {
            broker: "localhost:9092".to_owned(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        }
        .hints_stale_metadata());

        assert!(!Error::ServerError(ApiError::OffsetOutOfRange).hints_stale_metadata());
        assert!(!Error::Transport {
            broker: "localhost:9092".to_owned(),
            source: std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
        }
        .hints_stale_metadata());
    }
}
