//! Protocol-level vocabulary shared across the crate.
//!
//! The wire codec lives outside this crate; what remains here is the part of
//! the protocol the coordination core actually reasons about: error codes
//! (they drive retry decisions), the handful of request/response shapes
//! exchanged with a [`Broker`](crate::broker::Broker), and well-known
//! constants.
//!
//! # References
//! - <https://kafka.apache.org/protocol#protocol_error_codes>

use std::fmt;

/// Sentinel timestamp requesting the earliest available offset.
pub const EARLIEST_OFFSET: i64 = -2;

/// Sentinel timestamp requesting the latest offset.
pub const LATEST_OFFSET: i64 = -1;

/// Maps a consume position to the matching `ListOffsets` timestamp sentinel.
pub fn default_offset(from_beginning: bool) -> i64 {
    if from_beginning {
        EARLIEST_OFFSET
    } else {
        LATEST_OFFSET
    }
}

/// Which kind of coordinator a `FindCoordinator` request resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorType {
    /// Consumer group coordinator.
    Group,

    /// Transaction coordinator.
    Transaction,
}

impl CoordinatorType {
    /// Wire representation (`key_type` in the request).
    pub fn key_type(&self) -> i8 {
        match self {
            Self::Group => 0,
            Self::Transaction => 1,
        }
    }
}

/// Visibility of transactional records for offset listing and fetching.
///
/// As per [KIP-98] the default is `READ_UNCOMMITTED`.
///
/// [KIP-98]: https://cwiki.apache.org/confluence/display/KAFKA/KIP-98+-+Exactly+Once+Delivery+and+Transactional+Messaging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    #[default]
    ReadUncommitted,
    ReadCommitted,
}

impl IsolationLevel {
    /// Wire representation.
    pub fn as_i8(&self) -> i8 {
        match self {
            Self::ReadUncommitted => 0,
            Self::ReadCommitted => 1,
        }
    }
}

/// Server-side error code carried by broker responses.
///
/// Only the codes this core dispatches on are spelled out; everything else is
/// preserved verbatim in [`ApiError::Unknown`] so it can still be logged and
/// surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    UnknownServerError,
    OffsetOutOfRange,
    UnknownTopicOrPartition,
    LeaderNotAvailable,
    NotLeaderOrFollower,
    RequestTimedOut,
    NetworkException,
    CoordinatorLoadInProgress,
    CoordinatorNotAvailable,
    NotCoordinator,
    NotController,
    Unknown(i16),
}

impl ApiError {
    pub fn new(code: i16) -> Self {
        match code {
            -1 => Self::UnknownServerError,
            1 => Self::OffsetOutOfRange,
            3 => Self::UnknownTopicOrPartition,
            5 => Self::LeaderNotAvailable,
            6 => Self::NotLeaderOrFollower,
            7 => Self::RequestTimedOut,
            13 => Self::NetworkException,
            14 => Self::CoordinatorLoadInProgress,
            15 => Self::CoordinatorNotAvailable,
            16 => Self::NotCoordinator,
            41 => Self::NotController,
            code => Self::Unknown(code),
        }
    }

    pub fn code(&self) -> i16 {
        match self {
            Self::UnknownServerError => -1,
            Self::OffsetOutOfRange => 1,
            Self::UnknownTopicOrPartition => 3,
            Self::LeaderNotAvailable => 5,
            Self::NotLeaderOrFollower => 6,
            Self::RequestTimedOut => 7,
            Self::NetworkException => 13,
            Self::CoordinatorLoadInProgress => 14,
            Self::CoordinatorNotAvailable => 15,
            Self::NotCoordinator => 16,
            Self::NotController => 41,
            Self::Unknown(code) => *code,
        }
    }

    /// Whether the broker marks this code as safe to retry.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::UnknownTopicOrPartition
                | Self::LeaderNotAvailable
                | Self::NotLeaderOrFollower
                | Self::RequestTimedOut
                | Self::NetworkException
                | Self::CoordinatorLoadInProgress
                | Self::CoordinatorNotAvailable
                | Self::NotCoordinator
                | Self::NotController
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (code {})", self, self.code())
    }
}

/// Coordinator location returned by a `FindCoordinator` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinator {
    /// The node id of the coordinating broker.
    pub node_id: i32,

    /// The coordinator hostname.
    pub host: String,

    /// The coordinator port.
    pub port: i32,
}

/// A `ListOffsets` request, one leader's share of an offset query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsRequest {
    /// Controls the visibility of transactional records.
    pub isolation_level: IsolationLevel,

    /// Each topic in the request.
    pub topics: Vec<ListOffsetsRequestTopic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsRequestTopic {
    /// The topic name.
    pub name: String,

    /// Each partition in the request.
    pub partitions: Vec<ListOffsetsRequestPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsRequestPartition {
    /// The partition index.
    pub partition_index: i32,

    /// Target timestamp, or one of the sentinels [`EARLIEST_OFFSET`] /
    /// [`LATEST_OFFSET`].
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOffsetsResponse {
    /// Each topic in the response.
    pub topics: Vec<ListOffsetsResponseTopic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsResponseTopic {
    /// The topic name.
    pub name: String,

    /// Each partition in the response.
    pub partitions: Vec<ListOffsetsResponsePartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsResponsePartition {
    /// The partition index.
    pub partition_index: i32,

    /// The resolved offset.
    pub offset: i64,

    /// Partition-level error, if any.
    pub error: Option<ApiError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_offset_sentinels() {
        assert_eq!(default_offset(true), EARLIEST_OFFSET);
        assert_eq!(default_offset(false), LATEST_OFFSET);
        assert_eq!(default_offset(true), -2);
        assert_eq!(default_offset(false), -1);
    }

    #[test]
    fn test_error_code_round_trip() {
        for code in [-1, 1, 3, 5, 6, 7, 13, 14, 15, 16, 41, 87] {
            assert_eq!(ApiError::new(code).code(), code);
        }
    }

    #[test]
    fn test_error_retriability() {
        assert!(ApiError::LeaderNotAvailable.is_retriable());
        assert!(ApiError::CoordinatorNotAvailable.is_retriable());
        assert!(ApiError::NotController.is_retriable());
        assert!(!ApiError::OffsetOutOfRange.is_retriable());
        assert!(!ApiError::Unknown(87).is_retriable());
    }

    #[test]
    fn test_coordinator_key_types() {
        assert_eq!(CoordinatorType::Group.key_type(), 0);
        assert_eq!(CoordinatorType::Transaction.key_type(), 1);
    }

    #[test]
    fn test_isolation_level_wire_values() {
        assert_eq!(IsolationLevel::ReadUncommitted.as_i8(), 0);
        assert_eq!(IsolationLevel::ReadCommitted.as_i8(), 1);
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadUncommitted);
    }
}
