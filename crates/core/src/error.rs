//! Unified error types for the fetch engine.

use crate::record::TopicPartition;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the fetch engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("transport error talking to node {node_id}: {message}")]
    Transport { node_id: i32, message: String },

    #[error("this server is not the leader for {0}")]
    NotLeaderForPartition(TopicPartition),

    #[error("unknown topic or partition {0}")]
    UnknownTopicOrPartition(TopicPartition),

    #[error("metadata for {0} is stale, awaiting refresh")]
    StaleMetadata(TopicPartition),

    #[error("leader for {0} is not available")]
    LeaderNotAvailable(TopicPartition),

    #[error("node {0} is not ready for requests")]
    NodeNotReady(i32),

    #[error("fetch offset {offset} is out of range for {tp}")]
    OffsetOutOfRange { tp: TopicPartition, offset: i64 },

    #[error("not authorized to read from topic {0}")]
    TopicAuthorizationFailed(String),

    #[error(
        "message at {tp}={offset} is larger than the fetch size {max_bytes} \
         and can never be returned; increase the fetch size or decrease the \
         maximum message size the broker will allow"
    )]
    RecordTooLarge {
        tp: TopicPartition,
        offset: i64,
        max_bytes: i32,
    },

    #[error("corrupt message in {tp} at offset {offset}: crc mismatch")]
    CorruptMessage { tp: TopicPartition, offset: i64 },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("unexpected broker error code {code}")]
    UnexpectedBroker { code: i16 },
}

impl Error {
    pub fn transport(node_id: i32, message: impl Into<String>) -> Self {
        Self::Transport {
            node_id,
            message: message.into(),
        }
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Whether the offset-lookup retry loop may try this operation again.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::NotLeaderForPartition(_)
                | Self::UnknownTopicOrPartition(_)
                | Self::StaleMetadata(_)
                | Self::LeaderNotAvailable(_)
                | Self::NodeNotReady(_)
        )
    }

    /// Whether the error indicates the cached cluster metadata is wrong and
    /// must be refreshed before retrying.
    pub fn is_invalid_metadata(&self) -> bool {
        matches!(
            self,
            Self::NotLeaderForPartition(_)
                | Self::UnknownTopicOrPartition(_)
                | Self::StaleMetadata(_)
                | Self::LeaderNotAvailable(_)
        )
    }
}
