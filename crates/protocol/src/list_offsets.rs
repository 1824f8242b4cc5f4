//! List-offsets request and response bodies.

use crate::error::ErrorCode;

/// Sentinel timestamp requesting the earliest available offset.
pub const OFFSET_EARLIEST: i64 = -2;

/// Sentinel timestamp requesting the latest available offset.
pub const OFFSET_LATEST: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsRequestPartition {
    /// The partition index.
    pub partition: i32,

    /// Target timestamp: `OFFSET_EARLIEST`, `OFFSET_LATEST`, or epoch ms.
    pub timestamp: i64,

    /// The maximum number of offsets to return.
    pub max_num_offsets: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsRequestTopic {
    /// The topic name.
    pub topic: String,

    /// The partitions to look up.
    pub partitions: Vec<ListOffsetsRequestPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsRequest {
    /// The broker ID of the follower, or -1 if this request is from a
    /// consumer.
    pub replica_id: i32,

    /// The topics to look up.
    pub topics: Vec<ListOffsetsRequestTopic>,
}

impl ListOffsetsRequest {
    /// Request a single offset for one partition, the only shape the fetch
    /// engine ever issues.
    pub fn single(topic: impl Into<String>, partition: i32, timestamp: i64) -> Self {
        Self {
            replica_id: -1,
            topics: vec![ListOffsetsRequestTopic {
                topic: topic.into(),
                partitions: vec![ListOffsetsRequestPartition {
                    partition,
                    timestamp,
                    max_num_offsets: 1,
                }],
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsResponsePartition {
    /// The partition index.
    pub partition: i32,

    /// The partition-level error code.
    pub error_code: ErrorCode,

    /// The matching offsets, newest first; length 1 on success for requests
    /// with `max_num_offsets = 1`.
    pub offsets: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsResponseTopic {
    /// The topic name.
    pub topic: String,

    /// The per-partition results.
    pub partitions: Vec<ListOffsetsResponsePartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsResponse {
    /// The looked-up topics.
    pub topics: Vec<ListOffsetsResponseTopic>,
}
