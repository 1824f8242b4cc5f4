//! Fetch request and response bodies.

use crate::error::ErrorCode;
use crate::message::MessageSet;

/// Replica id used by consumers (as opposed to follower brokers).
pub const CONSUMER_REPLICA_ID: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequestPartition {
    /// The partition index.
    pub partition: i32,

    /// The message offset to start fetching from.
    pub fetch_offset: i64,

    /// The maximum bytes to fetch from this partition.
    pub partition_max_bytes: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequestTopic {
    /// The name of the topic to fetch.
    pub topic: String,

    /// The partitions to fetch.
    pub partitions: Vec<FetchRequestPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// The broker ID of the follower, or -1 if this request is from a
    /// consumer.
    pub replica_id: i32,

    /// The maximum time in milliseconds the broker may block before
    /// answering if `min_bytes` worth of data is not yet available.
    pub max_wait_ms: i32,

    /// The minimum bytes to accumulate in the response.
    pub min_bytes: i32,

    /// The topics to fetch.
    pub topics: Vec<FetchRequestTopic>,
}

impl FetchRequest {
    /// All `(topic-partition, fetch_offset)` pairs in this request.
    pub fn fetch_offsets(&self) -> impl Iterator<Item = (&str, i32, i64)> + '_ {
        self.topics.iter().flat_map(|t| {
            t.partitions
                .iter()
                .map(move |p| (t.topic.as_str(), p.partition, p.fetch_offset))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponsePartition {
    /// The partition index.
    pub partition: i32,

    /// The partition-level error code.
    pub error_code: ErrorCode,

    /// The highest offset the broker considers committed and readable.
    pub high_watermark: i64,

    /// The fetched portion of the partition log.
    pub records: MessageSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponseTopic {
    /// The topic name.
    pub topic: String,

    /// The per-partition results.
    pub partitions: Vec<FetchResponsePartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// The fetched topics.
    pub topics: Vec<FetchResponseTopic>,
}
