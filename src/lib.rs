//! Consumer fetch engine for Kafka-compatible commit logs.
//!
//! Re-exports the public surface of the workspace crates:
//! - [`engine_core`] — topic-partition identity, consumer records, errors
//! - [`protocol`] — wire request/response types and the message-set codec
//! - [`fetcher`] — the fetch engine itself

pub use engine_core::{ConsumerRecord, Error, Result, TopicPartition};
pub use fetcher::{
    BrokerClient, FetchConfig, Fetcher, OffsetResetStrategy, SubscriptionState,
};
pub use protocol::{
    ErrorCode, FetchRequest, FetchResponse, ListOffsetsRequest, ListOffsetsResponse,
};
