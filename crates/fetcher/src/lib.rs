//! Consumer-side fetch engine for Kafka-compatible commit logs.
//!
//! Given a dynamic set of assigned topic-partitions and their consume
//! positions, the [`Fetcher`] continuously pulls record batches from the
//! correct broker for each partition, buffers them locally, and serves them
//! one-by-one or in bulk while keeping positions consistent across
//! rebalances, offset resets, and errors.

pub mod buffer;
pub mod client;
pub mod config;
pub mod fetcher;
pub mod offsets;
pub mod plan;
pub mod subscriptions;
pub mod unpack;

pub use buffer::{FetchEntry, PartitionRecords};
pub use client::BrokerClient;
pub use config::FetchConfig;
pub use fetcher::Fetcher;
pub use subscriptions::{OffsetResetStrategy, SubscriptionState};
