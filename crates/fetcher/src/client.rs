//! Seam to the cluster connection layer.

use async_trait::async_trait;
use engine_core::{Result, TopicPartition};
use protocol::{FetchRequest, FetchResponse, ListOffsetsRequest, ListOffsetsResponse};

/// Connection-layer operations the fetch engine depends on.
///
/// The engine never opens sockets itself; metadata resolution, connection
/// management, and request transport all live behind this trait, which also
/// makes the engine fully testable against a scripted broker.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Whether a connection to the node is established and usable. May
    /// suspend while a connection attempt is in progress.
    async fn ready(&self, node_id: i32) -> bool;

    /// Send a fetch request to the node and await its response.
    async fn fetch(&self, node_id: i32, request: FetchRequest) -> Result<FetchResponse>;

    /// Send a list-offsets request to the node and await its response.
    async fn list_offsets(
        &self,
        node_id: i32,
        request: ListOffsetsRequest,
    ) -> Result<ListOffsetsResponse>;

    /// Current leader for the partition, from cached metadata.
    ///
    /// `None` means the partition is unknown; `Some(-1)` means the partition
    /// is known but its leader is currently unavailable.
    fn leader_for_partition(&self, tp: &TopicPartition) -> Option<i32>;

    /// Fire-and-forget request for a metadata refresh.
    fn force_metadata_update(&self);
}
