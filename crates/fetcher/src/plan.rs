//! Fetch request planning.

use crate::buffer::FetchEntry;
use crate::client::BrokerClient;
use crate::config::FetchConfig;
use crate::subscriptions::SubscriptionState;
use engine_core::TopicPartition;
use indexmap::IndexMap;
use protocol::{FetchRequest, FetchRequestPartition, FetchRequestTopic, CONSUMER_REPLICA_ID};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Build the next round of fetch requests, one per eligible node.
///
/// A partition is skipped while it still has a buffered result or pending
/// error, while its leader node already has a request in flight, or while
/// its leader is unknown or unavailable. Returns nothing mid-rebalance.
pub fn plan_fetch_requests<C: BrokerClient + ?Sized>(
    client: &C,
    subs: &SubscriptionState,
    records: &IndexMap<TopicPartition, FetchEntry>,
    in_flight: &HashSet<i32>,
    config: &FetchConfig,
) -> Vec<(i32, FetchRequest)> {
    if subs.needs_partition_assignment() {
        return Vec::new();
    }

    let mut grouped: BTreeMap<i32, BTreeMap<String, Vec<FetchRequestPartition>>> = BTreeMap::new();
    for tp in subs.fetchable_partitions() {
        if records.contains_key(&tp) {
            // We have some prefetched data already
            continue;
        }
        let node_id = client.leader_for_partition(&tp);
        let node_id = match node_id {
            Some(node_id) if node_id != -1 => node_id,
            _ => {
                debug!(%tp, "no leader found for partition, waiting for metadata update");
                continue;
            }
        };
        if in_flight.contains(&node_id) {
            // We have in-flight requests to this node
            continue;
        }
        let Some(position) = subs.position(&tp) else {
            continue;
        };
        debug!(%tp, offset = position, "adding fetch request for partition");
        grouped
            .entry(node_id)
            .or_default()
            .entry(tp.topic)
            .or_default()
            .push(FetchRequestPartition {
                partition: tp.partition,
                fetch_offset: position,
                partition_max_bytes: config.max_partition_fetch_bytes,
            });
    }

    grouped
        .into_iter()
        .map(|(node_id, topics)| {
            let request = FetchRequest {
                replica_id: CONSUMER_REPLICA_ID,
                max_wait_ms: config.fetch_max_wait_ms,
                min_bytes: config.fetch_min_bytes,
                topics: topics
                    .into_iter()
                    .map(|(topic, partitions)| FetchRequestTopic { topic, partitions })
                    .collect(),
            };
            (node_id, request)
        })
        .collect()
}
