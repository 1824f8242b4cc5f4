//! Offset reset: establishing positions for partitions that have none.

use crate::client::BrokerClient;
use crate::fetcher::{Fetcher, Shared};
use engine_core::{Error, Result, TopicPartition};
use protocol::{ErrorCode, ListOffsetsRequest};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

impl<C: BrokerClient> Fetcher<C> {
    /// Update the fetch positions for the provided partitions.
    ///
    /// Partitions flagged for reset (or with no committed offset) get their
    /// position from a list-offsets lookup per their reset strategy; the
    /// rest are seeked to their committed offset. All lookups run
    /// concurrently and the first error any of them surfaces is returned.
    ///
    /// Partitions that are unassigned or still fetchable are skipped; this
    /// call cannot be used to force a reset on a partition with a valid
    /// position.
    pub async fn update_fetch_positions(&self, partitions: &[TopicPartition]) -> Result<()> {
        let mut needs_reset = Vec::new();
        {
            let mut subs = self.shared.subscriptions.lock();
            for tp in partitions {
                if !subs.is_assigned(tp) {
                    warn!(%tp, "partition is not assigned, skipping offset update");
                    continue;
                }
                if subs.is_fetchable(tp) {
                    warn!(%tp, "partition is still fetchable, skipping offset update");
                    continue;
                }
                if subs.is_offset_reset_needed(tp) {
                    needs_reset.push(tp.clone());
                } else if let Some(committed) = subs.committed(tp) {
                    debug!(%tp, committed, "resetting offset to the committed offset");
                    subs.seek(tp, committed);
                } else {
                    // No committed position, reset with the default strategy
                    subs.need_offset_reset(tp);
                    needs_reset.push(tp.clone());
                }
            }
        }

        if needs_reset.is_empty() {
            return Ok(());
        }
        let mut lookups: JoinSet<Result<()>> = JoinSet::new();
        for tp in needs_reset {
            let shared = self.shared.clone();
            lookups.spawn(async move { reset_offset(&shared, tp).await });
        }
        let mut first_error = None;
        while let Some(outcome) = lookups.join_next().await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(err) => {
                    if !err.is_cancelled() {
                        error!(error = %err, "offset reset task failed");
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Reset one partition's position using its pending reset strategy.
async fn reset_offset<C: BrokerClient>(shared: &Shared<C>, tp: TopicPartition) -> Result<()> {
    let strategy = {
        let subs = shared.subscriptions.lock();
        subs.reset_strategy(&tp).unwrap_or_default()
    };
    debug!(%tp, ?strategy, "resetting offset for partition");
    let offset = offset_for_timestamp(shared, &tp, strategy.as_timestamp()).await?;

    // The assignment may have been lost while the lookup was in flight
    let mut subs = shared.subscriptions.lock();
    if subs.is_assigned(&tp) {
        subs.seek(&tp, offset);
    }
    Ok(())
}

/// Look up a single offset for the partition, retrying retriable failures
/// until a result or a non-retriable error.
async fn offset_for_timestamp<C: BrokerClient>(
    shared: &Shared<C>,
    tp: &TopicPartition,
    timestamp: i64,
) -> Result<i64> {
    loop {
        match proc_offset_request(shared, tp, timestamp).await {
            Ok(offset) => return Ok(offset),
            Err(err) if err.is_retriable() => {
                if err.is_invalid_metadata() {
                    shared.client.force_metadata_update();
                }
                tokio::time::sleep(shared.config.retry_backoff()).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// One list-offsets round trip to the partition leader.
async fn proc_offset_request<C: BrokerClient>(
    shared: &Shared<C>,
    tp: &TopicPartition,
    timestamp: i64,
) -> Result<i64> {
    let node_id = match shared.client.leader_for_partition(tp) {
        None => {
            debug!(%tp, "partition is unknown for offset lookup, waiting for metadata refresh");
            return Err(Error::StaleMetadata(tp.clone()));
        }
        Some(-1) => {
            debug!(%tp, "partition leader unavailable for offset lookup, waiting for metadata refresh");
            return Err(Error::LeaderNotAvailable(tp.clone()));
        }
        Some(node_id) => node_id,
    };

    if !shared.client.ready(node_id).await {
        return Err(Error::NodeNotReady(node_id));
    }
    let request = ListOffsetsRequest::single(tp.topic.clone(), tp.partition, timestamp);
    let response = shared.client.list_offsets(node_id, request).await?;

    // The response must cover exactly the requested topic-partition
    let topic = match response.topics.as_slice() {
        [topic] if topic.topic == tp.topic => topic,
        _ => {
            return Err(Error::codec(
                "list-offsets response does not match the single requested topic",
            ))
        }
    };
    let partition = match topic.partitions.as_slice() {
        [partition] if partition.partition == tp.partition => partition,
        _ => {
            return Err(Error::codec(
                "list-offsets response does not match the single requested partition",
            ))
        }
    };

    match partition.error_code {
        ErrorCode::None => {
            let offset = partition
                .offsets
                .first()
                .copied()
                .ok_or_else(|| Error::codec("list-offsets response carries no offset"))?;
            debug!(%tp, offset, "fetched offset for partition");
            Ok(offset)
        }
        ErrorCode::NotLeaderForPartition => {
            warn!(%tp, "offset lookup hit obsolete leadership information, retrying");
            Err(Error::NotLeaderForPartition(tp.clone()))
        }
        ErrorCode::UnknownTopicOrPartition => {
            warn!(%tp, "offset lookup hit obsolete leadership information, retrying");
            Err(Error::UnknownTopicOrPartition(tp.clone()))
        }
        other => {
            error!(%tp, code = other.code(), "offset lookup failed");
            Err(broker_error(other, tp))
        }
    }
}

fn broker_error(code: ErrorCode, tp: &TopicPartition) -> Error {
    match code {
        ErrorCode::LeaderNotAvailable => Error::LeaderNotAvailable(tp.clone()),
        ErrorCode::TopicAuthorizationFailed => Error::TopicAuthorizationFailed(tp.topic.clone()),
        other => Error::UnexpectedBroker { code: other.code() },
    }
}
