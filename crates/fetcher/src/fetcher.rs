//! The fetch engine: background loop, response processing, and the
//! consumer-facing drain API.

use crate::buffer::{FetchEntry, PartitionRecords};
use crate::client::BrokerClient;
use crate::config::FetchConfig;
use crate::plan::plan_fetch_requests;
use crate::subscriptions::SubscriptionState;
use crate::unpack::unpack_message_set;
use engine_core::{ConsumerRecord, Deserializer, Error, Result, TopicPartition};
use indexmap::IndexMap;
use parking_lot::Mutex;
use protocol::{ErrorCode, FetchRequest, FetchResponse};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Mutable engine state, confined to one lock.
///
/// `records` is insertion-ordered so that interleaved partitions are
/// drained fairly; `in_flight` holds the nodes with an outstanding fetch.
#[derive(Default)]
pub(crate) struct FetchState {
    pub(crate) records: IndexMap<TopicPartition, FetchEntry>,
    pub(crate) in_flight: HashSet<i32>,
}

/// State shared between the engine handle, the fetch loop, and the per-node
/// fetch tasks.
///
/// Lock order is `state` before `subscriptions`; neither lock is ever held
/// across an await.
pub(crate) struct Shared<C: ?Sized> {
    pub(crate) config: FetchConfig,
    pub(crate) key_deserializer: Option<Deserializer>,
    pub(crate) value_deserializer: Option<Deserializer>,
    pub(crate) subscriptions: Arc<Mutex<SubscriptionState>>,
    pub(crate) state: Mutex<FetchState>,
    /// Signalled by the loop when new records or errors land in the map.
    pub(crate) records_ready: Notify,
    /// Signalled by the consumer API whenever it drains an entry.
    pub(crate) buffers_drained: Notify,
    pub(crate) client: Arc<C>,
}

/// The consumer-side fetch engine.
///
/// Construction spawns the background fetch loop; [`Fetcher::close`] tears
/// it down together with every in-flight fetch task. Requires a running
/// tokio runtime.
pub struct Fetcher<C: BrokerClient> {
    pub(crate) shared: Arc<Shared<C>>,
    shutdown: CancellationToken,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: BrokerClient> Fetcher<C> {
    pub fn new(
        client: Arc<C>,
        subscriptions: Arc<Mutex<SubscriptionState>>,
        config: FetchConfig,
    ) -> Self {
        Self::with_deserializers(client, subscriptions, config, None, None)
    }

    pub fn with_deserializers(
        client: Arc<C>,
        subscriptions: Arc<Mutex<SubscriptionState>>,
        config: FetchConfig,
        key_deserializer: Option<Deserializer>,
        value_deserializer: Option<Deserializer>,
    ) -> Self {
        let shared = Arc::new(Shared {
            config,
            key_deserializer,
            value_deserializer,
            subscriptions,
            state: Mutex::new(FetchState::default()),
            records_ready: Notify::new(),
            buffers_drained: Notify::new(),
            client,
        });
        let shutdown = CancellationToken::new();
        let loop_task = tokio::spawn(fetch_requests_routine(shared.clone(), shutdown.clone()));
        Self {
            shared,
            shutdown,
            loop_task: Mutex::new(Some(loop_task)),
        }
    }

    /// Cancel the fetch loop and every in-flight fetch task, awaiting their
    /// termination. No engine state mutates after this returns.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let loop_task = self.loop_task.lock().take();
        if let Some(loop_task) = loop_task {
            if let Err(err) = loop_task.await {
                if !err.is_cancelled() {
                    error!(error = %err, "fetch loop terminated abnormally");
                }
            }
        }
    }

    /// Return one fetched record, waiting for the background loop to
    /// deliver some when nothing is buffered.
    ///
    /// A pending per-partition error is surfaced instead, exactly once. An
    /// empty `partitions` filter means all partitions.
    pub async fn next_record(&self, partitions: &[TopicPartition]) -> Result<ConsumerRecord> {
        loop {
            if let Some(result) = self.poll_next(partitions) {
                return result;
            }
            // No records ready, wait for some to arrive
            self.shared.records_ready.notified().await;
        }
    }

    fn poll_next(&self, partitions: &[TopicPartition]) -> Option<Result<ConsumerRecord>> {
        let mut state = self.shared.state.lock();
        let mut subs = self.shared.subscriptions.lock();
        let keys: Vec<TopicPartition> = state
            .records
            .keys()
            .filter(|&tp| partitions.is_empty() || partitions.contains(tp))
            .cloned()
            .collect();

        for tp in keys {
            if matches!(state.records.get(&tp), Some(FetchEntry::Error(_))) {
                if let Some(FetchEntry::Error(err)) = state.records.shift_remove(&tp) {
                    // Cleared, so the partition can be fetched again
                    self.shared.buffers_drained.notify_one();
                    return Some(Err(err));
                }
                continue;
            }
            let Some(FetchEntry::Records(buffer)) = state.records.get_mut(&tp) else {
                continue;
            };
            if let Some(record) = buffer.next_record(&mut subs) {
                return Some(Ok(record));
            }
            // All buffered records consumed, request new ones
            state.records.shift_remove(&tp);
            self.shared.buffers_drained.notify_one();
        }
        None
    }

    /// Drain all buffered records, advancing consumed offsets.
    ///
    /// Waits up to `timeout` when nothing is buffered; `Duration::ZERO`
    /// never waits. A pending per-partition error is raised only when no
    /// records were drained first; otherwise it is held for the next call.
    pub async fn fetched_records(
        &self,
        partitions: &[TopicPartition],
        timeout: Duration,
    ) -> Result<HashMap<TopicPartition, Vec<ConsumerRecord>>> {
        let drained = self.drain_pass(partitions)?;
        if !drained.is_empty() || timeout.is_zero() {
            return Ok(drained);
        }
        if tokio::time::timeout(timeout, self.shared.records_ready.notified())
            .await
            .is_ok()
        {
            return self.drain_pass(partitions);
        }
        Ok(drained)
    }

    fn drain_pass(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, Vec<ConsumerRecord>>> {
        let mut drained = HashMap::new();
        let mut state = self.shared.state.lock();
        let mut subs = self.shared.subscriptions.lock();
        let keys: Vec<TopicPartition> = state
            .records
            .keys()
            .filter(|&tp| partitions.is_empty() || partitions.contains(tp))
            .cloned()
            .collect();

        for tp in keys {
            if matches!(state.records.get(&tp), Some(FetchEntry::Error(_))) {
                if !drained.is_empty() {
                    // We already drained other partitions; hold the error
                    // for the next call and return what we have
                    return Ok(drained);
                }
                if let Some(FetchEntry::Error(err)) = state.records.shift_remove(&tp) {
                    self.shared.buffers_drained.notify_one();
                    return Err(err);
                }
                continue;
            }
            let Some(FetchEntry::Records(buffer)) = state.records.get_mut(&tp) else {
                continue;
            };
            let records = buffer.drain(&mut subs);
            drained.insert(tp.clone(), records);
            state.records.shift_remove(&tp);
            self.shared.buffers_drained.notify_one();
        }
        Ok(drained)
    }
}

impl<C: BrokerClient> Drop for Fetcher<C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// The background fetch loop.
async fn fetch_requests_routine<C: BrokerClient>(
    shared: Arc<Shared<C>>,
    shutdown: CancellationToken,
) {
    let mut tasks: JoinSet<bool> = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = fetch_tick(&shared, &mut tasks) => {}
        }
    }
    // Cancel in-flight fetches and await their termination
    tasks.shutdown().await;
}

/// One planning round of the fetch loop.
async fn fetch_tick<C: BrokerClient>(shared: &Arc<Shared<C>>, tasks: &mut JoinSet<bool>) {
    let requests = {
        let state = shared.state.lock();
        let subs = shared.subscriptions.lock();
        plan_fetch_requests(
            shared.client.as_ref(),
            &subs,
            &state.records,
            &state.in_flight,
            &shared.config,
        )
    };

    for (node_id, request) in requests {
        if !shared.client.ready(node_id).await {
            // We will plan it again on the next round
            continue;
        }
        debug!(node_id, "sending fetch request");
        shared.state.lock().in_flight.insert(node_id);
        let task_shared = Arc::clone(shared);
        tasks.spawn(async move { proc_fetch_request(task_shared, node_id, request).await });
    }

    if !tasks.is_empty() {
        let mut has_new_data = false;
        if let Ok(Some(first)) =
            tokio::time::timeout(shared.config.fetcher_timeout(), tasks.join_next()).await
        {
            has_new_data |= task_outcome(first);
            while let Some(next) = tasks.try_join_next() {
                has_new_data |= task_outcome(next);
            }
        }
        if has_new_data {
            // We have new data, wake up getters
            shared.records_ready.notify_one();
        }
    } else if !shared.state.lock().records.is_empty() {
        // Nothing to fetch but undrained buffers remain; wait until the
        // consumer frees at least one of them
        let _ = tokio::time::timeout(
            shared.config.fetcher_timeout(),
            shared.buffers_drained.notified(),
        )
        .await;
    } else {
        // Maybe we have no assigned partitions
        tokio::time::sleep(shared.config.fetcher_timeout()).await;
    }
}

fn task_outcome(result: std::result::Result<bool, tokio::task::JoinError>) -> bool {
    match result {
        Ok(has_new_data) => has_new_data,
        Err(err) => {
            if !err.is_cancelled() {
                error!(error = %err, "fetch task failed");
            }
            false
        }
    }
}

/// Send one fetch request and fold its response into the engine state.
///
/// Returns whether any new data landed in the record map.
async fn proc_fetch_request<C: BrokerClient>(
    shared: Arc<Shared<C>>,
    node_id: i32,
    request: FetchRequest,
) -> bool {
    let fetch_offsets: HashMap<TopicPartition, i64> = request
        .fetch_offsets()
        .map(|(topic, partition, offset)| (TopicPartition::new(topic, partition), offset))
        .collect();

    let response = shared.client.fetch(node_id, request).await;
    // The node is eligible for planning again as soon as the RPC completes
    shared.state.lock().in_flight.remove(&node_id);

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            error!(node_id, error = %err, "failed to fetch messages from node");
            return false;
        }
    };
    process_fetch_response(&shared, &fetch_offsets, response)
}

fn process_fetch_response<C: BrokerClient>(
    shared: &Shared<C>,
    fetch_offsets: &HashMap<TopicPartition, i64>,
    response: FetchResponse,
) -> bool {
    let mut needs_wakeup = false;
    let mut state = shared.state.lock();
    let mut subs = shared.subscriptions.lock();

    for topic in response.topics {
        for partition in topic.partitions {
            let tp = TopicPartition::new(topic.topic.clone(), partition.partition);
            if !subs.is_fetchable(&tp) {
                // A rebalance happened while the request was in flight
                debug!(%tp, "ignoring fetched records for partition since it is no longer fetchable");
                continue;
            }
            let fetch_offset = fetch_offsets.get(&tp).copied().unwrap_or_default();

            match partition.error_code {
                ErrorCode::None => {
                    subs.set_highwater(&tp, partition.high_watermark);

                    let mut records = partition.records;
                    let partial = records.partial.take();
                    if !records.entries.is_empty() {
                        debug!(
                            %tp,
                            offset = fetch_offset,
                            "adding fetched records to buffered record list"
                        );
                        match unpack_message_set(
                            &tp,
                            &records.entries,
                            shared.config.check_crcs,
                            shared.key_deserializer.as_ref(),
                            shared.value_deserializer.as_ref(),
                        ) {
                            Ok(messages) => {
                                state.records.insert(
                                    tp.clone(),
                                    FetchEntry::Records(PartitionRecords::new(tp, messages)),
                                );
                                // We added at least one deliverable record
                                needs_wakeup = true;
                            }
                            Err(err) => {
                                state.records.insert(tp, FetchEntry::Error(err));
                            }
                        }
                    } else if let Some(partial) = partial {
                        // Not a single full message fit in the fetch size;
                        // skip past it so the partition is not stuck forever
                        let position = subs.position(&tp).unwrap_or(fetch_offset);
                        let resume_at = match partial.offset {
                            Some(offset) => (offset + 1).max(position + 1),
                            None => position + 1,
                        };
                        subs.advance_position(&tp, resume_at);
                        state.records.insert(
                            tp.clone(),
                            FetchEntry::Error(Error::RecordTooLarge {
                                tp,
                                offset: fetch_offset,
                                max_bytes: shared.config.max_partition_fetch_bytes,
                            }),
                        );
                        needs_wakeup = true;
                    }
                }
                ErrorCode::NotLeaderForPartition | ErrorCode::UnknownTopicOrPartition => {
                    shared.client.force_metadata_update();
                }
                ErrorCode::OffsetOutOfRange => {
                    if subs.has_default_offset_reset_policy() {
                        subs.need_offset_reset(&tp);
                    } else {
                        state.records.insert(
                            tp.clone(),
                            FetchEntry::Error(Error::OffsetOutOfRange {
                                tp: tp.clone(),
                                offset: fetch_offset,
                            }),
                        );
                        needs_wakeup = true;
                    }
                    info!(%tp, offset = fetch_offset, "fetch offset out of range, resetting offset");
                }
                ErrorCode::TopicAuthorizationFailed => {
                    warn!(topic = %tp.topic, "not authorized to read from topic");
                    state.records.insert(
                        tp.clone(),
                        FetchEntry::Error(Error::TopicAuthorizationFailed(tp.topic.clone())),
                    );
                    needs_wakeup = true;
                }
                other => {
                    warn!(code = other.code(), "unexpected error while fetching data");
                }
            }
        }
    }
    needs_wakeup
}
