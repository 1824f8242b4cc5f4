//! Per-partition buffer of decoded records.

use crate::subscriptions::SubscriptionState;
use engine_core::{ConsumerRecord, Error, TopicPartition};
use std::collections::VecDeque;
use tracing::debug;

/// What the fetch loop produced for one partition: a buffer of records, or
/// an error waiting to be surfaced to the consumer exactly once.
#[derive(Debug)]
pub enum FetchEntry {
    Records(PartitionRecords),
    Error(Error),
}

/// Decoded records for one partition, in ascending offset order.
///
/// Delivery is driven by the subscription: the handle is passed into every
/// call so that removing a record and advancing the consume position happen
/// under the same lock.
#[derive(Debug)]
pub struct PartitionRecords {
    tp: TopicPartition,
    records: VecDeque<ConsumerRecord>,
}

impl PartitionRecords {
    pub fn new(tp: TopicPartition, records: VecDeque<ConsumerRecord>) -> Self {
        Self { tp, records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_assignment(&mut self, subs: &SubscriptionState) -> bool {
        if subs.needs_partition_assignment() || !subs.is_fetchable(&self.tp) {
            // A rebalance happened after these records were fetched
            debug!(
                tp = %self.tp,
                "not returning fetched records for partition since it is \
                 not fetchable (unassigned or paused)"
            );
            self.records.clear();
            return false;
        }
        true
    }

    /// Pop the record at the current consume position, advancing the
    /// position past it.
    ///
    /// Records whose offset does not match the position are discarded:
    /// decompressed message sets may include earlier offsets, and the user
    /// may have seeked since the fetch was issued.
    pub fn next_record(&mut self, subs: &mut SubscriptionState) -> Option<ConsumerRecord> {
        if !self.check_assignment(subs) {
            return None;
        }
        while let Some(record) = self.records.pop_front() {
            if subs.position(&self.tp) == Some(record.offset) {
                subs.advance_position(&self.tp, record.offset + 1);
                return Some(record);
            }
        }
        None
    }

    /// Drain every deliverable record, advancing the position once per
    /// returned record.
    pub fn drain(&mut self, subs: &mut SubscriptionState) -> Vec<ConsumerRecord> {
        if !self.check_assignment(subs) {
            return Vec::new();
        }
        let mut drained = Vec::new();
        while let Some(record) = self.records.pop_front() {
            if subs.position(&self.tp) == Some(record.offset) {
                subs.advance_position(&self.tp, record.offset + 1);
                drained.push(record);
            }
        }
        drained
    }
}
