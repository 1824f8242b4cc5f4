//! Partition assignment and consume-position bookkeeping.
//!
//! The fetch engine shares this state with the coordinator that owns
//! assignment changes: the engine only moves `position` and `highwater`,
//! everything else (assign, pause, commit, reset policy) is written from
//! outside and observed here.

use engine_core::TopicPartition;
use protocol::{OFFSET_EARLIEST, OFFSET_LATEST};
use std::collections::HashMap;

/// Where to resume when a partition has no valid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetResetStrategy {
    Earliest,
    #[default]
    Latest,
    /// No automatic reset; an invalid position surfaces as an error.
    None,
}

impl OffsetResetStrategy {
    /// The list-offsets timestamp this strategy translates to.
    pub fn as_timestamp(self) -> i64 {
        match self {
            Self::Earliest => OFFSET_EARLIEST,
            _ => OFFSET_LATEST,
        }
    }
}

/// Per-partition consume state.
#[derive(Debug, Clone, Default)]
struct TopicPartitionState {
    /// Next offset to fetch; `None` until a seek or reset establishes one.
    position: Option<i64>,
    committed: Option<i64>,
    highwater: Option<i64>,
    paused: bool,
    /// `Some` while the partition awaits an offset reset.
    reset_strategy: Option<OffsetResetStrategy>,
}

impl TopicPartitionState {
    fn is_fetchable(&self) -> bool {
        !self.paused && self.reset_strategy.is_none() && self.position.is_some()
    }
}

/// The authoritative set of assigned partitions and their positions.
#[derive(Debug)]
pub struct SubscriptionState {
    default_reset_strategy: OffsetResetStrategy,
    needs_partition_assignment: bool,
    assignment: HashMap<TopicPartition, TopicPartitionState>,
}

impl SubscriptionState {
    pub fn new(default_reset_strategy: OffsetResetStrategy) -> Self {
        Self {
            default_reset_strategy,
            needs_partition_assignment: true,
            assignment: HashMap::new(),
        }
    }

    /// Replace the assignment with the given partitions, all starting with
    /// no valid position.
    pub fn assign(&mut self, partitions: impl IntoIterator<Item = TopicPartition>) {
        self.assignment = partitions
            .into_iter()
            .map(|tp| (tp, TopicPartitionState::default()))
            .collect();
        self.needs_partition_assignment = false;
    }

    /// Mark the assignment as in flux; buffered data for every partition
    /// becomes undeliverable until a new assignment lands.
    pub fn begin_reassignment(&mut self) {
        self.needs_partition_assignment = true;
    }

    pub fn unassign(&mut self, tp: &TopicPartition) {
        self.assignment.remove(tp);
    }

    pub fn needs_partition_assignment(&self) -> bool {
        self.needs_partition_assignment
    }

    pub fn is_assigned(&self, tp: &TopicPartition) -> bool {
        self.assignment.contains_key(tp)
    }

    /// Assigned, not paused, not awaiting reset, and has a valid position.
    pub fn is_fetchable(&self, tp: &TopicPartition) -> bool {
        self.assignment.get(tp).is_some_and(|s| s.is_fetchable())
    }

    /// All currently fetchable partitions, in stable order.
    pub fn fetchable_partitions(&self) -> Vec<TopicPartition> {
        let mut partitions: Vec<_> = self
            .assignment
            .iter()
            .filter(|(_, s)| s.is_fetchable())
            .map(|(tp, _)| tp.clone())
            .collect();
        partitions.sort();
        partitions
    }

    pub fn pause(&mut self, tp: &TopicPartition) {
        if let Some(state) = self.assignment.get_mut(tp) {
            state.paused = true;
        }
    }

    pub fn resume(&mut self, tp: &TopicPartition) {
        if let Some(state) = self.assignment.get_mut(tp) {
            state.paused = false;
        }
    }

    /// Set the consume position, clearing any pending reset.
    pub fn seek(&mut self, tp: &TopicPartition, offset: i64) {
        if let Some(state) = self.assignment.get_mut(tp) {
            state.position = Some(offset);
            state.reset_strategy = None;
        }
    }

    pub fn position(&self, tp: &TopicPartition) -> Option<i64> {
        self.assignment.get(tp).and_then(|s| s.position)
    }

    /// Move the position forward as records leave a buffer; unlike `seek`
    /// this does not touch the reset flag.
    pub fn advance_position(&mut self, tp: &TopicPartition, next_offset: i64) {
        if let Some(state) = self.assignment.get_mut(tp) {
            state.position = Some(next_offset);
        }
    }

    pub fn committed(&self, tp: &TopicPartition) -> Option<i64> {
        self.assignment.get(tp).and_then(|s| s.committed)
    }

    pub fn set_committed(&mut self, tp: &TopicPartition, offset: i64) {
        if let Some(state) = self.assignment.get_mut(tp) {
            state.committed = Some(offset);
        }
    }

    pub fn highwater(&self, tp: &TopicPartition) -> Option<i64> {
        self.assignment.get(tp).and_then(|s| s.highwater)
    }

    pub fn set_highwater(&mut self, tp: &TopicPartition, highwater: i64) {
        if let Some(state) = self.assignment.get_mut(tp) {
            state.highwater = Some(highwater);
        }
    }

    /// Flag the partition for a reset with the default strategy; its
    /// position becomes invalid until the reset completes.
    pub fn need_offset_reset(&mut self, tp: &TopicPartition) {
        self.need_offset_reset_with(tp, self.default_reset_strategy);
    }

    pub fn need_offset_reset_with(&mut self, tp: &TopicPartition, strategy: OffsetResetStrategy) {
        if let Some(state) = self.assignment.get_mut(tp) {
            state.reset_strategy = Some(strategy);
            state.position = None;
        }
    }

    pub fn is_offset_reset_needed(&self, tp: &TopicPartition) -> bool {
        self.assignment
            .get(tp)
            .is_some_and(|s| s.reset_strategy.is_some())
    }

    pub fn reset_strategy(&self, tp: &TopicPartition) -> Option<OffsetResetStrategy> {
        self.assignment.get(tp).and_then(|s| s.reset_strategy)
    }

    pub fn has_default_offset_reset_policy(&self) -> bool {
        self.default_reset_strategy != OffsetResetStrategy::None
    }
}
