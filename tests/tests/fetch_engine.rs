//! End-to-end tests for the fetch engine against a scripted broker.
//!
//! These exercise the full pipeline: planner → fetch loop → response
//! processing → partition buffers → consumer drain API, with only the
//! network transport mocked out.

use engine_core::{Error, TopicPartition};
use fetcher::OffsetResetStrategy;
use integration_tests::broker::MockBroker;
use integration_tests::fixtures;
use integration_tests::setup::{wait_for, within, TestContext};
use protocol::{Compression, ErrorCode, MessageSet};
use std::sync::Arc;
use std::time::Duration;

const LONG: Duration = Duration::from_secs(2);
const SHORT: Duration = Duration::from_millis(100);

fn tp(partition: i32) -> TopicPartition {
    TopicPartition::new("events", partition)
}

#[tokio::test]
async fn test_happy_path_delivers_records_in_order() {
    let ctx = TestContext::new(OffsetResetStrategy::Latest);
    ctx.broker.set_leader(tp(0), 0);
    ctx.assign_at(&[(tp(0), 5)]);
    ctx.broker
        .push_fetch(0, Ok(fixtures::data_response(&tp(0), 10, fixtures::record_set(&[5, 6, 7]))));

    for expected in 5..8 {
        let record = within(LONG, ctx.fetcher.next_record(&[])).await.unwrap();
        assert_eq!(record.offset, expected);
        assert_eq!(record.partition, 0);
        // Position advances atomically with each delivered record
        assert_eq!(ctx.position(&tp(0)), Some(expected + 1));
    }
    assert_eq!(ctx.highwater(&tp(0)), Some(10));

    // Everything consumed; nothing is buffered anymore
    let drained = ctx.fetcher.fetched_records(&[], Duration::ZERO).await.unwrap();
    assert!(drained.is_empty());
}

#[tokio::test]
async fn test_decompression_skips_records_before_position() {
    let ctx = TestContext::new(OffsetResetStrategy::Latest);
    ctx.broker.set_leader(tp(0), 0);
    ctx.assign_at(&[(tp(0), 10)]);
    // The compressed container includes offsets before the fetch position
    ctx.broker.push_fetch(
        0,
        Ok(fixtures::data_response(
            &tp(0),
            12,
            fixtures::compressed_set(Compression::Gzip, &[8, 9, 10, 11]),
        )),
    );

    let drained = within(LONG, ctx.fetcher.fetched_records(&[], LONG)).await.unwrap();
    let offsets: Vec<i64> = drained[&tp(0)].iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![10, 11]);
    assert_eq!(ctx.position(&tp(0)), Some(12));
}

#[tokio::test]
async fn test_oversized_message_surfaces_record_too_large() {
    let ctx = TestContext::new(OffsetResetStrategy::Latest);
    ctx.broker.set_leader(tp(0), 0);
    ctx.assign_at(&[(tp(0), 3)]);
    // Not a single full message fit into the fetch size
    ctx.broker
        .push_fetch(0, Ok(fixtures::data_response(&tp(0), 3, fixtures::partial_only_set(3))));

    let err = within(LONG, ctx.fetcher.next_record(&[])).await.unwrap_err();
    assert!(matches!(err, Error::RecordTooLarge { offset: 3, .. }));
    // The unreturnable message is skipped so the partition is not stuck
    assert_eq!(ctx.position(&tp(0)), Some(4));

    // No further data scripted; subsequent calls find nothing
    let drained = ctx.fetcher.fetched_records(&[], SHORT).await.unwrap();
    assert!(drained.is_empty());
}

#[tokio::test]
async fn test_offset_out_of_range_resets_with_default_policy() {
    let ctx = TestContext::new(OffsetResetStrategy::Latest);
    ctx.broker.set_leader(tp(0), 0);
    ctx.assign_at(&[(tp(0), 5)]);
    ctx.broker
        .push_fetch(0, Ok(fixtures::error_response(&tp(0), ErrorCode::OffsetOutOfRange)));

    assert!(
        wait_for(
            || ctx.subscriptions.lock().is_offset_reset_needed(&tp(0)),
            LONG
        )
        .await
    );
    // No error reaches the consumer
    let drained = ctx.fetcher.fetched_records(&[], Duration::ZERO).await.unwrap();
    assert!(drained.is_empty());

    ctx.broker
        .push_offsets(0, Ok(fixtures::offsets_response(&tp(0), ErrorCode::None, vec![100])));
    within(LONG, ctx.fetcher.update_fetch_positions(&[tp(0)]))
        .await
        .unwrap();

    let requests = ctx.broker.offsets_requests();
    assert_eq!(requests.len(), 1);
    let (node_id, request) = &requests[0];
    assert_eq!(*node_id, 0);
    assert_eq!(request.replica_id, -1);
    let partition = &request.topics[0].partitions[0];
    assert_eq!(partition.timestamp, -1); // latest
    assert_eq!(partition.max_num_offsets, 1);
    assert_eq!(ctx.position(&tp(0)), Some(100));
}

#[tokio::test]
async fn test_leader_churn_triggers_metadata_refresh() {
    let ctx = TestContext::new(OffsetResetStrategy::Latest);
    ctx.broker.set_leader(tp(0), 0);
    ctx.assign_at(&[(tp(0), 5)]);
    ctx.broker
        .push_fetch(0, Ok(fixtures::error_response(&tp(0), ErrorCode::NotLeaderForPartition)));

    assert!(wait_for(|| ctx.broker.metadata_updates() >= 1, LONG).await);

    // Metadata refresh resolved a new leader; fetching resumes normally
    ctx.broker.set_leader(tp(0), 1);
    ctx.broker
        .push_fetch(1, Ok(fixtures::data_response(&tp(0), 7, fixtures::record_set(&[5, 6]))));

    let record = within(LONG, ctx.fetcher.next_record(&[])).await.unwrap();
    assert_eq!(record.offset, 5);
    assert!(ctx.broker.fetch_requests().iter().any(|(node, _)| *node == 1));
}

#[tokio::test]
async fn test_close_terminates_loop_and_in_flight_fetches() {
    let broker = Arc::new(MockBroker::new());
    broker.set_leader(tp(0), 0);
    broker.gate_node(0);
    let ctx = TestContext::with_broker(broker, OffsetResetStrategy::Latest);
    ctx.assign_at(&[(tp(0), 0)]);

    // A fetch is in flight, blocked inside the transport
    assert!(wait_for(|| ctx.broker.fetch_request_count() >= 1, LONG).await);

    within(LONG, ctx.fetcher.close()).await;

    // The abandoned response never lands in the record map
    ctx.broker
        .push_fetch(0, Ok(fixtures::data_response(&tp(0), 5, fixtures::record_set(&[0]))));
    ctx.broker.release_fetches(0, 1);
    tokio::time::sleep(SHORT).await;
    let drained = ctx.fetcher.fetched_records(&[], Duration::ZERO).await.unwrap();
    assert!(drained.is_empty());

    // Close is idempotent
    within(LONG, ctx.fetcher.close()).await;
}

#[tokio::test]
async fn test_response_for_unassigned_partition_is_dropped() {
    let broker = Arc::new(MockBroker::new());
    broker.set_leader(tp(0), 0);
    broker.gate_node(0);
    let ctx = TestContext::with_broker(broker, OffsetResetStrategy::Latest);
    ctx.assign_at(&[(tp(0), 5)]);
    ctx.broker
        .push_fetch(0, Ok(fixtures::data_response(&tp(0), 7, fixtures::record_set(&[5, 6]))));

    assert!(wait_for(|| ctx.broker.fetch_request_count() >= 1, LONG).await);
    // Rebalance takes the partition away while the fetch is in flight
    ctx.subscriptions.lock().unassign(&tp(0));
    ctx.broker.release_fetches(0, 1);

    tokio::time::sleep(SHORT).await;
    let drained = ctx.fetcher.fetched_records(&[], Duration::ZERO).await.unwrap();
    assert!(drained.is_empty());
    assert_eq!(ctx.position(&tp(0)), None);
}

#[tokio::test]
async fn test_reassignment_clears_buffered_records() {
    let ctx = TestContext::new(OffsetResetStrategy::Latest);
    ctx.broker.set_leader(tp(0), 0);
    ctx.assign_at(&[(tp(0), 5)]);
    ctx.broker
        .push_fetch(0, Ok(fixtures::data_response(&tp(0), 7, fixtures::record_set(&[5, 6]))));

    let record = within(LONG, ctx.fetcher.next_record(&[])).await.unwrap();
    assert_eq!(record.offset, 5);

    // A rebalance starts with one record still buffered
    ctx.subscriptions.lock().begin_reassignment();
    let drained = ctx.fetcher.fetched_records(&[], Duration::ZERO).await.unwrap();
    assert!(drained.values().all(|records| records.is_empty()));
    // The undelivered record did not move the position
    assert_eq!(ctx.position(&tp(0)), Some(6));
}

#[tokio::test]
async fn test_error_sentinel_is_surfaced_exactly_once() {
    // No default reset policy: out-of-range surfaces to the caller instead
    let ctx = TestContext::new(OffsetResetStrategy::None);
    ctx.broker.set_leader(tp(0), 0);
    ctx.assign_at(&[(tp(0), 5)]);
    ctx.broker
        .push_fetch(0, Ok(fixtures::error_response(&tp(0), ErrorCode::OffsetOutOfRange)));

    let err = within(LONG, ctx.fetcher.next_record(&[])).await.unwrap_err();
    assert_eq!(
        err,
        Error::OffsetOutOfRange {
            tp: tp(0),
            offset: 5
        }
    );

    // Observed once; the sentinel is gone
    let drained = ctx.fetcher.fetched_records(&[], Duration::ZERO).await.unwrap();
    assert!(drained.is_empty());
}

#[tokio::test]
async fn test_authorization_failure_is_raised() {
    let ctx = TestContext::new(OffsetResetStrategy::Latest);
    ctx.broker.set_leader(tp(0), 0);
    ctx.assign_at(&[(tp(0), 0)]);
    ctx.broker
        .push_fetch(0, Ok(fixtures::error_response(&tp(0), ErrorCode::TopicAuthorizationFailed)));

    let err = within(LONG, ctx.fetcher.fetched_records(&[], LONG))
        .await
        .unwrap_err();
    assert_eq!(err, Error::TopicAuthorizationFailed("events".to_string()));
}

#[tokio::test]
async fn test_error_is_held_while_records_are_returned() {
    let ctx = TestContext::new(OffsetResetStrategy::Latest);
    ctx.broker.set_leader(tp(0), 0);
    ctx.broker.set_leader(tp(1), 0);
    ctx.assign_at(&[(tp(0), 0), (tp(1), 0)]);
    // One response carries data for partition 0 and an error for partition 1
    ctx.broker.push_fetch(
        0,
        Ok(fixtures::fetch_response(
            "events",
            vec![
                (0, ErrorCode::None, 5, fixtures::record_set(&[0, 1])),
                (1, ErrorCode::TopicAuthorizationFailed, -1, MessageSet::default()),
            ],
        )),
    );

    // First call returns the drained records and holds the error
    let drained = within(LONG, ctx.fetcher.fetched_records(&[], LONG)).await.unwrap();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[&tp(0)].len(), 2);

    // Second call surfaces the held error
    let err = ctx.fetcher.fetched_records(&[], Duration::ZERO).await.unwrap_err();
    assert_eq!(err, Error::TopicAuthorizationFailed("events".to_string()));

    // Third call finds a clean map
    let drained = ctx.fetcher.fetched_records(&[], Duration::ZERO).await.unwrap();
    assert!(drained.is_empty());
}

#[tokio::test]
async fn test_single_in_flight_request_per_node() {
    let broker = Arc::new(MockBroker::new());
    broker.set_leader(tp(0), 0);
    broker.set_leader(tp(1), 0);
    broker.gate_node(0);
    let ctx = TestContext::with_broker(broker, OffsetResetStrategy::Latest);
    ctx.assign_at(&[(tp(0), 10), (tp(1), 20)]);

    assert!(wait_for(|| ctx.broker.fetch_request_count() >= 1, LONG).await);
    // Give the loop plenty of planning rounds; the node stays capped at one
    tokio::time::sleep(SHORT).await;
    let requests = ctx.broker.fetch_requests();
    assert_eq!(requests.len(), 1);

    // Both partitions ride the single request, grouped under one topic
    let request = &requests[0].1;
    assert_eq!(request.topics.len(), 1);
    let mut partitions: Vec<(i32, i64)> = request.topics[0]
        .partitions
        .iter()
        .map(|p| (p.partition, p.fetch_offset))
        .collect();
    partitions.sort();
    assert_eq!(partitions, vec![(0, 10), (1, 20)]);
}

#[tokio::test]
async fn test_next_record_and_fetched_records_drain_same_multiset() {
    fn script(ctx: &TestContext) {
        ctx.broker.set_leader(tp(0), 0);
        ctx.broker.set_leader(tp(1), 0);
        ctx.assign_at(&[(tp(0), 0), (tp(1), 5)]);
        ctx.broker.push_fetch(
            0,
            Ok(fixtures::fetch_response(
                "events",
                vec![
                    (0, ErrorCode::None, 3, fixtures::record_set(&[0, 1, 2])),
                    (1, ErrorCode::None, 7, fixtures::record_set(&[5, 6])),
                ],
            )),
        );
    }

    let one_by_one = TestContext::new(OffsetResetStrategy::Latest);
    script(&one_by_one);
    let mut singles = Vec::new();
    for _ in 0..5 {
        let record = within(LONG, one_by_one.fetcher.next_record(&[])).await.unwrap();
        singles.push((record.partition, record.offset));
    }

    let in_bulk = TestContext::new(OffsetResetStrategy::Latest);
    script(&in_bulk);
    let mut bulk = Vec::new();
    while bulk.len() < 5 {
        let drained = within(LONG, in_bulk.fetcher.fetched_records(&[], LONG))
            .await
            .unwrap();
        for (tp, records) in drained {
            bulk.extend(records.iter().map(|r| (tp.partition, r.offset)));
        }
    }

    singles.sort();
    bulk.sort();
    assert_eq!(singles, bulk);
}

#[tokio::test]
async fn test_empty_response_keeps_fetching() {
    let ctx = TestContext::new(OffsetResetStrategy::Latest);
    ctx.broker.set_leader(tp(0), 0);
    ctx.assign_at(&[(tp(0), 0)]);
    ctx.broker
        .push_fetch(0, Ok(fixtures::data_response(&tp(0), 0, MessageSet::default())));
    ctx.broker
        .push_fetch(0, Ok(fixtures::data_response(&tp(0), 2, fixtures::record_set(&[0, 1]))));

    // The empty response records nothing; the next cycle fetches again
    let record = within(LONG, ctx.fetcher.next_record(&[])).await.unwrap();
    assert_eq!(record.offset, 0);
}

#[tokio::test]
async fn test_transport_error_is_retried_next_cycle() {
    let ctx = TestContext::new(OffsetResetStrategy::Latest);
    ctx.broker.set_leader(tp(0), 0);
    ctx.assign_at(&[(tp(0), 0)]);
    ctx.broker
        .push_fetch(0, Err(Error::transport(0, "connection reset")));
    ctx.broker
        .push_fetch(0, Ok(fixtures::data_response(&tp(0), 1, fixtures::record_set(&[0]))));

    let record = within(LONG, ctx.fetcher.next_record(&[])).await.unwrap();
    assert_eq!(record.offset, 0);
}

#[tokio::test]
async fn test_partition_filter_limits_delivery() {
    let ctx = TestContext::new(OffsetResetStrategy::Latest);
    ctx.broker.set_leader(tp(0), 0);
    ctx.broker.set_leader(tp(1), 0);
    ctx.assign_at(&[(tp(0), 0), (tp(1), 5)]);
    ctx.broker.push_fetch(
        0,
        Ok(fixtures::fetch_response(
            "events",
            vec![
                (0, ErrorCode::None, 1, fixtures::record_set(&[0])),
                (1, ErrorCode::None, 6, fixtures::record_set(&[5])),
            ],
        )),
    );

    // Partition 0 is buffered first, but the filter skips straight to 1
    let record = within(LONG, ctx.fetcher.next_record(&[tp(1)])).await.unwrap();
    assert_eq!((record.partition, record.offset), (1, 5));

    let record = within(LONG, ctx.fetcher.next_record(&[tp(0)])).await.unwrap();
    assert_eq!((record.partition, record.offset), (0, 0));
}
