use std::sync::Arc;
use std::time::Duration;

use common::{
    consumer_loop, consumer_loop_with, login_event, payload, settings, DLQ_TOPIC, INPUT_TOPIC,
    OUTPUT_TOPIC,
};
use login_consumer::error::{LoopError, SinkError};
use login_consumer::test_utils::{MemoryLog, MemorySink};
use serde_json::json;
use tokio::sync::watch;

mod common;

fn missing_ip() -> Vec<u8> {
    let mut event = login_event("no-ip");
    event.as_object_mut().unwrap().remove("ip");
    payload(&event)
}

fn offsets_committed(log: &MemoryLog, partition: i32) -> Vec<i64> {
    log.commit_history()
        .into_iter()
        .filter(|position| position.partition == partition)
        .map(|position| position.offset)
        .collect()
}

#[tokio::test]
async fn one_bad_record_does_not_abort_the_batch() {
    let log = MemoryLog::new();
    log.append(INPUT_TOPIC, 0, &b"\x00\x01"[..]);
    log.append(INPUT_TOPIC, 0, payload(&login_event("1")));
    log.append(INPUT_TOPIC, 0, missing_ip());
    log.append(
        INPUT_TOPIC,
        0,
        payload(&json!({"user_id": "3", "app_version": "1.0.0", "ip": "10.0.0.1", "device_id": true})),
    );
    log.append(INPUT_TOPIC, 0, payload(&login_event("4")));
    let sink = Arc::new(MemorySink::new());

    let report = consumer_loop(log.source(), sink.clone())
        .run_batch()
        .await
        .expect("batch failed");

    assert_eq!(report.received, 5);
    assert_eq!(report.accepted, 2);
    assert_eq!(report.rejected, 3);
    assert_eq!(report.committed, 5);
    assert_eq!(sink.messages(OUTPUT_TOPIC).len(), 2);

    let dlq_offsets: Vec<String> = sink
        .messages(DLQ_TOPIC)
        .iter()
        .map(|message| message.header("dlq_source_offset").unwrap().to_string())
        .collect();
    assert_eq!(dlq_offsets, vec!["0", "2", "3"]);
    assert_eq!(log.committed(INPUT_TOPIC, 0), Some(5));
}

#[tokio::test]
async fn committed_offsets_follow_partition_order() {
    let log = MemoryLog::new();
    for i in 0..23 {
        let partition = i % 2;
        let raw = if i % 5 == 0 {
            missing_ip()
        } else {
            payload(&login_event(&i.to_string()))
        };
        log.append(INPUT_TOPIC, partition, raw);
    }
    let sink = Arc::new(MemorySink::new());

    let mut settings = settings();
    settings.batch_size = 4;
    let mut consumer = consumer_loop_with(log.source(), sink.clone(), settings);

    let mut received = 0;
    loop {
        let report = consumer.run_batch().await.expect("batch failed");
        if report.received == 0 {
            break;
        }
        assert!(report.received <= 4);
        received += report.received;
    }

    assert_eq!(received, 23);
    assert_eq!(offsets_committed(&log, 0), (0..12).collect::<Vec<i64>>());
    assert_eq!(offsets_committed(&log, 1), (0..11).collect::<Vec<i64>>());
    assert_eq!(log.committed(INPUT_TOPIC, 0), Some(12));
    assert_eq!(log.committed(INPUT_TOPIC, 1), Some(11));
}

#[tokio::test]
async fn record_emitted_but_not_committed_is_redelivered() {
    let log = MemoryLog::new();
    log.append(INPUT_TOPIC, 0, payload(&login_event("123")));
    let sink = Arc::new(MemorySink::new());

    // Emission succeeds, then the process dies before its offset is committed
    let mut source = log.source();
    source.fail_commits(true);
    let mut crashed = consumer_loop(source, sink.clone());
    let report = crashed.run_batch().await.expect("batch failed");
    assert_eq!(report.accepted, 1);
    assert_eq!(report.commit_errors, 1);
    drop(crashed);
    assert_eq!(log.committed(INPUT_TOPIC, 0), None);

    let mut restarted = consumer_loop(log.source(), sink.clone());
    let report = restarted.run_batch().await.expect("batch failed");
    assert_eq!(report.received, 1);
    assert_eq!(report.committed, 1);

    let output = sink.messages(OUTPUT_TOPIC);
    assert_eq!(output.len(), 2);
    assert_eq!(output[0], output[1]);
    assert_eq!(log.committed(INPUT_TOPIC, 0), Some(1));

    // Nothing left after the restart caught up
    let report = restarted.run_batch().await.expect("batch failed");
    assert_eq!(report.received, 0);
}

#[tokio::test]
async fn transient_sink_failures_are_retried() {
    let log = MemoryLog::new();
    log.append(INPUT_TOPIC, 0, payload(&login_event("1")));
    let sink = Arc::new(MemorySink::new());
    sink.fail_next(2, SinkError::Retryable("leader not available".to_string()));

    let report = consumer_loop(log.source(), sink.clone())
        .run_batch()
        .await
        .expect("batch failed");

    assert_eq!(report.committed, 1);
    assert_eq!(sink.messages(OUTPUT_TOPIC).len(), 1);
}

#[tokio::test]
async fn sustained_sink_failure_stops_the_loop_without_committing() {
    let log = MemoryLog::new();
    log.append(INPUT_TOPIC, 0, payload(&login_event("1")));
    log.append(INPUT_TOPIC, 0, missing_ip());
    log.append(INPUT_TOPIC, 0, payload(&login_event("3")));
    let sink = Arc::new(MemorySink::new());
    sink.fail_topic(DLQ_TOPIC, SinkError::Retryable("broker down".to_string()));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let result = consumer_loop(log.source(), sink.clone())
        .run(shutdown_rx)
        .await;

    match result {
        Err(LoopError::EmitExhausted {
            offset,
            sink_topic,
            attempts,
            ..
        }) => {
            assert_eq!(offset, 1);
            assert_eq!(sink_topic, DLQ_TOPIC);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected a fatal emit error, got {other:?}"),
    }

    // The record before the failure is done, the failing one and everything after it is not
    assert_eq!(offsets_committed(&log, 0), vec![0]);
    assert_eq!(log.committed(INPUT_TOPIC, 0), Some(1));
    assert_eq!(sink.messages(OUTPUT_TOPIC).len(), 1);
    assert_eq!(sink.flushes(), 1);

    // Once the sink recovers, a restart picks up at the failed record
    sink.clear_failures();
    let report = consumer_loop(log.source(), sink.clone())
        .run_batch()
        .await
        .expect("batch failed");
    assert_eq!(report.received, 2);
    assert_eq!(sink.messages(DLQ_TOPIC).len(), 1);
    assert_eq!(log.committed(INPUT_TOPIC, 0), Some(3));
}

#[tokio::test]
async fn permanent_sink_failure_is_fatal_immediately() {
    let log = MemoryLog::new();
    log.append(INPUT_TOPIC, 0, payload(&login_event("1")));
    let sink = Arc::new(MemorySink::new());
    sink.fail_next(1, SinkError::NonRetryable("message too large".to_string()));

    let err = consumer_loop(log.source(), sink.clone())
        .run_batch()
        .await
        .unwrap_err();

    match err {
        LoopError::EmitExhausted { attempts, .. } => assert_eq!(attempts, 1),
        other => panic!("expected a fatal emit error, got {other:?}"),
    }
    assert!(log.commit_history().is_empty());
}

#[tokio::test]
async fn poll_failures_back_off_then_become_fatal() {
    let log = MemoryLog::new();
    log.append(INPUT_TOPIC, 0, payload(&login_event("1")));
    let sink = Arc::new(MemorySink::new());

    // Two failures are absorbed
    let mut source = log.source();
    source.fail_polls(2);
    let mut consumer = consumer_loop(source, sink.clone());
    assert_eq!(consumer.run_batch().await.unwrap().received, 0);
    assert_eq!(consumer.run_batch().await.unwrap().received, 0);
    assert_eq!(consumer.run_batch().await.unwrap().committed, 1);

    // Three in a row are not
    let mut source = log.source();
    source.fail_polls(5);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let result = consumer_loop(source, sink.clone()).run(shutdown_rx).await;
    match result {
        Err(LoopError::SourceExhausted { failures, .. }) => assert_eq!(failures, 3),
        other => panic!("expected a fatal source error, got {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_finishes_work_then_checkpoints_and_flushes() {
    let log = MemoryLog::new();
    for i in 0..3 {
        log.append(INPUT_TOPIC, 0, payload(&login_event(&i.to_string())));
    }
    let sink = Arc::new(MemorySink::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(consumer_loop(log.source(), sink.clone()).run(shutdown_rx));

    for _ in 0..200 {
        if sink.messages(OUTPUT_TOPIC).len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown_tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .expect("loop panicked");
    assert!(result.is_ok());
    assert_eq!(sink.messages(OUTPUT_TOPIC).len(), 3);
    assert_eq!(log.committed(INPUT_TOPIC, 0), Some(3));
    assert_eq!(sink.flushes(), 1);
}

#[tokio::test]
async fn shutdown_abandons_a_pending_poll() {
    let log = MemoryLog::new();
    let sink = Arc::new(MemorySink::new());
    let mut settings = settings();
    settings.batch_timeout = Duration::from_secs(60);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(consumer_loop_with(log.source(), sink.clone(), settings).run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .expect("loop panicked");
    assert!(result.is_ok());
    assert_eq!(sink.flushes(), 1);
}

#[tokio::test]
async fn closed_shutdown_channel_stops_the_loop_with_an_error() {
    let log = MemoryLog::new();
    log.append(INPUT_TOPIC, 0, payload(&login_event("1")));
    let sink = Arc::new(MemorySink::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(consumer_loop(log.source(), sink.clone()).run(shutdown_rx));
    for _ in 0..200 {
        if log.committed(INPUT_TOPIC, 0) == Some(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    drop(shutdown_tx);

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .expect("loop panicked");
    assert!(matches!(result, Err(LoopError::ShutdownChannelClosed)));
    assert_eq!(sink.messages(OUTPUT_TOPIC).len(), 1);
    assert_eq!(log.committed(INPUT_TOPIC, 0), Some(1));
    assert_eq!(sink.flushes(), 1);
}

#[tokio::test]
async fn already_signalled_shutdown_processes_nothing() {
    let log = MemoryLog::new();
    log.append(INPUT_TOPIC, 0, payload(&login_event("1")));
    let sink = Arc::new(MemorySink::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown_tx.send(true).unwrap();

    consumer_loop(log.source(), sink.clone())
        .run(shutdown_rx)
        .await
        .expect("loop failed");

    assert!(sink.written().is_empty());
    assert_eq!(log.committed(INPUT_TOPIC, 0), None);
}
