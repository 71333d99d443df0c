// Shared by every histogram: batch sizes, durations in ms, HTTP latency in seconds
pub const HISTOGRAM_BUCKETS: &[f64] = &[
    0.005, 0.05, 0.25, 1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0,
    10000.0,
];

// Consumer loop
pub const RECORDS_RECEIVED: &str = "login_consumer_records_received_total";
pub const RECORDS_ACCEPTED: &str = "login_consumer_records_accepted_total";
pub const RECORDS_REJECTED: &str = "login_consumer_records_rejected_total";
pub const RECORDS_COMMITTED: &str = "login_consumer_records_committed_total";
pub const COMMIT_ERRORS: &str = "login_consumer_commit_errors_total";
pub const CHECKPOINT_ERRORS: &str = "login_consumer_checkpoint_errors_total";
pub const POLL_ERRORS: &str = "login_consumer_poll_errors_total";
pub const BATCH_SIZE: &str = "login_consumer_batch_size";
pub const BATCH_DURATION_MS: &str = "login_consumer_batch_duration_ms";
pub const LOOP_FATAL: &str = "login_consumer_fatal_errors_total";

// Sinks
pub const EMIT_RETRIES: &str = "login_consumer_emit_retries_total";
pub const EMIT_FAILURES: &str = "login_consumer_emit_failures_total";

// rdkafka statistics
pub const KAFKA_PRODUCER_QUEUE_DEPTH: &str = "login_consumer_kafka_producer_queue_depth";
pub const KAFKA_PRODUCER_QUEUE_DEPTH_LIMIT: &str =
    "login_consumer_kafka_producer_queue_depth_limit";
pub const KAFKA_CALLBACK_QUEUE_DEPTH: &str = "login_consumer_kafka_callback_queue_depth";
pub const KAFKA_CONSUMER_LAG: &str = "login_consumer_kafka_consumer_lag";
pub const KAFKA_BROKER_TX_ERRORS: &str = "login_consumer_kafka_broker_tx_errors_total";
pub const KAFKA_BROKER_RX_ERRORS: &str = "login_consumer_kafka_broker_rx_errors_total";
