use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::{error, warn};

use crate::error::SinkError;
use crate::kafka::KafkaContext;
use crate::metrics_consts::{EMIT_FAILURES, EMIT_RETRIES};
use crate::retry::RetryPolicy;

/// A message ready to be written to a sink topic.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub key: Option<Bytes>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutboundMessage {
    pub fn new(key: Option<Bytes>, payload: Vec<u8>) -> Self {
        Self {
            key,
            payload,
            headers: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Somewhere records can be durably placed. `emit` only returns `Ok` once
/// the write is acknowledged.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn emit(&self, topic: &str, message: &OutboundMessage) -> Result<(), SinkError>;

    /// Waits for anything still buffered. Called once on shutdown.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    flush_timeout: Duration,
}

impl KafkaSink {
    pub fn new(producer: FutureProducer<KafkaContext>) -> Self {
        Self {
            producer,
            flush_timeout: Duration::from_secs(30),
        }
    }
}

fn produce_error(err: &KafkaError) -> SinkError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageSizeTooLarge) => SinkError::NonRetryable(err.to_string()),
        Some(RDKafkaErrorCode::InvalidMessage) => SinkError::NonRetryable(err.to_string()),
        _ => SinkError::Retryable(err.to_string()),
    }
}

#[async_trait]
impl RecordSink for KafkaSink {
    async fn emit(&self, topic: &str, message: &OutboundMessage) -> Result<(), SinkError> {
        let mut headers = OwnedHeaders::new_with_capacity(message.headers.len());
        for (key, value) in &message.headers {
            headers = headers.insert(Header {
                key,
                value: Some(value.as_str()),
            });
        }

        let record = FutureRecord {
            topic,
            payload: Some(message.payload.as_slice()),
            partition: None,
            key: message.key.as_deref(),
            timestamp: None,
            headers: Some(headers),
        };

        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((err, _)) => {
                error!(topic, error = %err, "failed to enqueue message");
                return Err(produce_error(&err));
            }
        };

        match delivery.await {
            // Cancelled due to timeout while retrying
            Err(_) => Err(SinkError::Timeout),
            Ok(Err((err, _))) => {
                error!(topic, error = %err, "failed to produce to Kafka");
                Err(produce_error(&err))
            }
            Ok(Ok(_)) => Ok(()),
        }
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let producer = self.producer.clone();
        let timeout = self.flush_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|err| SinkError::Retryable(err.to_string()))?
            .map_err(|err| produce_error(&err))
    }
}

/// The final error of a write that could not be placed, and how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitFailure {
    pub attempts: u32,
    pub error: SinkError,
}

/// Writes through a sink with a bounded timeout per attempt and bounded,
/// backed-off retries. Errors that cannot succeed on retry are returned at once.
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn RecordSink>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl Emitter {
    pub fn new(sink: Arc<dyn RecordSink>, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            sink,
            policy,
            attempt_timeout,
        }
    }

    /// Returns the number of attempts the successful write took.
    pub async fn emit(&self, topic: &str, message: &OutboundMessage) -> Result<u32, EmitFailure> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result =
                match tokio::time::timeout(self.attempt_timeout, self.sink.emit(topic, message))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::Timeout),
                };

            match result {
                Ok(()) => return Ok(attempt),
                Err(error) if error.is_retryable() && self.policy.should_retry(attempt) => {
                    let backoff = self.policy.retry_interval(attempt);
                    warn!(
                        topic,
                        attempt,
                        error = %error,
                        backoff_ms = backoff.as_millis() as u64,
                        "sink write failed, retrying"
                    );
                    counter!(EMIT_RETRIES, "topic" => topic.to_owned()).increment(1);
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => {
                    error!(topic, attempt, error = %error, "giving up on sink write");
                    counter!(EMIT_FAILURES, "topic" => topic.to_owned()).increment(1);
                    return Err(EmitFailure {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }

    pub async fn flush(&self) -> Result<(), SinkError> {
        self.sink.flush().await
    }
}
