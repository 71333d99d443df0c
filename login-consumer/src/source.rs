use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};
use tokio::time::{timeout_at, Instant};
use tracing::warn;

use crate::error::SourceError;
use crate::kafka::KafkaContext;
use crate::record::{RawRecord, RecordPosition};

/// Where input records come from.
#[async_trait]
pub trait RecordSource: Send {
    /// Up to `max_batch` records, waiting at most `timeout`. An empty batch is not an error.
    async fn poll(
        &mut self,
        max_batch: usize,
        timeout: Duration,
    ) -> Result<Vec<RawRecord>, SourceError>;

    /// Marks the record at `position` as done. Records of the same partition
    /// must be committed in offset order.
    async fn commit(&mut self, position: &RecordPosition) -> Result<(), SourceError>;

    /// Makes everything committed so far durable.
    async fn checkpoint(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

pub struct KafkaSource {
    consumer: StreamConsumer<KafkaContext>,
}

impl KafkaSource {
    pub fn new(consumer: StreamConsumer<KafkaContext>) -> Self {
        Self { consumer }
    }
}

fn to_raw_record(message: &BorrowedMessage<'_>) -> RawRecord {
    RawRecord {
        topic: message.topic().to_owned(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp_ms: message.timestamp().to_millis(),
        key: message.key().map(Bytes::copy_from_slice),
        payload: message
            .payload()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default(),
    }
}

#[async_trait]
impl RecordSource for KafkaSource {
    async fn poll(
        &mut self,
        max_batch: usize,
        timeout: Duration,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let deadline = Instant::now() + timeout;
        let mut records = Vec::with_capacity(max_batch);

        while records.len() < max_batch {
            match timeout_at(deadline, self.consumer.recv()).await {
                Ok(Ok(message)) => records.push(to_raw_record(&message)),
                Ok(Err(err)) if records.is_empty() => return Err(err.into()),
                Ok(Err(err)) => {
                    // Hand over what we have, the error will resurface on the next poll
                    warn!(error = %err, "kafka recv error");
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(records)
    }

    async fn commit(&mut self, position: &RecordPosition) -> Result<(), SourceError> {
        let commit_error = |err: KafkaError| SourceError::Commit {
            topic: position.topic.clone(),
            partition: position.partition,
            offset: position.offset,
            reason: err.to_string(),
        };

        // Kafka tracks the next offset to read, not the last one processed
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &position.topic,
                position.partition,
                Offset::Offset(position.offset + 1),
            )
            .map_err(commit_error)?;
        self.consumer.store_offsets(&offsets).map_err(commit_error)
    }

    async fn checkpoint(&mut self) -> Result<(), SourceError> {
        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => Ok(()),
            // Nothing was stored since the last checkpoint
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
