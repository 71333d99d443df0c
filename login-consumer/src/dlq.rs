use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Serialize, Serializer};
use time::OffsetDateTime;

use crate::record::RecordPosition;
use crate::sink::OutboundMessage;

pub const REASON_HEADER: &str = "dlq_reason";
pub const SOURCE_TOPIC_HEADER: &str = "dlq_source_topic";
pub const SOURCE_PARTITION_HEADER: &str = "dlq_source_partition";
pub const SOURCE_OFFSET_HEADER: &str = "dlq_source_offset";

/// What gets written to the dead-letter topic for a rejected record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetterEnvelope {
    #[serde(serialize_with = "serialize_base64")]
    pub original_payload: Bytes,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub failed_at: OffsetDateTime,
    pub source_topic: String,
    pub source_partition: i32,
    pub source_offset: i64,
}

/// Wraps a rejected payload with its diagnostics. Only assembles data the caller already has.
pub fn build(
    original_payload: Bytes,
    reason: String,
    source: &RecordPosition,
    now: OffsetDateTime,
) -> DeadLetterEnvelope {
    DeadLetterEnvelope {
        original_payload,
        reason,
        failed_at: now,
        source_topic: source.topic.clone(),
        source_partition: source.partition,
        source_offset: source.offset,
    }
}

impl DeadLetterEnvelope {
    /// The envelope as a DLQ message: JSON body, diagnostics repeated as headers.
    pub fn to_message(&self, key: Option<Bytes>) -> Result<OutboundMessage, serde_json::Error> {
        let payload = serde_json::to_vec(self)?;
        Ok(OutboundMessage {
            key,
            payload,
            headers: vec![
                (REASON_HEADER.to_string(), self.reason.clone()),
                (SOURCE_TOPIC_HEADER.to_string(), self.source_topic.clone()),
                (
                    SOURCE_PARTITION_HEADER.to_string(),
                    self.source_partition.to_string(),
                ),
                (SOURCE_OFFSET_HEADER.to_string(), self.source_offset.to_string()),
            ],
        })
    }
}

fn serialize_base64<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(payload))
}
