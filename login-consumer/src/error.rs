use std::fmt;

use thiserror::Error;

use crate::record::ValueKind;
use crate::schema::FieldType;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("BATCH_SIZE must be greater than zero")]
    ZeroBatchSize,
    #[error("EMIT_MAX_ATTEMPTS must be greater than zero")]
    ZeroEmitAttempts,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("EMIT_TIMEOUT_MS ({emit_timeout_ms}) must exceed KAFKA_MESSAGE_TIMEOUT_MS ({message_timeout_ms})")]
    EmitTimeoutWithinDelivery {
        emit_timeout_ms: u128,
        message_timeout_ms: u32,
    },
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("schema registry request failed: {0}")]
    Registry(#[from] reqwest::Error),
    #[error("invalid schema document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("schema declares no fields")]
    NoFields,
    #[error("field {0} is declared more than once")]
    DuplicateField(String),
    #[error("field {field} has unsupported type {type_name}")]
    UnsupportedType { field: String, type_name: String },
    #[error("field {field} has a default that is not a valid {expected}")]
    InvalidDefault { field: String, expected: FieldType },
}

/// The payload could not be read against the schema at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("empty payload")]
    EmptyPayload,
    #[error("framed payload is truncated ({0} bytes)")]
    TruncatedFrame(usize),
    #[error("payload written with schema id {found}, expected {expected}")]
    SchemaIdMismatch { expected: u32, found: u32 },
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// A field that normalization could not repair.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldProblem {
    Missing {
        field: String,
    },
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: ValueKind,
    },
    UnparseableTimestamp {
        field: String,
    },
}

impl FieldProblem {
    pub fn field(&self) -> &str {
        match self {
            FieldProblem::Missing { field }
            | FieldProblem::TypeMismatch { field, .. }
            | FieldProblem::UnparseableTimestamp { field } => field,
        }
    }
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldProblem::Missing { field } => write!(f, "missing required field: {field}"),
            FieldProblem::TypeMismatch {
                field,
                expected,
                found,
            } => write!(
                f,
                "type mismatch for field {field}: expected {expected}, found {found}"
            ),
            FieldProblem::UnparseableTimestamp { field } => {
                write!(f, "unparseable timestamp format in field {field}")
            }
        }
    }
}

/// Every problem left after defaulting and coercion, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeError {
    problems: Vec<FieldProblem>,
}

impl NormalizeError {
    /// Callers only build this with at least one problem.
    pub(crate) fn new(problems: Vec<FieldProblem>) -> Self {
        debug_assert!(!problems.is_empty());
        Self { problems }
    }

    pub fn problems(&self) -> &[FieldProblem] {
        &self.problems
    }

    pub fn first(&self) -> &FieldProblem {
        &self.problems[0]
    }
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} unrepaired field problem(s), first: {}",
            self.problems.len(),
            self.first()
        )
    }
}

impl std::error::Error for NormalizeError {}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("sink write failed, can be retried: {0}")]
    Retryable(String),
    #[error("sink write failed permanently: {0}")]
    NonRetryable(String),
    #[error("sink write timed out")]
    Timeout,
    #[error("failed to serialize message: {0}")]
    Serialization(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Retryable(_) | SinkError::Timeout)
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("failed to commit {topic}/{partition}@{offset}: {reason}")]
    Commit {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },
}

/// Conditions that halt the consumer loop. Anything here must reach an operator.
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("could not place {topic}/{partition}@{offset} on {sink_topic} after {attempts} attempt(s): {source}")]
    EmitExhausted {
        topic: String,
        partition: i32,
        offset: i64,
        sink_topic: String,
        attempts: u32,
        source: SinkError,
    },
    #[error("input source failed {failures} consecutive time(s): {source}")]
    SourceExhausted { failures: u32, source: SourceError },
    #[error("shutdown channel closed without a shutdown signal")]
    ShutdownChannelClosed,
}
