use std::fmt;

use bytes::Bytes;

use crate::error::{DecodeError, FieldProblem, NormalizeError};
use crate::record::ProcessedRecord;

/// Coarse rejection cause, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    Decode,
    MissingField,
    TypeMismatch,
    Timestamp,
    Serialization,
}

impl RejectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectKind::Decode => "decode",
            RejectKind::MissingField => "missing_field",
            RejectKind::TypeMismatch => "type_mismatch",
            RejectKind::Timestamp => "timestamp",
            RejectKind::Serialization => "serialization",
        }
    }
}

impl fmt::Display for RejectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub kind: RejectKind,
    pub reason: String,
    pub original_payload: Bytes,
}

impl Rejection {
    pub fn decode_failure(error: &DecodeError, original_payload: Bytes) -> Self {
        Self {
            kind: RejectKind::Decode,
            reason: format!("decode failure: {error}"),
            original_payload,
        }
    }

    pub fn serialization_failure(error: &serde_json::Error, original_payload: Bytes) -> Self {
        Self {
            kind: RejectKind::Serialization,
            reason: format!("failed to serialize processed record: {error}"),
            original_payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept(ProcessedRecord),
    Reject(Rejection),
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept(_))
    }
}

/// Accepts iff normalization left nothing broken. A rejection reports the
/// first problem in schema order, so the same input always gives the same reason.
pub fn decide(
    outcome: Result<ProcessedRecord, NormalizeError>,
    original_payload: Bytes,
) -> Decision {
    match outcome {
        Ok(record) => Decision::Accept(record),
        Err(err) => {
            let first = err.first();
            let kind = match first {
                FieldProblem::Missing { .. } => RejectKind::MissingField,
                FieldProblem::TypeMismatch { .. } => RejectKind::TypeMismatch,
                FieldProblem::UnparseableTimestamp { .. } => RejectKind::Timestamp,
            };
            Decision::Reject(Rejection {
                kind,
                reason: first.to_string(),
                original_payload,
            })
        }
    }
}
