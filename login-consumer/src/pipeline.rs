use std::sync::Arc;

use time::OffsetDateTime;

use crate::decode::decode;
use crate::normalize::normalize;
use crate::record::RawRecord;
use crate::router::{decide, Decision, Rejection};
use crate::schema::Schema;
use crate::validate::validate;

/// Decode, validate, normalize and route one record. Pure apart from `now`,
/// so replaying a record gives the same decision.
#[derive(Clone, Debug)]
pub struct Pipeline {
    schema: Arc<Schema>,
    forward_undeclared: bool,
}

impl Pipeline {
    pub fn new(schema: Arc<Schema>, forward_undeclared: bool) -> Self {
        Self {
            schema,
            forward_undeclared,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn process(&self, raw: &RawRecord, now: OffsetDateTime) -> Decision {
        let decoded = match decode(&raw.payload, &self.schema) {
            Ok(decoded) => decoded,
            Err(err) => {
                return Decision::Reject(Rejection::decode_failure(&err, raw.payload.clone()))
            }
        };

        let result = validate(&decoded, &self.schema);
        let outcome = normalize(&decoded, &result, &self.schema, now);

        match decide(outcome, raw.payload.clone()) {
            Decision::Accept(record) if !self.forward_undeclared => {
                Decision::Accept(record.without_undeclared())
            }
            decision => decision,
        }
    }
}
