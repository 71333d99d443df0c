use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{FieldProblem, NormalizeError};
use crate::record::{DecodedRecord, ProcessedRecord, Value};
use crate::schema::{FieldType, Schema};
use crate::validate::{FieldStatus, ValidationResult};

/// Builds a new record from `decoded`: schema defaults are backfilled in
/// schema order, fixable type mismatches are coerced, and every field that
/// is still broken afterwards is reported. Fields are evaluated independently,
/// so one bad field never hides another.
///
/// `now` is the value for `"now"` defaults; the function is otherwise pure.
pub fn normalize(
    decoded: &DecodedRecord,
    result: &ValidationResult,
    schema: &Schema,
    now: OffsetDateTime,
) -> Result<ProcessedRecord, NormalizeError> {
    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut problems = Vec::new();

    for (field, outcome) in schema.fields().iter().zip(result.outcomes()) {
        debug_assert_eq!(field.name, outcome.name);
        let value = decoded.get(&field.name);

        match &outcome.status {
            FieldStatus::Ok => match (value, &field.default) {
                (Some(value), _) if !value.is_null() => {
                    fields.push((field.name.clone(), value.clone()))
                }
                (_, Some(default)) => fields.push((field.name.clone(), default.resolve(now))),
                (Some(null), None) => fields.push((field.name.clone(), null.clone())),
                (None, None) => {}
            },
            FieldStatus::Missing => problems.push(FieldProblem::Missing {
                field: field.name.clone(),
            }),
            FieldStatus::TypeMismatch { expected, found } => {
                match value.and_then(|v| coerce(v, *expected)) {
                    Some(coerced) => fields.push((field.name.clone(), coerced)),
                    None if *expected == FieldType::Timestamp && found.is_scalar() => {
                        problems.push(FieldProblem::UnparseableTimestamp {
                            field: field.name.clone(),
                        })
                    }
                    None => problems.push(FieldProblem::TypeMismatch {
                        field: field.name.clone(),
                        expected: *expected,
                        found: *found,
                    }),
                }
            }
        }
    }

    if !problems.is_empty() {
        return Err(NormalizeError::new(problems));
    }

    let undeclared = decoded
        .undeclared()
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    Ok(ProcessedRecord::new(fields, undeclared))
}

/// Known lossless conversions into the canonical representation of `target`.
pub fn coerce(value: &Value, target: FieldType) -> Option<Value> {
    match (target, value) {
        (FieldType::Timestamp, Value::String(s)) => parse_timestamp(s.trim()).map(Value::Integer),
        (FieldType::Timestamp | FieldType::Integer, Value::Float(f)) => {
            integral(*f).map(Value::Integer)
        }
        (FieldType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::Integer),
        (FieldType::Float, Value::Integer(i)) => Some(Value::Float(*i as f64)),
        (FieldType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::Float),
        (FieldType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Boolean(true)),
            "false" => Some(Value::Boolean(false)),
            _ => None,
        },
        (FieldType::String, Value::Integer(i)) => Some(Value::String(i.to_string())),
        _ => None,
    }
}

/// Epoch seconds from a numeric string, an RFC 3339 date, or `YYYY-MM-DD HH:MM:SS` in UTC.
fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(seconds) = raw.parse::<i64>() {
        return Some(seconds);
    }
    if let Ok(datetime) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(datetime.unix_timestamp());
    }
    let naive = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    PrimitiveDateTime::parse(raw, &naive)
        .ok()
        .map(|datetime| datetime.assume_utc().unix_timestamp())
}

fn integral(f: f64) -> Option<i64> {
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.is_finite() && f.fract() == 0.0 && in_range).then_some(f as i64)
}
