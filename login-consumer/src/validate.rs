use crate::record::{DecodedRecord, ValueKind};
use crate::schema::{FieldType, Schema};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldStatus {
    /// Present with the right type, or absent and fillable
    Ok,
    Missing,
    TypeMismatch {
        expected: FieldType,
        found: ValueKind,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldOutcome {
    pub name: String,
    pub status: FieldStatus,
}

/// One outcome per schema field, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    outcomes: Vec<FieldOutcome>,
}

impl ValidationResult {
    pub fn outcomes(&self) -> &[FieldOutcome] {
        &self.outcomes
    }

    pub fn status(&self, field: &str) -> Option<&FieldStatus> {
        self.outcomes
            .iter()
            .find(|o| o.name == field)
            .map(|o| &o.status)
    }

    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == FieldStatus::Ok)
    }
}

/// Checks a decoded record against the schema. Undeclared fields are never looked at.
pub fn validate(decoded: &DecodedRecord, schema: &Schema) -> ValidationResult {
    let outcomes = schema
        .fields()
        .iter()
        .map(|field| {
            let status = match decoded.get(&field.name) {
                None => absent_status(field.default.is_some(), field.required),
                Some(value) if value.is_null() => {
                    absent_status(field.default.is_some(), field.required)
                }
                Some(value) if field.field_type.accepts(value) => FieldStatus::Ok,
                Some(value) => FieldStatus::TypeMismatch {
                    expected: field.field_type,
                    found: value.kind(),
                },
            };
            FieldOutcome {
                name: field.name.clone(),
                status,
            }
        })
        .collect();

    ValidationResult { outcomes }
}

fn absent_status(has_default: bool, required: bool) -> FieldStatus {
    if !has_default && required {
        FieldStatus::Missing
    } else {
        FieldStatus::Ok
    }
}
