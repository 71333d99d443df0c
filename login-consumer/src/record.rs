use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// A declared field value. Schema types are all scalars, so `Nested` only
/// ever shows up as a type mismatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
    Nested(serde_json::Value),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Null => ValueKind::Null,
            Value::Nested(serde_json::Value::Array(_)) => ValueKind::Array,
            Value::Nested(_) => ValueKind::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Integer,
    Float,
    Boolean,
    Null,
    Array,
    Object,
}

impl ValueKind {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, ValueKind::Array | ValueKind::Object)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Boolean => "boolean",
            ValueKind::Null => "null",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Where a record came from. Committing a position marks everything up to
/// and including `offset` as done for that partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// A record as pulled off the input topic, untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Broker timestamp in milliseconds, when the broker provided one
    pub timestamp_ms: Option<i64>,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

impl RawRecord {
    pub fn new(topic: &str, partition: i32, offset: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.to_owned(),
            partition,
            offset,
            timestamp_ms: None,
            key: None,
            payload: payload.into(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn position(&self) -> RecordPosition {
        RecordPosition {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Field name to value mapping produced by decoding a payload against a schema.
///
/// Fields the schema declares are held as scalars; anything else is kept as
/// raw JSON so it can be forwarded untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRecord {
    fields: HashMap<String, Value>,
    undeclared: serde_json::Map<String, serde_json::Value>,
}

impl DecodedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn insert_undeclared(&mut self, name: String, value: serde_json::Value) {
        self.undeclared.insert(name, value);
    }

    pub fn undeclared(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.undeclared
    }

    pub fn len(&self) -> usize {
        self.fields.len() + self.undeclared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A record that passed normalization. Declared fields come first in schema
/// order, forwarded undeclared fields follow sorted by name.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    fields: Vec<(String, Value)>,
    undeclared: Vec<(String, serde_json::Value)>,
}

impl ProcessedRecord {
    pub(crate) fn new(
        fields: Vec<(String, Value)>,
        mut undeclared: Vec<(String, serde_json::Value)>,
    ) -> Self {
        undeclared.sort_by(|a, b| a.0.cmp(&b.0));
        Self { fields, undeclared }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn undeclared(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.undeclared
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn without_undeclared(mut self) -> Self {
        self.undeclared.clear();
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Serialize for ProcessedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + self.undeclared.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        for (name, value) in &self.undeclared {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_record_serializes_in_field_order() {
        let record = ProcessedRecord::new(
            vec![
                ("user_id".to_string(), Value::from("123")),
                ("timestamp".to_string(), Value::from(1742331926_i64)),
                ("vip".to_string(), Value::from(false)),
                ("note".to_string(), Value::Null),
            ],
            vec![
                ("z_extra".to_string(), serde_json::json!({"a": 1})),
                ("a_extra".to_string(), serde_json::json!([1, 2])),
            ],
        );

        let json = String::from_utf8(record.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"user_id":"123","timestamp":1742331926,"vip":false,"note":null,"a_extra":[1,2],"z_extra":{"a":1}}"#
        );
    }

    #[test]
    fn raw_record_position() {
        let raw = RawRecord::new("user-login", 3, 42, &b"{}"[..]).with_key(&b"k"[..]);
        assert_eq!(
            raw.position(),
            RecordPosition {
                topic: "user-login".to_string(),
                partition: 3,
                offset: 42,
            }
        );
        assert_eq!(raw.key.as_deref(), Some(&b"k"[..]));
    }
}
