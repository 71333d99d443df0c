use crate::error::DecodeError;
use crate::record::{DecodedRecord, Value};
use crate::schema::Schema;

/// Confluent wire framing: magic byte followed by a big-endian schema id.
const MAGIC_BYTE: u8 = 0x00;
const FRAME_HEADER_LEN: usize = 5;

/// Reads a JSON object payload into a [`DecodedRecord`].
///
/// Undeclared fields are kept as raw JSON. Whether a declared field holds
/// the right type is left to validation.
pub fn decode(payload: &[u8], schema: &Schema) -> Result<DecodedRecord, DecodeError> {
    let body = unframe(payload, schema)?;

    let parsed: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let object = match parsed {
        serde_json::Value::Object(object) => object,
        other => return Err(DecodeError::NotAnObject(json_kind(&other))),
    };

    let mut decoded = DecodedRecord::new();
    for (name, value) in object {
        if !schema.declares(&name) {
            decoded.insert_undeclared(name, value);
            continue;
        }
        decoded.insert(name, field_value(value));
    }

    Ok(decoded)
}

fn unframe<'a>(payload: &'a [u8], schema: &Schema) -> Result<&'a [u8], DecodeError> {
    match payload.first() {
        None => Err(DecodeError::EmptyPayload),
        Some(&MAGIC_BYTE) => {
            if payload.len() < FRAME_HEADER_LEN {
                return Err(DecodeError::TruncatedFrame(payload.len()));
            }
            let found = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
            if let Some(expected) = schema.id() {
                if expected != found {
                    return Err(DecodeError::SchemaIdMismatch { expected, found });
                }
            }
            Ok(&payload[FRAME_HEADER_LEN..])
        }
        Some(_) => Ok(payload),
    }
}

fn field_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Value::Integer(i),
            (None, Some(f)) => Value::Float(f),
            (None, None) => Value::Nested(serde_json::Value::Number(n)),
        },
        nested @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
            Value::Nested(nested)
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ValueKind;

    fn framed(id: u32, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![MAGIC_BYTE];
        payload.extend_from_slice(&id.to_be_bytes());
        payload.extend_from_slice(body);
        payload
    }

    #[test]
    fn decodes_scalars_and_keeps_undeclared_fields() {
        let schema = Schema::user_login();
        let decoded = decode(
            br#"{"user_id":"123","timestamp":1742331926,"locale":null,"score":1.5,"tags":["a"]}"#,
            &schema,
        )
        .unwrap();

        assert_eq!(decoded.get("user_id"), Some(&Value::from("123")));
        assert_eq!(decoded.get("timestamp"), Some(&Value::Integer(1742331926)));
        assert_eq!(decoded.get("locale"), Some(&Value::Null));
        assert_eq!(decoded.get("score"), None);
        assert_eq!(
            decoded.undeclared().get("score"),
            Some(&serde_json::json!(1.5))
        );
        assert_eq!(
            decoded.undeclared().get("tags"),
            Some(&serde_json::json!(["a"]))
        );
    }

    #[test]
    fn integers_beyond_i64_decode_as_floats() {
        let schema = Schema::user_login();
        let decoded = decode(br#"{"timestamp":18446744073709551615}"#, &schema).unwrap();
        assert!(matches!(decoded.get("timestamp"), Some(Value::Float(_))));
    }

    #[test]
    fn undecodable_payloads() {
        let schema = Schema::user_login();

        assert_eq!(decode(b"", &schema), Err(DecodeError::EmptyPayload));
        assert!(matches!(
            decode(b"{not json", &schema),
            Err(DecodeError::InvalidJson(_))
        ));
        assert!(matches!(
            decode(&[0xff, 0xfe, 0x00], &schema),
            Err(DecodeError::InvalidJson(_))
        ));
        assert_eq!(
            decode(b"[1,2]", &schema),
            Err(DecodeError::NotAnObject("array"))
        );
    }

    #[test]
    fn nested_values_in_declared_fields_are_kept() {
        let schema = Schema::user_login();
        let decoded = decode(br#"{"user_id":{"id":1},"ip":[1,2]}"#, &schema).unwrap();

        assert_eq!(decoded.get("user_id").map(Value::kind), Some(ValueKind::Object));
        assert_eq!(decoded.get("ip").map(Value::kind), Some(ValueKind::Array));
    }

    #[test]
    fn framed_payloads_check_the_schema_id() {
        let body = br#"{"user_id":"123"}"#;

        let unregistered = Schema::user_login();
        assert!(decode(&framed(9, body), &unregistered).is_ok());

        let registered = Schema::user_login().with_id(7);
        assert!(decode(&framed(7, body), &registered).is_ok());
        assert_eq!(
            decode(&framed(9, body), &registered),
            Err(DecodeError::SchemaIdMismatch {
                expected: 7,
                found: 9
            })
        );
        assert_eq!(
            decode(&[MAGIC_BYTE, 0, 0], &registered),
            Err(DecodeError::TruncatedFrame(3))
        );
    }
}
