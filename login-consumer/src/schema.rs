use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::info;

use crate::error::SchemaError;
use crate::record::Value;

pub const USER_LOGIN_SUBJECT: &str = "user-login-value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    /// Canonical form is an integer count of seconds since the unix epoch
    Timestamp,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

impl FieldType {
    /// Whether a value already has the canonical representation for this type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (FieldType::String, Value::String(_))
                | (FieldType::Integer, Value::Integer(_))
                | (FieldType::Float, Value::Float(_))
                | (FieldType::Boolean, Value::Boolean(_))
                | (FieldType::Timestamp, Value::Integer(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldDefault {
    Value(Value),
    /// Processing time, as epoch seconds
    Now,
}

impl FieldDefault {
    pub fn resolve(&self, now: OffsetDateTime) -> Value {
        match self {
            FieldDefault::Value(value) => value.clone(),
            FieldDefault::Now => Value::Integer(now.unix_timestamp()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<FieldDefault>,
}

impl FieldDef {
    pub fn required(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_owned(),
            field_type,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_owned(),
            field_type,
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }
}

/// Ordered field definitions, loaded once and never mutated afterwards.
/// Share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    id: Option<u32>,
    fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(name: &str, fields: Vec<FieldDef>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::NoFields);
        }
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }
        Ok(Self {
            name: name.to_owned(),
            id: None,
            fields,
        })
    }

    /// The user login event shape consumed from `user-login`.
    pub fn user_login() -> Self {
        let fields = vec![
            FieldDef::required("user_id", FieldType::String),
            FieldDef::required("app_version", FieldType::String),
            FieldDef::required("ip", FieldType::String),
            FieldDef::optional("locale", FieldType::String)
                .with_default(FieldDefault::Value(Value::from("en"))),
            FieldDef::required("device_id", FieldType::String),
            FieldDef::optional("timestamp", FieldType::Timestamp).with_default(FieldDefault::Now),
            FieldDef::optional("device_type", FieldType::String)
                .with_default(FieldDefault::Value(Value::from("unknown"))),
        ];
        Self {
            name: "UserLogin".to_owned(),
            id: None,
            fields,
        }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry id, when the schema came from a registry.
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Parses an Avro-style record document:
    /// `{"type": "record", "name": ..., "fields": [{"name", "type", "default", "required"}]}`
    pub fn from_json(document: &str) -> Result<Self, SchemaError> {
        let document: SchemaDocument = serde_json::from_str(document)?;
        let fields = document
            .fields
            .into_iter()
            .map(FieldDocument::into_field_def)
            .collect::<Result<Vec<_>, _>>()?;
        Schema::new(document.name.as_deref().unwrap_or("record"), fields)
    }
}

#[derive(Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    name: Option<String>,
    fields: Vec<FieldDocument>,
}

#[derive(Deserialize)]
struct FieldDocument {
    name: String,
    #[serde(rename = "type")]
    field_type: TypeDocument,
    #[serde(default)]
    required: Option<bool>,
    #[serde(default)]
    default: Option<serde_json::Value>,
    #[serde(default, rename = "logicalType")]
    logical_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TypeDocument {
    Name(String),
    Union(Vec<String>),
    Complex {
        #[serde(rename = "type")]
        name: String,
        #[serde(default, rename = "logicalType")]
        logical_type: Option<String>,
    },
}

impl FieldDocument {
    fn into_field_def(self) -> Result<FieldDef, SchemaError> {
        let (type_name, nullable, nested_logical) = match self.field_type {
            TypeDocument::Name(name) => (name, false, None),
            TypeDocument::Complex { name, logical_type } => (name, false, logical_type),
            TypeDocument::Union(members) => {
                let non_null: Vec<String> =
                    members.iter().filter(|m| *m != "null").cloned().collect();
                if non_null.len() != 1 {
                    return Err(SchemaError::UnsupportedType {
                        field: self.name,
                        type_name: format!("[{}]", members.join(", ")),
                    });
                }
                let nullable = non_null.len() < members.len();
                (non_null[0].clone(), nullable, None)
            }
        };

        let logical_type = self.logical_type.or(nested_logical);
        let field_type = resolve_type(&self.name, &type_name, logical_type.as_deref())?;

        let default = match self.default {
            None => None,
            Some(raw) => Some(parse_default(&self.name, field_type, raw)?),
        };

        let required = self
            .required
            .unwrap_or(!nullable && default.is_none());

        Ok(FieldDef {
            name: self.name,
            field_type,
            required,
            default,
        })
    }
}

fn resolve_type(
    field: &str,
    type_name: &str,
    logical_type: Option<&str>,
) -> Result<FieldType, SchemaError> {
    let field_type = match type_name {
        "string" => FieldType::String,
        "int" | "long" => match logical_type {
            Some(logical) if logical.starts_with("timestamp") => FieldType::Timestamp,
            _ => FieldType::Integer,
        },
        "float" | "double" => FieldType::Float,
        "boolean" => FieldType::Boolean,
        "timestamp" => FieldType::Timestamp,
        other => {
            return Err(SchemaError::UnsupportedType {
                field: field.to_owned(),
                type_name: other.to_owned(),
            })
        }
    };
    Ok(field_type)
}

fn parse_default(
    field: &str,
    field_type: FieldType,
    raw: serde_json::Value,
) -> Result<FieldDefault, SchemaError> {
    let invalid = || SchemaError::InvalidDefault {
        field: field.to_owned(),
        expected: field_type,
    };

    let value = match (field_type, raw) {
        (FieldType::Timestamp, serde_json::Value::String(s)) if s == "now" => {
            return Ok(FieldDefault::Now)
        }
        (FieldType::String, serde_json::Value::String(s)) => Value::String(s),
        (FieldType::Integer | FieldType::Timestamp, serde_json::Value::Number(n)) => {
            Value::Integer(n.as_i64().ok_or_else(invalid)?)
        }
        (FieldType::Float, serde_json::Value::Number(n)) => {
            Value::Float(n.as_f64().ok_or_else(invalid)?)
        }
        (FieldType::Boolean, serde_json::Value::Bool(b)) => Value::Boolean(b),
        _ => return Err(invalid()),
    };
    Ok(FieldDefault::Value(value))
}

/// Where the schema comes from at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSource {
    /// Confluent-compatible schema registry, latest version of a subject
    Registry { url: String, subject: String },
    File(String),
    BuiltinUserLogin,
}

#[derive(Deserialize)]
struct RegistryVersion {
    id: u32,
    #[serde(default)]
    version: Option<u32>,
    schema: String,
}

const REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);

/// Called once at startup. The result is read-only for the life of the process.
pub async fn load_schema(source: &SchemaSource) -> Result<Schema, SchemaError> {
    let schema = match source {
        SchemaSource::BuiltinUserLogin => Schema::user_login(),
        SchemaSource::File(path) => {
            let document =
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| SchemaError::Io {
                        path: path.clone(),
                        source,
                    })?;
            Schema::from_json(&document)?
        }
        SchemaSource::Registry { url, subject } => {
            let client = reqwest::Client::builder()
                .timeout(REGISTRY_TIMEOUT)
                .build()?;
            let endpoint = format!(
                "{}/subjects/{}/versions/latest",
                url.trim_end_matches('/'),
                subject
            );
            let latest: RegistryVersion = client
                .get(&endpoint)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            info!(
                subject = %subject,
                id = latest.id,
                version = ?latest.version,
                "fetched schema from registry"
            );
            Schema::from_json(&latest.schema)?.with_id(latest.id)
        }
    };

    info!(
        schema = schema.name(),
        fields = schema.fields().len(),
        "schema loaded"
    );
    Ok(schema)
}
