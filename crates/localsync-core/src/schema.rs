//! Collection schemas and per-field merge policies.
//!
//! A schema decides, field by field, how a structured value is built and
//! therefore how concurrent writes to it are resolved.
//!
//! # Merge Policies
//!
//! | Schema | Policy |
//! |--------|--------|
//! | `string`, `int`, `number`, `boolean`, `any`, `id-array` | LWW register |
//! | `object` (opaque JSON) | LWW register over the whole value |
//! | `{type: object, attributes}`, `{type: map}` | Per-field: children merged by key |
//! | `rich-text` | Delegated to the embedded text CRDT |
//! | `{type: optional}` | Policy of the wrapped schema |
//!
//! Schemas are written as JSON:
//!
//! ```json
//! {
//!   "type": "object",
//!   "attributes": {
//!     "title": "string",
//!     "body": "rich-text",
//!     "color": { "type": "optional", "value": "string" },
//!     "comments": { "type": "map", "value": "object" }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Shape of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum Schema {
    /// A string scalar
    String,
    /// An integer scalar
    Int,
    /// Any JSON number
    Number,
    /// A boolean scalar
    Boolean,
    /// Any JSON value, replaced as a whole
    Any,
    /// Opaque JSON object, replaced as a whole
    Opaque,
    /// An array of string ids, replaced as a whole
    IdArray,
    /// Collaborative text, delegated to the embedded CRDT
    RichText,
    /// The wrapped schema, or null / absent
    Optional(Box<Schema>),
    /// String-keyed map whose values share one schema
    Map(Box<Schema>),
    /// Record with a fixed set of attributes
    Object(BTreeMap<String, Schema>),
}

/// Merge strategy for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Last-Writer-Wins: higher stamp wins entirely
    Lww,
    /// Per-field: children merged independently by key
    PerField,
    /// Delegated to an embedded CRDT
    Delegated,
}

impl Schema {
    /// Get the merge policy for this schema.
    #[must_use]
    pub fn merge_policy(&self) -> MergePolicy {
        match self {
            Schema::String
            | Schema::Int
            | Schema::Number
            | Schema::Boolean
            | Schema::Any
            | Schema::Opaque
            | Schema::IdArray => MergePolicy::Lww,

            Schema::Map(_) | Schema::Object(_) => MergePolicy::PerField,

            Schema::RichText => MergePolicy::Delegated,

            Schema::Optional(inner) => inner.merge_policy(),
        }
    }

    /// Parse a schema from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is not a schema.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, SchemaError> {
        match json {
            serde_json::Value::String(name) => match name.as_str() {
                "string" => Ok(Schema::String),
                "int" => Ok(Schema::Int),
                "number" => Ok(Schema::Number),
                "boolean" => Ok(Schema::Boolean),
                "any" => Ok(Schema::Any),
                "object" => Ok(Schema::Opaque),
                "id-array" => Ok(Schema::IdArray),
                "rich-text" => Ok(Schema::RichText),
                other => Err(SchemaError::Invalid(format!("unknown type '{other}'"))),
            },
            serde_json::Value::Object(obj) => {
                let kind = obj
                    .get("type")
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| SchemaError::Invalid("missing 'type'".to_string()))?;
                let inner = || {
                    obj.get("value")
                        .ok_or_else(|| SchemaError::Invalid(format!("'{kind}' needs 'value'")))
                        .and_then(Schema::from_json)
                };
                match kind {
                    "optional" => Ok(Schema::Optional(Box::new(inner()?))),
                    "map" => Ok(Schema::Map(Box::new(inner()?))),
                    "object" => {
                        let attributes = obj
                            .get("attributes")
                            .and_then(serde_json::Value::as_object)
                            .ok_or_else(|| {
                                SchemaError::Invalid("'object' needs 'attributes'".to_string())
                            })?;
                        attributes
                            .iter()
                            .map(|(k, v)| Ok((k.clone(), Schema::from_json(v)?)))
                            .collect::<Result<BTreeMap<_, _>, SchemaError>>()
                            .map(Schema::Object)
                    }
                    other => Err(SchemaError::Invalid(format!("unknown type '{other}'"))),
                }
            }
            other => Err(SchemaError::Invalid(format!("not a schema: {other}"))),
        }
    }

    /// Check that `raw` has this shape.
    ///
    /// # Errors
    ///
    /// Returns the first mismatch found, with the path to it.
    pub fn validate(&self, raw: &serde_json::Value) -> Result<(), SchemaError> {
        self.validate_at(raw, &mut Vec::new())
    }

    fn validate_at(
        &self,
        raw: &serde_json::Value,
        path: &mut Vec<String>,
    ) -> Result<(), SchemaError> {
        use serde_json::Value as Json;

        let ok = match (self, raw) {
            (Schema::Any | Schema::Opaque, _) => true,
            (Schema::String | Schema::RichText, Json::String(_)) => true,
            (Schema::Int, Json::Number(n)) => n.is_i64() || n.is_u64(),
            (Schema::Number, Json::Number(_)) => true,
            (Schema::Boolean, Json::Bool(_)) => true,
            (Schema::IdArray, Json::Array(items)) => items.iter().all(Json::is_string),
            (Schema::Optional(_), Json::Null) => true,
            (Schema::Optional(inner), _) => return inner.validate_at(raw, path),
            (Schema::Map(inner), Json::Object(entries)) => {
                for (key, value) in entries {
                    path.push(key.clone());
                    inner.validate_at(value, path)?;
                    path.pop();
                }
                true
            }
            (Schema::Object(attributes), Json::Object(entries)) => {
                if let Some(extra) = entries.keys().find(|k| !attributes.contains_key(*k)) {
                    path.push(extra.clone());
                    return Err(SchemaError::ExtraAttribute(FieldPath(path.clone())));
                }
                for (key, schema) in attributes {
                    path.push(key.clone());
                    match entries.get(key) {
                        Some(value) => schema.validate_at(value, path)?,
                        None if matches!(schema, Schema::Optional(_)) => {}
                        None => return Err(SchemaError::MissingAttribute(FieldPath(path.clone()))),
                    }
                    path.pop();
                }
                true
            }
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(SchemaError::Mismatch {
                path: FieldPath(path.clone()),
                expected: self.type_name().to_string(),
            })
        }
    }

    /// Schema of the field `key` inside a record or map.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Schema> {
        match self {
            Schema::Object(attributes) => attributes.get(key),
            Schema::Map(inner) => Some(inner),
            Schema::Optional(inner) => inner.field(key),
            _ => None,
        }
    }

    /// Short name of this schema's type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Schema::String => "string",
            Schema::Int => "int",
            Schema::Number => "number",
            Schema::Boolean => "boolean",
            Schema::Any => "any",
            Schema::Opaque => "object",
            Schema::IdArray => "id-array",
            Schema::RichText => "rich-text",
            Schema::Optional(_) => "optional",
            Schema::Map(_) => "map",
            Schema::Object(_) => "object",
        }
    }
}

impl TryFrom<serde_json::Value> for Schema {
    type Error = SchemaError;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        Schema::from_json(&json)
    }
}

impl From<Schema> for serde_json::Value {
    fn from(schema: Schema) -> Self {
        use serde_json::json;
        match schema {
            Schema::Optional(inner) => json!({ "type": "optional", "value": Self::from(*inner) }),
            Schema::Map(inner) => json!({ "type": "map", "value": Self::from(*inner) }),
            Schema::Object(attributes) => {
                let attributes: serde_json::Map<String, Self> = attributes
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect();
                json!({ "type": "object", "attributes": attributes })
            }
            simple => Self::String(simple.type_name().to_string()),
        }
    }
}

/// Path to a field within a structured value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(pub Vec<String>);

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("$")
        } else {
            write!(f, "$.{}", self.0.join("."))
        }
    }
}

/// Errors for schema parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The schema itself is malformed
    #[error("invalid schema: {0}")]
    Invalid(String),
    /// A value has the wrong type
    #[error("{path}: expected {expected}")]
    Mismatch {
        /// Where the mismatch is
        path: FieldPath,
        /// Expected type name
        expected: String,
    },
    /// A required attribute is absent
    #[error("{0}: missing attribute")]
    MissingAttribute(FieldPath),
    /// An attribute is not declared by the schema
    #[error("{0}: attribute not in schema")]
    ExtraAttribute(FieldPath),
}
