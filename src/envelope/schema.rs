//! Per-intent payload schemas.
//!
//! A schema lists the payload fields an intent expects. Schemas load from
//! YAML keyed by intent:
//!
//! ```yaml
//! account.transfer:
//!   allow_additional: false
//!   fields:
//!     from_account: { type: "string", required: true, pattern: "^[0-9]{8}$" }
//!     amount: { type: "number", required: true }
//!     currency: { type: "string", enum: ["EUR", "USD"] }
//! ```

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::A2AError;

/// JSON type a field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

/// Schema for a single payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Allowed values, if restricted.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    /// Regex a string value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Payload schema for one intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentSchema {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSchema>,
    /// Whether fields not listed in `fields` are accepted.
    #[serde(default = "default_true")]
    pub allow_additional: bool,
}

fn default_true() -> bool {
    true
}

/// Intent → schema table used when schema validation is enabled.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, IntentSchema>,
    /// Compiled `pattern`s, keyed by (intent, field).
    patterns: HashMap<(String, String), Regex>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML map of intent → schema.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, A2AError> {
        let table: BTreeMap<String, IntentSchema> = serde_yaml::from_str(yaml)
            .map_err(|e| A2AError::Config(format!("invalid schema file: {}", e)))?;
        let mut registry = Self::new();
        for (intent, schema) in table {
            registry.register(intent, schema)?;
        }
        Ok(registry)
    }

    /// Register (or replace) the schema for an intent.
    ///
    /// Fails if a field pattern is not a valid regex.
    pub fn register(&mut self, intent: impl Into<String>, schema: IntentSchema) -> Result<(), A2AError> {
        let intent = intent.into();
        self.patterns.retain(|(i, _), _| i != &intent);
        for (name, field) in &schema.fields {
            if let Some(pattern) = &field.pattern {
                let re = Regex::new(pattern).map_err(|e| {
                    A2AError::Config(format!("bad pattern for {}.{}: {}", intent, name, e))
                })?;
                self.patterns.insert((intent.clone(), name.clone()), re);
            }
        }
        self.schemas.insert(intent, schema);
        Ok(())
    }

    pub fn get(&self, intent: &str) -> Option<&IntentSchema> {
        self.schemas.get(intent)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Validate a payload against the intent's schema.
    ///
    /// Intents without a registered schema always pass.
    pub fn validate(&self, intent: &str, payload: &Value) -> Result<(), A2AError> {
        let Some(schema) = self.schemas.get(intent) else {
            return Ok(());
        };

        let empty = serde_json::Map::new();
        let object = match payload {
            Value::Object(map) => map,
            Value::Null if schema.fields.values().all(|f| !f.required) => &empty,
            _ => {
                return Err(A2AError::Validation(format!(
                    "payload for '{}' must be an object",
                    intent
                )))
            }
        };

        for (name, field) in &schema.fields {
            let Some(value) = object.get(name) else {
                if field.required {
                    return Err(A2AError::Validation(format!(
                        "payload for '{}' is missing required field '{}'",
                        intent, name
                    )));
                }
                continue;
            };

            if !field.field_type.matches(value) {
                return Err(A2AError::Validation(format!(
                    "field '{}' of '{}' must be of type {:?}",
                    name, intent, field.field_type
                )));
            }

            if let Some(allowed) = &field.enum_values {
                if !allowed.contains(value) {
                    return Err(A2AError::Validation(format!(
                        "field '{}' of '{}' is not one of the allowed values",
                        name, intent
                    )));
                }
            }

            if let (Some(re), Some(s)) = (
                self.patterns.get(&(intent.to_string(), name.clone())),
                value.as_str(),
            ) {
                if !re.is_match(s) {
                    return Err(A2AError::Validation(format!(
                        "field '{}' of '{}' does not match {}",
                        name,
                        intent,
                        re.as_str()
                    )));
                }
            }
        }

        if !schema.allow_additional {
            if let Some(extra) = object.keys().find(|k| !schema.fields.contains_key(*k)) {
                return Err(A2AError::Validation(format!(
                    "unexpected field '{}' in payload for '{}'",
                    extra, intent
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TRANSFER_YAML: &str = r#"
account.transfer:
  allow_additional: false
  fields:
    from_account:
      type: "string"
      required: true
      pattern: "^[0-9]{8}$"
    amount:
      type: "number"
      required: true
    currency:
      type: "string"
      enum: ["EUR", "USD"]
"#;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_yaml_str(TRANSFER_YAML).unwrap()
    }

    #[test]
    fn test_valid_payload_passes() {
        let reg = registry();
        let payload = json!({"from_account": "12345678", "amount": 12.5, "currency": "EUR"});
        reg.validate("account.transfer", &payload).unwrap();
    }

    #[test]
    fn test_unknown_intent_passes() {
        let reg = registry();
        reg.validate("account.get_balance", &json!("anything")).unwrap();
    }

    #[test]
    fn test_missing_required_field() {
        let err = registry()
            .validate("account.transfer", &json!({"from_account": "12345678"}))
            .unwrap_err();
        assert!(matches!(err, A2AError::Validation(ref m) if m.contains("amount")));
    }

    #[test]
    fn test_wrong_type_enum_and_pattern() {
        let reg = registry();
        assert!(reg
            .validate("account.transfer", &json!({"from_account": "12345678", "amount": "ten"}))
            .is_err());
        assert!(reg
            .validate(
                "account.transfer",
                &json!({"from_account": "12345678", "amount": 1, "currency": "GBP"})
            )
            .is_err());
        assert!(reg
            .validate("account.transfer", &json!({"from_account": "abc", "amount": 1}))
            .is_err());
    }

    #[test]
    fn test_additional_fields_rejected_when_closed() {
        let err = registry()
            .validate(
                "account.transfer",
                &json!({"from_account": "12345678", "amount": 1, "memo": "rent"}),
            )
            .unwrap_err();
        assert!(err.to_string().contains("memo"));
    }

    #[test]
    fn test_bad_pattern_rejected_at_registration() {
        let mut reg = SchemaRegistry::new();
        let mut fields = BTreeMap::new();
        fields.insert(
            "id".to_string(),
            FieldSchema {
                field_type: FieldType::String,
                required: true,
                enum_values: None,
                pattern: Some("([unclosed".to_string()),
                description: None,
            },
        );
        let schema = IntentSchema { fields, allow_additional: true };
        assert!(matches!(reg.register("x.y", schema), Err(A2AError::Config(_))));
        assert!(reg.is_empty());
    }
}
