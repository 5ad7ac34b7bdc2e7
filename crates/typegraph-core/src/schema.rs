//! Declarative property schemas.
//!
//! Each node/edge kind carries a [`PropertySchema`] describing its fields.
//! The schema parses an unchecked JSON bag into a validated, defaulted
//! property record or raises [`GraphError::Validation`].

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{GraphError, Result};
use crate::value::{Props, ValueType};

/// A single field declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    /// Applied when the field is absent from the input bag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: JsonValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// Property schema for a node or edge kind.
///
/// Field order is declaration order; validation output preserves it so the
/// canonical schema document hashes stably.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertySchema {
    fields: Vec<FieldSpec>,
}

impl PropertySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_spec(name).is_some()
    }

    /// Validate and default an input bag against this schema.
    ///
    /// - unknown fields are rejected;
    /// - absent fields take their declared default, if any;
    /// - required fields must be present (directly or via default) and
    ///   non-null;
    /// - present values must match their declared type (null is accepted
    ///   for optional fields).
    pub fn validate(&self, kind: &str, input: &Props) -> Result<Props> {
        let mut bad_fields = Vec::new();
        let mut messages = Vec::new();

        for key in input.keys() {
            if !self.has_field(key) {
                bad_fields.push(key.clone());
                messages.push(format!("unknown field '{key}'"));
            }
        }

        let mut out = Props::new();
        for spec in &self.fields {
            let value = match input.get(&spec.name) {
                Some(v) => Some(v.clone()),
                None => spec.default.clone(),
            };
            match value {
                Some(JsonValue::Null) | None => {
                    if spec.required {
                        bad_fields.push(spec.name.clone());
                        messages.push(format!("missing required field '{}'", spec.name));
                    } else if input.contains_key(&spec.name) {
                        out.insert(spec.name.clone(), JsonValue::Null);
                    }
                }
                Some(v) => {
                    if spec.value_type.accepts(&v) {
                        out.insert(spec.name.clone(), v);
                    } else {
                        bad_fields.push(spec.name.clone());
                        messages.push(format!(
                            "field '{}' is not a valid {}",
                            spec.name,
                            spec.value_type.as_str()
                        ));
                    }
                }
            }
        }

        if bad_fields.is_empty() {
            Ok(out)
        } else {
            Err(GraphError::validation(kind, bad_fields, messages.join("; ")))
        }
    }

    /// Validate a partial update: only the supplied fields are checked,
    /// required-ness is not enforced (the merged row keeps prior values).
    pub fn validate_partial(&self, kind: &str, input: &Props) -> Result<Props> {
        let mut bad_fields = Vec::new();
        let mut messages = Vec::new();
        let mut out = Props::new();

        for (key, value) in input {
            match self.field_spec(key) {
                None => {
                    bad_fields.push(key.clone());
                    messages.push(format!("unknown field '{key}'"));
                }
                Some(spec) => {
                    if value.is_null() {
                        if spec.required {
                            bad_fields.push(key.clone());
                            messages.push(format!("required field '{key}' cannot be null"));
                        } else {
                            out.insert(key.clone(), JsonValue::Null);
                        }
                    } else if spec.value_type.accepts(value) {
                        out.insert(key.clone(), value.clone());
                    } else {
                        bad_fields.push(key.clone());
                        messages.push(format!(
                            "field '{key}' is not a valid {}",
                            spec.value_type.as_str()
                        ));
                    }
                }
            }
        }

        if bad_fields.is_empty() {
            Ok(out)
        } else {
            Err(GraphError::validation(kind, bad_fields, messages.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person_schema() -> PropertySchema {
        PropertySchema::new()
            .field(FieldSpec::new("name", ValueType::String).required())
            .field(FieldSpec::new("age", ValueType::Number))
            .field(FieldSpec::new("active", ValueType::Boolean).with_default(json!(true)))
    }

    fn props(v: JsonValue) -> Props {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_validate_applies_defaults() {
        let schema = person_schema();
        let out = schema
            .validate("Person", &props(json!({"name": "Alice"})))
            .unwrap();
        assert_eq!(out["name"], json!("Alice"));
        assert_eq!(out["active"], json!(true));
        assert!(!out.contains_key("age"));
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let schema = person_schema();
        let err = schema
            .validate("Person", &props(json!({"age": 30})))
            .unwrap_err();
        match err {
            GraphError::Validation { fields, .. } => assert!(fields.contains(&"name".to_string())),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        let schema = person_schema();
        let err = schema
            .validate("Person", &props(json!({"name": "A", "nope": 1})))
            .unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_validate_rejects_wrong_type() {
        let schema = person_schema();
        let err = schema
            .validate("Person", &props(json!({"name": 42})))
            .unwrap_err();
        assert!(err.to_string().contains("not a valid string"));
    }

    #[test]
    fn test_validate_partial_skips_absent_required() {
        let schema = person_schema();
        let out = schema
            .validate_partial("Person", &props(json!({"age": 31})))
            .unwrap();
        assert_eq!(out["age"], json!(31));
        assert!(!out.contains_key("name"));
    }

    #[test]
    fn test_validate_partial_rejects_null_required() {
        let schema = person_schema();
        assert!(schema
            .validate_partial("Person", &props(json!({"name": null})))
            .is_err());
    }
}
