//! Validating configuration documents against a [`Schema`].
//!
//! # Example
//!
//! ```
//! use hcloud_provider::schema::{Attribute, Schema};
//! use hcloud_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("size", Attribute::required_int64());
//!
//! assert!(validate(&schema, &json!({"name": "data", "size": 10})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "data", "size": "ten"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("size".to_string()));
//! ```

use serde_json::Value;

use crate::schema::{Attribute, AttributeType, Diagnostic, DiagnosticSeverity, Schema};

/// Validate a JSON document against a schema.
///
/// Returns errors and warnings; an empty list means the document is valid.
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped
/// - Attribute types must match the schema
/// - Attributes declaring `conflicts_with` must not be set together
/// - Setting a deprecated attribute yields a warning
/// - Unknown attributes are rejected
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return diagnostics,
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value))),
            );
            return diagnostics;
        },
    };

    for (name, attr) in &schema.attributes {
        validate_attribute(name, attr, obj.get(name), &mut diagnostics);
        if is_set(obj.get(name)) {
            for other in &attr.conflicts_with {
                if is_set(obj.get(other)) {
                    diagnostics.push(
                        Diagnostic::error(format!(
                            "Conflicting attributes '{}' and '{}'",
                            name, other
                        ))
                        .with_detail("Only one of these attributes may be set")
                        .with_attribute(name.as_str()),
                    );
                }
            }
        }
    }

    for name in obj.keys() {
        if !schema.attributes.contains_key(name) {
            diagnostics.push(
                Diagnostic::error(format!("Unsupported attribute '{}'", name))
                    .with_attribute(name.as_str()),
            );
        }
    }

    diagnostics
}

/// Like [`validate`], failing only on errors. Warnings are returned on
/// success.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<Vec<Diagnostic>, Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.iter().any(Diagnostic::is_error) {
        Err(diagnostics)
    } else {
        Ok(diagnostics)
    }
}

/// Whether the document has no validation errors.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    !validate(schema, value).iter().any(Diagnostic::is_error)
}

fn is_set(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null))
}

fn validate_attribute(
    path: &str,
    attr: &Attribute,
    value: Option<&Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.is_computed_only() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
            if let Some(message) = &attr.deprecated {
                diagnostics.push(
                    Diagnostic::warning(format!("Attribute '{}' is deprecated", path))
                        .with_detail(message.clone())
                        .with_attribute(path),
                );
            }
        },
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) => match value.as_array() {
            Some(arr) => {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            },
            None => diagnostics.push(type_error(path, "list", value)),
        },
        AttributeType::Map(value_type) => match value.as_object() {
            Some(obj) => {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            },
            None => diagnostics.push(type_error(path, "map", value)),
        },
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.is_i64()
                || n.as_f64().is_some_and(|f| {
                    f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
                })
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for attribute '{}'", path),
        detail: Some(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        )),
        attribute: Some(path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_sources::image;
    use crate::resources::{server, volume};
    use serde_json::json;

    #[test]
    fn test_validate_volume_config() {
        let schema = volume::schema();

        let diagnostics = validate(&schema, &json!({"name": "data", "size": 10}));
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);

        let diagnostics = validate(&schema, &json!({"name": "data"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("size"));
        assert!(diagnostics[0].summary.contains("Missing required"));
    }

    #[test]
    fn test_validate_types() {
        let schema = volume::schema();

        let diagnostics = validate(
            &schema,
            &json!({"name": 7, "size": 10.5, "automount": "yes"}),
        );
        assert_eq!(diagnostics.len(), 3);
        assert!(diagnostics.iter().all(|d| d.summary.contains("Invalid type")));
    }

    #[test]
    fn test_validate_int64_accepts_integral_floats() {
        let schema = volume::schema();
        assert!(validate(&schema, &json!({"name": "data", "size": 10.0})).is_empty());
    }

    #[test]
    fn test_validate_label_values() {
        let schema = volume::schema();

        let diagnostics = validate(
            &schema,
            &json!({"name": "data", "size": 10, "labels": {"env": "prod", "tier": 3}}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("labels.tier"));
    }

    #[test]
    fn test_validate_list_elements() {
        let schema = server::schema();

        let diagnostics = validate(
            &schema,
            &json!({
                "name": "web",
                "server_type": "cx11",
                "image": "ubuntu-22.04",
                "ssh_keys": ["deploy", 42]
            }),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("ssh_keys.1"));
    }

    #[test]
    fn test_computed_attributes_are_skipped() {
        let schema = volume::schema();
        let diagnostics = validate(
            &schema,
            &json!({"name": "data", "size": 10, "linux_device": 5}),
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_conflicting_attributes() {
        let schema = image::schema();

        let diagnostics = validate(
            &schema,
            &json!({"with_selector": "env=prod", "selector": "env=prod"}),
        );
        assert!(diagnostics
            .iter()
            .any(|d| d.is_error() && d.summary.contains("Conflicting")));
    }

    #[test]
    fn test_deprecated_attribute_warns() {
        let schema = image::schema();

        let diagnostics = validate(&schema, &json!({"selector": "env=prod"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Warning);
        assert!(is_valid(&schema, &json!({"selector": "env=prod"})));
        assert_eq!(
            validate_result(&schema, &json!({"selector": "env=prod"})).map(|d| d.len()),
            Ok(1)
        );
    }

    #[test]
    fn test_unknown_attribute() {
        let schema = volume::schema();

        let result = validate_result(&schema, &json!({"name": "data", "size": 10, "iops": 3}));
        let diagnostics = result.unwrap_err();
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("iops"));
    }

    #[test]
    fn test_validate_root_not_object() {
        let diagnostics = validate(&volume::schema(), &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
        assert!(validate(&volume::schema(), &Value::Null).is_empty());
    }
}
