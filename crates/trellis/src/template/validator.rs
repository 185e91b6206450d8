//! JSON Schema validation of a single templated field value.
//!
//! The schema document is parsed and compiled on every call; nothing is
//! cached. The dialect is taken from the document's `$schema` keyword
//! (Draft 7 when absent). Null is only accepted when the schema accepts it.

use crate::error::{Error, Result, ValidationError};
use jsonschema::JSONSchema;
use serde_json::Value;
use tracing::trace;

/// Validate `value` against the schema document `schema` for field `field`.
///
/// # Errors
///
/// - [`Error::InvalidSchema`] if `schema` is not JSON or does not compile
/// - [`Error::Validation`] listing every violation if `value` does not conform
pub fn validate(value: &Value, schema: &str, field: &str) -> Result<()> {
    let document: Value = serde_json::from_str(schema).map_err(|e| Error::InvalidSchema {
        field: field.to_string(),
        reason: e.to_string(),
    })?;

    let dialect = document
        .get("$schema")
        .and_then(Value::as_str)
        .unwrap_or("default");
    trace!(field, dialect, "Compiling field schema");

    let compiled = JSONSchema::compile(&document).map_err(|e| Error::InvalidSchema {
        field: field.to_string(),
        reason: e.to_string(),
    })?;

    let messages: Vec<String> = match compiled.validate(value) {
        Ok(()) => return Ok(()),
        Err(errors) => errors.map(|e| describe(&e)).collect(),
    };

    Err(ValidationError::new(field, messages).into())
}

fn describe(error: &jsonschema::ValidationError<'_>) -> String {
    let path = error.instance_path.to_string();
    if path.is_empty() {
        error.to_string()
    } else {
        format!("{error} at '{path}'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    const PRIORITY: &str = r#"{"type": "integer", "minimum": 0, "maximum": 4}"#;
    const NULLABLE_TEXT: &str = r#"{"type": ["string", "null"], "maxLength": 8}"#;

    #[rstest]
    #[case::in_range(json!(2), PRIORITY, true)]
    #[case::below_range(json!(-1), PRIORITY, false)]
    #[case::wrong_type(json!("high"), PRIORITY, false)]
    #[case::null_not_permitted(Value::Null, PRIORITY, false)]
    #[case::null_permitted(Value::Null, NULLABLE_TEXT, true)]
    #[case::too_long(json!("far too long"), NULLABLE_TEXT, false)]
    fn validates_against_schema(#[case] value: Value, #[case] schema: &str, #[case] ok: bool) {
        assert_eq!(validate(&value, schema, "field").is_ok(), ok);
    }

    #[test]
    fn reports_every_violation() {
        let schema = r#"{
            "type": "object",
            "properties": {"a": {"type": "string"}, "b": {"type": "integer"}},
            "required": ["c"]
        }"#;
        let err = validate(&json!({"a": 1, "b": "x"}), schema, "meta").unwrap_err();

        match err {
            Error::Validation(v) => {
                assert_eq!(v.field, "meta");
                assert_eq!(v.messages.len(), 3, "{:?}", v.messages);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn is_deterministic() {
        let first = validate(&json!(9), PRIORITY, "priority").is_ok();
        let second = validate(&json!(9), PRIORITY, "priority").is_ok();
        assert_eq!(first, second);
    }

    #[test]
    fn honours_declared_dialect() {
        let draft4 = r#"{
            "$schema": "http://json-schema.org/draft-04/schema#",
            "type": "number",
            "maximum": 10,
            "exclusiveMaximum": true
        }"#;
        assert!(validate(&json!(9), draft4, "score").is_ok());
        assert!(validate(&json!(10), draft4, "score").is_err());
    }

    #[test]
    fn rejects_malformed_schema() {
        let err = validate(&json!(1), "{not json", "broken").unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { ref field, .. } if field == "broken"));

        let err = validate(&json!(1), r#"{"type": 12}"#, "broken").unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }
}
