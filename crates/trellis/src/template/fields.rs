//! Templated field store: create, update and migrate schema-checked fields.
//!
//! Writes are per-field and fail fast. A template change is reconciliatory
//! instead: fields the new template no longer declares are dropped and the
//! survivors are re-validated, with every remaining violation reported in one
//! [`Error::TemplateMigration`].
//!
//! Nothing here persists or locks. Callers run these functions while holding
//! the entity (see [`crate::storage::IssueStorage::update_issue`]) and persist
//! the result themselves. On error the entity is left untouched.

use super::validator::validate;
use crate::domain::{FieldMap, ResolvedTemplate, Templated};
use crate::error::{Error, Result, ValidationError};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Validate and serialize the initial field values of a new entity.
///
/// Every field declared by `template` is present in the result. Fields not
/// in `provided` default to JSON null and must pass validation as such.
///
/// # Errors
///
/// - `Error::UnknownField` if `provided` names a field `template` does not declare
/// - `Error::Validation` for the first field that fails its schema
pub fn validate_initial_fields(
    template: &ResolvedTemplate,
    provided: &BTreeMap<String, Value>,
) -> Result<FieldMap> {
    if let Some(unknown) = provided.keys().find(|name| !template.declares(name)) {
        return Err(Error::UnknownField {
            field: unknown.clone(),
            template: template.id().clone(),
        });
    }

    let mut fields = FieldMap::new();
    for (name, schema) in template.fields() {
        let value = provided.get(name).unwrap_or(&Value::Null);
        validate(value, schema, name)?;
        fields.insert(name.to_string(), serde_json::to_string(value)?);
    }
    Ok(fields)
}

/// Apply field updates to `entity`, validating each against `template`.
///
/// `template` must be the entity's current template. When the entity was
/// just moved to it (`template_was_updated`), stored fields outside this
/// batch are swept: undeclared ones are removed and the rest re-validated.
///
/// # Errors
///
/// - `Error::TemplateMismatch` if `template` is not the entity's template
/// - `Error::UnknownField` if an update names an undeclared field
/// - `Error::Validation` for the first update that fails its schema
/// - `Error::TemplateMigration` listing every leftover field that no longer validates
pub fn update_fields<E: Templated>(
    entity: &mut E,
    template: &ResolvedTemplate,
    updates: &BTreeMap<String, Value>,
    template_was_updated: bool,
) -> Result<()> {
    if entity.template_id() != template.id() {
        return Err(Error::TemplateMismatch {
            expected: template.id().clone(),
            actual: entity.template_id().clone(),
        });
    }

    let mut staged = Vec::with_capacity(updates.len());
    for (name, value) in updates {
        let schema = template
            .field_schema(name)
            .ok_or_else(|| Error::UnknownField {
                field: name.clone(),
                template: template.id().clone(),
            })?;
        validate(value, schema, name)?;
        staged.push((name.clone(), serde_json::to_string(value)?));
    }

    let mut dropped = Vec::new();
    if template_was_updated {
        let mut errors = Vec::new();
        for (name, stored) in entity.templated_fields() {
            if updates.contains_key(name) {
                continue;
            }
            match template.field_schema(name) {
                None => dropped.push(name.clone()),
                Some(schema) => {
                    if let Some(violation) = revalidate(stored, schema, name)? {
                        errors.push(violation);
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(Error::TemplateMigration {
                template: template.id().clone(),
                errors,
            });
        }
    }

    let fields = entity.templated_fields_mut();
    for name in &dropped {
        fields.remove(name);
    }
    for (name, serialized) in staged {
        fields.insert(name, serialized);
    }

    debug!(
        template = %template.id(),
        updated = updates.len(),
        dropped = dropped.len(),
        "Applied templated field updates"
    );
    Ok(())
}

/// Check whether the stored value of `field` is currently valid.
///
/// Returns `false` (never an error) when the field has no stored value, is
/// not declared by `template`, or does not validate.
pub fn validate_field<E: Templated>(entity: &E, template: &ResolvedTemplate, field: &str) -> bool {
    let (Some(stored), Some(schema)) = (
        entity.templated_fields().get(field),
        template.field_schema(field),
    ) else {
        return false;
    };

    matches!(revalidate(stored, schema, field), Ok(None))
}

/// Re-validate a stored serialization. `Ok(Some(_))` carries the violation.
fn revalidate(stored: &str, schema: &str, field: &str) -> Result<Option<ValidationError>> {
    let value: Value = match serde_json::from_str(stored) {
        Ok(value) => value,
        Err(e) => {
            return Ok(Some(ValidationError::new(
                field,
                vec![format!("stored value is not valid JSON: {e}")],
            )));
        }
    };

    match validate(&value, schema, field) {
        Ok(()) => Ok(None),
        Err(Error::Validation(violation)) => Ok(Some(violation)),
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TemplateId, Templated};
    use serde_json::json;

    const PRIORITY: &str = r#"{"type": "integer", "minimum": 0, "maximum": 4}"#;
    const NULLABLE_TEXT: &str = r#"{"type": ["string", "null"]}"#;
    const TEXT: &str = r#"{"type": "string"}"#;

    struct Entity {
        template: TemplateId,
        fields: FieldMap,
    }

    impl Templated for Entity {
        fn template_id(&self) -> &TemplateId {
            &self.template
        }
        fn set_template_id(&mut self, template: TemplateId) {
            self.template = template;
        }
        fn templated_fields(&self) -> &FieldMap {
            &self.fields
        }
        fn templated_fields_mut(&mut self) -> &mut FieldMap {
            &mut self.fields
        }
    }

    fn template(id: &str, fields: &[(&str, &str)]) -> ResolvedTemplate {
        ResolvedTemplate::new(
            TemplateId::new(id),
            1,
            fields
                .iter()
                .map(|(name, schema)| ((*name).to_string(), (*schema).to_string()))
                .collect(),
        )
    }

    fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect()
    }

    fn entity(template: &str, fields: &[(&str, &str)]) -> Entity {
        Entity {
            template: TemplateId::new(template),
            fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    #[test]
    fn initial_fields_default_to_null() {
        let t = template("t", &[("priority", PRIORITY), ("note", NULLABLE_TEXT)]);
        let fields = validate_initial_fields(&t, &values(&[("priority", json!(1))])).unwrap();

        assert_eq!(fields.get("priority").map(String::as_str), Some("1"));
        assert_eq!(fields.get("note").map(String::as_str), Some("null"));
    }

    #[test]
    fn initial_null_default_must_satisfy_schema() {
        let t = template("t", &[("priority", PRIORITY)]);
        let err = validate_initial_fields(&t, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(ref v) if v.field == "priority"));
    }

    #[test]
    fn initial_fields_reject_unknown_names() {
        let t = template("t", &[("note", NULLABLE_TEXT)]);
        let err = validate_initial_fields(&t, &values(&[("unknown", json!(1))])).unwrap_err();
        assert!(matches!(err, Error::UnknownField { ref field, .. } if field == "unknown"));
    }

    #[test]
    fn update_overwrites_serialization() {
        let t = template("t", &[("priority", PRIORITY)]);
        let mut e = entity("t", &[("priority", "1")]);

        update_fields(&mut e, &t, &values(&[("priority", json!(3))]), false).unwrap();
        assert_eq!(e.fields["priority"], "3");
    }

    #[test]
    fn failed_update_leaves_entity_untouched() {
        let t = template("t", &[("priority", PRIORITY), ("note", NULLABLE_TEXT)]);
        let mut e = entity("t", &[("priority", "1"), ("note", "null")]);

        let updates = values(&[("note", json!("ok")), ("priority", json!(9))]);
        assert!(update_fields(&mut e, &t, &updates, false).is_err());
        assert_eq!(e.fields["note"], "null");
        assert_eq!(e.fields["priority"], "1");

        let unknown = values(&[("missing", json!(1))]);
        assert!(matches!(
            update_fields(&mut e, &t, &unknown, false),
            Err(Error::UnknownField { .. })
        ));
    }

    #[test]
    fn update_requires_matching_template() {
        let t = template("other", &[("priority", PRIORITY)]);
        let mut e = entity("t", &[]);
        assert!(matches!(
            update_fields(&mut e, &t, &BTreeMap::new(), false),
            Err(Error::TemplateMismatch { .. })
        ));
    }

    #[test]
    fn migration_drops_undeclared_fields() {
        let new = template("v2", &[("a", PRIORITY)]);
        let mut e = entity("v1", &[("a", "2"), ("b", "\"legacy\"")]);
        e.set_template_id(TemplateId::new("v2"));

        update_fields(&mut e, &new, &BTreeMap::new(), true).unwrap();

        assert_eq!(e.fields.keys().collect::<Vec<_>>(), vec!["a"]);
        assert!(validate_field(&e, &new, "a"));
    }

    #[test]
    fn migration_reports_every_incompatible_leftover() {
        let new = template("v2", &[("a", PRIORITY), ("b", PRIORITY), ("c", TEXT)]);
        let mut e = entity("v2", &[("a", "\"x\""), ("b", "17"), ("c", "\"fine\"")]);

        let err = update_fields(&mut e, &new, &BTreeMap::new(), true).unwrap_err();
        match err {
            Error::TemplateMigration { errors, .. } => {
                let fields: Vec<_> = errors.iter().map(|v| v.field.as_str()).collect();
                assert_eq!(fields, vec!["a", "b"]);
            }
            other => panic!("expected migration error, got {other:?}"),
        }
        assert_eq!(e.fields["a"], "\"x\"");
    }

    #[test]
    fn migration_skips_fields_in_the_update_batch() {
        let new = template("v2", &[("a", PRIORITY)]);
        let mut e = entity("v2", &[("a", "\"stale\"")]);

        update_fields(&mut e, &new, &values(&[("a", json!(0))]), true).unwrap();
        assert_eq!(e.fields["a"], "0");
    }

    #[test]
    fn validate_field_is_non_throwing() {
        let t = template("t", &[("priority", PRIORITY)]);
        let e = entity("t", &[("priority", "7")]);

        assert!(!validate_field(&e, &t, "priority"));
        assert!(!validate_field(&e, &t, "absent"));
        assert!(!validate_field(&entity("t", &[("priority", "{oops")]), &t, "priority"));
        assert!(validate_field(&entity("t", &[("priority", "4")]), &t, "priority"));
    }
}
