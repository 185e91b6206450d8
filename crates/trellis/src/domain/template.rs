use super::TemplateId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stored templated field values: field name to string-encoded JSON.
pub type FieldMap = BTreeMap<String, String>;

/// A named, versioned schema declaring the fields of a templated entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Unique template identifier
    pub id: TemplateId,

    /// Display name
    pub name: String,

    /// Version, bumped whenever the field specifications change
    pub version: u32,

    /// Templates whose fields this template inherits
    #[serde(default)]
    pub extends: Vec<TemplateId>,

    /// Field name to JSON Schema document (kept as an opaque string)
    #[serde(default)]
    pub field_specifications: BTreeMap<String, String>,
}

impl Template {
    /// Create a template with no fields and no parents.
    pub fn new(id: impl Into<TemplateId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: 1,
            extends: Vec::new(),
            field_specifications: BTreeMap::new(),
        }
    }

    /// Builder-style: declare a field with its schema document.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, schema: impl Into<String>) -> Self {
        self.field_specifications.insert(name.into(), schema.into());
        self
    }

    /// Builder-style: inherit the fields of another template.
    #[must_use]
    pub fn extending(mut self, parent: impl Into<TemplateId>) -> Self {
        self.extends.push(parent.into());
        self
    }
}

/// A template with the field specifications of all its ancestors merged in.
///
/// Produced by [`crate::template::TemplateRegistry::resolve`]; every
/// templated-field operation works against this view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTemplate {
    id: TemplateId,
    version: u32,
    fields: BTreeMap<String, String>,
}

impl ResolvedTemplate {
    /// Build a resolved view from already-merged field specifications.
    pub fn new(id: TemplateId, version: u32, fields: BTreeMap<String, String>) -> Self {
        Self {
            id,
            version,
            fields,
        }
    }

    /// The template's id.
    #[must_use]
    pub fn id(&self) -> &TemplateId {
        &self.id
    }

    /// The template's version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Schema document for `field`, if declared.
    #[must_use]
    pub fn field_schema(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Whether `field` is declared by the template or an ancestor.
    #[must_use]
    pub fn declares(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Iterate over (field name, schema document) pairs.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A domain node whose field values are validated against one template.
pub trait Templated {
    /// The template the entity is currently validated against.
    fn template_id(&self) -> &TemplateId;

    /// Swap the entity's template. Callers follow up with a migration sweep.
    fn set_template_id(&mut self, template: TemplateId);

    /// Stored field values.
    fn templated_fields(&self) -> &FieldMap;

    /// Mutable access to stored field values.
    fn templated_fields_mut(&mut self) -> &mut FieldMap;
}
