//! Template storage and extension resolution.
//!
//! Templates may extend other templates. The extension relation is kept in a
//! `petgraph::DiGraph` with edges directed **child -> parent**, so a DFS from
//! a template visits exactly the template and its ancestors.

use crate::domain::{ResolvedTemplate, Template, TemplateId};
use crate::error::{Error, Result};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Registry of templates, resolving each to the union of its ancestry's fields.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<TemplateId, Template>,
    graph: DiGraph<TemplateId, ()>,
    node_map: HashMap<TemplateId, NodeIndex>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template, replacing any previous template with the same id.
    ///
    /// All checks run before anything is mutated.
    ///
    /// # Errors
    ///
    /// - `Error::TemplateNotFound` if an extended template is not registered
    /// - `Error::TemplateCycle` if the template would (transitively) extend itself
    /// - `Error::FieldConflict` if a field is declared twice in the ancestry
    pub fn register(&mut self, template: Template) -> Result<()> {
        let mut parents = Vec::with_capacity(template.extends.len());
        for parent in &template.extends {
            let node = *self
                .node_map
                .get(parent)
                .ok_or_else(|| Error::TemplateNotFound(parent.clone()))?;
            parents.push(node);
        }

        if let Some(&own) = self.node_map.get(&template.id) {
            for (&node, parent) in parents.iter().zip(&template.extends) {
                if node == own || has_path_connecting(&self.graph, node, own, None) {
                    return Err(Error::TemplateCycle {
                        template: template.id.clone(),
                        via: parent.clone(),
                    });
                }
            }
        }

        let mut declared: BTreeMap<String, (String, TemplateId)> = BTreeMap::new();
        for &parent in &parents {
            self.collect_fields(parent, &mut declared)?;
        }
        for (field, schema) in &template.field_specifications {
            insert_field(&mut declared, field, schema, &template.id)?;
        }

        let node = match self.node_map.get(&template.id) {
            Some(&node) => {
                loop {
                    let next = self.graph.edges(node).next().map(|e| e.id());
                    match next {
                        Some(edge) => {
                            self.graph.remove_edge(edge);
                        }
                        None => break node,
                    }
                }
            }
            None => {
                let node = self.graph.add_node(template.id.clone());
                self.node_map.insert(template.id.clone(), node);
                node
            }
        };
        for parent in parents {
            self.graph.update_edge(node, parent, ());
        }

        debug!(
            template = %template.id,
            version = template.version,
            fields = declared.len(),
            "Registered template"
        );
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    /// Get the template as registered (own fields only).
    #[must_use]
    pub fn get(&self, id: &TemplateId) -> Option<&Template> {
        self.templates.get(id)
    }

    /// Resolve a template to the union of its own and inherited fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::TemplateNotFound` if the template is not registered.
    pub fn resolve(&self, id: &TemplateId) -> Result<ResolvedTemplate> {
        let template = self
            .templates
            .get(id)
            .ok_or_else(|| Error::TemplateNotFound(id.clone()))?;
        let node = self.node_map[id];

        let mut declared = BTreeMap::new();
        self.collect_fields(node, &mut declared)?;

        Ok(ResolvedTemplate::new(
            id.clone(),
            template.version,
            declared
                .into_iter()
                .map(|(field, (schema, _))| (field, schema))
                .collect(),
        ))
    }

    /// Walk `start` and its ancestors, merging their declared fields.
    fn collect_fields(
        &self,
        start: NodeIndex,
        declared: &mut BTreeMap<String, (String, TemplateId)>,
    ) -> Result<()> {
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            let id = &self.graph[node];
            let template = self
                .templates
                .get(id)
                .ok_or_else(|| Error::TemplateNotFound(id.clone()))?;
            for (field, schema) in &template.field_specifications {
                insert_field(declared, field, schema, id)?;
            }
        }
        Ok(())
    }
}

fn insert_field(
    declared: &mut BTreeMap<String, (String, TemplateId)>,
    field: &str,
    schema: &str,
    owner: &TemplateId,
) -> Result<()> {
    match declared.get(field) {
        Some((_, existing)) if existing != owner => Err(Error::FieldConflict {
            field: field.to_string(),
            first: existing.clone(),
            second: owner.clone(),
        }),
        Some(_) => Ok(()),
        None => {
            declared.insert(field.to_string(), (schema.to_string(), owner.clone()));
            Ok(())
        }
    }
}
