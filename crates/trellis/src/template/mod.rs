//! Templates and the schema-checked fields they declare.
//!
//! - [`validator`]: validates one value against one field schema
//! - [`registry`]: stores templates and resolves extension chains
//! - [`fields`]: creates, updates and migrates an entity's templated fields

pub mod fields;
pub mod registry;
pub mod validator;

pub use fields::{update_fields, validate_field, validate_initial_fields};
pub use registry::TemplateRegistry;
pub use validator::validate;
