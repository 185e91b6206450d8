//! Error types for trellis operations.
//!
//! The taxonomy mirrors how failures are handled during a sync pass:
//!
//! - [`Error::UnknownField`] and [`Error::Validation`] are caller-visible and
//!   fatal to the single operation. They are never retried.
//! - [`Error::Notified`] needs operator attention. It is isolated to the
//!   failing project or issue and forwarded to the notification sink.
//! - [`Error::Transient`] covers everything the remote tracker or storage
//!   could not classify. It counts against the timeline retry budget.

use crate::domain::{IssueId, TemplateId, TimelineItemId};
use std::fmt;
use std::io;
use thiserror::Error;

/// A templated field value failed schema validation.
///
/// Carries every violation reported by the validator, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    /// Name of the field that failed validation.
    pub field: String,

    /// One message per violation.
    pub messages: Vec<String>,
}

impl ValidationError {
    /// Create a validation error for `field`.
    pub fn new(field: impl Into<String>, messages: Vec<String>) -> Self {
        Self {
            field: field.into(),
            messages,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field '{}' failed validation: {}",
            self.field,
            self.messages.join("; ")
        )
    }
}

/// The error type for trellis operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A create or update named a field the template does not declare.
    #[error("Unknown field '{field}' for template {template}")]
    UnknownField {
        /// The undeclared field name.
        field: String,
        /// The template that was consulted.
        template: TemplateId,
    },

    /// A field value failed schema validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Re-validation after a template change found incompatible fields.
    #[error("Template migration to {template} left {} invalid field(s)", errors.len())]
    TemplateMigration {
        /// The template the entity was migrated to.
        template: TemplateId,
        /// Every violation found during the sweep.
        errors: Vec<ValidationError>,
    },

    /// A stored schema definition could not be parsed or compiled.
    #[error("Invalid schema for field '{field}': {reason}")]
    InvalidSchema {
        /// The field owning the schema.
        field: String,
        /// Why the schema was rejected.
        reason: String,
    },

    /// The requested template is not registered.
    #[error("Template not found: {0}")]
    TemplateNotFound(TemplateId),

    /// Registering a template would make the extension graph cyclic.
    #[error("Template {template} would create an extension cycle through {via}")]
    TemplateCycle {
        /// The template being registered.
        template: TemplateId,
        /// The extended template that closes the cycle.
        via: TemplateId,
    },

    /// Two templates in an extension chain declare the same field.
    #[error("Field '{field}' is declared by both {first} and {second}")]
    FieldConflict {
        /// The conflicting field name.
        field: String,
        /// The first declaring template.
        first: TemplateId,
        /// The second declaring template.
        second: TemplateId,
    },

    /// The entity is validated against a different template than the one supplied.
    #[error("Entity uses template {actual}, but template {expected} was supplied")]
    TemplateMismatch {
        /// The template that was supplied.
        expected: TemplateId,
        /// The template the entity currently uses.
        actual: TemplateId,
    },

    /// A condition that needs operator attention, such as bad credentials.
    #[error("{reason}: {message}")]
    Notified {
        /// Short, stable reason code forwarded to the notification sink.
        reason: String,
        /// Human-readable detail.
        message: String,
    },

    /// An unclassified failure from the network or storage.
    #[error("Transient sync failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// Issue not found.
    #[error("Issue not found: {0}")]
    IssueNotFound(IssueId),

    /// Timeline item not found.
    #[error("Timeline item not found: {0}")]
    TimelineItemNotFound(TimelineItemId),

    /// No sync record exists for the given key.
    #[error("No sync record for {0}")]
    RecordNotFound(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a [`Error::Notified`] error.
    pub fn notified(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Notified {
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Wrap any error as a transient sync failure.
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }

    /// Whether this error must be forwarded to the notification sink.
    #[must_use]
    pub fn is_notified(&self) -> bool {
        matches!(self, Self::Notified { .. })
    }

    /// Whether a later pass may succeed where this one failed.
    ///
    /// Validation and template errors are deterministic and never retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Io(_) | Self::Storage(_) | Self::Notified { .. }
        )
    }
}

/// A specialized Result type for trellis operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_message() {
        let err = ValidationError::new("priority", vec!["too small".into(), "not even".into()]);
        let text = err.to_string();
        assert!(text.contains("priority"));
        assert!(text.contains("too small; not even"));
    }

    #[test]
    fn classification() {
        assert!(Error::notified("bad-credentials", "token rejected").is_notified());
        assert!(Error::transient(anyhow::anyhow!("timeout")).is_retryable());
        assert!(!Error::from(ValidationError::new("a", vec![])).is_retryable());
        assert!(
            !Error::UnknownField {
                field: "x".into(),
                template: TemplateId::new("t"),
            }
            .is_retryable()
        );
    }
}
