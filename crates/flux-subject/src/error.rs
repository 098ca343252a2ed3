//! Subject repository errors
//!
//! Adapter failures are wrapped with the subject class and entity id they
//! occurred for; the underlying [`AdapterError`] stays reachable via `source()`.

use flux_core::{AdapterError, Link, LinkExpression};
use flux_query::QueryError;
use thiserror::Error;

/// Errors raised by a `SubjectRepository`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubjectError {
    /// The class's schema program is not loaded in the perspective.
    #[error("subject class {class} is not registered: {reason}")]
    SubjectNotRegistered {
        /// Subject class name
        class: String,
        /// Why the lookup failed
        reason: String,
    },

    /// The new instance did not materialize.
    #[error("failed to create {class}: {reason}")]
    SubjectCreationFailed {
        /// Subject class name
        class: String,
        /// What went wrong
        reason: String,
    },

    /// No instance with this id.
    #[error("{class} {id} not found")]
    NotFound {
        /// Subject class name
        class: String,
        /// Requested base id
        id: String,
    },

    /// The property is declared read-only.
    #[error("property {property} of {class} is not writable")]
    PropertyNotWritable {
        /// Subject class name
        class: String,
        /// Property name
        property: String,
    },

    /// The property is not declared by the schema.
    #[error("{class} has no property {property}")]
    UnknownProperty {
        /// Subject class name
        class: String,
        /// Property name
        property: String,
    },

    /// The schema definition is unusable.
    #[error("invalid schema {class}: {reason}")]
    InvalidSchema {
        /// Subject class name
        class: String,
        /// What is wrong with it
        reason: String,
    },

    /// Some links of a multi-link write were not issued.
    ///
    /// `written` lists the links that did land so callers can retract or retry.
    #[error("partial write of {class} {id}: {} written, {} failed", written.len(), failed.len())]
    PartialWriteFailure {
        /// Subject class name
        class: String,
        /// Entity base id
        id: String,
        /// Links that were issued
        written: Vec<LinkExpression>,
        /// Links that failed, with the runtime's reason
        failed: Vec<(Link, String)>,
    },

    /// A runtime call failed.
    #[error("{class} {}: {source}", id.as_deref().unwrap_or("*"))]
    Adapter {
        /// Subject class name
        class: String,
        /// Entity the call was about, if any
        id: Option<String>,
        /// Underlying failure
        source: AdapterError,
    },

    /// A compiled query failed.
    #[error("{class} query: {source}")]
    Query {
        /// Subject class name
        class: String,
        /// Underlying failure
        source: QueryError,
    },
}

impl SubjectError {
    /// Wrap an adapter error with class and id context.
    ///
    /// A missing-procedure failure means the schema is not loaded and maps to
    /// `SubjectNotRegistered`.
    pub fn adapter(class: &str, id: Option<&str>, source: AdapterError) -> Self {
        if source.is_missing_procedure() {
            return Self::SubjectNotRegistered {
                class: class.to_string(),
                reason: source.to_string(),
            };
        }
        Self::Adapter {
            class: class.to_string(),
            id: id.map(str::to_string),
            source,
        }
    }

    /// Wrap a query error with class context.
    pub fn query(class: &str, source: QueryError) -> Self {
        match source {
            QueryError::SubjectNotRegistered { reason } => Self::SubjectNotRegistered {
                class: class.to_string(),
                reason,
            },
            QueryError::Adapter(err) => Self::adapter(class, None, err),
            other => Self::Query {
                class: class.to_string(),
                source: other,
            },
        }
    }

    /// Create a not found error
    pub fn not_found(class: &str, id: &str) -> Self {
        Self::NotFound {
            class: class.to_string(),
            id: id.to_string(),
        }
    }

    /// Whether the caller should trigger a schema resync and retry.
    pub fn is_not_registered(&self) -> bool {
        matches!(self, Self::SubjectNotRegistered { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::error::Error as _;

    #[test]
    fn test_adapter_context_and_source() {
        let err = SubjectError::adapter("Message", Some("m1"), AdapterError::unavailable("down"));
        assert!(err.to_string().contains("Message m1"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_missing_procedure_is_not_registered() {
        let err = SubjectError::adapter(
            "Channel",
            None,
            AdapterError::execution("existence_error(procedure, subject_class/2)"),
        );
        assert!(err.is_not_registered());

        let err = SubjectError::query(
            "Channel",
            QueryError::SubjectNotRegistered {
                reason: "x".into(),
            },
        );
        assert_matches!(err, SubjectError::SubjectNotRegistered { ref class, .. } if class == "Channel");
    }
}
