//! Runtime boundary errors
//!
//! Low-level adapter failures. Upper layers wrap these with subject or query
//! context rather than replacing them.

use crate::link::{LinkExpression, PerspectiveId};
use thiserror::Error;

/// Errors raised by a `LinkAdapter` implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The external client cannot be reached.
    #[error("runtime unavailable: {reason}")]
    RuntimeUnavailable {
        /// Transport-level description
        reason: String,
    },

    /// The perspective id is unknown to the runtime.
    #[error("perspective {perspective} not found")]
    PerspectiveNotFound {
        /// The missing perspective
        perspective: PerspectiveId,
    },

    /// The runtime rejected a query or program.
    #[error("query execution failed: {reason}")]
    Execution {
        /// Engine-reported failure
        reason: String,
    },

    /// Some links of a removal batch were not removed.
    #[error("removed {} links, {} failed", removed.len(), failed.len())]
    PartialRemoval {
        /// Links that were removed
        removed: Vec<LinkExpression>,
        /// Links that could not be removed, with the runtime's reason
        failed: Vec<(LinkExpression, String)>,
    },
}

impl AdapterError {
    /// Create a runtime unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::RuntimeUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a perspective not found error
    pub fn perspective_not_found(perspective: PerspectiveId) -> Self {
        Self::PerspectiveNotFound { perspective }
    }

    /// Create an execution error
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }

    /// The logic engine reported an unknown procedure, i.e. the schema program
    /// that defines it has not been loaded (yet).
    pub fn is_missing_procedure(&self) -> bool {
        matches!(self, Self::Execution { reason } if reason.contains("existence_error"))
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(String),

    /// The file content is not valid configuration.
    #[error("invalid config: {0}")]
    Parse(String),

    /// A value is out of range or otherwise unusable.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Dotted field path
        field: String,
        /// Why the value was rejected
        reason: String,
    },
}

impl ConfigError {
    /// Create an invalid field error
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_procedure_detection() {
        let err = AdapterError::execution("error(existence_error(procedure, entry_ab12/5), _)");
        assert!(err.is_missing_procedure());
        assert!(!AdapterError::unavailable("socket closed").is_missing_procedure());
    }

    #[test]
    fn test_error_display() {
        let err = AdapterError::perspective_not_found(PerspectiveId::new("p-1"));
        assert!(err.to_string().contains("p-1"));

        let err = ConfigError::invalid("reconciler.popularity_threshold", "must be > 0");
        assert!(err.to_string().contains("popularity_threshold"));
    }
}
