//! Query errors

use flux_core::AdapterError;
use thiserror::Error;

/// Failure shape of a decoded binding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A head variable is absent from a binding row.
    #[error("binding row is missing variable {variable}")]
    MissingBinding {
        /// Variable name
        variable: String,
    },

    /// A list element is not a `(content, timestamp, author)` tuple.
    #[error("malformed property value for {property}: {found}")]
    MalformedItem {
        /// Property being decoded
        property: String,
        /// Debug rendering of the offending term
        found: String,
    },

    /// A list does not end in `[]`.
    #[error("improper list for {property}")]
    ImproperList {
        /// Property being decoded
        property: String,
    },

    /// A term of an unexpected shape where a scalar or list was expected.
    #[error("unexpected term for {field}: {found}")]
    UnexpectedTerm {
        /// Field being decoded
        field: String,
        /// Debug rendering of the offending term
        found: String,
    },
}

/// Errors raised while compiling or running a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The procedure a query relies on is not defined; the subject schema has
    /// not been loaded into the perspective yet.
    #[error("subject schema not registered: {reason}")]
    SubjectNotRegistered {
        /// Engine-reported failure
        reason: String,
    },

    /// The runtime failed the request.
    #[error(transparent)]
    Adapter(AdapterError),

    /// The bindings could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The query succeeded but scoped rules could not be retracted.
    #[error("failed to retract {} scoped rules", failed.len())]
    Cleanup {
        /// Retraction programs that failed, with the runtime's reason
        failed: Vec<(String, String)>,
    },
}

impl From<AdapterError> for QueryError {
    fn from(err: AdapterError) -> Self {
        if err.is_missing_procedure() {
            return Self::SubjectNotRegistered {
                reason: err.to_string(),
            };
        }
        Self::Adapter(err)
    }
}
