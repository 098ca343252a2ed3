//! Sync errors
//!
//! Errors from actions, loaders and directory hydration. Event
//! classification never fails; unrecognised events are recorded instead.

use flux_core::{AdapterError, Link};
use flux_query::QueryError;
use flux_subject::SubjectError;
use thiserror::Error;

/// Errors raised by chat actions, loaders and the community directory.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The runtime rejected a link operation.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// A graph query failed.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A subject repository operation failed.
    #[error(transparent)]
    Subject(#[from] SubjectError),

    /// A resolved record does not fit its typed model.
    #[error("record decode failed: {0}")]
    Record(#[from] serde_json::Error),

    /// The message landed but its reply link did not. The message is kept,
    /// without its reply marker.
    #[error("message {message_id} was sent but linking it to {} failed: {source}", .failed.target)]
    PartialSend {
        /// Id of the sent message
        message_id: String,
        /// The channel link that landed
        sent: Link,
        /// The link that failed
        failed: Link,
        /// Why it failed
        #[source]
        source: AdapterError,
    },

    /// The action targets a message the store does not hold.
    #[error("message {id} is not loaded")]
    UnknownMessage {
        /// Message id
        id: String,
    },
}

impl SyncError {
    /// Create an unknown message error
    pub fn unknown_message(id: impl Into<String>) -> Self {
        Self::UnknownMessage { id: id.into() }
    }

    /// The community schema is not loaded yet; callers should wait for the
    /// community to sync and retry once.
    pub fn is_not_registered(&self) -> bool {
        match self {
            Self::Query(QueryError::SubjectNotRegistered { .. }) => true,
            Self::Subject(err) => err.is_not_registered(),
            Self::Adapter(err) => err.is_missing_procedure(),
            _ => false,
        }
    }
}
