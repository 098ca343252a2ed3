//! Link primitives
//!
//! A link is a directed `(source, predicate, target)` triple. The runtime wraps
//! each stored link in a [`LinkExpression`] carrying its author and creation
//! time. Links are immutable: mutation is "add a new link, remove the old one".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a perspective (a scoped, mutable link set owned by the runtime).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerspectiveId(String);

impl PerspectiveId {
    /// Wrap a runtime-issued perspective UUID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PerspectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PerspectiveId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PerspectiveId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The bare triple, as submitted to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Subject URI
    pub source: String,
    /// Relationship URI
    pub predicate: String,
    /// Object URI or literal URL
    pub target: String,
}

impl Link {
    /// Build a link from its three coordinates.
    pub fn new(
        source: impl Into<String>,
        predicate: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            predicate: predicate.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source, self.predicate, self.target)
    }
}

/// A stored link: the triple plus who created it and when.
///
/// Two expressions with identical coordinates but different authors or
/// timestamps are distinct occurrences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkExpression {
    /// DID of the authoring agent
    pub author: String,
    /// Creation time of the link
    pub timestamp: DateTime<Utc>,
    /// The triple itself
    pub data: Link,
}

impl LinkExpression {
    /// Wrap a link with authorship metadata.
    pub fn new(author: impl Into<String>, timestamp: DateTime<Utc>, data: Link) -> Self {
        Self {
            author: author.into(),
            timestamp,
            data,
        }
    }

    /// Shorthand for `self.data.source`.
    pub fn source(&self) -> &str {
        &self.data.source
    }

    /// Shorthand for `self.data.predicate`.
    pub fn predicate(&self) -> &str {
        &self.data.predicate
    }

    /// Shorthand for `self.data.target`.
    pub fn target(&self) -> &str {
        &self.data.target
    }

    /// Whether this expression names the same occurrence as `other`.
    pub fn same_occurrence(&self, other: &LinkExpression) -> bool {
        self.data == other.data && self.author == other.author && self.timestamp == other.timestamp
    }
}

/// Filter for `LinkAdapter::query_links`. Omitted fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkQuery {
    /// Match on source
    pub source: Option<String>,
    /// Match on predicate
    pub predicate: Option<String>,
    /// Match on target
    pub target: Option<String>,
    /// Only links created at or after this time
    pub from_date: Option<DateTime<Utc>>,
    /// Only links created at or before this time
    pub until_date: Option<DateTime<Utc>>,
    /// Maximum number of links to return
    pub limit: Option<usize>,
}

impl LinkQuery {
    /// Empty query (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a source.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Restrict to a predicate.
    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    /// Restrict to a target.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Lower time bound (inclusive).
    pub fn from_date(mut self, from: DateTime<Utc>) -> Self {
        self.from_date = Some(from);
        self
    }

    /// Upper time bound (inclusive).
    pub fn until_date(mut self, until: DateTime<Utc>) -> Self {
        self.until_date = Some(until);
        self
    }

    /// Cap the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluate the coordinate and time filters against one expression.
    ///
    /// `limit` is not a per-link property and is applied by the caller.
    pub fn matches(&self, expr: &LinkExpression) -> bool {
        fn field(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().map_or(true, |f| f == value)
        }

        field(&self.source, expr.source())
            && field(&self.predicate, expr.predicate())
            && field(&self.target, expr.target())
            && self.from_date.map_or(true, |from| expr.timestamp >= from)
            && self.until_date.map_or(true, |until| expr.timestamp <= until)
    }
}
