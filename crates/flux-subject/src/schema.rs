//! Subject Schemas
//!
//! A schema maps property names to predicates. Every schema carries a type
//! flag, the `(predicate, value)` link that marks a base id as an instance of
//! the class.
//!
//! Property resolution is explicit: each declared property gets an async
//! resolver when the schema is built. The defaults read links through the
//! adapter; [`SubjectSchemaBuilder::resolver`] replaces one.

use chrono::{DateTime, Utc};
use flux_core::{AdapterError, LinkAdapter, LinkExpression, LinkQuery, Literal, PerspectiveId};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::SubjectError;

/// Single value or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Latest link wins
    Single,
    /// Every link, in adapter order
    Collection,
}

/// How a link target is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Inline value encoded as a `literal://` URI
    Literal,
    /// URI of another entity or resource
    Reference,
}

/// Declaration of one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySpec {
    /// Predicate linking the base id to the value
    pub predicate: String,
    /// Single or collection
    pub cardinality: Cardinality,
    /// Literal or reference targets
    pub kind: ValueKind,
    /// Whether create/update may set it
    pub writable: bool,
}

/// The link that marks a base id as an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeFlag {
    /// Flag predicate
    pub predicate: String,
    /// Required target
    pub value: String,
}

/// A property value as read from or written to links.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Decoded literal
    Literal(Value),
    /// Target URI
    Reference(String),
    /// Collection members
    List(Vec<PropertyValue>),
    /// No link
    Null,
}

impl PropertyValue {
    /// A literal value.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// A reference value.
    pub fn reference(uri: impl Into<String>) -> Self {
        Self::Reference(uri.into())
    }

    /// Whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text of a string literal or a reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Literal(Value::String(s)) | Self::Reference(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Plain JSON rendering.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Reference(uri) => Value::String(uri.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Null => Value::Null,
        }
    }

    /// Decode a link target of the given kind.
    ///
    /// A reference property whose target is a `literal://` URL holds a
    /// literal, and reads back as one.
    pub fn from_target(kind: ValueKind, target: &str) -> Self {
        match (kind, Literal::from_url(target)) {
            (_, Ok(literal)) => Self::Literal(literal.to_value()),
            (ValueKind::Reference, Err(_)) => Self::Reference(target.to_string()),
            (ValueKind::Literal, Err(_)) => Self::Literal(Value::String(target.to_string())),
        }
    }

    /// Link targets this value is written as. Literals are always
    /// `literal://` encoded; only references are written verbatim.
    pub fn to_targets(&self) -> Vec<String> {
        match self {
            Self::Null => Vec::new(),
            Self::List(items) => items.iter().flat_map(Self::to_targets).collect(),
            Self::Reference(uri) => vec![uri.clone()],
            Self::Literal(value) => vec![Literal::from_value(value).to_url()],
        }
    }

    /// Reinterpret string literals as URIs for a reference property.
    pub fn into_kind(self, kind: ValueKind) -> Self {
        match (self, kind) {
            (Self::Literal(Value::String(uri)), ValueKind::Reference) => Self::Reference(uri),
            (Self::List(items), kind) => Self::List(items.into_iter().map(|item| item.into_kind(kind)).collect()),
            (other, _) => other,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Literal(Value::String(value))
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            other => Self::Literal(other),
        }
    }
}

/// Property values keyed by name, in declaration order.
pub type SubjectData = IndexMap<String, PropertyValue>;

/// A fully resolved entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectRecord {
    /// Base id
    pub id: String,
    /// Author of the entity's first link
    pub author: String,
    /// Timestamp of the entity's first link
    pub timestamp: DateTime<Utc>,
    /// Every declared property
    pub properties: SubjectData,
}

impl SubjectRecord {
    /// A property by name.
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Flat JSON object `{id, author, timestamp, ...properties}`.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("id".into(), Value::String(self.id.clone()));
        object.insert("author".into(), Value::String(self.author.clone()));
        object.insert("timestamp".into(), Value::String(self.timestamp.to_rfc3339()));
        for (name, value) in &self.properties {
            object.insert(name.clone(), value.to_json());
        }
        Value::Object(object)
    }

    /// Deserialize the flat rendering into a typed model.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_json())
    }
}

/// Async resolver for one property of one entity.
pub type ResolveFn = Arc<
    dyn Fn(Arc<dyn LinkAdapter>, PerspectiveId, String) -> BoxFuture<'static, Result<PropertyValue, AdapterError>>
        + Send
        + Sync,
>;

/// Resolver reading `base -predicate-> *` links.
pub fn link_resolver(spec: &PropertySpec) -> ResolveFn {
    let spec = spec.clone();
    Arc::new(
        move |adapter: Arc<dyn LinkAdapter>,
              perspective: PerspectiveId,
              base: String|
              -> BoxFuture<'static, Result<PropertyValue, AdapterError>> {
            let spec = spec.clone();
            Box::pin(async move {
                let query = LinkQuery::new().source(base).predicate(spec.predicate.clone());
                let links = adapter.query_links(&perspective, &query).await?;
                Ok(resolve_links(&spec, &links))
            })
        },
    )
}

/// Fold a property's links into its value.
///
/// Single-valued properties take the newest link; equal timestamps resolve to
/// the later link in adapter order.
pub fn resolve_links(spec: &PropertySpec, links: &[LinkExpression]) -> PropertyValue {
    match spec.cardinality {
        Cardinality::Single => links
            .iter()
            .max_by_key(|link| link.timestamp)
            .map_or(PropertyValue::Null, |link| {
                PropertyValue::from_target(spec.kind, link.target())
            }),
        Cardinality::Collection => PropertyValue::List(
            links
                .iter()
                .map(|link| PropertyValue::from_target(spec.kind, link.target()))
                .collect(),
        ),
    }
}

/// A subject class.
#[derive(Clone)]
pub struct SubjectSchema {
    name: String,
    flag: TypeFlag,
    properties: IndexMap<String, PropertySpec>,
    resolvers: IndexMap<String, ResolveFn>,
}

impl fmt::Debug for SubjectSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectSchema")
            .field("name", &self.name)
            .field("flag", &self.flag)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

impl SubjectSchema {
    /// Start declaring a class.
    pub fn builder(name: impl Into<String>) -> SubjectSchemaBuilder {
        SubjectSchemaBuilder {
            name: name.into(),
            flag: None,
            properties: IndexMap::new(),
            resolvers: IndexMap::new(),
        }
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type flag.
    pub fn flag(&self) -> &TypeFlag {
        &self.flag
    }

    /// Declared properties in declaration order.
    pub fn properties(&self) -> &IndexMap<String, PropertySpec> {
        &self.properties
    }

    /// One property declaration.
    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.get(name)
    }

    /// Resolvers, one per declared property.
    pub fn resolvers(&self) -> &IndexMap<String, ResolveFn> {
        &self.resolvers
    }
}

/// Builder for [`SubjectSchema`].
pub struct SubjectSchemaBuilder {
    name: String,
    flag: Option<TypeFlag>,
    properties: IndexMap<String, PropertySpec>,
    resolvers: IndexMap<String, ResolveFn>,
}

impl SubjectSchemaBuilder {
    /// Set the type flag.
    pub fn flag(mut self, predicate: impl Into<String>, value: impl Into<String>) -> Self {
        self.flag = Some(TypeFlag {
            predicate: predicate.into(),
            value: value.into(),
        });
        self
    }

    /// Writable single-valued literal property.
    pub fn property(self, name: impl Into<String>, predicate: impl Into<String>) -> Self {
        self.declare(name, predicate, Cardinality::Single, ValueKind::Literal)
    }

    /// Writable single-valued reference property.
    pub fn reference(self, name: impl Into<String>, predicate: impl Into<String>) -> Self {
        self.declare(name, predicate, Cardinality::Single, ValueKind::Reference)
    }

    /// Writable collection property.
    pub fn collection(
        self,
        name: impl Into<String>,
        predicate: impl Into<String>,
        kind: ValueKind,
    ) -> Self {
        self.declare(name, predicate, Cardinality::Collection, kind)
    }

    /// Fully specified property.
    pub fn declare(
        mut self,
        name: impl Into<String>,
        predicate: impl Into<String>,
        cardinality: Cardinality,
        kind: ValueKind,
    ) -> Self {
        self.properties.insert(
            name.into(),
            PropertySpec {
                predicate: predicate.into(),
                cardinality,
                kind,
                writable: true,
            },
        );
        self
    }

    /// Mark a declared property read-only.
    pub fn read_only(mut self, name: &str) -> Self {
        if let Some(spec) = self.properties.get_mut(name) {
            spec.writable = false;
        }
        self
    }

    /// Replace the default resolver of a property.
    pub fn resolver(mut self, name: impl Into<String>, resolver: ResolveFn) -> Self {
        self.resolvers.insert(name.into(), resolver);
        self
    }

    /// Finish the schema.
    ///
    /// # Errors
    ///
    /// `SubjectError::InvalidSchema` when the type flag is missing, a property
    /// name is reserved (`id`, `author`, `timestamp`), or a custom resolver
    /// names an undeclared property.
    pub fn build(self) -> Result<SubjectSchema, SubjectError> {
        let invalid = |reason: String| SubjectError::InvalidSchema {
            class: self.name.clone(),
            reason,
        };
        let flag = self
            .flag
            .clone()
            .ok_or_else(|| invalid("missing type flag".to_string()))?;
        if let Some(reserved) = ["id", "author", "timestamp"]
            .into_iter()
            .find(|name| self.properties.contains_key(*name))
        {
            return Err(invalid(format!("property name {reserved} is reserved")));
        }
        if let Some(orphan) = self
            .resolvers
            .keys()
            .find(|name| !self.properties.contains_key(*name))
        {
            return Err(invalid(format!("resolver for undeclared property {orphan}")));
        }

        let resolvers = self
            .properties
            .iter()
            .map(|(name, spec)| {
                let resolver = self
                    .resolvers
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| link_resolver(spec));
                (name.clone(), resolver)
            })
            .collect();

        Ok(SubjectSchema {
            name: self.name,
            flag,
            properties: self.properties,
            resolvers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use flux_core::Link;

    fn spec(cardinality: Cardinality, kind: ValueKind) -> PropertySpec {
        PropertySpec {
            predicate: "flux://name".into(),
            cardinality,
            kind,
            writable: true,
        }
    }

    fn link(ms: i64, target: &str) -> LinkExpression {
        LinkExpression::new(
            "did:a",
            Utc.timestamp_millis_opt(ms).unwrap(),
            Link::new("base", "flux://name", target),
        )
    }

    #[test]
    fn test_build_requires_flag() {
        let result = SubjectSchema::builder("Thing").property("name", "flux://name").build();
        assert_matches!(result, Err(SubjectError::InvalidSchema { .. }));
    }

    #[test]
    fn test_build_rejects_reserved_names() {
        let result = SubjectSchema::builder("Thing")
            .flag("flux://entry_type", "flux://thing")
            .property("author", "flux://author")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_every_property_gets_a_resolver() {
        let schema = SubjectSchema::builder("Thing")
            .flag("flux://entry_type", "flux://thing")
            .property("name", "flux://name")
            .collection("tags", "flux://tag", ValueKind::Reference)
            .read_only("tags")
            .build()
            .unwrap();
        assert_eq!(schema.resolvers().len(), 2);
        assert!(!schema.property("tags").unwrap().writable);
        assert_eq!(
            schema.properties().keys().collect::<Vec<_>>(),
            vec!["name", "tags"]
        );
    }

    #[test]
    fn test_single_value_last_write_wins() {
        let links = vec![
            link(2, "literal://string:second"),
            link(1, "literal://string:first"),
            link(2, "literal://string:tie-later"),
        ];
        let value = resolve_links(&spec(Cardinality::Single, ValueKind::Literal), &links);
        assert_eq!(value, PropertyValue::literal("tie-later"));
        assert_eq!(
            resolve_links(&spec(Cardinality::Single, ValueKind::Literal), &[]),
            PropertyValue::Null
        );
    }

    #[test]
    fn test_collection_keeps_adapter_order() {
        let links = vec![link(2, "a://x"), link(1, "a://y")];
        let value = resolve_links(&spec(Cardinality::Collection, ValueKind::Reference), &links);
        assert_eq!(
            value,
            PropertyValue::List(vec![
                PropertyValue::reference("a://x"),
                PropertyValue::reference("a://y")
            ])
        );
    }

    #[test]
    fn test_targets_encoding() {
        assert_eq!(
            PropertyValue::from("hi").to_targets(),
            vec!["literal://string:hi".to_string()]
        );
        assert_eq!(
            PropertyValue::reference("https://x").to_targets(),
            vec!["https://x".to_string()]
        );
        assert_eq!(
            PropertyValue::from("https://x").into_kind(ValueKind::Reference),
            PropertyValue::reference("https://x")
        );
        assert!(PropertyValue::Null.to_targets().is_empty());
        assert_eq!(
            PropertyValue::from_target(ValueKind::Reference, "literal://number:7"),
            PropertyValue::literal(7)
        );
        assert_eq!(
            PropertyValue::from_target(ValueKind::Literal, "https://plain"),
            PropertyValue::literal("https://plain")
        );
    }

    #[test]
    fn test_record_decode() {
        #[derive(serde::Deserialize)]
        struct Named {
            id: String,
            name: String,
        }
        let mut properties = SubjectData::new();
        properties.insert("name".into(), PropertyValue::literal("general"));
        let record = SubjectRecord {
            id: "c1".into(),
            author: "did:a".into(),
            timestamp: Utc.timestamp_millis_opt(0).unwrap(),
            properties,
        };
        let named: Named = record.decode().unwrap();
        assert_eq!((named.id.as_str(), named.name.as_str()), ("c1", "general"));
    }
}
