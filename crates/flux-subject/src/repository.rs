//! Subject Repository
//!
//! Generic CRUD between a [`SubjectSchema`] and the links of one perspective.
//!
//! An instance `B` of class `C` under parent `S` is the link set:
//!
//! ```text
//! B -<flag predicate>-> <flag value>      type flag
//! S -rdf://has_child->  B                 membership edge
//! B -<property predicate>-> <target>      one per property value
//! ```
//!
//! Multi-link writes are not transactional. A failure after the first link
//! is reported as `SubjectError::PartialWriteFailure` listing what landed.

use flux_core::predicates::HAS_CHILD;
use flux_core::{
    Link, LinkAdapter, LinkExpression, LinkQuery, Literal, PerspectiveId, RepositoryConfig, Term,
};
use flux_query::program::{query, triple_goal};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::error::SubjectError;
use crate::schema::{PropertyValue, SubjectData, SubjectRecord, SubjectSchema};
use crate::sdna::{class_atom, sdna};

/// Handle to an instance that exists in the perspective but whose properties
/// have not been resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectHandle {
    /// Base id
    pub id: String,
    /// Class name
    pub class: String,
}

/// CRUD over one subject class in one perspective.
pub struct SubjectRepository {
    adapter: Arc<dyn LinkAdapter>,
    perspective: PerspectiveId,
    schema: Arc<SubjectSchema>,
    source: String,
    concurrency: usize,
    registered: OnceCell<()>,
}

impl SubjectRepository {
    /// Repository rooted at the default anchor.
    pub fn new(
        adapter: Arc<dyn LinkAdapter>,
        perspective: PerspectiveId,
        schema: Arc<SubjectSchema>,
    ) -> Self {
        Self::with_config(adapter, perspective, schema, &RepositoryConfig::default())
    }

    /// Repository using the given settings.
    pub fn with_config(
        adapter: Arc<dyn LinkAdapter>,
        perspective: PerspectiveId,
        schema: Arc<SubjectSchema>,
        config: &RepositoryConfig,
    ) -> Self {
        Self {
            adapter,
            perspective,
            schema,
            source: config.default_source.clone(),
            concurrency: config.resolve_concurrency.max(1),
            registered: OnceCell::new(),
        }
    }

    /// Use a different parent anchor.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Class name.
    pub fn class(&self) -> &str {
        self.schema.name()
    }

    /// Parent anchor.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The schema this repository maps.
    pub fn schema(&self) -> &SubjectSchema {
        &self.schema
    }

    /// Load the class's schema program unless the perspective already knows
    /// the class. Runs at most once per repository.
    pub async fn ensure_subject(&self) -> Result<(), SubjectError> {
        self.registered
            .get_or_try_init(|| self.register())
            .await
            .map(|_| ())
    }

    async fn register(&self) -> Result<(), SubjectError> {
        if self.class_known().await? {
            return Ok(());
        }
        tracing::info!(
            perspective = %self.perspective,
            class = self.class(),
            "registering subject class"
        );
        self.adapter
            .add_sdna(&self.perspective, self.class(), &sdna(&self.schema))
            .await
            .map_err(|e| self.wrap(None, e))?;
        if self.class_known().await? {
            Ok(())
        } else {
            Err(SubjectError::SubjectNotRegistered {
                class: self.class().to_string(),
                reason: "subject_class did not resolve after loading the schema".into(),
            })
        }
    }

    async fn class_known(&self) -> Result<bool, SubjectError> {
        let text = query(&[Term::compound(
            "subject_class",
            vec![Term::str(self.class()), Term::var("C")],
        )]);
        match self.adapter.run_graph_query(&self.perspective, &text).await {
            Ok(outcome) => Ok(outcome.is_match()),
            Err(e) if e.is_missing_procedure() => Ok(false),
            Err(e) => Err(self.wrap(None, e)),
        }
    }

    /// Create an instance under `source` (default: the repository anchor).
    ///
    /// `Null` values are skipped. The id defaults to a fresh
    /// `literal://string:<uuid>`.
    ///
    /// # Errors
    ///
    /// - `UnknownProperty` / `PropertyNotWritable` before anything is written
    /// - `SubjectCreationFailed` if the type flag cannot be written or the
    ///   instance does not materialize
    /// - `PartialWriteFailure` if some property or membership links failed
    pub async fn create(
        &self,
        data: &SubjectData,
        id: Option<&str>,
        source: Option<&str>,
    ) -> Result<SubjectRecord, SubjectError> {
        self.ensure_subject().await?;
        self.check_writable(data)?;

        let base = id.map_or_else(
            || Literal::from_string(Uuid::new_v4().to_string()).to_url(),
            str::to_string,
        );
        let source = source.unwrap_or(&self.source);
        tracing::debug!(perspective = %self.perspective, class = self.class(), id = %base, "creating subject");

        let flag = self.schema.flag();
        let flag_link = self
            .adapter
            .add_link(
                &self.perspective,
                Link::new(base.clone(), flag.predicate.clone(), flag.value.clone()),
            )
            .await
            .map_err(|e| SubjectError::SubjectCreationFailed {
                class: self.class().to_string(),
                reason: e.to_string(),
            })?;

        let mut links = vec![Link::new(source, HAS_CHILD, base.clone())];
        links.extend(self.property_links(&base, data));
        let mut written = vec![flag_link];
        self.write_links(&base, links, &mut written).await?;

        if !self.is_instance(&base).await? {
            return Err(SubjectError::SubjectCreationFailed {
                class: self.class().to_string(),
                reason: format!("{base} did not materialize as an instance"),
            });
        }
        self.get_data(Some(&base))
            .await?
            .ok_or_else(|| SubjectError::not_found(self.class(), &base))
    }

    /// Write new property links for an existing instance.
    ///
    /// Superseded single-valued links are kept; reads resolve the newest.
    pub async fn update(&self, id: &str, data: &SubjectData) -> Result<SubjectRecord, SubjectError> {
        self.ensure_subject().await?;
        self.check_writable(data)?;
        let Some(handle) = self.get(Some(id)).await? else {
            return Err(SubjectError::not_found(self.class(), id));
        };

        let mut written = Vec::new();
        self.write_links(&handle.id, self.property_links(&handle.id, data), &mut written)
            .await?;
        self.get_data(Some(&handle.id))
            .await?
            .ok_or_else(|| SubjectError::not_found(self.class(), id))
    }

    /// Detach an instance from the repository anchor.
    ///
    /// Only `anchor -> id` links are removed; the instance's own links stay.
    pub async fn remove(&self, id: &str) -> Result<(), SubjectError> {
        let links = self
            .query_links(Some(id), LinkQuery::new().source(self.source.clone()).target(id))
            .await?;
        self.remove_all(id, &links).await
    }

    /// Detach an instance and retract every link it is the source of.
    pub async fn purge(&self, id: &str) -> Result<(), SubjectError> {
        let mut links = self
            .query_links(Some(id), LinkQuery::new().source(self.source.clone()).target(id))
            .await?;
        links.extend(self.query_links(Some(id), LinkQuery::new().source(id)).await?);
        self.remove_all(id, &links).await
    }

    /// One instance by id, or the first of `get_all()` when `id` is `None`.
    pub async fn get(&self, id: Option<&str>) -> Result<Option<SubjectHandle>, SubjectError> {
        self.ensure_subject().await?;
        match id {
            Some(id) => Ok(self.is_instance(id).await?.then(|| self.handle(id))),
            None => Ok(self.get_all(None).await?.into_iter().next()),
        }
    }

    /// Resolved record for [`get`](Self::get).
    pub async fn get_data(&self, id: Option<&str>) -> Result<Option<SubjectRecord>, SubjectError> {
        match self.get(id).await? {
            Some(handle) => self.resolve(&handle).await.map(Some),
            None => Ok(None),
        }
    }

    /// Instances linked from `source` (default: the repository anchor).
    ///
    /// Duplicate rows for the same base id collapse to the first occurrence.
    pub async fn get_all(&self, source: Option<&str>) -> Result<Vec<SubjectHandle>, SubjectError> {
        self.ensure_subject().await?;
        let source = source.unwrap_or(&self.source);
        let text = query(&[
            Term::compound("subject_class", vec![Term::str(self.class()), Term::var("C")]),
            Term::compound("instance", vec![Term::var("C"), Term::var("Base")]),
            triple_goal(Term::str(source), Term::var("Predicate"), Term::var("Base")),
        ]);
        let rows = self
            .adapter
            .run_graph_query(&self.perspective, &text)
            .await
            .map_err(|e| self.wrap(None, e))?
            .into_rows();

        let mut seen = HashSet::new();
        Ok(rows
            .iter()
            .filter_map(|row| row.get("Base").and_then(Term::as_text))
            .filter(|base| seen.insert(base.to_string()))
            .map(|base| self.handle(base))
            .collect())
    }

    /// Resolved records for [`get_all`](Self::get_all), in the same order.
    pub async fn get_all_data(&self, source: Option<&str>) -> Result<Vec<SubjectRecord>, SubjectError> {
        let handles = self.get_all(source).await?;
        stream::iter(handles.iter().map(|handle| self.resolve(handle)))
            .boxed()
            .buffered(self.concurrency)
            .try_collect()
            .await
    }

    /// Resolve every declared property of an instance concurrently.
    ///
    /// `author` and `timestamp` come from the first link the adapter returns
    /// for `source = id`.
    pub async fn resolve(&self, handle: &SubjectHandle) -> Result<SubjectRecord, SubjectError> {
        let id = handle.id.as_str();
        let own = self.query_links(Some(id), LinkQuery::new().source(id)).await?;
        let first = own
            .first()
            .ok_or_else(|| SubjectError::not_found(self.class(), id))?;

        let resolvers = self.schema.resolvers();
        let values = stream::iter(resolvers.iter().map(|(name, resolve)| {
            let future = resolve(self.adapter.clone(), self.perspective.clone(), id.to_string());
            async move { future.await.map(|value| (name.clone(), value)) }
        }))
        .boxed()
        .buffered(self.concurrency)
        .try_collect::<SubjectData>()
        .await
        .map_err(|e| self.wrap(Some(id), e))?;

        Ok(SubjectRecord {
            id: id.to_string(),
            author: first.author.clone(),
            timestamp: first.timestamp,
            properties: values,
        })
    }

    /// Whether `id` satisfies the class's `instance/2` rule.
    pub async fn is_instance(&self, id: &str) -> Result<bool, SubjectError> {
        let class = Term::atom(class_atom(self.class()));
        let text = query(&[Term::compound("instance", vec![class, Term::str(id)])]);
        self.adapter
            .run_graph_query(&self.perspective, &text)
            .await
            .map(|outcome| outcome.is_match())
            .map_err(|e| self.wrap(Some(id), e))
    }

    fn handle(&self, id: &str) -> SubjectHandle {
        SubjectHandle {
            id: id.to_string(),
            class: self.class().to_string(),
        }
    }

    fn check_writable(&self, data: &SubjectData) -> Result<(), SubjectError> {
        for name in data.keys() {
            let spec = self.schema.property(name).ok_or_else(|| SubjectError::UnknownProperty {
                class: self.class().to_string(),
                property: name.clone(),
            })?;
            if !spec.writable {
                return Err(SubjectError::PropertyNotWritable {
                    class: self.class().to_string(),
                    property: name.clone(),
                });
            }
        }
        Ok(())
    }

    fn property_links(&self, base: &str, data: &SubjectData) -> Vec<Link> {
        data.iter()
            .filter(|(_, value)| !value.is_null())
            .filter_map(|(name, value)| self.schema.property(name).map(|spec| (spec, value)))
            .flat_map(|(spec, value)| {
                value
                    .to_targets()
                    .into_iter()
                    .map(|target| Link::new(base, spec.predicate.clone(), target))
            })
            .collect()
    }

    async fn write_links(
        &self,
        id: &str,
        links: Vec<Link>,
        written: &mut Vec<LinkExpression>,
    ) -> Result<(), SubjectError> {
        let mut failed = Vec::new();
        for link in links {
            match self.adapter.add_link(&self.perspective, link.clone()).await {
                Ok(expression) => written.push(expression),
                Err(e) => {
                    tracing::warn!(class = self.class(), id, error = %e, "subject link write failed");
                    failed.push((link, e.to_string()));
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(SubjectError::PartialWriteFailure {
                class: self.class().to_string(),
                id: id.to_string(),
                written: std::mem::take(written),
                failed,
            })
        }
    }

    async fn query_links(
        &self,
        id: Option<&str>,
        query: LinkQuery,
    ) -> Result<Vec<LinkExpression>, SubjectError> {
        self.adapter
            .query_links(&self.perspective, &query)
            .await
            .map_err(|e| self.wrap(id, e))
    }

    async fn remove_all(&self, id: &str, links: &[LinkExpression]) -> Result<(), SubjectError> {
        if links.is_empty() {
            return Ok(());
        }
        tracing::debug!(class = self.class(), id, count = links.len(), "removing subject links");
        self.adapter
            .remove_links(&self.perspective, links)
            .await
            .map_err(|e| self.wrap(Some(id), e))
    }

    fn wrap(&self, id: Option<&str>, err: flux_core::AdapterError) -> SubjectError {
        SubjectError::adapter(self.class(), id, err)
    }
}

impl std::fmt::Debug for SubjectRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectRepository")
            .field("perspective", &self.perspective)
            .field("class", &self.class())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Values for `create`/`update` from `(name, value)` pairs.
pub fn subject_data<I, K, V>(pairs: I) -> SubjectData
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<PropertyValue>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .collect()
}
