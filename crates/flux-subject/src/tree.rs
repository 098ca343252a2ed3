//! Depth-first tree materialization
//!
//! Loads a chain of subject classes where each level's instances are the
//! children of the level above (for example conversation, then subgroup,
//! then item). Fan-out is bounded per level.

use flux_core::{LinkAdapter, PerspectiveId, RepositoryConfig};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use indexmap::IndexSet;
use std::sync::Arc;

use crate::error::SubjectError;
use crate::repository::SubjectRepository;
use crate::schema::{SubjectRecord, SubjectSchema};

/// One materialized instance and its subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    /// The resolved instance
    pub record: SubjectRecord,
    /// Instances of the next level linked from this one
    pub children: Vec<TreeNode>,
    /// Distinct authors of this instance and its whole subtree, first seen first
    pub participants: Vec<String>,
}

impl TreeNode {
    fn new(record: SubjectRecord, children: Vec<TreeNode>) -> Self {
        let mut participants = IndexSet::new();
        participants.insert(record.author.clone());
        for child in &children {
            participants.extend(child.participants.iter().cloned());
        }
        Self {
            record,
            children,
            participants: participants.into_iter().collect(),
        }
    }

    /// Number of nodes in this subtree, including this one.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }
}

/// Materialize `levels` below `root_source`.
///
/// At most `concurrency` siblings are expanded at once on each level. An
/// empty `levels` yields an empty forest.
pub async fn materialize_tree(
    adapter: Arc<dyn LinkAdapter>,
    perspective: PerspectiveId,
    levels: &[Arc<SubjectSchema>],
    root_source: &str,
    concurrency: usize,
) -> Result<Vec<TreeNode>, SubjectError> {
    let config = RepositoryConfig {
        default_source: root_source.to_string(),
        resolve_concurrency: concurrency.max(1),
    };
    let repositories: Vec<SubjectRepository> = levels
        .iter()
        .map(|schema| {
            SubjectRepository::with_config(adapter.clone(), perspective.clone(), schema.clone(), &config)
        })
        .collect();

    tracing::debug!(
        perspective = %perspective,
        depth = repositories.len(),
        root = root_source,
        "materializing subject tree"
    );
    materialize_level(&repositories, root_source.to_string(), config.resolve_concurrency).await
}

fn materialize_level(
    levels: &[SubjectRepository],
    source: String,
    concurrency: usize,
) -> BoxFuture<'_, Result<Vec<TreeNode>, SubjectError>> {
    Box::pin(async move {
        let Some((repository, rest)) = levels.split_first() else {
            return Ok(Vec::new());
        };
        let records = repository.get_all_data(Some(&source)).await?;
        stream::iter(records)
            .map(|record| materialize_node(rest, record, concurrency))
            .buffered(concurrency)
            .try_collect()
            .await
    })
}

fn materialize_node(
    rest: &[SubjectRepository],
    record: SubjectRecord,
    concurrency: usize,
) -> BoxFuture<'_, Result<TreeNode, SubjectError>> {
    Box::pin(async move {
        let children = materialize_level(rest, record.id.clone(), concurrency).await?;
        Ok(TreeNode::new(record, children))
    })
}
