//! Fixed graph queries
//!
//! Small helper programs the reconciler and repository run directly.

use flux_core::{LinkAdapter, PerspectiveId, Term};

use crate::error::QueryError;
use crate::executor::run_query;
use crate::program::{query, triple_goal};

/// Whether `source -predicate-> target` exists.
pub async fn triple_exists(
    adapter: &dyn LinkAdapter,
    perspective: &PerspectiveId,
    source: &str,
    predicate: &str,
    target: &str,
) -> Result<bool, QueryError> {
    let text = query(&[triple_goal(
        Term::str(source),
        Term::str(predicate),
        Term::str(target),
    )]);
    Ok(run_query(adapter, perspective, &text).await?.is_match())
}

/// Evaluate the community's `isPopular/1` rule for a message.
///
/// Fails with `QueryError::SubjectNotRegistered` while the community schema
/// is not loaded.
pub async fn is_popular(
    adapter: &dyn LinkAdapter,
    perspective: &PerspectiveId,
    message_id: &str,
) -> Result<bool, QueryError> {
    let text = query(&[Term::compound("isPopular", vec![Term::str(message_id)])]);
    Ok(run_query(adapter, perspective, &text).await?.is_match())
}

/// Targets of `source -predicate-> X`, in engine order.
pub async fn targets(
    adapter: &dyn LinkAdapter,
    perspective: &PerspectiveId,
    source: &str,
    predicate: &str,
) -> Result<Vec<String>, QueryError> {
    let text = query(&[triple_goal(
        Term::str(source),
        Term::str(predicate),
        Term::var("Target"),
    )]);
    let rows = run_query(adapter, perspective, &text).await?.into_rows();
    Ok(rows
        .into_iter()
        .filter_map(|row| row.get("Target").and_then(Term::as_text).map(str::to_string))
        .collect())
}
