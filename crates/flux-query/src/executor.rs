//! Scoped Query Execution
//!
//! Runs compiled programs through the adapter. The scoped path is a small
//! state machine:
//!
//! ```text
//! Idle -> AssertRules -> Querying -> Decoding -> RetractRules -> Done
//! ```
//!
//! `RetractRules` always runs for every rule that was successfully asserted,
//! whatever happened in the phases before it. A query error takes precedence
//! over a cleanup error; a cleanup error after a successful query is reported
//! as [`QueryError::Cleanup`].
//!
//! Dropping the future part way through still retracts: the rules not yet
//! retracted are handed to a task on the current tokio runtime.

use flux_core::{LinkAdapter, PerspectiveId, QueryOutcome};
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::compiler::EntryQuery;
use crate::decode::{decode_entries, EntryRow};
use crate::error::QueryError;
use crate::program::{self, Rule};

/// Phase of a scoped execution, reported in trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    /// Nothing sent yet
    Idle,
    /// Asserting scoped rules
    AssertRules,
    /// Running the query goal
    Querying,
    /// Decoding bindings
    Decoding,
    /// Retracting every asserted rule
    RetractRules,
    /// Finished
    Done,
}

/// Run a program with no scoped rules.
pub async fn run_query(
    adapter: &dyn LinkAdapter,
    perspective: &PerspectiveId,
    query: &str,
) -> Result<QueryOutcome, QueryError> {
    tracing::trace!(%perspective, query, "running graph query");
    Ok(adapter.run_graph_query(perspective, query).await?)
}

/// Retractions still owed for asserted rules, newest last.
struct Retractions {
    adapter: Arc<dyn LinkAdapter>,
    perspective: PerspectiveId,
    pending: Vec<String>,
}

impl Drop for Retractions {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(perspective = %self.perspective, rules = pending.len(), "scoped rules abandoned outside a runtime");
            return;
        };
        tracing::debug!(perspective = %self.perspective, rules = pending.len(), "scoped query dropped, retracting in background");
        let adapter = self.adapter.clone();
        let perspective = self.perspective.clone();
        runtime.spawn(async move {
            for text in pending.iter().rev() {
                if let Err(err) = adapter.run_graph_query(&perspective, text).await {
                    tracing::warn!(%perspective, error = %err, "failed to retract scoped rule");
                }
            }
        });
    }
}

/// Assert `rules`, run `query`, decode, and retract the rules again.
pub async fn run_scoped<T, F>(
    adapter: &Arc<dyn LinkAdapter>,
    perspective: &PerspectiveId,
    rules: &[Rule],
    query: &str,
    decode: F,
) -> Result<T, QueryError>
where
    F: FnOnce(QueryOutcome) -> Result<T, QueryError>,
{
    let mut phase = QueryPhase::Idle;
    let mut owed = Retractions {
        adapter: adapter.clone(),
        perspective: perspective.clone(),
        pending: Vec::with_capacity(rules.len()),
    };

    advance(&mut phase, QueryPhase::AssertRules, perspective);
    let mut result = Ok(());
    for rule in rules {
        // Owed before the await: a dropped assertion may still have landed.
        owed.pending.push(program::retract(rule));
        if let Err(err) = adapter.run_graph_query(perspective, &program::assertz(rule)).await {
            owed.pending.pop();
            result = Err(QueryError::from(err));
            break;
        }
    }

    let result = match result {
        Ok(()) => {
            advance(&mut phase, QueryPhase::Querying, perspective);
            match adapter.run_graph_query(perspective, query).await {
                Ok(outcome) => {
                    advance(&mut phase, QueryPhase::Decoding, perspective);
                    decode(outcome)
                }
                Err(err) => Err(QueryError::from(err)),
            }
        }
        Err(err) => Err(err),
    };

    advance(&mut phase, QueryPhase::RetractRules, perspective);
    let mut failed = Vec::new();
    while let Some(text) = owed.pending.last().cloned() {
        let retracted = adapter.run_graph_query(perspective, &text).await;
        owed.pending.pop();
        if let Err(err) = retracted {
            tracing::warn!(%perspective, error = %err, "failed to retract scoped rule");
            failed.push((text, err.to_string()));
        }
    }
    advance(&mut phase, QueryPhase::Done, perspective);

    match result {
        Ok(_) if !failed.is_empty() => Err(QueryError::Cleanup { failed }),
        other => other,
    }
}

/// Compile, run and decode an entry query.
pub async fn query_entries(
    adapter: &Arc<dyn LinkAdapter>,
    perspective: &PerspectiveId,
    query: &EntryQuery,
) -> Result<Vec<EntryRow>, QueryError> {
    let compiled = query.compile();
    run_scoped(
        adapter,
        perspective,
        &compiled.rules,
        &compiled.query_text(),
        |outcome| Ok(decode_entries(&compiled, outcome)?),
    )
    .await
}

fn advance(phase: &mut QueryPhase, next: QueryPhase, perspective: &PerspectiveId) {
    tracing::trace!(%perspective, from = ?*phase, to = ?next, "scoped query phase");
    *phase = next;
}
