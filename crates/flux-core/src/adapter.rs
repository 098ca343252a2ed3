//! Runtime Boundary Traits
//!
//! The agent/perspective runtime is an external collaborator. Flux only issues
//! typed requests through these traits and decodes typed responses.
//!
//! # Subscriptions
//!
//! `LinkAdapter::subscribe_links` registers a [`LinkListener`]. Implementations
//! must wrap it in a [`GuardedListener`] and deliver every event through
//! [`GuardedListener::dispatch`]; the returned [`Subscription`] then guarantees
//! that once `unsubscribe()` (or drop) returns, no callback is running and none
//! will start, including events already received from the transport.
//!
//! Callbacks run on the dispatching task and must not block or unsubscribe
//! re-entrantly.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AdapterError;
use crate::link::{Link, LinkExpression, LinkQuery, PerspectiveId};
use crate::term::QueryOutcome;

/// An event on a perspective's link stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkEvent {
    /// A link was added
    Added(LinkExpression),
    /// A link was removed
    Removed(LinkExpression),
}

impl LinkEvent {
    /// The link the event is about.
    pub fn link(&self) -> &LinkExpression {
        match self {
            Self::Added(link) | Self::Removed(link) => link,
        }
    }
}

/// Receiver of link-stream callbacks.
pub trait LinkListener: Send + Sync {
    /// A link was added to the perspective.
    fn on_added(&self, link: &LinkExpression);

    /// A link was removed from the perspective.
    fn on_removed(&self, link: &LinkExpression);
}

/// Listener wrapper that enforces the unsubscribe contract.
pub struct GuardedListener {
    inner: Arc<dyn LinkListener>,
    active: Arc<RwLock<bool>>,
}

impl GuardedListener {
    /// Wrap a listener, returning the dispatch side and the caller's handle.
    pub fn new(
        perspective: PerspectiveId,
        inner: Arc<dyn LinkListener>,
    ) -> (Arc<GuardedListener>, Subscription) {
        let active = Arc::new(RwLock::new(true));
        let guarded = Arc::new(GuardedListener {
            inner,
            active: active.clone(),
        });
        let subscription = Subscription {
            perspective,
            active,
            on_close: None,
        };
        (guarded, subscription)
    }

    /// Deliver an event. Returns `false` (and does nothing) once unsubscribed.
    ///
    /// The read guard is held across the callback so that `unsubscribe` waits
    /// for an in-progress callback to finish.
    pub fn dispatch(&self, event: &LinkEvent) -> bool {
        let active = self.active.read();
        if !*active {
            return false;
        }
        match event {
            LinkEvent::Added(link) => self.inner.on_added(link),
            LinkEvent::Removed(link) => self.inner.on_removed(link),
        }
        true
    }

    /// Whether the owning subscription is still live.
    pub fn is_active(&self) -> bool {
        *self.active.read()
    }
}

/// Handle to a live link subscription. Dropping it unsubscribes.
pub struct Subscription {
    perspective: PerspectiveId,
    active: Arc<RwLock<bool>>,
    on_close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Register transport cleanup to run after the listener is deactivated.
    pub fn with_on_close(mut self, on_close: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(on_close));
        self
    }

    /// Perspective this subscription observes.
    pub fn perspective(&self) -> &PerspectiveId {
        &self.perspective
    }

    /// Whether callbacks may still be invoked.
    pub fn is_active(&self) -> bool {
        *self.active.read()
    }

    /// Stop all further callback invocation.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn close(&mut self) {
        let was_active = {
            let mut active = self.active.write();
            std::mem::replace(&mut *active, false)
        };
        if was_active {
            tracing::info!(perspective = %self.perspective, "link subscription closed");
        }
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("perspective", &self.perspective)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Link-level access to the external runtime.
///
/// All methods are suspension points. Implementations provide their own
/// concurrency control over the underlying graph; callers never lock around
/// them.
#[async_trait]
pub trait LinkAdapter: Send + Sync {
    /// Add a link authored by the local agent.
    ///
    /// # Errors
    ///
    /// - `AdapterError::RuntimeUnavailable` if the runtime cannot be reached
    /// - `AdapterError::PerspectiveNotFound` if the perspective is unknown
    async fn add_link(
        &self,
        perspective: &PerspectiveId,
        link: Link,
    ) -> Result<LinkExpression, AdapterError>;

    /// Links matching every provided filter, in runtime order.
    async fn query_links(
        &self,
        perspective: &PerspectiveId,
        query: &LinkQuery,
    ) -> Result<Vec<LinkExpression>, AdapterError>;

    /// Remove link occurrences, best effort.
    ///
    /// # Errors
    ///
    /// `AdapterError::PartialRemoval` when any link could not be removed; the
    /// links that were removed stay removed.
    async fn remove_links(
        &self,
        perspective: &PerspectiveId,
        links: &[LinkExpression],
    ) -> Result<(), AdapterError>;

    /// Run a program in the perspective's logic engine.
    ///
    /// No solution is `QueryOutcome::False`, not an error.
    async fn run_graph_query(
        &self,
        perspective: &PerspectiveId,
        program: &str,
    ) -> Result<QueryOutcome, AdapterError>;

    /// Load a subject-class schema program into the perspective.
    async fn add_sdna(
        &self,
        perspective: &PerspectiveId,
        class_name: &str,
        sdna: &str,
    ) -> Result<(), AdapterError>;

    /// Register a persistent listener for link events.
    async fn subscribe_links(
        &self,
        perspective: &PerspectiveId,
        listener: Arc<dyn LinkListener>,
    ) -> Result<Subscription, AdapterError>;
}

/// An agent identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Decentralised identifier
    pub did: String,
    /// Optional display name from the agent's public profile
    pub name: Option<String>,
}

/// Runtime-side description of a perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerspectiveInfo {
    /// Perspective UUID
    pub uuid: PerspectiveId,
    /// Local name
    pub name: String,
    /// Neighbourhood URL when the perspective is shared
    pub shared_url: Option<String>,
    /// Neighbourhood meta links (name, description, creator)
    pub neighbourhood_meta: Vec<LinkExpression>,
}

/// Agent identity lookups.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// The local agent.
    async fn me(&self) -> Result<Agent, AdapterError>;

    /// Another agent by DID.
    async fn by_did(&self, did: &str) -> Result<Option<Agent>, AdapterError>;
}

/// Perspective lifecycle.
#[async_trait]
pub trait PerspectiveClient: Send + Sync {
    /// Every perspective known to the runtime.
    async fn all(&self) -> Result<Vec<PerspectiveInfo>, AdapterError>;

    /// One perspective by UUID.
    async fn by_uuid(&self, uuid: &PerspectiveId) -> Result<Option<PerspectiveInfo>, AdapterError>;

    /// Create a new, private perspective.
    async fn add(&self, name: &str) -> Result<PerspectiveInfo, AdapterError>;

    /// Share a perspective as a neighbourhood. Returns the neighbourhood URL.
    async fn publish(&self, perspective: &PerspectiveId, meta: Vec<Link>) -> Result<String, AdapterError>;

    /// Join the neighbourhood at `url` into a new perspective.
    async fn join(&self, url: &str) -> Result<PerspectiveInfo, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl LinkListener for Recorder {
        fn on_added(&self, link: &LinkExpression) {
            self.seen.lock().push(format!("+{}", link.target()));
        }

        fn on_removed(&self, link: &LinkExpression) {
            self.seen.lock().push(format!("-{}", link.target()));
        }
    }

    fn event(target: &str) -> LinkEvent {
        LinkEvent::Added(LinkExpression::new(
            "did:key:alice",
            Utc::now(),
            Link::new("s", "p", target),
        ))
    }

    #[test]
    fn test_dispatch_until_unsubscribed() {
        let recorder = Arc::new(Recorder::default());
        let (guarded, subscription) = GuardedListener::new(PerspectiveId::new("p"), recorder.clone());

        assert!(guarded.dispatch(&event("one")));
        subscription.unsubscribe();
        assert!(!guarded.dispatch(&event("two")));
        assert!(!guarded.is_active());

        assert_eq!(*recorder.seen.lock(), vec!["+one".to_string()]);
    }

    #[test]
    fn test_drop_runs_on_close_once() {
        let closed = Arc::new(Mutex::new(0));
        let counter = closed.clone();
        let (_guarded, subscription) =
            GuardedListener::new(PerspectiveId::new("p"), Arc::new(Recorder::default()));
        let subscription = subscription.with_on_close(move || *counter.lock() += 1);
        drop(subscription);
        assert_eq!(*closed.lock(), 1);
    }
}
