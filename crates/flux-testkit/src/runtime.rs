//! In-memory link runtime
//!
//! `MemoryRuntime` implements every runtime boundary trait over plain
//! in-process state: a link list and a logic [`Engine`] per perspective.
//! Link events are delivered synchronously to subscribers after the state
//! lock is released, in mutation order.
//!
//! Tests can inject links authored by other agents ([`MemoryRuntime::inject_link`]),
//! emit events without touching the store ([`MemoryRuntime::emit`]), and make
//! selected operations fail ([`MemoryRuntime::fail_when`]).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flux_core::{
    AdapterError, Agent, AgentClient, GuardedListener, Link, LinkAdapter, LinkEvent,
    LinkExpression, LinkListener, LinkQuery, PerspectiveClient, PerspectiveId, PerspectiveInfo,
    QueryOutcome, Subscription,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use crate::engine::Engine;

/// An operation about to be applied, offered to the failure hook.
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    /// `add_link`
    AddLink(&'a Link),
    /// One link of a `remove_links` batch
    RemoveLink(&'a LinkExpression),
    /// `run_graph_query`
    Query(&'a str),
    /// `add_sdna`
    AddSdna(&'a str),
}

type FailureHook = Arc<dyn Fn(&Operation<'_>) -> Option<AdapterError> + Send + Sync>;

struct PerspectiveState {
    info: PerspectiveInfo,
    links: Vec<LinkExpression>,
    engine: Engine,
    listeners: Vec<Arc<GuardedListener>>,
}

impl PerspectiveState {
    fn new(info: PerspectiveInfo) -> Self {
        Self {
            info,
            links: Vec::new(),
            engine: Engine::new(),
            listeners: Vec::new(),
        }
    }
}

struct State {
    perspectives: IndexMap<PerspectiveId, PerspectiveState>,
    agents: IndexMap<String, Agent>,
    last_timestamp: Option<DateTime<Utc>>,
    failure: Option<FailureHook>,
}

/// Published neighbourhoods by URL, shared between peers.
type Network = Arc<Mutex<IndexMap<String, (Weak<Mutex<State>>, PerspectiveId)>>>;

/// In-memory implementation of the runtime boundary.
#[derive(Clone)]
pub struct MemoryRuntime {
    me: Agent,
    state: Arc<Mutex<State>>,
    network: Network,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new("did:key:local")
    }
}

impl MemoryRuntime {
    /// Runtime whose local agent is `did`.
    pub fn new(did: impl Into<String>) -> Self {
        let me = Agent {
            did: did.into(),
            name: None,
        };
        let mut agents = IndexMap::new();
        agents.insert(me.did.clone(), me.clone());
        Self {
            me,
            state: Arc::new(Mutex::new(State {
                perspectives: IndexMap::new(),
                agents,
                last_timestamp: None,
                failure: None,
            })),
            network: Network::default(),
        }
    }

    /// Another agent's runtime that can join neighbourhoods published here,
    /// and publish ones this runtime can join.
    pub fn peer(&self, did: impl Into<String>) -> Self {
        Self {
            network: self.network.clone(),
            ..Self::new(did)
        }
    }

    /// The local agent's DID.
    pub fn did(&self) -> &str {
        &self.me.did
    }

    /// Create a private perspective.
    pub fn create_perspective(&self, name: &str) -> PerspectiveId {
        let id = PerspectiveId::new(Uuid::new_v4().to_string());
        let info = PerspectiveInfo {
            uuid: id.clone(),
            name: name.to_string(),
            shared_url: None,
            neighbourhood_meta: Vec::new(),
        };
        self.state
            .lock()
            .perspectives
            .insert(id.clone(), PerspectiveState::new(info));
        id
    }

    /// Drop a perspective with its links and listeners.
    pub fn remove_perspective(&self, perspective: &PerspectiveId) -> bool {
        self.state
            .lock()
            .perspectives
            .shift_remove(perspective)
            .is_some()
    }

    /// Mark a perspective as shared under `url` with the given meta links.
    pub fn share(&self, perspective: &PerspectiveId, url: &str, meta: Vec<LinkExpression>) {
        if let Some(state) = self.state.lock().perspectives.get_mut(perspective) {
            state.info.shared_url = Some(url.to_string());
            state.info.neighbourhood_meta = meta;
        }
    }

    /// Make another agent known to `by_did`.
    pub fn register_agent(&self, agent: Agent) {
        self.state.lock().agents.insert(agent.did.clone(), agent);
    }

    /// Fail operations for which `hook` returns an error.
    pub fn fail_when(
        &self,
        hook: impl Fn(&Operation<'_>) -> Option<AdapterError> + Send + Sync + 'static,
    ) {
        self.state.lock().failure = Some(Arc::new(hook));
    }

    /// Remove the failure hook.
    pub fn clear_failures(&self) {
        self.state.lock().failure = None;
    }

    /// Store a link exactly as given (any author, any timestamp) and notify
    /// subscribers.
    pub fn inject_link(&self, perspective: &PerspectiveId, link: LinkExpression) {
        let listeners = {
            let mut state = self.state.lock();
            let Some(p) = state.perspectives.get_mut(perspective) else {
                return;
            };
            p.links.push(link.clone());
            p.listeners.clone()
        };
        dispatch(&listeners, &LinkEvent::Added(link));
    }

    /// Deliver an event to subscribers without changing the store.
    pub fn emit(&self, perspective: &PerspectiveId, event: LinkEvent) {
        let listeners = self
            .state
            .lock()
            .perspectives
            .get(perspective)
            .map(|p| p.listeners.clone())
            .unwrap_or_default();
        dispatch(&listeners, &event);
    }

    /// Snapshot of a perspective's links.
    pub fn links(&self, perspective: &PerspectiveId) -> Vec<LinkExpression> {
        self.state
            .lock()
            .perspectives
            .get(perspective)
            .map(|p| p.links.clone())
            .unwrap_or_default()
    }

    /// Clauses currently defined for procedures whose name starts with `prefix`.
    pub fn rule_count(&self, perspective: &PerspectiveId, prefix: &str) -> usize {
        self.state
            .lock()
            .perspectives
            .get(perspective)
            .map_or(0, |p| p.engine.clauses_with_prefix(prefix))
    }

    /// Number of live subscribers on a perspective.
    pub fn subscriber_count(&self, perspective: &PerspectiveId) -> usize {
        self.state
            .lock()
            .perspectives
            .get(perspective)
            .map_or(0, |p| p.listeners.iter().filter(|l| l.is_active()).count())
    }

    fn check(&self, state: &State, operation: Operation<'_>) -> Result<(), AdapterError> {
        match state.failure.as_ref().and_then(|hook| hook(&operation)) {
            Some(err) => {
                tracing::debug!(?operation, error = %err, "injected runtime failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn next_timestamp(state: &mut State) -> DateTime<Utc> {
        let now = Utc::now();
        let timestamp = match state.last_timestamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        state.last_timestamp = Some(timestamp);
        timestamp
    }
}

fn dispatch(listeners: &[Arc<GuardedListener>], event: &LinkEvent) {
    for listener in listeners {
        listener.dispatch(event);
    }
}

fn missing(perspective: &PerspectiveId) -> AdapterError {
    AdapterError::perspective_not_found(perspective.clone())
}

#[async_trait]
impl LinkAdapter for MemoryRuntime {
    async fn add_link(
        &self,
        perspective: &PerspectiveId,
        link: Link,
    ) -> Result<LinkExpression, AdapterError> {
        let (expression, listeners) = {
            let mut state = self.state.lock();
            self.check(&state, Operation::AddLink(&link))?;
            if !state.perspectives.contains_key(perspective) {
                return Err(missing(perspective));
            }
            let timestamp = Self::next_timestamp(&mut state);
            let expression = LinkExpression::new(self.me.did.clone(), timestamp, link);
            let p = state
                .perspectives
                .get_mut(perspective)
                .ok_or_else(|| missing(perspective))?;
            p.links.push(expression.clone());
            (expression, p.listeners.clone())
        };
        dispatch(&listeners, &LinkEvent::Added(expression.clone()));
        Ok(expression)
    }

    async fn query_links(
        &self,
        perspective: &PerspectiveId,
        query: &LinkQuery,
    ) -> Result<Vec<LinkExpression>, AdapterError> {
        let state = self.state.lock();
        let p = state
            .perspectives
            .get(perspective)
            .ok_or_else(|| missing(perspective))?;
        let matching = p.links.iter().filter(|link| query.matches(link)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn remove_links(
        &self,
        perspective: &PerspectiveId,
        links: &[LinkExpression],
    ) -> Result<(), AdapterError> {
        let mut removed = Vec::new();
        let mut failed = Vec::new();
        let listeners = {
            let mut state = self.state.lock();
            if !state.perspectives.contains_key(perspective) {
                return Err(missing(perspective));
            }
            for link in links {
                if let Err(err) = self.check(&state, Operation::RemoveLink(link)) {
                    failed.push((link.clone(), err.to_string()));
                    continue;
                }
                let p = state
                    .perspectives
                    .get_mut(perspective)
                    .ok_or_else(|| missing(perspective))?;
                match p.links.iter().position(|stored| stored.same_occurrence(link)) {
                    Some(index) => removed.push(p.links.remove(index)),
                    None => failed.push((link.clone(), "link not found".to_string())),
                }
            }
            state
                .perspectives
                .get(perspective)
                .map(|p| p.listeners.clone())
                .unwrap_or_default()
        };
        for link in &removed {
            dispatch(&listeners, &LinkEvent::Removed(link.clone()));
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(AdapterError::PartialRemoval { removed, failed })
        }
    }

    async fn run_graph_query(
        &self,
        perspective: &PerspectiveId,
        program: &str,
    ) -> Result<QueryOutcome, AdapterError> {
        let mut state = self.state.lock();
        self.check(&state, Operation::Query(program))?;
        let p = state
            .perspectives
            .get_mut(perspective)
            .ok_or_else(|| missing(perspective))?;
        p.engine
            .query(program, &p.links)
            .map_err(|err| AdapterError::execution(err.to_string()))
    }

    async fn add_sdna(
        &self,
        perspective: &PerspectiveId,
        class_name: &str,
        sdna: &str,
    ) -> Result<(), AdapterError> {
        let listeners = {
            let mut state = self.state.lock();
            self.check(&state, Operation::AddSdna(class_name))?;
            let timestamp = Self::next_timestamp(&mut state);
            let p = state
                .perspectives
                .get_mut(perspective)
                .ok_or_else(|| missing(perspective))?;
            let clauses = p
                .engine
                .consult(sdna)
                .map_err(|err| AdapterError::execution(err.to_string()))?;
            tracing::debug!(%perspective, class_name, clauses, "schema program loaded");
            let marker = LinkExpression::new(
                self.me.did.clone(),
                timestamp,
                Link::new(
                    flux_core::predicates::SELF,
                    flux_core::predicates::HAS_SDNA,
                    flux_core::Literal::from_string(class_name).to_url(),
                ),
            );
            p.links.push(marker.clone());
            (p.listeners.clone(), marker)
        };
        dispatch(&listeners.0, &LinkEvent::Added(listeners.1));
        Ok(())
    }

    async fn subscribe_links(
        &self,
        perspective: &PerspectiveId,
        listener: Arc<dyn LinkListener>,
    ) -> Result<Subscription, AdapterError> {
        let (guarded, subscription) = GuardedListener::new(perspective.clone(), listener);
        let mut state = self.state.lock();
        let p = state
            .perspectives
            .get_mut(perspective)
            .ok_or_else(|| missing(perspective))?;
        p.listeners.retain(|l| l.is_active());
        p.listeners.push(guarded);
        Ok(subscription)
    }
}

#[async_trait]
impl AgentClient for MemoryRuntime {
    async fn me(&self) -> Result<Agent, AdapterError> {
        Ok(self.me.clone())
    }

    async fn by_did(&self, did: &str) -> Result<Option<Agent>, AdapterError> {
        Ok(self.state.lock().agents.get(did).cloned())
    }
}

#[async_trait]
impl PerspectiveClient for MemoryRuntime {
    async fn all(&self) -> Result<Vec<PerspectiveInfo>, AdapterError> {
        Ok(self
            .state
            .lock()
            .perspectives
            .values()
            .map(|p| p.info.clone())
            .collect())
    }

    async fn by_uuid(&self, uuid: &PerspectiveId) -> Result<Option<PerspectiveInfo>, AdapterError> {
        Ok(self
            .state
            .lock()
            .perspectives
            .get(uuid)
            .map(|p| p.info.clone()))
    }

    async fn add(&self, name: &str) -> Result<PerspectiveInfo, AdapterError> {
        let id = self.create_perspective(name);
        self.by_uuid(&id).await?.ok_or_else(|| missing(&id))
    }

    async fn publish(&self, perspective: &PerspectiveId, meta: Vec<Link>) -> Result<String, AdapterError> {
        let url = format!("neighbourhood://{}", Uuid::new_v4().simple());
        {
            let mut state = self.state.lock();
            let timestamp = Self::next_timestamp(&mut state);
            let p = state
                .perspectives
                .get_mut(perspective)
                .ok_or_else(|| missing(perspective))?;
            p.info.shared_url = Some(url.clone());
            p.info.neighbourhood_meta = meta
                .into_iter()
                .map(|link| LinkExpression::new(self.me.did.clone(), timestamp, link))
                .collect();
        }
        self.network
            .lock()
            .insert(url.clone(), (Arc::downgrade(&self.state), perspective.clone()));
        Ok(url)
    }

    /// The joined perspective starts as a copy of the published one, as if
    /// the neighbourhood had already synced.
    async fn join(&self, url: &str) -> Result<PerspectiveInfo, AdapterError> {
        let unknown = || AdapterError::execution(format!("no neighbourhood at {url}"));
        let (publisher, origin) = self.network.lock().get(url).cloned().ok_or_else(unknown)?;
        let publisher = publisher.upgrade().ok_or_else(unknown)?;
        let joined = {
            let publisher = publisher.lock();
            let p = publisher
                .perspectives
                .get(&origin)
                .ok_or_else(|| missing(&origin))?;
            let mut joined = PerspectiveState::new(PerspectiveInfo {
                uuid: PerspectiveId::new(Uuid::new_v4().to_string()),
                name: p.info.name.clone(),
                shared_url: Some(url.to_string()),
                neighbourhood_meta: p.info.neighbourhood_meta.clone(),
            });
            joined.links = p.links.clone();
            joined.engine = p.engine.clone();
            joined
        };
        let info = joined.info.clone();
        self.state.lock().perspectives.insert(info.uuid.clone(), joined);
        tracing::debug!(url, perspective = %info.uuid, "joined neighbourhood");
        Ok(info)
    }
}
