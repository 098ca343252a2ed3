//! Flux Core - Link Primitives and Runtime Boundary
//!
//! This crate holds the vocabulary shared by every Flux layer:
//!
//! - `Link` / `LinkExpression` / `LinkQuery`: the authored, timestamped triple
//!   that encodes every entity property and membership
//! - `Literal`: inline scalar values addressable as link targets
//! - `Term` / `QueryOutcome`: the wire shape of logic-engine results
//! - `LinkAdapter`: the async boundary to the external agent/perspective runtime
//! - `FluxConfig`: layered configuration for repositories and the reconciler
//!
//! # Architecture
//!
//! This is the leaf crate of the workspace. It performs no I/O itself; all
//! runtime access goes through the traits in [`adapter`], which the
//! application supplies (or `flux-testkit` provides in memory).
//!
//! ```text
//! flux-subject ─┐
//! flux-sync ────┼─> flux-query ─> flux-core (LinkAdapter) ─> external runtime
//! ```

#![forbid(unsafe_code)]

pub mod adapter;
pub mod config;
pub mod error;
pub mod link;
pub mod literal;
pub mod predicates;
pub mod term;

pub use adapter::{
    Agent, AgentClient, GuardedListener, LinkAdapter, LinkEvent, LinkListener, PerspectiveClient,
    PerspectiveInfo, Subscription,
};
pub use config::{FluxConfig, LayeredConfig, QueryConfig, ReconcilerConfig, RepositoryConfig};
pub use error::{AdapterError, ConfigError};
pub use link::{Link, LinkExpression, LinkQuery, PerspectiveId};
pub use literal::{Literal, LiteralError};
pub use term::{BindingRow, QueryOutcome, Term};
