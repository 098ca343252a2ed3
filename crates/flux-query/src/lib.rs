//! Flux Query - Declarative Graph Queries
//!
//! Compiles subject property maps into logic programs for the runtime's
//! engine, runs them with scoped rule lifetimes, and decodes the bindings.
//!
//! - [`program`]: term formatting and clause builders
//! - [`compiler`]: `EntryQuery` to scoped rules plus a query goal
//! - [`executor`]: assert, query, decode, retract
//! - [`decode`]: bindings to typed [`EntryRow`]s
//! - [`graph`]: fixed helper queries (`triple/3`, `isPopular/1`)

#![forbid(unsafe_code)]

pub mod compiler;
pub mod decode;
pub mod error;
pub mod executor;
pub mod graph;
pub mod program;

pub use compiler::{CompiledQuery, EntryQuery, PropertyColumn, PropertySelector};
pub use decode::{EntryRow, EntryValue, PropertyValues};
pub use error::{DecodeError, QueryError};
pub use executor::{query_entries, run_query, run_scoped, QueryPhase};
pub use program::Rule;
