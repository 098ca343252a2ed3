//! Flux Testing Infrastructure
//!
//! An in-memory runtime that stands in for the external agent/perspective
//! service, plus the logic engine that backs its graph queries.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! flux-testkit = { path = "../flux-testkit" }
//! ```
//!
//! ```rust,no_run
//! use flux_testkit::MemoryRuntime;
//!
//! let runtime = MemoryRuntime::default();
//! let perspective = runtime.create_perspective("community");
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod engine;
pub mod runtime;

pub use engine::{Engine, EngineError};
pub use runtime::{MemoryRuntime, Operation};

/// Install a `tracing` subscriber for test output, once per process.
///
/// Honours `RUST_LOG`; defaults to `warn`.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
