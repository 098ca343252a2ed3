//! In-memory logic engine
//!
//! A small backtracking solver over a clause database and a perspective's
//! links. It implements the subset of the runtime's dialect that Flux
//! programs rely on:
//!
//! - control: `,`, `true`, `fail`, `\+`, `=`, `\=`, `findall/3`
//! - database: `assertz/1`, `retract/1`, consulted programs
//! - arithmetic: `length/2`, `>=`, `=<`, `>`, `<` over integers
//! - graph: `triple/3`, `link/5` (timestamps as epoch milliseconds)
//!
//! Solutions are collected eagerly. Calling an undefined procedure fails with
//! an `existence_error`, the same text the runtime reports for a subject
//! class whose schema has not been loaded.

mod parser;
mod solver;

pub use parser::{parse_program, parse_query};
pub use solver::Engine;

use thiserror::Error;

/// Engine failures, rendered the way the runtime reports them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The program text could not be read.
    #[error("syntax_error({message})")]
    Syntax {
        /// Reader diagnostic
        message: String,
    },

    /// An undefined procedure was called.
    #[error("error(existence_error(procedure, {name}/{arity}), {name}/{arity})")]
    Existence {
        /// Procedure name
        name: String,
        /// Procedure arity
        arity: usize,
    },

    /// A goal or arithmetic argument was unbound.
    #[error("error(instantiation_error, {context})")]
    Instantiation {
        /// Where it happened
        context: String,
    },

    /// A value of the wrong type was supplied.
    #[error("error(type_error({expected}, {found}), _)")]
    Type {
        /// Expected type
        expected: String,
        /// Rendering of the supplied value
        found: String,
    },

    /// Resolution went deeper than the engine allows.
    #[error("error(resource_error(depth), _)")]
    DepthExceeded,
}

impl EngineError {
    fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }
}
