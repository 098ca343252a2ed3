//! Logic terms
//!
//! Results of `LinkAdapter::run_graph_query` come back as terms of the
//! runtime's logic dialect. Lists are head/tail pairs terminated by `Nil`,
//! tuples `(A, B, C)` are right-nested `','/2` compounds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A term of the query dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// Double-quoted string
    Str(String),
    /// Bare or single-quoted atom
    Atom(String),
    /// Integer
    Int(i64),
    /// Unbound variable
    Var(String),
    /// `functor(args...)`
    Compound {
        /// Name of the functor
        functor: String,
        /// Arguments
        args: Vec<Term>,
    },
    /// List cell `[head | tail]`
    Cons {
        /// First element
        head: Box<Term>,
        /// Remainder of the list
        tail: Box<Term>,
    },
    /// Empty list `[]`
    Nil,
}

impl Term {
    /// String term.
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    /// Atom term.
    pub fn atom(value: impl Into<String>) -> Self {
        Self::Atom(value.into())
    }

    /// Variable term.
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    /// Compound term.
    pub fn compound(functor: impl Into<String>, args: Vec<Term>) -> Self {
        Self::Compound {
            functor: functor.into(),
            args,
        }
    }

    /// Proper list from items.
    pub fn list(items: Vec<Term>) -> Self {
        items.into_iter().rev().fold(Self::Nil, |tail, head| Self::Cons {
            head: Box::new(head),
            tail: Box::new(tail),
        })
    }

    /// Tuple `(a, b, c)` as right-nested `','/2`. A one-element tuple is the element itself.
    pub fn tuple(mut items: Vec<Term>) -> Self {
        let Some(mut acc) = items.pop() else {
            return Self::Nil;
        };
        while let Some(item) = items.pop() {
            acc = Self::compound(",", vec![item, acc]);
        }
        acc
    }

    /// Text content of a string or atom.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Atom(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// `[]` in either spelling.
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil) || matches!(self, Self::Atom(a) if a == "[]")
    }

    /// Whether this is an unbound variable.
    pub fn is_var(&self) -> bool {
        matches!(self, Self::Var(_))
    }

    /// Split a `','/2` tuple back into its elements.
    pub fn tuple_items(&self) -> Vec<&Term> {
        let mut items = Vec::new();
        let mut current = self;
        while let Self::Compound { functor, args } = current {
            if functor != "," || args.len() != 2 {
                break;
            }
            items.push(&args[0]);
            current = &args[1];
        }
        items.push(current);
        items
    }
}

/// One solution: query variable name → bound value.
pub type BindingRow = BTreeMap<String, Term>;

/// Result of a graph query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// No solution
    False,
    /// At least one solution, no named variables
    True,
    /// Solutions with their variable bindings
    Bindings(Vec<BindingRow>),
}

impl QueryOutcome {
    /// Whether the query had any solution.
    pub fn is_match(&self) -> bool {
        match self {
            Self::False => false,
            Self::True => true,
            Self::Bindings(rows) => !rows.is_empty(),
        }
    }

    /// The binding rows; sentinels map to no rows.
    pub fn into_rows(self) -> Vec<BindingRow> {
        match self {
            Self::Bindings(rows) => rows,
            Self::False | Self::True => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_builds_cons_cells() {
        let list = Term::list(vec![Term::Int(1), Term::Int(2)]);
        match list {
            Term::Cons { head, tail } => {
                assert_eq!(*head, Term::Int(1));
                assert!(matches!(*tail, Term::Cons { .. }));
            }
            _ => panic!("Expected cons cell"),
        }
    }

    #[test]
    fn test_tuple_round_trips_through_items() {
        let tuple = Term::tuple(vec![Term::str("a"), Term::Int(2), Term::str("c")]);
        let items = tuple.tuple_items();
        assert_eq!(items, vec![&Term::str("a"), &Term::Int(2), &Term::str("c")]);
    }

    #[test]
    fn test_empty_bindings_are_no_match() {
        assert!(!QueryOutcome::Bindings(vec![]).is_match());
        assert!(QueryOutcome::True.is_match());
        assert!(QueryOutcome::True.into_rows().is_empty());
    }
}
