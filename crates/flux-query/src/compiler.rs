//! Entry Query Compiler
//!
//! Turns a property map (`name -> predicate`) into a pair of rules plus a
//! query goal:
//!
//! ```text
//! entry_query_<scope>(Source, Type, Id, Timestamp, Author, Body) :-
//!     link(Source, Type, Id, Timestamp, Author),
//!     findall((Body, BodyTimestamp, BodyAuthor),
//!             link(Id, "flux://body", Body, BodyTimestamp, BodyAuthor), Body).
//! entry_<scope>(Source, Id, Timestamp, Author, Body) :-
//!     entry_query_<scope>(Source, "flux://has_message", Id, Timestamp, Author, Body).
//! ```
//!
//! Rule names carry a per-compilation scope suffix so that concurrent queries
//! against the same perspective never observe each other's clauses.
//!
//! Time bounds are compared against `Timestamp` right after the entry link
//! is matched, before any property is collected. The runtime compares
//! epoch milliseconds.

use chrono::{DateTime, Utc};
use flux_core::Term;
use std::collections::HashSet;
use uuid::Uuid;

use crate::program::{self, findall_goal, link_goal, Rule};

const SOURCE: &str = "Source";
const TYPE: &str = "Type";
const ID: &str = "Id";
const TIMESTAMP: &str = "Timestamp";
const AUTHOR: &str = "Author";
const RESERVED: [&str; 5] = [SOURCE, TYPE, ID, TIMESTAMP, AUTHOR];

/// One property column of an entry query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySelector {
    /// Name the decoded column is reported under
    pub name: String,
    /// Link predicate whose targets make up the column
    pub predicate: String,
}

/// Declarative description of an entry lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryQuery {
    /// Parent anchor; unbound when `None`
    pub source: Option<String>,
    /// Entry base id; unbound when `None`
    pub id: Option<String>,
    /// Predicate linking the parent to the entry
    pub entry_type: String,
    /// Property columns, in output order
    pub properties: Vec<PropertySelector>,
    /// Only entries linked at or before this time
    pub until: Option<DateTime<Utc>>,
    /// Only entries linked at or after this time
    pub since: Option<DateTime<Utc>>,
}

impl EntryQuery {
    /// Query entries reached through `entry_type`.
    pub fn new(entry_type: impl Into<String>) -> Self {
        Self {
            source: None,
            id: None,
            entry_type: entry_type.into(),
            properties: Vec::new(),
            until: None,
            since: None,
        }
    }

    /// Drop entries linked after `until` (millisecond resolution).
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Drop entries linked before `since` (millisecond resolution).
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Fix the parent anchor.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Fix the entry id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a property column.
    pub fn property(mut self, name: impl Into<String>, predicate: impl Into<String>) -> Self {
        self.properties.push(PropertySelector {
            name: name.into(),
            predicate: predicate.into(),
        });
        self
    }

    /// Compile under a fresh scope.
    pub fn compile(&self) -> CompiledQuery {
        self.compile_scoped(&new_scope())
    }

    /// Compile under an explicit scope suffix.
    pub fn compile_scoped(&self, scope: &str) -> CompiledQuery {
        let columns: Vec<PropertyColumn> = self
            .properties
            .iter()
            .zip(column_variables(&self.properties))
            .map(|(selector, variable)| PropertyColumn {
                name: selector.name.clone(),
                variable,
            })
            .collect();

        let query_name = format!("entry_query_{scope}");
        let entry_name = format!("entry_{scope}");

        let mut inner_head = vec![
            Term::var(SOURCE),
            Term::var(TYPE),
            Term::var(ID),
            Term::var(TIMESTAMP),
            Term::var(AUTHOR),
        ];
        let mut inner_body = vec![link_goal(
            Term::var(SOURCE),
            Term::var(TYPE),
            Term::var(ID),
            Term::var(TIMESTAMP),
            Term::var(AUTHOR),
        )];
        if let Some(since) = self.since {
            inner_body.push(Term::compound(
                ">=",
                vec![Term::var(TIMESTAMP), Term::Int(since.timestamp_millis())],
            ));
        }
        if let Some(until) = self.until {
            inner_body.push(Term::compound(
                "=<",
                vec![Term::var(TIMESTAMP), Term::Int(until.timestamp_millis())],
            ));
        }
        for (selector, column) in self.properties.iter().zip(&columns) {
            inner_head.push(Term::var(&column.variable));
            inner_body.push(find_all(&column.variable, &selector.predicate));
        }

        let mut outer_head = vec![
            Term::var(SOURCE),
            Term::var(ID),
            Term::var(TIMESTAMP),
            Term::var(AUTHOR),
        ];
        let mut outer_call = vec![
            Term::var(SOURCE),
            Term::str(&self.entry_type),
            Term::var(ID),
            Term::var(TIMESTAMP),
            Term::var(AUTHOR),
        ];
        for column in &columns {
            outer_head.push(Term::var(&column.variable));
            outer_call.push(Term::var(&column.variable));
        }

        let rules = vec![
            Rule::new(Term::compound(&query_name, inner_head), inner_body),
            Rule::new(
                Term::compound(&entry_name, outer_head),
                vec![Term::compound(&query_name, outer_call)],
            ),
        ];

        let mut goal_args = vec![
            self.source.as_ref().map_or_else(|| Term::var(SOURCE), Term::str),
            self.id.as_ref().map_or_else(|| Term::var(ID), Term::str),
            Term::var(TIMESTAMP),
            Term::var(AUTHOR),
        ];
        goal_args.extend(columns.iter().map(|column| Term::var(&column.variable)));

        CompiledQuery {
            scope: scope.to_string(),
            rules,
            goal: Term::compound(entry_name, goal_args),
            source: self.source.clone(),
            id: self.id.clone(),
            columns,
        }
    }
}

/// A property column and the logic variable that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyColumn {
    /// Property name
    pub name: String,
    /// Head variable bound to the property's value list
    pub variable: String,
}

/// Output of [`EntryQuery::compile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    /// Scope suffix shared by every rule name
    pub scope: String,
    /// Rules to assert before querying and retract afterwards
    pub rules: Vec<Rule>,
    /// Query goal
    pub goal: Term,
    /// Fixed source, if any
    pub source: Option<String>,
    /// Fixed id, if any
    pub id: Option<String>,
    /// Property columns in head order
    pub columns: Vec<PropertyColumn>,
}

impl CompiledQuery {
    /// `assertz` programs, one per rule.
    pub fn assertions(&self) -> Vec<String> {
        self.rules.iter().map(program::assertz).collect()
    }

    /// `retract` programs, one per rule.
    pub fn retractions(&self) -> Vec<String> {
        self.rules.iter().map(program::retract).collect()
    }

    /// The query text.
    pub fn query_text(&self) -> String {
        program::query(std::slice::from_ref(&self.goal))
    }
}

/// Fresh scope suffix for rule names.
pub fn new_scope() -> String {
    Uuid::new_v4().simple().to_string()
}

fn find_all(variable: &str, predicate: &str) -> Term {
    let [timestamp, author] = helper_variables(variable);
    findall_goal(
        Term::tuple(vec![
            Term::var(variable),
            Term::var(&timestamp),
            Term::var(&author),
        ]),
        link_goal(
            Term::var(ID),
            Term::str(predicate),
            Term::var(variable),
            Term::var(&timestamp),
            Term::var(&author),
        ),
        Term::var(variable),
    )
}

/// Per-value timestamp and author variables of a column.
fn helper_variables(variable: &str) -> [String; 2] {
    [format!("{variable}Timestamp"), format!("{variable}Author")]
}

/// One variable per column. Names that map to a variable already in use,
/// directly or as another column's helper, get a numeric suffix.
fn column_variables(selectors: &[PropertySelector]) -> Vec<String> {
    let mut taken: HashSet<String> = RESERVED.iter().map(|name| name.to_string()).collect();
    selectors
        .iter()
        .map(|selector| {
            let base = property_variable(&selector.name);
            let mut variable = base.clone();
            let mut suffix = 2;
            while taken.contains(&variable)
                || helper_variables(&variable).iter().any(|helper| taken.contains(helper))
            {
                variable = format!("{base}_{suffix}");
                suffix += 1;
            }
            taken.extend(helper_variables(&variable));
            taken.insert(variable.clone());
            variable
        })
        .collect()
}

/// Logic variable for a property name: first letter upper-cased, anything
/// outside `[A-Za-z0-9_]` replaced by `_`.
pub fn property_variable(name: &str) -> String {
    let mut chars = name.chars().map(|c| {
        if c.is_ascii_alphanumeric() || c == '_' {
            c
        } else {
            '_'
        }
    });
    let variable = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            first.to_ascii_uppercase().to_string() + &chars.collect::<String>()
        }
        Some(first) => format!("P{first}{}", chars.collect::<String>()),
        None => "P".to_string(),
    };
    if RESERVED.contains(&variable.as_str()) {
        format!("{variable}Value")
    } else {
        variable
    }
}
