//! Binding Decoder
//!
//! Normalises engine bindings into typed entry rows. Decoding is closed over
//! the shapes the compiler produces; anything else is a [`DecodeError`]
//! rather than a silently dropped value.

use chrono::{DateTime, TimeZone, Utc};
use flux_core::{BindingRow, QueryOutcome, Term};
use indexmap::IndexMap;

use crate::compiler::CompiledQuery;
use crate::error::DecodeError;

/// One `(content, timestamp, author)` triple from a property list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryValue {
    /// Link target
    pub content: String,
    /// When the link was created
    pub timestamp: DateTime<Utc>,
    /// Who created it
    pub author: String,
}

/// A decoded property column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValues {
    /// Values collected by `findall`, in engine order
    List(Vec<EntryValue>),
    /// A scalar that was not a list, passed through
    Scalar(Term),
}

impl PropertyValues {
    /// The collected values; a scalar yields none.
    pub fn values(&self) -> &[EntryValue] {
        match self {
            Self::List(values) => values,
            Self::Scalar(_) => &[],
        }
    }

    /// The most recent value by link timestamp.
    pub fn latest(&self) -> Option<&EntryValue> {
        self.values().iter().max_by_key(|value| value.timestamp)
    }
}

/// One decoded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRow {
    /// Entry base id
    pub id: String,
    /// Parent anchor
    pub source: String,
    /// Creation time of the typing link
    pub timestamp: DateTime<Utc>,
    /// Author of the typing link
    pub author: String,
    /// Property columns by name, in query order
    pub properties: IndexMap<String, PropertyValues>,
}

impl EntryRow {
    /// A property column by name.
    pub fn property(&self, name: &str) -> Option<&PropertyValues> {
        self.properties.get(name)
    }
}

/// Decode an outcome produced by running `compiled`.
///
/// `False` decodes to no rows. `True` cannot carry the head variables and is
/// rejected.
pub fn decode_entries(
    compiled: &CompiledQuery,
    outcome: QueryOutcome,
) -> Result<Vec<EntryRow>, DecodeError> {
    match outcome {
        QueryOutcome::False => Ok(Vec::new()),
        QueryOutcome::True => Err(DecodeError::MissingBinding {
            variable: "Timestamp".to_string(),
        }),
        QueryOutcome::Bindings(rows) => rows
            .iter()
            .map(|row| decode_row(compiled, row))
            .collect(),
    }
}

fn decode_row(compiled: &CompiledQuery, row: &BindingRow) -> Result<EntryRow, DecodeError> {
    let id = match &compiled.id {
        Some(id) => id.clone(),
        None => text_binding(row, "Id")?,
    };
    let source = match &compiled.source {
        Some(source) => source.clone(),
        None => text_binding(row, "Source")?,
    };
    let timestamp = decode_timestamp("Timestamp", binding(row, "Timestamp")?)?;
    let author = text_binding(row, "Author")?;

    let mut properties = IndexMap::with_capacity(compiled.columns.len());
    for column in &compiled.columns {
        let term = binding(row, &column.variable)?;
        properties.insert(column.name.clone(), decode_property(&column.name, term)?);
    }

    Ok(EntryRow {
        id,
        source,
        timestamp,
        author,
        properties,
    })
}

/// Decode one property term.
///
/// - `[]` (either spelling) or an unbound variable: empty list
/// - a proper list of `(content, timestamp, author)` tuples: those values
/// - a string, atom or integer: passed through as a scalar
pub fn decode_property(property: &str, term: &Term) -> Result<PropertyValues, DecodeError> {
    if term.is_nil() || term.is_var() {
        return Ok(PropertyValues::List(Vec::new()));
    }
    match term {
        Term::Cons { .. } => {
            let mut values = Vec::new();
            let mut current = term;
            loop {
                match current {
                    Term::Cons { head, tail } => {
                        values.push(decode_item(property, head)?);
                        current = tail;
                    }
                    end if end.is_nil() => break,
                    _ => {
                        return Err(DecodeError::ImproperList {
                            property: property.to_string(),
                        })
                    }
                }
            }
            Ok(PropertyValues::List(values))
        }
        Term::Str(_) | Term::Atom(_) | Term::Int(_) => Ok(PropertyValues::Scalar(term.clone())),
        other => Err(DecodeError::UnexpectedTerm {
            field: property.to_string(),
            found: format!("{other:?}"),
        }),
    }
}

fn decode_item(property: &str, item: &Term) -> Result<EntryValue, DecodeError> {
    let malformed = || DecodeError::MalformedItem {
        property: property.to_string(),
        found: format!("{item:?}"),
    };
    let items = item.tuple_items();
    let &[content, timestamp, author] = items.as_slice() else {
        return Err(malformed());
    };
    let content = scalar_text(content).ok_or_else(malformed)?;
    let author = author.as_text().ok_or_else(malformed)?.to_string();
    let timestamp = decode_timestamp(property, timestamp)?;
    Ok(EntryValue {
        content,
        timestamp,
        author,
    })
}

/// Timestamps arrive as epoch milliseconds or RFC 3339 text.
pub fn decode_timestamp(field: &str, term: &Term) -> Result<DateTime<Utc>, DecodeError> {
    let unexpected = || DecodeError::UnexpectedTerm {
        field: field.to_string(),
        found: format!("{term:?}"),
    };
    match term {
        Term::Int(ms) => Utc.timestamp_millis_opt(*ms).single().ok_or_else(unexpected),
        Term::Str(text) | Term::Atom(text) => {
            if let Ok(ms) = text.parse::<i64>() {
                return Utc.timestamp_millis_opt(ms).single().ok_or_else(unexpected);
            }
            DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| unexpected())
        }
        _ => Err(unexpected()),
    }
}

fn scalar_text(term: &Term) -> Option<String> {
    match term {
        Term::Str(s) | Term::Atom(s) => Some(s.clone()),
        Term::Int(n) => Some(n.to_string()),
        _ => None,
    }
}

fn binding<'a>(row: &'a BindingRow, variable: &str) -> Result<&'a Term, DecodeError> {
    row.get(variable).ok_or_else(|| DecodeError::MissingBinding {
        variable: variable.to_string(),
    })
}

fn text_binding(row: &BindingRow, variable: &str) -> Result<String, DecodeError> {
    let term = binding(row, variable)?;
    scalar_text(term).ok_or_else(|| DecodeError::UnexpectedTerm {
        field: variable.to_string(),
        found: format!("{term:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::EntryQuery;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn item(content: &str, ms: i64, author: &str) -> Term {
        Term::tuple(vec![Term::str(content), Term::Int(ms), Term::str(author)])
    }

    #[test]
    fn test_nil_spellings_decode_empty() {
        for term in [Term::Nil, Term::atom("[]"), Term::var("_G12")] {
            assert_eq!(
                decode_property("body", &term).unwrap(),
                PropertyValues::List(Vec::new())
            );
        }
    }

    #[test]
    fn test_list_decodes_triples() {
        let term = Term::list(vec![item("hi", 1_000, "did:a"), item("yo", 2_000, "did:b")]);
        let values = decode_property("body", &term).unwrap();
        assert_eq!(values.values().len(), 2);
        assert_eq!(values.latest().unwrap().content, "yo");
        assert_eq!(values.values()[0].author, "did:a");
    }

    #[test]
    fn test_scalar_passthrough() {
        let values = decode_property("name", &Term::str("general")).unwrap();
        assert_eq!(values, PropertyValues::Scalar(Term::str("general")));
        assert!(values.latest().is_none());
    }

    #[test]
    fn test_malformed_item_is_error() {
        let term = Term::list(vec![Term::tuple(vec![Term::str("x"), Term::Int(1)])]);
        assert_matches!(
            decode_property("body", &term),
            Err(DecodeError::MalformedItem { .. })
        );
    }

    #[test]
    fn test_improper_list_is_error() {
        let term = Term::Cons {
            head: Box::new(item("x", 1, "a")),
            tail: Box::new(Term::Int(3)),
        };
        assert_matches!(
            decode_property("body", &term),
            Err(DecodeError::ImproperList { .. })
        );
    }

    #[test]
    fn test_decode_entries() {
        let compiled = EntryQuery::new("flux://has_message")
            .source("chan")
            .property("body", "flux://body")
            .compile_scoped("t");
        let mut row = BindingRow::new();
        row.insert("Id".into(), Term::str("msg-1"));
        row.insert("Timestamp".into(), Term::Int(1_700_000_000_000));
        row.insert("Author".into(), Term::str("did:a"));
        row.insert("Body".into(), Term::list(vec![item("hello", 1_700_000_000_001, "did:a")]));

        let rows = decode_entries(&compiled, QueryOutcome::Bindings(vec![row])).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source, "chan");
        assert_eq!(rows[0].id, "msg-1");
        assert_eq!(rows[0].property("body").unwrap().values()[0].content, "hello");

        assert!(decode_entries(&compiled, QueryOutcome::False).unwrap().is_empty());
    }

    #[test]
    fn test_missing_binding_is_error() {
        let compiled = EntryQuery::new("flux://has_message").compile_scoped("t");
        let row = BindingRow::new();
        assert_matches!(
            decode_entries(&compiled, QueryOutcome::Bindings(vec![row])),
            Err(DecodeError::MissingBinding { .. })
        );
    }

    #[test]
    fn test_timestamp_forms() {
        let from_int = decode_timestamp("t", &Term::Int(0)).unwrap();
        let from_text = decode_timestamp("t", &Term::str("1970-01-01T00:00:00Z")).unwrap();
        assert_eq!(from_int, from_text);
        assert!(decode_timestamp("t", &Term::Nil).is_err());
    }

    proptest! {
        #[test]
        fn prop_list_length_preserved(contents in proptest::collection::vec("[a-z]{0,8}", 0..12)) {
            let items: Vec<Term> = contents
                .iter()
                .enumerate()
                .map(|(i, c)| item(c, i as i64, "did:x"))
                .collect();
            let values = decode_property("p", &Term::list(items)).unwrap();
            prop_assert_eq!(values.values().len(), contents.len());
        }
    }
}
