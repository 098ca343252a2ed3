//! Schema programs
//!
//! Renders a [`SubjectSchema`] as the clause set the runtime's logic engine
//! uses to recognise and read instances:
//!
//! ```text
//! subject_class("Channel", c_channel).
//! instance(c_channel, Base) :- triple(Base, "flux://entry_type", "flux://has_channel").
//! property(c_channel, "name").
//! property_getter(c_channel, Base, "name", Value) :- triple(Base, "flux://name", Value).
//! collection(c_channel, "views").
//! collection_getter(c_channel, Base, "views", List) :- findall(C, triple(Base, "flux://has_app", C), List).
//! ```

use flux_core::predicates::{EMOJI_SCHEME, REACTION};
use flux_core::Term;
use flux_query::program::{findall_goal, link_goal, program, triple_goal, Rule};

use crate::schema::{Cardinality, SubjectSchema};

/// Engine atom naming a class: `c_` plus the snake-cased class name.
pub fn class_atom(name: &str) -> String {
    let mut atom = String::from("c_");
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                atom.push('_');
            }
            atom.push(c.to_ascii_lowercase());
        } else if c.is_ascii_alphanumeric() {
            atom.push(c);
        } else {
            atom.push('_');
        }
    }
    atom
}

/// The schema's clause set.
pub fn sdna(schema: &SubjectSchema) -> String {
    let class = Term::atom(class_atom(schema.name()));
    let base = Term::var("Base");
    let flag = schema.flag();

    let mut rules = vec![
        Rule::fact(Term::compound(
            "subject_class",
            vec![Term::str(schema.name()), class.clone()],
        )),
        Rule::new(
            Term::compound("instance", vec![class.clone(), base.clone()]),
            vec![triple_goal(
                base.clone(),
                Term::str(&flag.predicate),
                Term::str(&flag.value),
            )],
        ),
    ];

    for (name, spec) in schema.properties() {
        let name_term = Term::str(name);
        match spec.cardinality {
            Cardinality::Single => {
                rules.push(Rule::fact(Term::compound(
                    "property",
                    vec![class.clone(), name_term.clone()],
                )));
                rules.push(Rule::new(
                    Term::compound(
                        "property_getter",
                        vec![class.clone(), base.clone(), name_term.clone(), Term::var("Value")],
                    ),
                    vec![triple_goal(
                        base.clone(),
                        Term::str(&spec.predicate),
                        Term::var("Value"),
                    )],
                ));
                if spec.writable {
                    rules.push(Rule::fact(Term::compound(
                        "property_setter",
                        vec![
                            class.clone(),
                            name_term,
                            Term::atom(action("setSingleTarget", &spec.predicate)),
                        ],
                    )));
                }
            }
            Cardinality::Collection => {
                rules.push(Rule::fact(Term::compound(
                    "collection",
                    vec![class.clone(), name_term.clone()],
                )));
                rules.push(Rule::new(
                    Term::compound(
                        "collection_getter",
                        vec![class.clone(), base.clone(), name_term.clone(), Term::var("List")],
                    ),
                    vec![findall_goal(
                        Term::var("C"),
                        triple_goal(base.clone(), Term::str(&spec.predicate), Term::var("C")),
                        Term::var("List"),
                    )],
                ));
                if spec.writable {
                    rules.push(Rule::fact(Term::compound(
                        "collection_adder",
                        vec![
                            class.clone(),
                            name_term,
                            Term::atom(action("addLink", &spec.predicate)),
                        ],
                    )));
                }
            }
        }
    }

    program(&rules)
}

fn action(kind: &str, predicate: &str) -> String {
    format!(r#"[{{action: "{kind}", source: "this", predicate: "{predicate}", target: "value"}}]"#)
}

/// The community's `isPopular/1` rule.
///
/// A message is popular once at least `threshold` reaction links with
/// `emoji://<emoji_hex>` point at it.
pub fn community_sdna(emoji_hex: &str, threshold: usize) -> String {
    let base = Term::var("Base");
    let count = Term::var("Count");
    let reactions = Term::var("Reactions");
    let threshold = i64::try_from(threshold).unwrap_or(i64::MAX);
    let rule = Rule::new(
        Term::compound("isPopular", vec![base.clone()]),
        vec![
            findall_goal(
                Term::var("Author"),
                link_goal(
                    base,
                    Term::str(REACTION),
                    Term::str(format!("{EMOJI_SCHEME}{emoji_hex}")),
                    Term::var("_"),
                    Term::var("Author"),
                ),
                reactions.clone(),
            ),
            Term::compound("length", vec![reactions, count.clone()]),
            Term::compound(">=", vec![count, Term::Int(threshold)]),
        ],
    );
    program(&[rule])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ValueKind;

    #[test]
    fn test_class_atom() {
        assert_eq!(class_atom("Channel"), "c_channel");
        assert_eq!(class_atom("ConversationSubgroup"), "c_conversation_subgroup");
    }

    #[test]
    fn test_sdna_clauses() {
        let schema = SubjectSchema::builder("Channel")
            .flag("flux://entry_type", "flux://has_channel")
            .property("name", "flux://name")
            .collection("views", "flux://has_app", ValueKind::Literal)
            .build()
            .unwrap();
        let text = sdna(&schema);
        assert!(text.contains("subject_class(\"Channel\", c_channel).\n"));
        assert!(text.contains(
            "instance(c_channel, Base) :- triple(Base, \"flux://entry_type\", \"flux://has_channel\").\n"
        ));
        assert!(text.contains(
            "property_getter(c_channel, Base, \"name\", Value) :- triple(Base, \"flux://name\", Value).\n"
        ));
        assert!(text.contains(
            "collection_getter(c_channel, Base, \"views\", List) :- findall(C, triple(Base, \"flux://has_app\", C), List).\n"
        ));
        assert!(text.contains("property_setter(c_channel, \"name\", '[{action: \"setSingleTarget\""));
    }

    #[test]
    fn test_community_sdna() {
        let text = community_sdna("1f44d", 3);
        assert!(text.starts_with("isPopular(Base) :- findall(Author, link(Base, \"flux://has_reaction\", \"emoji://1f44d\", _, Author), Reactions)"));
        assert!(text.trim_end().ends_with("(Count >= 3)."));
    }
}
