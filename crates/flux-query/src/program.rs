//! Program Formatting
//!
//! Typed builders for the runtime's logic dialect and their text rendering.
//! Every program sent to the engine goes through these functions so that
//! string escaping and operator parenthesisation are handled in one place.

use flux_core::Term;

/// A clause `head :- body1, body2`. An empty body renders as a fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Clause head
    pub head: Term,
    /// Conjunctive body goals
    pub body: Vec<Term>,
}

impl Rule {
    /// Build a rule.
    pub fn new(head: Term, body: Vec<Term>) -> Self {
        Self { head, body }
    }

    /// Build a fact.
    pub fn fact(head: Term) -> Self {
        Self {
            head,
            body: Vec::new(),
        }
    }
}

/// `link(Source, Predicate, Target, Timestamp, Author)`
pub fn link_goal(source: Term, predicate: Term, target: Term, timestamp: Term, author: Term) -> Term {
    Term::compound("link", vec![source, predicate, target, timestamp, author])
}

/// `triple(Source, Predicate, Target)`
pub fn triple_goal(source: Term, predicate: Term, target: Term) -> Term {
    Term::compound("triple", vec![source, predicate, target])
}

/// `findall(Template, Goal, Bag)`
pub fn findall_goal(template: Term, goal: Term, bag: Term) -> Term {
    Term::compound("findall", vec![template, goal, bag])
}

/// Format a rule: `head :- body1, body2` (or just `head` for a fact).
pub fn format_rule(rule: &Rule) -> String {
    if rule.body.is_empty() {
        return format_term(&rule.head);
    }
    let body: Vec<String> = rule.body.iter().map(format_term).collect();
    format!("{} :- {}", format_term(&rule.head), body.join(", "))
}

/// `assertz((rule)).`
pub fn assertz(rule: &Rule) -> String {
    format!("assertz(({})).", format_rule(rule))
}

/// `retract((rule)).`
pub fn retract(rule: &Rule) -> String {
    format!("retract(({})).", format_rule(rule))
}

/// A conjunctive query terminated by `.`
pub fn query(goals: &[Term]) -> String {
    let goals: Vec<String> = goals.iter().map(format_term).collect();
    format!("{}.", goals.join(", "))
}

/// Several clauses as a consultable program (one clause per line).
pub fn program(rules: &[Rule]) -> String {
    rules
        .iter()
        .map(|rule| format!("{}.\n", format_rule(rule)))
        .collect()
}

/// Format a term.
///
/// - Strings: `"value"` with `\` and `"` escaped
/// - Atoms: bare when they are plain identifiers, `'quoted'` otherwise
/// - Variables: their name
/// - Conjunctions `','/2` and clauses `':-'/2`: parenthesised infix
/// - Lists: `[a, b | T]`
pub fn format_term(term: &Term) -> String {
    match term {
        Term::Str(s) => format!("\"{}\"", escape(s, '"')),
        Term::Atom(a) => format_atom(a),
        Term::Int(n) => n.to_string(),
        Term::Var(name) => name.clone(),
        Term::Compound { functor, args } if args.len() == 2 && is_infix(functor) => {
            let sep = if functor == "," {
                ", ".to_string()
            } else {
                format!(" {functor} ")
            };
            format!("({}{}{})", format_term(&args[0]), sep, format_term(&args[1]))
        }
        Term::Compound { functor, args } => {
            let args: Vec<String> = args.iter().map(format_term).collect();
            format!("{}({})", format_atom(functor), args.join(", "))
        }
        Term::Cons { .. } => format_list(term),
        Term::Nil => "[]".to_string(),
    }
}

fn is_infix(functor: &str) -> bool {
    matches!(functor, "," | ":-" | "=" | "\\=" | ">=" | "=<" | ">" | "<")
}

fn format_list(term: &Term) -> String {
    let mut items = Vec::new();
    let mut current = term;
    loop {
        match current {
            Term::Cons { head, tail } => {
                items.push(format_term(head));
                current = tail;
            }
            Term::Nil => return format!("[{}]", items.join(", ")),
            other => return format!("[{} | {}]", items.join(", "), format_term(other)),
        }
    }
}

fn format_atom(atom: &str) -> String {
    let mut chars = atom.chars();
    let plain = match chars.next() {
        Some(first) => {
            first.is_ascii_lowercase() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if plain || atom == "[]" {
        atom.to_string()
    } else {
        format!("'{}'", escape(atom, '\''))
    }
}

fn escape(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '\\' || c == quote {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
