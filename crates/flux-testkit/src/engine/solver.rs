use flux_core::{BindingRow, LinkExpression, QueryOutcome, Term};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

use super::parser::{parse_program, parse_query};
use super::EngineError;

const MAX_DEPTH: usize = 4096;

type Subst = HashMap<String, Term>;
type Key = (String, usize);

#[derive(Debug, Clone)]
struct Clause {
    head: Term,
    body: Term,
}

impl Clause {
    fn from_term(term: &Term) -> Result<Self, EngineError> {
        let (head, body) = match term {
            Term::Compound { functor, args } if functor == ":-" && args.len() == 2 => {
                (args[0].clone(), args[1].clone())
            }
            other => (other.clone(), Term::atom("true")),
        };
        key_of(&head)?;
        Ok(Self { head, body })
    }
}

fn key_of(head: &Term) -> Result<Key, EngineError> {
    match head {
        Term::Atom(name) => Ok((name.clone(), 0)),
        Term::Compound { functor, args } => Ok((functor.clone(), args.len())),
        Term::Var(_) => Err(EngineError::Instantiation {
            context: "clause head".to_string(),
        }),
        other => Err(EngineError::Type {
            expected: "callable".to_string(),
            found: format!("{other:?}"),
        }),
    }
}

/// Clause database plus solver.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    clauses: IndexMap<Key, Vec<Clause>>,
    dynamic: HashSet<Key>,
    renames: usize,
}

impl Engine {
    /// Empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every clause of a program.
    pub fn consult(&mut self, program: &str) -> Result<usize, EngineError> {
        let clauses = parse_program(program)?;
        let count = clauses.len();
        for term in &clauses {
            self.add(Clause::from_term(term)?)?;
        }
        Ok(count)
    }

    /// Run a query against the database and `links`.
    pub fn query(
        &mut self,
        text: &str,
        links: &[LinkExpression],
    ) -> Result<QueryOutcome, EngineError> {
        let goal = parse_query(text)?;
        let mut names = Vec::new();
        collect_vars(&goal, &mut names);
        names.retain(|name| !name.starts_with('_'));

        let mut solutions = Vec::new();
        self.solve(vec![goal], Subst::new(), links, 0, &mut solutions)?;

        if solutions.is_empty() {
            return Ok(QueryOutcome::False);
        }
        if names.is_empty() {
            return Ok(QueryOutcome::True);
        }
        let rows = solutions
            .iter()
            .map(|subst| {
                names
                    .iter()
                    .map(|name| (name.clone(), resolve(&Term::var(name), subst)))
                    .collect::<BindingRow>()
            })
            .collect();
        Ok(QueryOutcome::Bindings(rows))
    }

    /// Number of clauses for `name/arity`.
    pub fn clause_count(&self, name: &str, arity: usize) -> usize {
        self.clauses
            .get(&(name.to_string(), arity))
            .map_or(0, Vec::len)
    }

    /// Total clauses whose name starts with `prefix`, over all arities.
    pub fn clauses_with_prefix(&self, prefix: &str) -> usize {
        self.clauses
            .iter()
            .filter(|((name, _), _)| name.starts_with(prefix))
            .map(|(_, clauses)| clauses.len())
            .sum()
    }

    fn add(&mut self, clause: Clause) -> Result<(), EngineError> {
        let key = key_of(&clause.head)?;
        self.dynamic.insert(key.clone());
        self.clauses.entry(key).or_default().push(clause);
        Ok(())
    }

    fn rename(&mut self, clause: &Clause) -> Clause {
        self.renames += 1;
        let suffix = self.renames;
        Clause {
            head: rename_vars(&clause.head, suffix),
            body: rename_vars(&clause.body, suffix),
        }
    }

    fn solve(
        &mut self,
        mut goals: Vec<Term>,
        subst: Subst,
        links: &[LinkExpression],
        depth: usize,
        out: &mut Vec<Subst>,
    ) -> Result<(), EngineError> {
        let Some(goal) = goals.pop() else {
            out.push(subst);
            return Ok(());
        };
        if depth > MAX_DEPTH {
            return Err(EngineError::DepthExceeded);
        }
        let goal = walk(&goal, &subst);
        let next = depth + 1;

        let (name, args) = match &goal {
            Term::Atom(name) => (name.as_str(), &[] as &[Term]),
            Term::Compound { functor, args } => (functor.as_str(), args.as_slice()),
            Term::Var(_) => {
                return Err(EngineError::Instantiation {
                    context: "goal".to_string(),
                })
            }
            other => {
                return Err(EngineError::Type {
                    expected: "callable".to_string(),
                    found: format!("{other:?}"),
                })
            }
        };

        match (name, args) {
            ("true", []) => self.solve(goals, subst, links, next, out),
            ("fail" | "false", []) => Ok(()),
            (",", [left, right]) => {
                goals.push(right.clone());
                goals.push(left.clone());
                self.solve(goals, subst, links, next, out)
            }
            ("=", [left, right]) => {
                let mut unified = subst;
                if unify(left, right, &mut unified) {
                    self.solve(goals, unified, links, next, out)
                } else {
                    Ok(())
                }
            }
            ("\\=", [left, right]) => {
                let mut probe = subst.clone();
                if unify(left, right, &mut probe) {
                    Ok(())
                } else {
                    self.solve(goals, subst, links, next, out)
                }
            }
            ("\\+", [inner]) => {
                let mut found = Vec::new();
                self.solve(vec![inner.clone()], subst.clone(), links, next, &mut found)?;
                if found.is_empty() {
                    self.solve(goals, subst, links, next, out)
                } else {
                    Ok(())
                }
            }
            ("assertz" | "assert", [clause]) => {
                self.add(Clause::from_term(&resolve(clause, &subst))?)?;
                self.solve(goals, subst, links, next, out)
            }
            ("retract", [pattern]) => {
                let pattern = Clause::from_term(&resolve(pattern, &subst))?;
                let key = key_of(&pattern.head)?;
                let stored = self.clauses.get(&key).cloned().unwrap_or_default();
                for (index, clause) in stored.iter().enumerate() {
                    let candidate = self.rename(clause);
                    let mut unified = subst.clone();
                    if unify(&pattern.head, &candidate.head, &mut unified)
                        && unify(&pattern.body, &candidate.body, &mut unified)
                    {
                        if let Some(clauses) = self.clauses.get_mut(&key) {
                            clauses.remove(index);
                            if clauses.is_empty() {
                                self.clauses.shift_remove(&key);
                            }
                        }
                        return self.solve(goals, unified, links, next, out);
                    }
                }
                Ok(())
            }
            ("findall", [template, inner, bag]) => {
                let mut found = Vec::new();
                self.solve(vec![inner.clone()], subst.clone(), links, next, &mut found)?;
                let items = found.iter().map(|s| resolve(template, s)).collect();
                let mut unified = subst;
                if unify(bag, &Term::list(items), &mut unified) {
                    self.solve(goals, unified, links, next, out)
                } else {
                    Ok(())
                }
            }
            ("length", [list, length]) => {
                let Some(count) = list_length(&resolve(list, &subst)) else {
                    return Ok(());
                };
                let mut unified = subst;
                if unify(length, &Term::Int(count), &mut unified) {
                    self.solve(goals, unified, links, next, out)
                } else {
                    Ok(())
                }
            }
            (op @ (">=" | "=<" | ">" | "<"), [left, right]) => {
                let left = integer(left, &subst)?;
                let right = integer(right, &subst)?;
                let holds = match op {
                    ">=" => left >= right,
                    "=<" => left <= right,
                    ">" => left > right,
                    _ => left < right,
                };
                if holds {
                    self.solve(goals, subst, links, next, out)
                } else {
                    Ok(())
                }
            }
            ("triple", [source, predicate, target]) => {
                for link in links {
                    let mut unified = subst.clone();
                    if unify(source, &Term::str(link.source()), &mut unified)
                        && unify(predicate, &Term::str(link.predicate()), &mut unified)
                        && unify(target, &Term::str(link.target()), &mut unified)
                    {
                        self.solve(goals.clone(), unified, links, next, out)?;
                    }
                }
                Ok(())
            }
            ("link", [source, predicate, target, timestamp, author]) => {
                for link in links {
                    let mut unified = subst.clone();
                    if unify(source, &Term::str(link.source()), &mut unified)
                        && unify(predicate, &Term::str(link.predicate()), &mut unified)
                        && unify(target, &Term::str(link.target()), &mut unified)
                        && unify(
                            timestamp,
                            &Term::Int(link.timestamp.timestamp_millis()),
                            &mut unified,
                        )
                        && unify(author, &Term::str(&link.author), &mut unified)
                    {
                        self.solve(goals.clone(), unified, links, next, out)?;
                    }
                }
                Ok(())
            }
            _ => {
                let key = (name.to_string(), args.len());
                let Some(stored) = self.clauses.get(&key).cloned() else {
                    if self.dynamic.contains(&key) {
                        return Ok(());
                    }
                    return Err(EngineError::Existence {
                        name: key.0,
                        arity: key.1,
                    });
                };
                for clause in &stored {
                    let candidate = self.rename(clause);
                    let mut unified = subst.clone();
                    if unify(&goal, &candidate.head, &mut unified) {
                        let mut branch = goals.clone();
                        branch.push(candidate.body);
                        self.solve(branch, unified, links, next, out)?;
                    }
                }
                Ok(())
            }
        }
    }
}

fn walk(term: &Term, subst: &Subst) -> Term {
    let mut current = term;
    while let Term::Var(name) = current {
        match subst.get(name) {
            Some(bound) => current = bound,
            None => break,
        }
    }
    if current.is_nil() {
        return Term::Nil;
    }
    current.clone()
}

fn resolve(term: &Term, subst: &Subst) -> Term {
    match walk(term, subst) {
        Term::Compound { functor, args } => Term::Compound {
            functor,
            args: args.iter().map(|arg| resolve(arg, subst)).collect(),
        },
        Term::Cons { head, tail } => Term::Cons {
            head: Box::new(resolve(&head, subst)),
            tail: Box::new(resolve(&tail, subst)),
        },
        other => other,
    }
}

fn unify(left: &Term, right: &Term, subst: &mut Subst) -> bool {
    let left = walk(left, subst);
    let right = walk(right, subst);
    match (left, right) {
        (Term::Var(a), Term::Var(b)) if a == b => true,
        (Term::Var(name), value) | (value, Term::Var(name)) => {
            subst.insert(name, value);
            true
        }
        (Term::Str(a), Term::Str(b)) | (Term::Atom(a), Term::Atom(b)) => a == b,
        (Term::Int(a), Term::Int(b)) => a == b,
        (Term::Nil, Term::Nil) => true,
        (Term::Cons { head: h1, tail: t1 }, Term::Cons { head: h2, tail: t2 }) => {
            unify(&h1, &h2, subst) && unify(&t1, &t2, subst)
        }
        (
            Term::Compound {
                functor: f1,
                args: a1,
            },
            Term::Compound {
                functor: f2,
                args: a2,
            },
        ) => {
            f1 == f2
                && a1.len() == a2.len()
                && a1.iter().zip(&a2).all(|(x, y)| unify(x, y, subst))
        }
        _ => false,
    }
}

fn rename_vars(term: &Term, suffix: usize) -> Term {
    match term {
        Term::Var(name) => Term::Var(format!("{name}#{suffix}")),
        Term::Compound { functor, args } => Term::Compound {
            functor: functor.clone(),
            args: args.iter().map(|arg| rename_vars(arg, suffix)).collect(),
        },
        Term::Cons { head, tail } => Term::Cons {
            head: Box::new(rename_vars(head, suffix)),
            tail: Box::new(rename_vars(tail, suffix)),
        },
        other => other.clone(),
    }
}

fn collect_vars(term: &Term, names: &mut Vec<String>) {
    match term {
        Term::Var(name) => {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        Term::Compound { args, .. } => args.iter().for_each(|arg| collect_vars(arg, names)),
        Term::Cons { head, tail } => {
            collect_vars(head, names);
            collect_vars(tail, names);
        }
        _ => {}
    }
}

fn list_length(term: &Term) -> Option<i64> {
    let mut count = 0;
    let mut current = term;
    loop {
        match current {
            Term::Cons { tail, .. } => {
                count += 1;
                current = tail;
            }
            end if end.is_nil() => return Some(count),
            _ => return None,
        }
    }
}

fn integer(term: &Term, subst: &Subst) -> Result<i64, EngineError> {
    match walk(term, subst) {
        Term::Int(n) => Ok(n),
        Term::Var(_) => Err(EngineError::Instantiation {
            context: "arithmetic comparison".to_string(),
        }),
        other => Err(EngineError::Type {
            expected: "integer".to_string(),
            found: format!("{other:?}"),
        }),
    }
}
