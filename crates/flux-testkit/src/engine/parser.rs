//! Reader for the logic dialect
//!
//! Supports what Flux programs use: clauses (`:-`), conjunction, `=`/`\=`,
//! comparison operators, `\+`, strings, quoted atoms, integers, variables
//! (`_` is always fresh), compound terms and lists with `|` tails.

use flux_core::Term;

use super::EngineError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Atom(String),
    Functor(String),
    Var(String),
    Str(String),
    Int(i64),
    Open,
    Close,
    LBracket,
    RBracket,
    Bar,
    Comma,
    End,
}

const SYMBOL_CHARS: &str = "+-*/\\^<>=~:.?@#&$";

fn tokenize(text: &str) -> Result<Vec<Token>, EngineError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '%' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Bar);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' if chars.get(i + 1).map_or(true, |n| n.is_whitespace() || *n == '%') => {
                tokens.push(Token::End);
                i += 1;
            }
            '"' => {
                let (value, next) = read_quoted(&chars, i + 1, '"')?;
                tokens.push(Token::Str(value));
                i = next;
            }
            '\'' => {
                let (value, next) = read_quoted(&chars, i + 1, '\'')?;
                i = next;
                tokens.push(name_token(value, chars.get(i) == Some(&'('), &mut i));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().collect();
                let value = digits
                    .parse()
                    .map_err(|_| EngineError::syntax(format!("integer out of range: {digits}")))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                if c.is_uppercase() || c == '_' {
                    tokens.push(Token::Var(name));
                } else {
                    tokens.push(name_token(name, chars.get(i) == Some(&'('), &mut i));
                }
            }
            c if SYMBOL_CHARS.contains(c) => {
                let start = i;
                while i < chars.len() && SYMBOL_CHARS.contains(chars[i]) {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push(name_token(name, chars.get(i) == Some(&'('), &mut i));
            }
            other => {
                return Err(EngineError::syntax(format!("unexpected character {other:?}")));
            }
        }
    }
    Ok(tokens)
}

fn name_token(name: String, call: bool, i: &mut usize) -> Token {
    if call {
        *i += 1;
        Token::Functor(name)
    } else {
        Token::Atom(name)
    }
}

fn read_quoted(chars: &[char], mut i: usize, quote: char) -> Result<(String, usize), EngineError> {
    let mut value = String::new();
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| EngineError::syntax("unterminated escape"))?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((value, i + 1)),
            c => {
                value.push(c);
                i += 1;
            }
        }
    }
    Err(EngineError::syntax("unterminated quoted text"))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Xfx,
    Xfy,
}

fn infix(name: &str) -> Option<(u32, Assoc)> {
    match name {
        ":-" => Some((1200, Assoc::Xfx)),
        "," => Some((1000, Assoc::Xfy)),
        "=" | "\\=" | ">=" | "=<" | ">" | "<" => Some((700, Assoc::Xfx)),
        _ => None,
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    fresh: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, EngineError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| EngineError::syntax("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: Token) -> Result<(), EngineError> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(EngineError::syntax(format!("expected {expected:?}, found {token:?}")))
        }
    }

    fn expr(&mut self, max: u32) -> Result<Term, EngineError> {
        let mut left = self.primary()?;
        loop {
            let name = match self.peek() {
                Some(Token::Comma) => ",".to_string(),
                Some(Token::Atom(name)) if infix(name).is_some() => name.clone(),
                _ => break,
            };
            let Some((prec, assoc)) = infix(&name) else {
                break;
            };
            if prec > max {
                break;
            }
            self.pos += 1;
            let right_max = match assoc {
                Assoc::Xfy => prec,
                Assoc::Xfx => prec - 1,
            };
            let right = self.expr(right_max)?;
            left = Term::compound(name, vec![left, right]);
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Term, EngineError> {
        match self.next()? {
            Token::Int(n) => Ok(Term::Int(n)),
            Token::Str(s) => Ok(Term::Str(s)),
            Token::Var(name) if name == "_" => {
                self.fresh += 1;
                Ok(Term::Var(format!("_G{}", self.fresh)))
            }
            Token::Var(name) => Ok(Term::Var(name)),
            Token::Functor(name) => {
                let mut args = vec![self.expr(999)?];
                loop {
                    match self.next()? {
                        Token::Comma => args.push(self.expr(999)?),
                        Token::Close => break,
                        other => {
                            return Err(EngineError::syntax(format!(
                                "expected , or ) in arguments of {name}, found {other:?}"
                            )))
                        }
                    }
                }
                Ok(Term::compound(name, args))
            }
            Token::Atom(name) if name == "\\+" => {
                let goal = self.expr(900)?;
                Ok(Term::compound(name, vec![goal]))
            }
            Token::Atom(name) if name == "-" => match self.next()? {
                Token::Int(n) => Ok(Term::Int(-n)),
                other => Err(EngineError::syntax(format!("expected integer after -, found {other:?}"))),
            },
            Token::Atom(name) => Ok(Term::Atom(name)),
            Token::Open => {
                let inner = self.expr(1200)?;
                self.expect(Token::Close)?;
                Ok(inner)
            }
            Token::LBracket => self.list(),
            other => Err(EngineError::syntax(format!("unexpected token {other:?}"))),
        }
    }

    fn list(&mut self) -> Result<Term, EngineError> {
        if self.peek() == Some(&Token::RBracket) {
            self.pos += 1;
            return Ok(Term::Nil);
        }
        let mut items = vec![self.expr(999)?];
        let tail = loop {
            match self.next()? {
                Token::Comma => items.push(self.expr(999)?),
                Token::Bar => {
                    let tail = self.expr(999)?;
                    self.expect(Token::RBracket)?;
                    break tail;
                }
                Token::RBracket => break Term::Nil,
                other => {
                    return Err(EngineError::syntax(format!("unexpected token in list: {other:?}")))
                }
            }
        };
        Ok(items.into_iter().rev().fold(tail, |tail, head| Term::Cons {
            head: Box::new(head),
            tail: Box::new(tail),
        }))
    }
}

/// Parse a sequence of `.`-terminated clauses.
pub fn parse_program(text: &str) -> Result<Vec<Term>, EngineError> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
        fresh: 0,
    };
    let mut clauses = Vec::new();
    while parser.peek().is_some() {
        clauses.push(parser.expr(1200)?);
        parser.expect(Token::End)?;
    }
    Ok(clauses)
}

/// Parse a single query; the trailing `.` is optional.
pub fn parse_query(text: &str) -> Result<Term, EngineError> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
        fresh: 0,
    };
    let goal = parser.expr(1200)?;
    if parser.peek() == Some(&Token::End) {
        parser.pos += 1;
    }
    if parser.peek().is_some() {
        return Err(EngineError::syntax("trailing input after query"));
    }
    Ok(goal)
}
