//! Data-mode value parser.
//!
//! Parses a whole file of data-mode CUE: struct fields with string, bool,
//! integer, null, list, and nested struct values. No expressions, no
//! references, no comprehensions. This is the grammar `module.cue` and the
//! structured registry configuration are written in; the manifest decoder
//! applies its schema on top of the `Value` tree this produces.

use std::collections::BTreeSet;

use crate::error::{ParseError, Pos, Result};
use crate::scanner::{Scanner, Tok};

/// A data-mode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Fields in source order.
    Struct(Vec<(String, Value)>),
    List(Vec<Value>),
    String(String),
    Int(i64),
    Bool(bool),
    Null,
}

impl Value {
    /// Look up a field of a struct value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// One-word description used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Struct(_) => "struct",
            Value::List(_) => "list",
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Null => "null",
        }
    }
}

/// Parse a whole file of data-mode fields into a struct value.
pub fn parse_data(src: &[u8]) -> Result<Value> {
    let mut p = Parser {
        sc: Scanner::new(src),
        peeked: None,
    };
    let fields = p.parse_fields(Tok::Eof)?;
    Ok(Value::Struct(fields))
}

struct Parser<'a> {
    sc: Scanner<'a>,
    peeked: Option<(Pos, Tok)>,
}

impl<'a> Parser<'a> {
    fn next(&mut self) -> Result<(Pos, Tok)> {
        match self.peeked.take() {
            Some(t) => Ok(t),
            None => self.sc.next_token(),
        }
    }

    fn peek(&mut self) -> Result<&(Pos, Tok)> {
        if self.peeked.is_none() {
            self.peeked = Some(self.sc.next_token()?);
        }
        Ok(self.peeked.as_ref().unwrap())
    }

    fn skip_newlines(&mut self) -> Result<()> {
        while matches!(self.peek()?.1, Tok::Newline) {
            self.next()?;
        }
        Ok(())
    }

    /// Parse fields until `end` (either `Eof` or `RBrace`), consuming it.
    fn parse_fields(&mut self, end: Tok) -> Result<Vec<(String, Value)>> {
        let mut fields = Vec::new();
        let mut seen = BTreeSet::new();
        loop {
            self.skip_newlines()?;
            let (pos, tok) = self.next()?;
            if tok == end {
                return Ok(fields);
            }
            let name = match tok {
                Tok::Ident(name) => name,
                Tok::Str(name) => name,
                Tok::Eof => return Err(ParseError::UnexpectedEof { pos }),
                other => {
                    return Err(ParseError::Expected {
                        pos,
                        expected: "field label",
                        found: other.describe(),
                    })
                }
            };
            if !seen.insert(name.clone()) {
                return Err(ParseError::DuplicateField { pos, name });
            }
            let (cpos, tok) = self.next()?;
            if tok != Tok::Colon {
                return Err(ParseError::Expected {
                    pos: cpos,
                    expected: "':'",
                    found: tok.describe(),
                });
            }
            let value = self.parse_value()?;
            fields.push((name, value));
            // Field separator: newline, comma, or the closing token.
            let (spos, tok) = self.peek()?.clone();
            match tok {
                Tok::Newline | Tok::Comma => {
                    self.next()?;
                }
                ref t if *t == end => {}
                other => {
                    return Err(ParseError::Expected {
                        pos: spos,
                        expected: "',' or newline",
                        found: other.describe(),
                    })
                }
            }
        }
    }

    fn parse_value(&mut self) -> Result<Value> {
        self.skip_newlines()?;
        let (pos, tok) = self.next()?;
        match tok {
            Tok::Str(s) => Ok(Value::String(s)),
            Tok::Int(n) => Ok(Value::Int(n)),
            Tok::Ident(id) => match id.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => Err(ParseError::Expected {
                    pos,
                    expected: "value",
                    found: format!("identifier {id:?}"),
                }),
            },
            Tok::LBrace => {
                let fields = self.parse_fields(Tok::RBrace)?;
                Ok(Value::Struct(fields))
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                loop {
                    self.skip_newlines()?;
                    if self.peek()?.1 == Tok::RBracket {
                        self.next()?;
                        return Ok(Value::List(items));
                    }
                    items.push(self.parse_value()?);
                    self.skip_newlines()?;
                    let (pos, tok) = self.peek()?.clone();
                    match tok {
                        Tok::Comma => {
                            self.next()?;
                        }
                        Tok::RBracket => {}
                        other => {
                            return Err(ParseError::Expected {
                                pos,
                                expected: "',' or ']'",
                                found: other.describe(),
                            });
                        }
                    }
                }
            }
            Tok::Eof => Err(ParseError::UnexpectedEof { pos }),
            other => Err(ParseError::Expected {
                pos,
                expected: "value",
                found: other.describe(),
            }),
        }
    }
}
