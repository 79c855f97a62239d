//! Boolean tag expressions for `@if(...)` build attributes.
//!
//! The grammar is a boolean algebra over identifiers: `&&`, `||`, `!`, and
//! parentheses. Any other operator is a configuration error, reported with
//! the offending operator text.

use crate::error::{ParseError, Pos, Result};

/// A parsed `@if` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagExpr {
    Tag(String),
    Not(Box<TagExpr>),
    And(Box<TagExpr>, Box<TagExpr>),
    Or(Box<TagExpr>, Box<TagExpr>),
}

impl TagExpr {
    /// Evaluate under the given tag predicate.
    pub fn eval(&self, tag_is_set: &dyn Fn(&str) -> bool) -> bool {
        match self {
            TagExpr::Tag(name) => tag_is_set(name),
            TagExpr::Not(e) => !e.eval(tag_is_set),
            TagExpr::And(a, b) => a.eval(tag_is_set) && b.eval(tag_is_set),
            TagExpr::Or(a, b) => a.eval(tag_is_set) || b.eval(tag_is_set),
        }
    }
}

/// Parse the body of an `@if` attribute.
pub fn parse_tag_expr(src: &str) -> Result<TagExpr> {
    let mut p = Lexer::new(src);
    let expr = parse_or(&mut p)?;
    match p.next()? {
        LexTok::Eof => Ok(expr),
        tok => Err(ParseError::Expected {
            pos: p.pos(),
            expected: "end of expression",
            found: tok.describe(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LexTok {
    Ident(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Eof,
}

impl LexTok {
    fn describe(&self) -> String {
        match self {
            LexTok::Ident(s) => format!("identifier {s:?}"),
            LexTok::And => "'&&'".to_string(),
            LexTok::Or => "'||'".to_string(),
            LexTok::Not => "'!'".to_string(),
            LexTok::LParen => "'('".to_string(),
            LexTok::RParen => "')'".to_string(),
            LexTok::Eof => "end of expression".to_string(),
        }
    }
}

struct Lexer<'a> {
    src: &'a [u8],
    off: usize,
    peeked: Option<LexTok>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            off: 0,
            peeked: None,
        }
    }

    fn pos(&self) -> Pos {
        // Attribute bodies are single-line; report a column within the body.
        Pos::new(1, self.off as u32 + 1)
    }

    fn peek(&mut self) -> Result<&LexTok> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lex()?);
        }
        Ok(self.peeked.as_ref().unwrap())
    }

    fn next(&mut self) -> Result<LexTok> {
        match self.peeked.take() {
            Some(t) => Ok(t),
            None => self.lex(),
        }
    }

    fn lex(&mut self) -> Result<LexTok> {
        while let Some(&b) = self.src.get(self.off) {
            if b == b' ' || b == b'\t' {
                self.off += 1;
            } else {
                break;
            }
        }
        let pos = self.pos();
        let b = match self.src.get(self.off) {
            None => return Ok(LexTok::Eof),
            Some(&b) => b,
        };
        match b {
            b'(' => {
                self.off += 1;
                Ok(LexTok::LParen)
            }
            b')' => {
                self.off += 1;
                Ok(LexTok::RParen)
            }
            b'!' => {
                // `!=` is an operator outside the algebra.
                if self.src.get(self.off + 1) == Some(&b'=') {
                    return Err(ParseError::BadTagOperator {
                        pos,
                        op: "!=".to_string(),
                    });
                }
                self.off += 1;
                Ok(LexTok::Not)
            }
            b'&' => {
                if self.src.get(self.off + 1) == Some(&b'&') {
                    self.off += 2;
                    Ok(LexTok::And)
                } else {
                    Err(ParseError::BadTagOperator {
                        pos,
                        op: "&".to_string(),
                    })
                }
            }
            b'|' => {
                if self.src.get(self.off + 1) == Some(&b'|') {
                    self.off += 2;
                    Ok(LexTok::Or)
                } else {
                    Err(ParseError::BadTagOperator {
                        pos,
                        op: "|".to_string(),
                    })
                }
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let start = self.off;
                while let Some(&b) = self.src.get(self.off) {
                    if b.is_ascii_alphanumeric() || b == b'_' {
                        self.off += 1;
                    } else {
                        break;
                    }
                }
                let s = std::str::from_utf8(&self.src[start..self.off])
                    .expect("ascii ident")
                    .to_string();
                Ok(LexTok::Ident(s))
            }
            b => {
                // Every other punctuation byte is some operator we refuse.
                let mut op = String::new();
                while let Some(&c) = self.src.get(self.off) {
                    if c.is_ascii_punctuation() && c != b'(' && c != b')' {
                        op.push(c as char);
                        self.off += 1;
                    } else {
                        break;
                    }
                }
                if op.is_empty() {
                    op.push(b as char);
                }
                Err(ParseError::BadTagOperator { pos, op })
            }
        }
    }
}

fn parse_or(p: &mut Lexer<'_>) -> Result<TagExpr> {
    let mut left = parse_and(p)?;
    while *p.peek()? == LexTok::Or {
        p.next()?;
        let right = parse_and(p)?;
        left = TagExpr::Or(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_and(p: &mut Lexer<'_>) -> Result<TagExpr> {
    let mut left = parse_unary(p)?;
    while *p.peek()? == LexTok::And {
        p.next()?;
        let right = parse_unary(p)?;
        left = TagExpr::And(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_unary(p: &mut Lexer<'_>) -> Result<TagExpr> {
    match p.next()? {
        LexTok::Not => Ok(TagExpr::Not(Box::new(parse_unary(p)?))),
        LexTok::LParen => {
            let expr = parse_or(p)?;
            match p.next()? {
                LexTok::RParen => Ok(expr),
                tok => Err(ParseError::Expected {
                    pos: p.pos(),
                    expected: "')'",
                    found: tok.describe(),
                }),
            }
        }
        LexTok::Ident(name) => Ok(TagExpr::Tag(name)),
        LexTok::Eof => Err(ParseError::UnexpectedEof { pos: p.pos() }),
        tok => Err(ParseError::Expected {
            pos: p.pos(),
            expected: "identifier, '!' or '('",
            found: tok.describe(),
        }),
    }
}
