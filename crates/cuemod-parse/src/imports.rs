//! Minimal import parser.
//!
//! Parses the prefix of a CUE source file: file-level attributes, the
//! package clause, and every import declaration, stopping at the first
//! token that cannot belong to that prefix. Everything after the final
//! import declaration is never scanned, which keeps the cost of walking a
//! large transitive closure bounded.

use crate::error::{ParseError, Pos, Result};
use crate::scanner::{Scanner, Tok};

/// A file-level attribute such as `@if(prod && !test)` or `@ignore()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name (the identifier after `@`).
    pub name: String,
    /// Raw body between the parentheses, verbatim.
    pub body: String,
    pub pos: Pos,
}

/// A single import declaration entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    /// The unquoted import path, e.g. `example.com/foo/bar:baz`.
    pub path: String,
    /// Optional alias identifier preceding the path.
    pub alias: Option<String>,
    pub pos: Pos,
}

/// The parsed prefix of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceFilePrefix {
    /// File-level attributes, in source order.
    pub attributes: Vec<Attribute>,
    /// The package-name identifier, if a package clause is present.
    pub package_name: Option<String>,
    /// Position of the package clause.
    pub package_pos: Option<Pos>,
    /// All import path entries, in source order.
    pub imports: Vec<ImportSpec>,
}

/// Parse the import prefix of `src`.
///
/// Stops silently once a token outside the prefix grammar appears at the
/// top level; anything malformed before that point is an error.
pub fn parse_imports(src: &[u8]) -> Result<SourceFilePrefix> {
    Parser {
        sc: Scanner::new(src),
        peeked: None,
    }
    .parse()
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

    fn parse(mut self) -> Result<SourceFilePrefix> {
        let mut out = SourceFilePrefix::default();
        loop {
            self.skip_newlines()?;
            match self.peek()?.1.clone() {
                Tok::At => {
                    let attr = self.parse_attribute()?;
                    out.attributes.push(attr);
                }
                Tok::Ident(ref id) if id == "package" && out.package_name.is_none() => {
                    let (pos, _) = self.next()?;
                    let (npos, tok) = self.next()?;
                    match tok {
                        Tok::Ident(name) => {
                            out.package_name = Some(name);
                            out.package_pos = Some(pos);
                        }
                        other => {
                            return Err(ParseError::Expected {
                                pos: npos,
                                expected: "package name",
                                found: other.describe(),
                            })
                        }
                    }
                    self.expect_decl_end()?;
                }
                Tok::Ident(ref id) if id == "import" => {
                    self.next()?;
                    self.parse_import_decl(&mut out.imports)?;
                }
                // Anything else ends the prefix; the rest of the file is
                // not scanned.
                _ => return Ok(out),
            }
        }
    }

    fn parse_attribute(&mut self) -> Result<Attribute> {
        let (pos, _) = self.next()?; // '@'
        let (npos, tok) = self.next()?;
        let name = match tok {
            Tok::Ident(name) => name,
            other => {
                return Err(ParseError::Expected {
                    pos: npos,
                    expected: "attribute name",
                    found: other.describe(),
                })
            }
        };
        let (ppos, tok) = self.next()?;
        if tok != Tok::LParen {
            return Err(ParseError::Expected {
                pos: ppos,
                expected: "'('",
                found: tok.describe(),
            });
        }
        let body = self.sc.attr_body()?;
        Ok(Attribute { name, body, pos })
    }

    fn parse_import_decl(&mut self, out: &mut Vec<ImportSpec>) -> Result<()> {
        if self.peek()?.1 == Tok::LParen {
            self.next()?;
            loop {
                self.skip_newlines()?;
                if self.peek()?.1 == Tok::RParen {
                    self.next()?;
                    break;
                }
                let spec = self.parse_import_spec()?;
                out.push(spec);
                // Entries are separated by newlines or commas.
                let (pos, tok) = self.peek()?.clone();
                match tok {
                    Tok::Comma => {
                        self.next()?;
                    }
                    Tok::Newline | Tok::RParen => {}
                    other => {
                        return Err(ParseError::Expected {
                            pos,
                            expected: "',' or newline or ')'",
                            found: other.describe(),
                        });
                    }
                }
            }
            self.expect_decl_end()?;
        } else {
            let spec = self.parse_import_spec()?;
            out.push(spec);
            self.expect_decl_end()?;
        }
        Ok(())
    }

    fn parse_import_spec(&mut self) -> Result<ImportSpec> {
        let (pos, tok) = self.next()?;
        match tok {
            Tok::Str(path) => Ok(ImportSpec {
                path,
                alias: None,
                pos,
            }),
            Tok::Ident(alias) => {
                let (spos, tok) = self.next()?;
                match tok {
                    Tok::Str(path) => Ok(ImportSpec {
                        path,
                        alias: Some(alias),
                        pos,
                    }),
                    other => Err(ParseError::Expected {
                        pos: spos,
                        expected: "import path string",
                        found: other.describe(),
                    }),
                }
            }
            Tok::Eof => Err(ParseError::UnexpectedEof { pos }),
            other => Err(ParseError::Expected {
                pos,
                expected: "import path string",
                found: other.describe(),
            }),
        }
    }

    /// A declaration must be followed by a newline, a comma, or EOF.
    fn expect_decl_end(&mut self) -> Result<()> {
        let (pos, tok) = self.peek()?.clone();
        match tok {
            Tok::Newline | Tok::Comma => {
                self.next()?;
                Ok(())
            }
            Tok::Eof => Ok(()),
            other => Err(ParseError::Expected {
                pos,
                expected: "newline",
                found: other.describe(),
            }),
        }
    }
}
