//! Parse error types and source positions.

/// A line/column position within a source file. Both are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(line: u32, col: u32) -> Self {
        Pos { line, col }
    }
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Errors produced by the scanners and parsers in this crate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("{pos}: unexpected character {ch:?}")]
    UnexpectedChar { pos: Pos, ch: char },

    #[error("{pos}: NUL byte in source")]
    NulByte { pos: Pos },

    #[error("{pos}: unterminated string literal")]
    UnterminatedString { pos: Pos },

    #[error("{pos}: unterminated comment")]
    UnterminatedComment { pos: Pos },

    #[error("{pos}: invalid escape sequence")]
    InvalidEscape { pos: Pos },

    #[error("{pos}: unexpected end of file")]
    UnexpectedEof { pos: Pos },

    #[error("{pos}: expected {expected}, found {found}")]
    Expected {
        pos: Pos,
        expected: &'static str,
        found: String,
    },

    #[error("{pos}: duplicate field {name:?}")]
    DuplicateField { pos: Pos, name: String },

    #[error("{pos}: unterminated attribute body")]
    UnterminatedAttribute { pos: Pos },

    /// An operator outside the `&&`/`||`/`!` algebra of `@if` expressions.
    #[error("{pos}: operator {op:?} is not allowed in a tag expression")]
    BadTagOperator { pos: Pos, op: String },
}

impl ParseError {
    /// The position the error points at.
    pub fn pos(&self) -> Pos {
        match self {
            ParseError::UnexpectedChar { pos, .. }
            | ParseError::NulByte { pos }
            | ParseError::UnterminatedString { pos }
            | ParseError::UnterminatedComment { pos }
            | ParseError::InvalidEscape { pos }
            | ParseError::UnexpectedEof { pos }
            | ParseError::Expected { pos, .. }
            | ParseError::DuplicateField { pos, .. }
            | ParseError::UnterminatedAttribute { pos }
            | ParseError::BadTagOperator { pos, .. } => *pos,
        }
    }
}

/// Result type alias for parse operations.
pub type Result<T> = std::result::Result<T, ParseError>;
