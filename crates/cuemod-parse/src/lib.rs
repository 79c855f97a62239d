//! Minimal parsing for CUE module sources.
//!
//! This crate deliberately does not contain a full CUE parser. It covers the
//! three narrow grammars the module system needs:
//!
//! - the prefix of a source file up to the end of its import declarations
//!   (`imports`), an order of magnitude cheaper than a whole-file parse;
//! - whole-file data-mode values (`data`), enough to decode `module.cue`;
//! - the boolean expression grammar of `@if(...)` build attributes
//!   (`tagexpr`).

pub mod data;
pub mod error;
pub mod imports;
pub mod scanner;
pub mod tagexpr;

pub use data::{parse_data, Value};
pub use error::{ParseError, Pos, Result};
pub use imports::{parse_imports, Attribute, ImportSpec, SourceFilePrefix};
pub use tagexpr::{parse_tag_expr, TagExpr};
