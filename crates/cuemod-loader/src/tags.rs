//! The build-attribute file filter.
//!
//! A file carrying `@ignore()` is dropped unconditionally; a file carrying
//! `@if(expr)` is kept iff `expr` evaluates to true under the caller's tag
//! predicate. At most one `@if` per file.

use std::collections::HashSet;
use std::sync::Arc;

use cuemod_parse::{parse_tag_expr, Attribute};

use crate::error::LoadError;

type TagPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Decides which files a package keeps, by build attribute.
#[derive(Clone)]
pub struct TagFilter {
    tag_is_set: TagPredicate,
}

impl Default for TagFilter {
    /// A filter with no tags set: `@if(...)` files are kept only when their
    /// expression holds with every tag false.
    fn default() -> Self {
        TagFilter::new(|_| false)
    }
}

impl TagFilter {
    /// A filter over an arbitrary tag predicate.
    pub fn new(tag_is_set: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        TagFilter {
            tag_is_set: Arc::new(tag_is_set),
        }
    }

    /// A filter where exactly the named tags are set.
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = tags.into_iter().map(Into::into).collect();
        TagFilter::new(move |name| set.contains(name))
    }

    /// Whether a file with the given attributes is kept.
    pub fn keep(&self, file: &str, attributes: &[Attribute]) -> Result<bool, LoadError> {
        let mut if_attr: Option<&Attribute> = None;
        for attr in attributes {
            match attr.name.as_str() {
                "ignore" => return Ok(false),
                "if" => {
                    if let Some(first) = if_attr {
                        return Err(LoadError::MultipleIfAttributes {
                            file: file.to_string(),
                            first: first.pos,
                            second: attr.pos,
                        });
                    }
                    if_attr = Some(attr);
                }
                _ => {}
            }
        }
        match if_attr {
            None => Ok(true),
            Some(attr) => {
                let expr =
                    parse_tag_expr(&attr.body).map_err(|e| LoadError::BadAttribute {
                        file: file.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(expr.eval(&|name| (self.tag_is_set)(name)))
            }
        }
    }
}
