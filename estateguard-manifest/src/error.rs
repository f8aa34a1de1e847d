//! Error types for manifest and version parsing.

use thiserror::Error;

/// A version or constraint string failed to parse.
///
/// `offset` is the byte position in the input where parsing stopped;
/// `expected` names the token class the parser was looking for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at offset {offset}: expected {expected}")]
pub struct ParseError {
    pub offset: usize,
    pub expected: &'static str,
}

impl ParseError {
    pub(crate) fn new(offset: usize, expected: &'static str) -> Self {
        Self { offset, expected }
    }
}

/// A manifest document violated the schema.
///
/// `field` names the offending field (or `(document)` when the document
/// itself could not be read), `reason` says why it was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("manifest field `{field}`: {reason}")]
pub struct SchemaError {
    pub field: String,
    pub reason: String,
}

impl SchemaError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn document(reason: impl Into<String>) -> Self {
        Self::new("(document)", reason)
    }
}
