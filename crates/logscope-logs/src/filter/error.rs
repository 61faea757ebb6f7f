use thiserror::Error;

/// A filter query that could not be compiled
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid filter expression at position {position}: {message}")]
pub struct CompileError {
    /// Character offset into the query where the problem was found
    pub position: usize,
    pub message: String,
}

impl CompileError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// A compiled filter that failed against a particular record
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EvalError {
    /// Numeric comparison on a value (or literal) that is not a number
    #[error("cannot compare field '{field}' numerically: '{value}' is not a number")]
    NotNumeric { field: String, value: String },

    /// MATCH pattern that is not a valid regular expression
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}
