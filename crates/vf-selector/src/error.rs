//! Selector parse errors

use thiserror::Error;

/// Result type for selector parsing
pub type SelectorResult<T> = Result<T, SelectorError>;

/// Errors raised while parsing or type-checking a selector
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    /// The source text does not follow the grammar
    #[error("syntax error at offset {offset}: expected {expected}, found {found}")]
    Syntax {
        offset: usize,
        expected: String,
        found: String,
    },

    /// An attribute name that nodes do not expose
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),

    /// A member access other than `.length`, or on a non-string attribute
    #[error("unknown member '{member}' on attribute '{attr}'")]
    UnknownMember { attr: String, member: String },

    /// Operator not defined for the attribute and literal types
    #[error("operator '{op}' cannot compare {attr} with {literal}")]
    MismatchOperator {
        attr: String,
        op: String,
        literal: String,
    },

    #[error("invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("selector marks more than one target unit with '@'")]
    MultipleTargets,
}
