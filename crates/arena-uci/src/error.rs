use thiserror::Error;

use crate::option::OptionKind;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UciError {
    #[error("option declaration is missing `{field}`: {line}")]
    MissingField { field: &'static str, line: String },

    #[error("option declaration has an empty `{field}`: {line}")]
    EmptyField { field: &'static str, line: String },

    #[error("option declaration repeats `{field}`: {line}")]
    DuplicateField { field: &'static str, line: String },

    #[error("unexpected token `{token}` before any keyword: {line}")]
    UnexpectedToken { token: String, line: String },

    #[error("unknown option type `{kind}`: {line}")]
    UnknownKind { kind: String, line: String },

    #[error("`{field}` value `{value}` is not an integer: {line}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        line: String,
    },

    #[error("`{field}` is not allowed for {kind} options: {line}")]
    UnexpectedField {
        field: &'static str,
        kind: OptionKind,
        line: String,
    },

    #[error("invalid value for option {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}
