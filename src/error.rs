//! Error types for xsdstream
//!
//! Library-level failures are reported through [`Error`]. Problems found in
//! schema documents or instance documents are not errors in this sense: they
//! are collected as [`Violation`](crate::validators::Violation) records. A
//! failed compilation surfaces its whole violation list through
//! [`Error::Compile`].

use crate::validators::exceptions::ViolationList;
use thiserror::Error;

/// Result type alias using xsdstream Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for xsdstream operations
#[derive(Error, Debug)]
pub enum Error {
    /// Schema compilation produced one or more violations
    #[error("schema compilation failed with {} violation(s)", .0.len())]
    Compile(ViolationList),

    /// Value error (lexical form not valid for a type)
    #[error("value error: {0}")]
    Value(String),

    /// Namespace error (unbound prefix, bad declaration)
    #[error("namespace error: {0}")]
    Namespace(String),

    /// Name error (invalid XML name)
    #[error("name error: {0}")]
    Name(String),

    /// Limit exceeded error
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Resource loading error
    #[error("resource error: {0}")]
    Resource(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XML parsing error
    #[error("XML error: {0}")]
    Xml(String),

    /// URL parsing error
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Build a value error from any displayable message
    pub fn value(message: impl Into<String>) -> Self {
        Error::Value(message.into())
    }

    /// The compile violations carried by this error, if any
    pub fn violations(&self) -> Option<&ViolationList> {
        match self {
            Error::Compile(list) => Some(list),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<roxmltree::Error> for Error {
    fn from(err: roxmltree::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::exceptions::{Violation, ViolationCode};

    #[test]
    fn test_value_error_display() {
        let err = Error::value("'abc' is not a valid integer");
        assert_eq!(err.to_string(), "value error: 'abc' is not a valid integer");
    }

    #[test]
    fn test_compile_error_carries_violations() {
        let mut list = ViolationList::new(0);
        list.push(Violation::new(ViolationCode::ReferenceNotFound, "type 'foo' not found"));
        let err = Error::Compile(list);
        assert_eq!(err.to_string(), "schema compilation failed with 1 violation(s)");
        assert!(err.violations().unwrap().has_code(ViolationCode::ReferenceNotFound));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
