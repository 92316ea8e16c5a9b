//! Error types shared by every sqlscope crate.
//!
//! Hooks never unwind: they push errors onto the running scope, and the scope
//! folds everything it collected into a single [`Error`] when the operation
//! finishes. A folded value is [`Error::Multiple`], which still answers
//! membership checks for each constituent:
//!
//! ```ignore
//! let err = Error::fold(vec![Error::custom("warning"), Error::RecordNotFound]).unwrap();
//! assert!(err.is_record_not_found());
//! ```

use std::fmt;

/// Result alias used throughout sqlscope.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure sqlscope reports.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A singular find matched zero rows.
    #[error("record not found")]
    RecordNotFound,

    /// A write targeted a field the record does not expose for writing.
    #[error("field `{field}` of `{model}` is not addressable")]
    Unaddressable { model: String, field: String },

    /// Commit or rollback without an active transaction.
    #[error("no valid transaction")]
    InvalidTransaction,

    /// The connection cannot start a transaction.
    #[error("can't start transaction")]
    CantStartTransaction,

    /// A preload or association path names a field that is not a supported relationship.
    #[error("unsupported relation `{field}` on `{model}`")]
    UnsupportedRelation { model: String, field: String },

    /// A path segment or column did not resolve to any field.
    #[error("can't find field `{field}` on `{model}`")]
    UnknownField { model: String, field: String },

    /// A value could not be converted into the requested Rust type.
    #[error("cannot convert {actual} into {expected}")]
    Conversion { expected: &'static str, actual: String },

    /// A raw SQL fragment's placeholders disagree with its bound arguments.
    #[error("expression has {placeholders} placeholder(s) but {args} argument(s)")]
    PlaceholderMismatch { placeholders: usize, args: usize },

    /// Error reported by the database driver.
    #[error("driver error: {0}")]
    Driver(String),

    /// Free-form error raised by user hooks.
    #[error("{0}")]
    Custom(String),

    /// Several accumulated errors.
    #[error("{0}")]
    Multiple(Errors),
}

impl Error {
    /// Construct a [`Error::Custom`].
    pub fn custom(message: impl Into<String>) -> Self {
        Error::Custom(message.into())
    }

    /// Construct a [`Error::Driver`] from anything printable.
    pub fn driver(err: impl fmt::Display) -> Self {
        Error::Driver(err.to_string())
    }

    /// Construct a [`Error::Unaddressable`].
    pub fn unaddressable(model: &str, field: &str) -> Self {
        Error::Unaddressable {
            model: model.to_string(),
            field: field.to_string(),
        }
    }

    /// Construct a [`Error::UnknownField`].
    pub fn unknown_field(model: &str, field: &str) -> Self {
        Error::UnknownField {
            model: model.to_string(),
            field: field.to_string(),
        }
    }

    /// Construct a [`Error::Conversion`].
    pub fn conversion(expected: &'static str, actual: impl fmt::Debug) -> Self {
        Error::Conversion {
            expected,
            actual: format!("{actual:?}"),
        }
    }

    /// Whether this error, or any error folded into it, matches `pred`.
    pub fn contains(&self, pred: &dyn Fn(&Error) -> bool) -> bool {
        match self {
            Error::Multiple(errors) => errors.iter().any(|e| e.contains(pred)),
            other => pred(other),
        }
    }

    /// Whether a [`Error::RecordNotFound`] is present, even inside a composite.
    pub fn is_record_not_found(&self) -> bool {
        self.contains(&|e| matches!(e, Error::RecordNotFound))
    }

    /// Fold accumulated errors: none → `None`, one → itself, more → [`Error::Multiple`].
    pub fn fold(errors: impl IntoIterator<Item = Error>) -> Option<Error> {
        let mut all = Errors::default();
        for e in errors {
            all.push(e);
        }
        all.into_error()
    }
}

/// An ordered, flattened list of errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Errors(Vec<Error>);

impl Errors {
    /// Append an error, flattening nested composites.
    pub fn push(&mut self, err: Error) {
        match err {
            Error::Multiple(inner) => self.0.extend(inner.0),
            other => self.0.push(other),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.0.iter()
    }

    /// Collapse into a single error value.
    pub fn into_error(mut self) -> Option<Error> {
        match self.0.len() {
            0 => None,
            1 => self.0.pop(),
            _ => Some(Error::Multiple(self)),
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl IntoIterator for Errors {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Conversion {
            expected: "json",
            actual: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for Error {
    fn from(err: chrono::ParseError) -> Self {
        Error::Conversion {
            expected: "timestamp",
            actual: err.to_string(),
        }
    }
}
