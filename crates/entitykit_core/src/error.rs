//! Store-level error taxonomy.
//!
//! # Responsibility
//! - Give every repository, stack and manager operation one error type.
//! - Keep the underlying `DbError` reachable through `Error::source`.

use crate::db::DbError;
use crate::predicate::PredicateError;
use crate::stack::ContextKind;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// Store could not be opened or migrated; the stack stays unusable until
    /// it is reopened.
    StoreOpenFailed { store: String, reason: String },
    /// Pending changes of a context could not be persisted, or could not be
    /// applied for a read.
    PersistFailed {
        context: ContextKind,
        source: DbError,
    },
    /// Raw filter text could not be parsed into a predicate.
    MalformedQuery { query: String, message: String },
    InvalidPredicateExpression(PredicateError),
    /// Sort key or attribute path outside the accepted syntax.
    InvalidAttribute(String),
    /// Stored attributes could not be encoded or decoded.
    InvalidData(String),
    /// The context executor is no longer accepting work.
    ExecutorUnavailable(ContextKind),
    Db(DbError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StoreOpenFailed { store, reason } => {
                write!(f, "failed to open store `{store}`: {reason}")
            }
            Self::PersistFailed { context, source } => {
                write!(f, "failed to persist {context} context: {source}")
            }
            Self::MalformedQuery { query, message } => {
                write!(f, "malformed filter `{query}`: {message}")
            }
            Self::InvalidPredicateExpression(err) => write!(f, "invalid predicate: {err}"),
            Self::InvalidAttribute(path) => write!(f, "invalid attribute path `{path}`"),
            Self::InvalidData(message) => write!(f, "invalid entity data: {message}"),
            Self::ExecutorUnavailable(context) => {
                write!(f, "{context} context executor is unavailable")
            }
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::PersistFailed { source, .. } => Some(source),
            Self::InvalidPredicateExpression(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::StoreOpenFailed { .. }
            | Self::MalformedQuery { .. }
            | Self::InvalidAttribute(_)
            | Self::InvalidData(_)
            | Self::ExecutorUnavailable(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<PredicateError> for StoreError {
    fn from(value: PredicateError) -> Self {
        Self::InvalidPredicateExpression(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(value.to_string())
    }
}
