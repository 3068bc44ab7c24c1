//! Application-wide error taxonomy.
//!
//! Repository code wraps driver errors with query context; services translate
//! them into taxonomy kinds; the web layer maps kinds onto HTTP statuses.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad input from a client (missing fields, empty keyword list, ...).
    #[error("{0}")]
    Validation(String),

    /// The addressed entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The request conflicts with current state (e.g. job owned by another worker).
    #[error("{0}")]
    Conflict(String),

    /// A job status transition outside the allowed state machine.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Missing or invalid API credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Database error, annotated with the operation that failed.
    #[error("{context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Work item payload could not be encoded or decoded.
    #[error("payload codec: {0}")]
    Payload(String),

    /// An operation exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(&'static str),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Storage {
            context: "query",
            source,
        }
    }
}

/// Attach query context to sqlx results at the repository boundary.
pub trait StorageContext<T> {
    fn ctx(self, context: &'static str) -> Result<T>;
}

impl<T> StorageContext<T> for std::result::Result<T, sqlx::Error> {
    fn ctx(self, context: &'static str) -> Result<T> {
        self.map_err(|source| Error::Storage { context, source })
    }
}
