//! Error types for nova-pg
//!
//! One variant per failure class a caller has to tell apart:
//! - Connection establishment (fatal, never retried)
//! - Statement execution and transaction control
//! - Bulk-copy transfer and chunked fetch, each wrapping the underlying cause
//! - Validation and configuration problems detected before any network call

use std::fmt;
use thiserror::Error;

/// Result type for nova-pg operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error source carried by the wrapping variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection could not be established
    Connection,
    /// A statement failed server-side
    Execution,
    /// BEGIN / COMMIT / ROLLBACK failed
    Transaction,
    /// A bulk-copy batch failed
    Transfer,
    /// A result pull failed
    Fetch,
    /// Precondition violated before touching the network
    Validation,
    /// Configuration could not be read or parsed
    Configuration,
}

impl ErrorCategory {
    /// Whether errors in this category are raised before any network call
    #[inline]
    pub const fn is_local(self) -> bool {
        matches!(self, Self::Validation | Self::Configuration)
    }
}

/// Main error type for nova-pg
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection establishment failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A submitted statement failed
    #[error("execution error: {message}")]
    Execution {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// Transaction control failed
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A bulk-copy batch failed; the enclosing transaction will roll back
    #[error("error inserting batch {batch} into {table}: {source}")]
    Transfer {
        table: String,
        batch: usize,
        #[source]
        source: Box<Error>,
    },

    /// A result pull failed; no partial result is returned
    #[error("error fetching rows for `{query}`: {source}")]
    Fetch {
        query: String,
        #[source]
        source: Box<Error>,
    },

    /// Precondition violated (empty dataset, missing keys, bad identifier...)
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Configuration file unreadable or malformed
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Execution { .. } => ErrorCategory::Execution,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Transfer { .. } => ErrorCategory::Transfer,
            Self::Fetch { .. } => ErrorCategory::Fetch,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create an execution error carrying the failed statement
    pub fn execution_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a failed bulk-copy batch
    pub fn transfer(table: impl Into<String>, batch: usize, source: Error) -> Self {
        Self::Transfer {
            table: table.into(),
            batch,
            source: Box::new(source),
        }
    }

    /// Wrap a failed execution or pull of a chunked read
    pub fn fetch(query: impl Into<String>, source: Error) -> Self {
        Self::Fetch {
            query: query.into(),
            source: Box::new(source),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// SQL text of the failed statement, if known
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Execution { sql, .. } => sql.as_deref(),
            Self::Transfer { source, .. } | Self::Fetch { source, .. } => source.sql(),
            _ => None,
        }
    }

    /// The innermost nova-pg error (unwraps Transfer and Fetch)
    pub fn root(&self) -> &Error {
        match self {
            Self::Transfer { source, .. } | Self::Fetch { source, .. } => source.root(),
            other => other,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Execution => write!(f, "execution"),
            Self::Transaction => write!(f, "transaction"),
            Self::Transfer => write!(f, "transfer"),
            Self::Fetch => write!(f, "fetch"),
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
