//! Error types for rowpoll-rdbc
//!
//! Every error carries an [`ErrorCategory`]. Only connection loss and
//! timeouts are worth retrying; a bad query, a row that does not fit the
//! payload type or a wrong row count will fail the same way next time.

use std::fmt;
use thiserror::Error;

/// Result type for rowpoll-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The connection could not be opened or was lost
    Connection,
    /// The database rejected the query
    Query,
    /// A row could not be turned into the payload type
    Mapping,
    /// A single-row fetch matched several rows
    ResultSize,
    /// The database did not answer in time
    Timeout,
    /// Invalid connection settings
    Configuration,
}

impl ErrorCategory {
    /// Whether errors in this category may succeed on a later attempt
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }

    /// Stable lowercase name, used as a log field
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Query => "query",
            Self::Mapping => "mapping",
            Self::ResultSize => "result_size",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database access error
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Opening or using the connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// The database rejected or aborted the query
    #[error("query error: {message}")]
    Query { message: String, sql: Option<String> },

    /// A row could not be mapped to the requested payload type
    #[error("row mapping error: {message}")]
    Mapping {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// A single-row fetch saw more rows than expected
    #[error("incorrect result size: expected {expected}, actual {actual}")]
    IncorrectResultSize { expected: usize, actual: usize },

    /// The query did not start within the configured timeout
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// The connection settings are unusable
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl Error {
    /// The category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Mapping { .. } => ErrorCategory::Mapping,
            Self::IncorrectResultSize { .. } => ErrorCategory::ResultSize,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Whether a later attempt may succeed
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// The SQL text attached to a query error, if any
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// A connection failure
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// A connection failure with its cause
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// A rejected query, keeping the SQL text
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    /// A mapping failure, for custom row mappers
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
            source: None,
        }
    }

    /// A mapping failure with its cause, for custom row mappers
    pub fn mapping_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Mapping {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// A query that did not start in time
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Unusable connection settings
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
