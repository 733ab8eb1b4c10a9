//! Error types for rowpoll
//!
//! Resolution problems (uninitialized source, bad query expression) are
//! raised by `poll()` itself. Everything the database reports travels
//! unchanged inside [`Error::Database`] and surfaces from the fetch handle.

use thiserror::Error;

/// Result type alias for rowpoll
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by query sources and the poller
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The source was polled before `initialize` ran
    #[error("query source is not initialized; call initialize() before polling")]
    Uninitialized,

    /// The query expression produced something other than a string
    #[error("query expression must evaluate to a string, got {value} ({value_type})")]
    QueryType {
        /// Rendered offending value
        value: String,
        /// JSON type name of the offending value
        value_type: &'static str,
    },

    /// The query expression could not be evaluated
    #[error("query expression failed: {0}")]
    Expression(String),

    /// Database failure, propagated as reported
    #[error(transparent)]
    Database(#[from] rowpoll_rdbc::Error),

    /// Messages could not be written out
    #[error("failed to write message: {0}")]
    Io(#[from] std::io::Error),

    /// The poller task panicked or was cancelled
    #[error("poller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an expression error
    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression(message.into())
    }

    /// Build a type-mismatch error for a resolved query value
    pub fn query_type(value: &serde_json::Value) -> Self {
        Self::QueryType {
            value: value.to_string(),
            value_type: json_type_name(value),
        }
    }

    /// Setup mistakes that no amount of re-polling will fix
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Uninitialized | Self::QueryType { .. }
        )
    }

    /// Whether the underlying database error is transient
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Database(e) => e.is_retriable(),
            _ => false,
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
