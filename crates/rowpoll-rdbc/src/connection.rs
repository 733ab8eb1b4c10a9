//! Database connections
//!
//! A [`Connection`] runs one query at a time and hands rows back as a
//! [`RowStream`]. A [`ConnectionFactory`] opens connections from a
//! [`ConnectionConfig`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{Row, Value};

/// Rows of one query, in result-set order. Finite and single-use.
pub type RowStream = BoxStream<'static, Result<Row>>;

/// A database connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Start `sql` with positional `params` and stream its rows
    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<RowStream>;

    /// Whether the connection can still serve queries
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Settings used to open a connection
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Connection URL, e.g. `postgres://app:secret@db:5432/shop`
    pub url: String,
    /// Time allowed to establish the connection, in milliseconds
    pub connect_timeout_ms: u64,
    /// Time allowed for a query to start returning rows, 0 for no limit
    pub query_timeout_ms: u64,
    /// Reported to the server, e.g. in `pg_stat_activity`
    pub application_name: Option<String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &redact_url(&self.url))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("query_timeout_ms", &self.query_timeout_ms)
            .field("application_name", &self.application_name)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 10_000,
            query_timeout_ms: 0,
            application_name: Some("rowpoll".into()),
        }
    }
}

impl ConnectionConfig {
    /// Settings for `url` with default timeouts
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the connect timeout in milliseconds
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the query timeout in milliseconds
    pub fn with_query_timeout(mut self, ms: u64) -> Self {
        self.query_timeout_ms = ms;
        self
    }

    /// Set the name reported to the server
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Backend selected by the URL scheme
    pub fn database_type(&self) -> DatabaseType {
        DatabaseType::from_url(&self.url)
    }
}

/// Mask the password of a connection URL. Unparseable URLs are masked whole.
pub fn redact_url(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return "***".to_string();
    };
    if parsed.password().is_some() {
        let _ = parsed.set_password(Some("***"));
    }
    parsed.to_string()
}

/// Opens connections for one backend
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;

    /// The backend this factory connects to
    fn database_type(&self) -> DatabaseType;
}

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// PostgreSQL
    PostgreSQL,
    /// Anything else
    Unknown,
}

impl DatabaseType {
    /// Backend for a URL, by scheme
    pub fn from_url(url: &str) -> Self {
        match url.split_once("://") {
            Some((scheme, _))
                if scheme.eq_ignore_ascii_case("postgres")
                    || scheme.eq_ignore_ascii_case("postgresql") =>
            {
                Self::PostgreSQL
            }
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::Unknown => "Unknown",
        })
    }
}
