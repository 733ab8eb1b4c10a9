//! Scripted connection for tests
//!
//! `MockConnection` answers queries from canned responses keyed by SQL text
//! and records every query it receives, so tests can assert both on what
//! came back and on whether the database was touched at all.
//!
//! ```rust,ignore
//! let conn = Arc::new(
//!     MockConnection::new()
//!         .with_rows("SELECT * FROM person", vec![alice, bob])
//!         .with_error("SELECT * FROM nope", "relation \"nope\" does not exist"),
//! );
//! let client = DatabaseClient::new(conn.clone());
//! // ...
//! assert_eq!(conn.query_count(), 1);
//! ```

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, RowStream};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

#[derive(Debug, Clone)]
struct ScriptedResponse {
    rows: Vec<Row>,
    /// Fails the query before any row is produced
    submit_error: Option<String>,
    /// Yielded after all rows
    stream_error: Option<String>,
}

/// A connection that replays scripted responses
#[derive(Debug, Default)]
pub struct MockConnection {
    responses: Mutex<HashMap<String, ScriptedResponse>>,
    log: Mutex<Vec<(String, Vec<Value>)>>,
    closed: AtomicBool,
}

impl MockConnection {
    /// Create a connection with no scripted responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with the given rows
    pub fn with_rows(self, sql: impl Into<String>, rows: Vec<Row>) -> Self {
        self.script(
            sql,
            ScriptedResponse {
                rows,
                submit_error: None,
                stream_error: None,
            },
        )
    }

    /// Fail `sql` when it is submitted
    pub fn with_error(self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.script(
            sql,
            ScriptedResponse {
                rows: Vec::new(),
                submit_error: Some(message.into()),
                stream_error: None,
            },
        )
    }

    /// Answer `sql` with the given rows, then fail mid-stream
    pub fn with_rows_then_error(
        self,
        sql: impl Into<String>,
        rows: Vec<Row>,
        message: impl Into<String>,
    ) -> Self {
        self.script(
            sql,
            ScriptedResponse {
                rows,
                submit_error: None,
                stream_error: Some(message.into()),
            },
        )
    }

    fn script(self, sql: impl Into<String>, response: ScriptedResponse) -> Self {
        self.responses.lock().insert(sql.into(), response);
        self
    }

    /// SQL texts received so far, in order
    pub fn queries(&self) -> Vec<String> {
        self.log.lock().iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Number of queries received so far
    pub fn query_count(&self) -> usize {
        self.log.lock().len()
    }

    /// Parameters of the most recent query
    pub fn last_params(&self) -> Option<Vec<Value>> {
        self.log.lock().last().map(|(_, params)| params.clone())
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<RowStream> {
        if self.is_closed() {
            return Err(Error::connection("connection is closed"));
        }

        self.log.lock().push((sql.to_string(), params.to_vec()));

        let response = self
            .responses
            .lock()
            .get(sql)
            .cloned()
            .ok_or_else(|| Error::query_with_sql("no scripted response for query", sql))?;

        if let Some(message) = response.submit_error {
            return Err(Error::query_with_sql(message, sql));
        }

        let mut items: Vec<Result<Row>> = response.rows.into_iter().map(Ok).collect();
        if let Some(message) = response.stream_error {
            items.push(Err(Error::connection(message)));
        }

        Ok(Box::pin(stream::iter(items)))
    }

    async fn is_valid(&self) -> bool {
        !self.is_closed()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Hands out a shared [`MockConnection`] and remembers the settings it was asked for
#[derive(Debug, Default)]
pub struct MockConnectionFactory {
    connection: Arc<MockConnection>,
    configs: Mutex<Vec<ConnectionConfig>>,
    fail_with: Option<String>,
}

impl MockConnectionFactory {
    /// Serve `connection` to every caller
    pub fn new(connection: Arc<MockConnection>) -> Self {
        Self {
            connection,
            configs: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }

    /// Refuse every connection attempt
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    /// URLs passed to `connect`, in order
    pub fn urls(&self) -> Vec<String> {
        self.configs.lock().iter().map(|c| c.url.clone()).collect()
    }

    /// Settings passed to `connect`, in order
    pub fn configs(&self) -> Vec<ConnectionConfig> {
        self.configs.lock().clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        self.configs.lock().push(config.clone());
        if let Some(message) = &self.fail_with {
            return Err(Error::connection(message.clone()));
        }
        Ok(self.connection.clone())
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Unknown
    }
}
