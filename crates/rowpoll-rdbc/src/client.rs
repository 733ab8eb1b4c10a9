//! Lazy query execution over a [`Connection`]
//!
//! `DatabaseClient::sql` returns a [`FetchSpec`]: nothing runs until a row
//! mapper is attached and the resulting [`RowsFetchSpec`] is awaited
//! (`one`, `first`) or polled (`all`).
//!
//! ```rust,ignore
//! let client = DatabaseClient::new(connection);
//!
//! // Deferred single row; `None` when the query matches nothing
//! let person: Option<Person> = client
//!     .sql("SELECT * FROM person WHERE id = $1")
//!     .bind(1_i32)
//!     .map(EntityRowMapper::new())
//!     .one()
//!     .await?;
//!
//! // Lazy stream of all rows in result-set order
//! let mut people = client.sql("SELECT * FROM person").map(JsonRowMapper).all();
//! while let Some(person) = people.next().await {
//!     println!("{}", person?);
//! }
//! ```

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::mapper::{RawRowMapper, RowMapper};
use crate::types::{Row, Value};

/// Entry point for issuing SQL through a shared connection
#[derive(Clone)]
pub struct DatabaseClient {
    connection: Arc<dyn Connection>,
}

impl DatabaseClient {
    /// Create a client over a shared connection
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Start a fetch for the given SQL text. No I/O happens here.
    pub fn sql(&self, sql: impl Into<String>) -> FetchSpec {
        FetchSpec {
            connection: Arc::clone(&self.connection),
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

impl fmt::Debug for DatabaseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseClient").finish_non_exhaustive()
    }
}

/// A pending query without a row mapper
pub struct FetchSpec {
    connection: Arc<dyn Connection>,
    sql: String,
    params: Vec<Value>,
}

impl FetchSpec {
    /// Bind the next positional parameter
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// The SQL text of this fetch
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameters bound so far
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Attach a row mapper
    pub fn map<T, M>(self, mapper: M) -> RowsFetchSpec<T>
    where
        M: RowMapper<T> + 'static,
    {
        self.map_with(Arc::new(mapper))
    }

    /// Attach a shared row mapper
    pub fn map_with<T>(self, mapper: Arc<dyn RowMapper<T>>) -> RowsFetchSpec<T> {
        RowsFetchSpec {
            connection: self.connection,
            sql: self.sql,
            params: self.params,
            mapper,
        }
    }

    /// Fetch raw rows
    pub fn fetch(self) -> RowsFetchSpec<Row> {
        self.map(RawRowMapper)
    }
}

impl fmt::Debug for FetchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchSpec")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// A pending query whose rows map to `T`.
///
/// Consuming methods hand out deferred handles; the query is submitted when
/// the returned future or stream is first polled.
pub struct RowsFetchSpec<T> {
    connection: Arc<dyn Connection>,
    sql: String,
    params: Vec<Value>,
    mapper: Arc<dyn RowMapper<T>>,
}

impl<T> RowsFetchSpec<T> {
    /// The SQL text of this fetch
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl<T: Send + 'static> RowsFetchSpec<T> {
    /// Fetch at most one row.
    ///
    /// Resolves to `None` when the query matches nothing and fails with
    /// [`Error::IncorrectResultSize`] when a second row shows up. Rows
    /// past the second are never read.
    pub fn one(self) -> BoxFuture<'static, Result<Option<T>>> {
        let Self {
            connection,
            sql,
            params,
            mapper,
        } = self;

        Box::pin(async move {
            debug!(sql = %sql, params = params.len(), "Fetching single row");
            let mut rows = connection.query_stream(&sql, &params).await?;

            let first = match rows.next().await {
                Some(row) => row?,
                None => {
                    trace!(sql = %sql, "Query returned no rows");
                    return Ok(None);
                }
            };

            if let Some(extra) = rows.next().await {
                extra?;
                return Err(Error::IncorrectResultSize {
                    expected: 1,
                    actual: 2,
                });
            }

            mapper.map_row(first).map(Some)
        })
    }

    /// Fetch the first row and discard the rest
    pub fn first(self) -> BoxFuture<'static, Result<Option<T>>> {
        let Self {
            connection,
            sql,
            params,
            mapper,
        } = self;

        Box::pin(async move {
            debug!(sql = %sql, params = params.len(), "Fetching first row");
            let mut rows = connection.query_stream(&sql, &params).await?;
            match rows.next().await {
                Some(row) => mapper.map_row(row?).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Fetch all rows as a lazy stream in result-set order.
    ///
    /// The stream can be consumed once; a failure to submit the query is
    /// its first and only item.
    pub fn all(self) -> BoxStream<'static, Result<T>> {
        let Self {
            connection,
            sql,
            params,
            mapper,
        } = self;

        let rows = stream::once(async move {
            debug!(sql = %sql, params = params.len(), "Fetching all rows");
            connection.query_stream(&sql, &params).await
        })
        .try_flatten();

        Box::pin(rows.map(move |row| row.and_then(|row| mapper.map_row(row))))
    }
}

impl<T> fmt::Debug for RowsFetchSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowsFetchSpec")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
