//! Query-polling message source
//!
//! A [`QuerySource`] resolves its query on every poll and hands back a lazy
//! fetch handle over the result: a deferred single value when built with
//! `expect_single_result(true)`, otherwise a stream of every row in
//! result-set order. Polling never blocks and never touches the database;
//! the query runs when the returned handle is awaited or polled.
//!
//! # Lifecycle
//!
//! `QuerySource::builder` returns a [`QuerySourceBuilder`]. Consuming it with
//! `initialize(&registry)` builds the evaluation context and yields a ready
//! `QuerySource`. When a source has to exist before its registry does,
//! [`SourceLifecycle`] holds the builder and rejects polls with
//! [`Error::Uninitialized`] until it is initialized.
//!
//! ```rust,ignore
//! let source = QuerySource::builder(client, QuerySpec::literal("SELECT * FROM person"))
//!     .payload_type::<Person>()
//!     .initialize(&Registry::new());
//!
//! let mut people = source.poll()?.into_stream().expect("multi-row source");
//! while let Some(person) = people.next().await {
//!     println!("{:?}", person?);
//! }
//! ```

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use parking_lot::Mutex;
use rowpoll_rdbc::prelude::{
    ColumnMapRowMapper, ConnectionFactory, DatabaseClient, EntityRowMapper, RowMapper, Value,
};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::config::RowpollConfig;
use crate::context::{EvaluationContext, Registry};
use crate::error::{Error, Result};
use crate::message::{Message, MessageHeaders, MessageSource};
use crate::query::QuerySpec;
use crate::stats::{AtomicSourceStats, SourceStats};

/// Component type reported by query sources
pub const COMPONENT_TYPE: &str = "rdbc:inbound-channel-adapter";

/// Default payload: column name to value
pub type ColumnMap = HashMap<String, Value>;

/// The result of one poll
pub enum Payload<T> {
    /// At most one mapped row
    Single(BoxFuture<'static, rowpoll_rdbc::Result<Option<T>>>),
    /// Every mapped row, in result-set order
    Stream(BoxStream<'static, rowpoll_rdbc::Result<T>>),
}

impl<T: Send + 'static> Payload<T> {
    /// Whether this is a single-value payload
    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }

    /// The deferred single value, if this is one
    pub fn into_single(self) -> Option<BoxFuture<'static, rowpoll_rdbc::Result<Option<T>>>> {
        match self {
            Self::Single(fut) => Some(fut),
            Self::Stream(_) => None,
        }
    }

    /// The row stream, if this is one
    pub fn into_stream(self) -> Option<BoxStream<'static, rowpoll_rdbc::Result<T>>> {
        match self {
            Self::Single(_) => None,
            Self::Stream(stream) => Some(stream),
        }
    }

    /// Run the query and gather every mapped row
    pub async fn collect(self) -> Result<Vec<T>> {
        match self {
            Self::Single(fut) => Ok(fut.await?.into_iter().collect()),
            Self::Stream(stream) => Ok(stream.try_collect().await?),
        }
    }
}

impl<T> fmt::Debug for Payload<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(_) => f.write_str("Payload::Single(..)"),
            Self::Stream(_) => f.write_str("Payload::Stream(..)"),
        }
    }
}

/// An uninitialized query source
pub struct QuerySourceBuilder<T = ColumnMap> {
    client: DatabaseClient,
    query: QuerySpec,
    mapper: Arc<dyn RowMapper<T>>,
    expect_single_result: bool,
    headers: HashMap<String, String>,
}

impl QuerySourceBuilder<ColumnMap> {
    /// Start a source producing column maps
    pub fn new(client: DatabaseClient, query: impl Into<QuerySpec>) -> Self {
        Self {
            client,
            query: query.into(),
            mapper: Arc::new(ColumnMapRowMapper),
            expect_single_result: false,
            headers: HashMap::new(),
        }
    }

    /// Build a source from configuration, connecting through `factory`.
    ///
    /// Fails with [`Error::Configuration`] when the query or connection URL is
    /// missing, before any connection is attempted.
    pub async fn from_config(
        config: &RowpollConfig,
        factory: &dyn ConnectionFactory,
    ) -> Result<Self> {
        config.validate_config()?;
        let connection_config = config.connection_config()?;

        let connection = factory.connect(&connection_config).await?;
        info!(
            database = %factory.database_type(),
            single = config.expect_single_result,
            "Connected query source"
        );

        Ok(Self::new(DatabaseClient::new(connection), config.query_spec())
            .expect_single_result(config.expect_single_result)
            .headers(config.headers.clone()))
    }
}

impl<T: Send + 'static> QuerySourceBuilder<T> {
    /// Map rows onto a `Deserialize` type by column name
    pub fn payload_type<U>(self) -> QuerySourceBuilder<U>
    where
        U: DeserializeOwned + Send + 'static,
    {
        self.row_mapper(EntityRowMapper::<U>::new())
    }

    /// Map rows with a custom mapper
    pub fn row_mapper<U, M>(self, mapper: M) -> QuerySourceBuilder<U>
    where
        M: RowMapper<U> + 'static,
    {
        QuerySourceBuilder {
            client: self.client,
            query: self.query,
            mapper: Arc::new(mapper),
            expect_single_result: self.expect_single_result,
            headers: self.headers,
        }
    }

    /// Return at most one row per poll instead of a stream
    pub fn expect_single_result(mut self, single: bool) -> Self {
        self.expect_single_result = single;
        self
    }

    /// Add a static header to every message
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add static headers to every message
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Build the evaluation context and make the source ready
    pub fn initialize(self, registry: &Registry) -> QuerySource<T> {
        debug!(
            query = ?self.query,
            single = self.expect_single_result,
            registry_entries = registry.len(),
            "Initializing query source"
        );

        QuerySource {
            client: self.client,
            query: self.query,
            mapper: self.mapper,
            expect_single_result: self.expect_single_result,
            headers: self.headers,
            context: Arc::new(EvaluationContext::from_registry(registry)),
            stats: Arc::new(AtomicSourceStats::default()),
        }
    }
}

impl<T> fmt::Debug for QuerySourceBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySourceBuilder")
            .field("query", &self.query)
            .field("expect_single_result", &self.expect_single_result)
            .finish_non_exhaustive()
    }
}

/// A ready query source
pub struct QuerySource<T = ColumnMap> {
    client: DatabaseClient,
    query: QuerySpec,
    mapper: Arc<dyn RowMapper<T>>,
    expect_single_result: bool,
    headers: HashMap<String, String>,
    context: Arc<EvaluationContext>,
    stats: Arc<AtomicSourceStats>,
}

impl QuerySource<ColumnMap> {
    /// Start building a source over `client`
    pub fn builder(client: DatabaseClient, query: impl Into<QuerySpec>) -> QuerySourceBuilder {
        QuerySourceBuilder::new(client, query)
    }
}

impl<T: Send + 'static> QuerySource<T> {
    /// Resolve the query and return a lazy handle over its result.
    ///
    /// Resolution failures are returned here and no query is issued.
    /// Database failures surface from the handle.
    pub fn poll(&self) -> Result<Payload<T>> {
        self.stats.record_poll();

        let sql = self.query.resolve(&self.context).inspect_err(|e| {
            self.stats.record_resolution_failure();
            warn!(query = ?self.query, error = %e, "Failed to resolve query");
        })?;

        debug!(sql = %sql, single = self.expect_single_result, "Polling query source");

        let fetch = self.client.sql(sql).map_with(Arc::clone(&self.mapper));
        Ok(if self.expect_single_result {
            Payload::Single(fetch.one())
        } else {
            Payload::Stream(fetch.all())
        })
    }
}

impl<T> QuerySource<T> {
    /// The context query expressions are evaluated against
    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }

    /// The configured query
    pub fn query(&self) -> &QuerySpec {
        &self.query
    }

    /// Whether polls return at most one row
    pub fn is_single_result(&self) -> bool {
        self.expect_single_result
    }

    /// Shared statistics counters
    pub fn stats_handle(&self) -> Arc<AtomicSourceStats> {
        Arc::clone(&self.stats)
    }

    /// Statistics snapshot
    pub fn stats(&self) -> SourceStats {
        self.stats.snapshot()
    }

    fn message_headers(&self) -> MessageHeaders {
        MessageHeaders::with_values(self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

impl<T: Send + 'static> MessageSource<T> for QuerySource<T> {
    fn receive(&self) -> Result<Message<Payload<T>>> {
        let payload = self.poll()?;
        Ok(Message::with_headers(payload, self.message_headers()))
    }

    fn component_type(&self) -> &'static str {
        COMPONENT_TYPE
    }
}

impl<T> fmt::Debug for QuerySource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySource")
            .field("query", &self.query)
            .field("expect_single_result", &self.expect_single_result)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

/// A query source that may be polled before it is initialized.
///
/// Every poll before [`initialize`](Self::initialize) fails with
/// [`Error::Uninitialized`]. Initialization happens once; later calls are
/// ignored.
pub struct SourceLifecycle<T = ColumnMap> {
    pending: Mutex<Option<QuerySourceBuilder<T>>>,
    ready: OnceLock<QuerySource<T>>,
}

impl<T: Send + 'static> SourceLifecycle<T> {
    /// Hold an uninitialized source
    pub fn new(builder: QuerySourceBuilder<T>) -> Self {
        Self {
            pending: Mutex::new(Some(builder)),
            ready: OnceLock::new(),
        }
    }

    /// Initialize the held source. Returns `false` if it already was.
    pub fn initialize(&self, registry: &Registry) -> bool {
        let mut pending = self.pending.lock();
        match pending.take() {
            Some(builder) => {
                let source = builder.initialize(registry);
                // the lock serializes initialization, so the cell is empty here
                let _ = self.ready.set(source);
                true
            }
            None => {
                debug!("Query source already initialized");
                false
            }
        }
    }

    /// Whether `initialize` has run
    pub fn is_initialized(&self) -> bool {
        self.ready.get().is_some()
    }

    /// The ready source
    pub fn source(&self) -> Result<&QuerySource<T>> {
        self.ready.get().ok_or(Error::Uninitialized)
    }

    /// Poll the held source
    pub fn poll(&self) -> Result<Payload<T>> {
        self.source()?.poll()
    }
}

impl<T: Send + 'static> MessageSource<T> for SourceLifecycle<T> {
    fn receive(&self) -> Result<Message<Payload<T>>> {
        self.source()?.receive()
    }

    fn component_type(&self) -> &'static str {
        COMPONENT_TYPE
    }
}

impl<T> fmt::Debug for SourceLifecycle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceLifecycle")
            .field("initialized", &self.ready.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rowpoll_rdbc::prelude::{JsonRowMapper, Row};
    use rowpoll_rdbc::testing::MockConnection;
    use serde::Deserialize;
    use serde_json::json;

    fn person(id: i32, name: &str) -> Row {
        Row::from_pairs([("id", Value::Int32(id)), ("name", Value::from(name))])
    }

    fn people() -> Vec<Row> {
        vec![person(1, "Alice"), person(2, "Bob"), person(3, "Carol")]
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Person {
        id: i32,
        name: String,
    }

    #[tokio::test]
    async fn test_poll_is_lazy() {
        let conn = Arc::new(MockConnection::new().with_rows("SELECT * FROM person", people()));
        let source = QuerySource::builder(DatabaseClient::new(conn.clone()), "SELECT * FROM person")
            .initialize(&Registry::new());

        let payload = source.poll().unwrap();
        assert!(!payload.is_single());
        assert_eq!(conn.query_count(), 0);

        let rows = payload.collect().await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(conn.query_count(), 1);
    }

    #[tokio::test]
    async fn test_default_payload_is_column_map() {
        let conn = Arc::new(MockConnection::new().with_rows("q", vec![person(1, "Alice")]));
        let source = QuerySource::builder(DatabaseClient::new(conn), "q")
            .expect_single_result(true)
            .initialize(&Registry::new());

        let row: ColumnMap = source
            .poll()
            .unwrap()
            .into_single()
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("Alice")));
    }

    #[tokio::test]
    async fn test_stream_order_with_payload_type() {
        let conn = Arc::new(MockConnection::new().with_rows("SELECT * FROM person", people()));
        let source = QuerySource::builder(DatabaseClient::new(conn), "SELECT * FROM person")
            .payload_type::<Person>()
            .initialize(&Registry::new());

        let ids: Vec<i32> = source
            .poll()
            .unwrap()
            .into_stream()
            .unwrap()
            .map(|p| p.unwrap().id)
            .collect()
            .await;
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_each_poll_reruns_query() {
        let conn = Arc::new(MockConnection::new().with_rows("q", people()));
        let source = QuerySource::builder(DatabaseClient::new(conn.clone()), "q")
            .row_mapper(JsonRowMapper)
            .initialize(&Registry::new());

        for _ in 0..3 {
            assert_eq!(source.poll().unwrap().collect().await.unwrap().len(), 3);
        }
        assert_eq!(conn.query_count(), 3);
        assert_eq!(source.stats().polls, 3);
    }

    #[tokio::test]
    async fn test_expression_reads_context() {
        let conn = Arc::new(
            MockConnection::new()
                .with_rows("SELECT * FROM person", people())
                .with_rows("SELECT * FROM archive", vec![person(9, "Old")]),
        );
        let source = QuerySource::builder(
            DatabaseClient::new(conn),
            QuerySpec::template("SELECT * FROM #{table}"),
        )
        .initialize(&Registry::new().register("table", "person"));

        assert_eq!(source.poll().unwrap().collect().await.unwrap().len(), 3);
        source.context().set_variable("table", "archive");
        assert_eq!(source.poll().unwrap().collect().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_string_expression_skips_database() {
        let conn = Arc::new(MockConnection::new());
        let source = QuerySource::builder(
            DatabaseClient::new(conn.clone()),
            QuerySpec::from_fn(|_| Ok(json!(42))),
        )
        .initialize(&Registry::new());

        let err = source.poll().unwrap_err();
        assert!(err.to_string().contains("42"));
        assert_eq!(conn.query_count(), 0);
        assert_eq!(source.stats().resolution_failures, 1);
    }

    #[tokio::test]
    async fn test_lifecycle_rejects_polls_until_initialized() {
        let conn = Arc::new(MockConnection::new().with_rows("q", people()));
        let lifecycle = SourceLifecycle::new(QuerySource::builder(DatabaseClient::new(conn), "q"));

        for _ in 0..3 {
            assert!(matches!(lifecycle.poll(), Err(Error::Uninitialized)));
            assert!(matches!(lifecycle.receive(), Err(Error::Uninitialized)));
        }

        assert!(lifecycle.initialize(&Registry::new()));
        assert!(!lifecycle.initialize(&Registry::new()));
        assert!(lifecycle.is_initialized());
        assert_eq!(lifecycle.poll().unwrap().collect().await.unwrap().len(), 3);
    }

    #[test]
    fn test_receive_carries_static_headers() {
        let conn = Arc::new(MockConnection::new());
        let source = QuerySource::builder(DatabaseClient::new(conn), "q")
            .header("source", "people")
            .initialize(&Registry::new());

        let message = source.receive().unwrap();
        assert_eq!(message.headers().get("source"), Some("people"));
        assert_eq!(source.component_type(), "rdbc:inbound-channel-adapter");
    }
}
