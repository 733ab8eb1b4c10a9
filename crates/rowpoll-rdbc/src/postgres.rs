//! PostgreSQL backend implementation for rowpoll-rdbc
//!
//! Rows are streamed with `query_raw`, so a fetch that only needs the first
//! row (or the first two, for single-result checks) stops reading early.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::{ToSql, Type};
use tracing::{debug, error};

use crate::connection::{
    redact_url, Connection, ConnectionConfig, ConnectionFactory, DatabaseType, RowStream,
};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Convert a Value to a tokio-postgres compatible parameter
fn value_to_sql(value: &Value) -> Box<dyn ToSql + Sync + Send> {
    match value {
        Value::Null => Box::new(Option::<i32>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int16(n) => Box::new(*n),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float32(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::Decimal(d) => Box::new(*d),
        Value::String(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
        Value::Uuid(u) => Box::new(*u),
        Value::Json(j) => Box::new(j.clone()),
        // arrays travel as JSON
        Value::Array(_) => Box::new(value.to_json()),
    }
}

/// Convert a tokio-postgres row to a Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values: Vec<Value> = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect();

    Row::new(columns, values)
}

fn get_opt<'a, T>(row: &'a tokio_postgres::Row, idx: usize) -> Option<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

/// Convert a PostgreSQL column value to a Value
fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Value {
    let value = match *pg_type {
        Type::BOOL => get_opt(row, idx).map(Value::Bool),
        Type::INT2 => get_opt(row, idx).map(Value::Int16),
        Type::INT4 => get_opt(row, idx).map(Value::Int32),
        Type::INT8 => get_opt(row, idx).map(Value::Int64),
        Type::FLOAT4 => get_opt(row, idx).map(Value::Float32),
        Type::FLOAT8 => get_opt(row, idx).map(Value::Float64),
        Type::NUMERIC => get_opt(row, idx).map(Value::Decimal),
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => {
            get_opt(row, idx).map(Value::String)
        }
        Type::BYTEA => get_opt(row, idx).map(Value::Bytes),
        Type::DATE => get_opt(row, idx).map(Value::Date),
        Type::TIME => get_opt(row, idx).map(Value::Time),
        Type::TIMESTAMP => get_opt(row, idx).map(Value::DateTime),
        Type::TIMESTAMPTZ => get_opt(row, idx).map(Value::DateTimeTz),
        Type::UUID => get_opt(row, idx).map(Value::Uuid),
        Type::JSON | Type::JSONB => get_opt(row, idx).map(Value::Json),
        // unknown types come back as text when the driver allows it
        _ => get_opt(row, idx).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    closed: AtomicBool,
    query_timeout: Option<Duration>,
}

impl PgConnection {
    /// Create a new connection from a tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
            query_timeout: None,
        }
    }

    /// Bound the time spent waiting for a query to start returning rows
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<RowStream> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection("connection is closed"));
        }

        let boxed_params: Vec<Box<dyn ToSql + Sync + Send>> =
            params.iter().map(value_to_sql).collect();
        let param_iter = boxed_params.iter().map(|p| p.as_ref() as &dyn ToSql);

        let submit = self.client.query_raw(sql, param_iter);
        let pg_rows = match self.query_timeout {
            Some(timeout) => tokio::time::timeout(timeout, submit)
                .await
                .map_err(|_| Error::timeout(format!("query did not start within {timeout:?}")))?,
            None => submit.await,
        }
        .map_err(|e| Error::query_with_sql(e.to_string(), sql))?;

        let sql = sql.to_string();
        Ok(Box::pin(pg_rows.map(move |row| {
            row.map(|r| pg_row_to_row(&r))
                .map_err(|e| Error::query_with_sql(e.to_string(), sql.as_str()))
        })))
    }

    async fn is_valid(&self) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL connection factory
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let mut pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::config(format!("invalid connection url: {e}")))?;

        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        if let Some(name) = &config.application_name {
            pg_config.application_name(name);
        }

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        // Drive the connection until the client goes away
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        debug!(url = %redact_url(&config.url), "Connected to PostgreSQL");

        let mut conn = PgConnection::new(client);
        if config.query_timeout_ms > 0 {
            conn = conn.with_query_timeout(Duration::from_millis(config.query_timeout_ms));
        }
        Ok(Arc::new(conn))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}

/// Connect with default settings
pub async fn connect(url: &str) -> Result<Arc<dyn Connection>> {
    PgConnectionFactory
        .connect(&ConnectionConfig::new(url))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_connection_factory_type() {
        assert_eq!(PgConnectionFactory.database_type(), DatabaseType::PostgreSQL);
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let err = PgConnectionFactory
            .connect(&ConnectionConfig::new("postgres://host:notaport/db"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
