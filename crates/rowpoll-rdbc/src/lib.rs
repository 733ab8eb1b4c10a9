//! # rowpoll-rdbc
//!
//! Async relational database access for rowpoll.
//!
//! This crate is the database side of a polling message source: it turns
//! SQL text into lazy fetch handles and maps result rows into payload
//! objects. It deliberately stops there: no pooling, no transactions and no
//! SQL generation.
//!
//! ## Features
//!
//! - **Lazy fetch handles**: `DatabaseClient::sql(..).map(..)` does no I/O until
//!   the handle is awaited or polled
//! - **Cardinality**: `one()` (at most one row), `first()`, `all()` (stream)
//! - **Row mappers**: key/value maps, JSON, serde entities, scalars, closures
//! - **Value types**: PostgreSQL column types with JSON rendering
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rowpoll_rdbc::prelude::*;
//!
//! let connection = rowpoll_rdbc::postgres::connect("postgres://localhost/db").await?;
//! let client = DatabaseClient::new(connection);
//!
//! let people = client
//!     .sql("SELECT * FROM person")
//!     .map(ColumnMapRowMapper)
//!     .all();
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL support via tokio-postgres
//! - `full` - All features enabled

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod client;
pub mod connection;
pub mod error;
pub mod mapper;
pub mod testing;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::{DatabaseClient, FetchSpec, RowsFetchSpec};
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, DatabaseType, RowStream,
    };
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::mapper::{
        ColumnMapRowMapper, EntityRowMapper, FnRowMapper, JsonRowMapper, RawRowMapper,
        RowMapper, SingleColumnRowMapper,
    };
    pub use crate::types::{Row, Value};
}

pub use error::{Error, Result};
pub use types::{Row, Value};
