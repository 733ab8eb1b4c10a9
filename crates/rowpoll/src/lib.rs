//! # rowpoll
//!
//! A polling message source over a relational database.
//!
//! On every poll a [`QuerySource`](source::QuerySource) resolves its query
//! (fixed text, a context variable, a `#{name}` template or a closure) and
//! returns a lazy handle over the result: a deferred single row or a stream
//! of every row in result-set order, each mapped to the configured payload
//! type. The [`Poller`](poller::Poller) drives a source on an interval and
//! turns rows into [`Message`](message::Message)s, routing failures to an
//! error channel.
//!
//! ```rust,ignore
//! use rowpoll::prelude::*;
//!
//! let connection = rowpoll::rdbc::postgres::connect("postgres://localhost/shop").await?;
//! let source = QuerySource::builder(DatabaseClient::new(connection), "SELECT * FROM orders")
//!     .row_mapper(JsonRowMapper)
//!     .initialize(&Registry::new());
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! tokio::spawn(Poller::new(Arc::new(source), tx).run(shutdown_rx));
//!
//! while let Some(message) = rx.recv().await {
//!     println!("{}", message.payload());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod poller;
pub mod query;
pub mod runner;
pub mod source;
pub mod stats;

pub use rowpoll_rdbc as rdbc;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{RowpollConfig, SensitiveString};
    pub use crate::context::{EvaluationContext, Registry};
    pub use crate::error::{Error, Result};
    pub use crate::message::{ErrorMessage, Message, MessageHeaders, MessageSource};
    pub use crate::poller::{Poller, StopReason};
    pub use crate::query::{
        FnExpression, QueryExpression, QuerySpec, TemplateExpression, VariableExpression,
    };
    pub use crate::runner::{run_source, RunEnd, RunOptions, RunSummary};
    pub use crate::source::{
        ColumnMap, Payload, QuerySource, QuerySourceBuilder, SourceLifecycle, COMPONENT_TYPE,
    };
    pub use crate::stats::{AtomicSourceStats, SourceStats};
    pub use rowpoll_rdbc::prelude::{
        DatabaseClient, EntityRowMapper, FnRowMapper, JsonRowMapper, RowMapper, Value,
    };
}

pub use error::{Error, Result};
