//! Row mappers
//!
//! A `RowMapper<T>` turns one database `Row` into a payload object of type
//! `T`. The payload type of a fetch is chosen by picking a mapper:
//!
//! - [`ColumnMapRowMapper`]: generic key/value mapping (`HashMap<String, Value>`)
//! - [`JsonRowMapper`]: JSON object with columns in result-set order
//! - [`EntityRowMapper`]: any `serde::Deserialize` type, matched by column name
//! - [`SingleColumnRowMapper`]: the only column of a scalar query
//! - [`RawRowMapper`]: the row itself
//! - [`FnRowMapper`]: a closure

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Maps a database row to a payload object
pub trait RowMapper<T>: Send + Sync {
    /// Map a single row
    fn map_row(&self, row: Row) -> Result<T>;
}

/// Maps rows to `HashMap<String, Value>` keyed by column name
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnMapRowMapper;

impl RowMapper<HashMap<String, Value>> for ColumnMapRowMapper {
    fn map_row(&self, row: Row) -> Result<HashMap<String, Value>> {
        Ok(row.into_map())
    }
}

/// Maps rows to JSON objects
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRowMapper;

impl RowMapper<serde_json::Value> for JsonRowMapper {
    fn map_row(&self, row: Row) -> Result<serde_json::Value> {
        Ok(row.to_json())
    }
}

/// Passes rows through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct RawRowMapper;

impl RowMapper<Row> for RawRowMapper {
    fn map_row(&self, row: Row) -> Result<Row> {
        Ok(row)
    }
}

/// Maps the single column of a row to its value.
///
/// Rows with any other column count are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleColumnRowMapper;

impl RowMapper<Value> for SingleColumnRowMapper {
    fn map_row(&self, row: Row) -> Result<Value> {
        if row.len() != 1 {
            return Err(Error::mapping(format!(
                "expected a single column, got {} ({})",
                row.len(),
                row.columns().join(", ")
            )));
        }
        Ok(row.values()[0].clone())
    }
}

/// Maps rows onto a `Deserialize` type through the row's JSON form.
///
/// Column names are used as field names; decimals arrive as strings and
/// temporal values as ISO-8601 text.
pub struct EntityRowMapper<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> EntityRowMapper<T> {
    /// Create a mapper for `T`
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for EntityRowMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EntityRowMapper<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EntityRowMapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRowMapper")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned> RowMapper<T> for EntityRowMapper<T> {
    fn map_row(&self, row: Row) -> Result<T> {
        serde_json::from_value(row.to_json()).map_err(|e| {
            Error::mapping_with_source(
                format!(
                    "cannot map row to {}: {}",
                    std::any::type_name::<T>(),
                    e
                ),
                e,
            )
        })
    }
}

/// Adapts a closure into a [`RowMapper`]
pub struct FnRowMapper<F>(F);

impl<F> FnRowMapper<F> {
    /// Wrap a mapping closure
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<T, F> RowMapper<T> for FnRowMapper<F>
where
    F: Fn(Row) -> Result<T> + Send + Sync,
{
    fn map_row(&self, row: Row) -> Result<T> {
        (self.0)(row)
    }
}
