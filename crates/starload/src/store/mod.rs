//! Relational store interface.
//!
//! A [`Store`] is one connection to the warehouse (or a source database),
//! held by exactly one run at a time. [`Connector`] opens stores and
//! [`with_store`] scopes one to a block of work, closing it on every exit path.

pub mod mysql;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::warn;

use crate::core::SqlValue;
use crate::error::Result;

/// MySQL error code for CREATE TABLE on an existing table.
pub const ER_TABLE_EXISTS: u16 = 1050;

/// Failure reported by a store.
///
/// Statement-level failures (the server rejected the statement, or the
/// connection dropped while it ran) are distinct from failures to obtain a
/// usable connection at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The server rejected a statement.
    #[error("{}", format_statement(.code, .message))]
    Statement { code: Option<u16>, message: String },

    /// The connection dropped while a statement was running.
    #[error("connection lost during statement: {0}")]
    Lost(String),

    /// No usable connection could be obtained.
    #[error("{0}")]
    Connection(String),

    /// The store was already closed.
    #[error("store is closed")]
    Closed,
}

fn format_statement(code: &Option<u16>, message: &str) -> String {
    match code {
        Some(code) => format!("ERROR {}: {}", code, message),
        None => message.to_string(),
    }
}

impl StoreError {
    pub fn statement(code: Option<u16>, message: impl Into<String>) -> Self {
        StoreError::Statement {
            code,
            message: message.into(),
        }
    }

    /// Server error code, when the server reported one.
    pub fn code(&self) -> Option<u16> {
        match self {
            StoreError::Statement { code, .. } => *code,
            _ => None,
        }
    }

    /// Whether no further statement can be attempted on this store.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Closed)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Name and type of a result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
}

/// Rows returned by [`Store::query`] with their column metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<SqlValue<'static>>>,
}

impl QueryResult {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// One connection to a relational store.
///
/// Statements run inside an open transaction until [`Store::commit`] or
/// [`Store::rollback`]. Implementations are not shared between runs; every
/// method takes `&mut self`.
#[async_trait]
pub trait Store: Send {
    /// Run a statement and return its rows with column names and types.
    async fn query(&mut self, sql: &str) -> StoreResult<QueryResult>;

    /// Run a statement with bound parameters. Returns affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlValue<'_>]) -> StoreResult<u64>;

    /// Run one statement once per parameter set. Returns affected rows.
    async fn execute_many(&mut self, sql: &str, params: &[Vec<SqlValue<'_>>]) -> StoreResult<u64>;

    /// Value of a session variable, e.g. `max_allowed_packet`.
    async fn session_variable(&mut self, name: &str) -> StoreResult<Option<String>>;

    /// Names of the tables in the current database.
    async fn table_names(&mut self) -> StoreResult<Vec<String>>;

    /// Render a value as a literal this store accepts inline.
    fn escape_literal(&self, value: &SqlValue<'_>) -> String {
        value.to_sql_literal()
    }

    async fn commit(&mut self) -> StoreResult<()>;

    async fn rollback(&mut self) -> StoreResult<()>;

    /// Commit pending work and release the connection. Every later call
    /// fails with [`StoreError::Closed`].
    async fn close(&mut self) -> StoreResult<()>;

    fn is_open(&self) -> bool;
}

/// Opens stores.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Store>>;

    /// Human-readable target, for logs.
    fn describe(&self) -> String;
}

/// Open a store, hand it to `f`, and close it afterwards whatever `f` returned.
///
/// An error from `f` takes precedence over an error from closing.
pub async fn with_store<T, F>(connector: &dyn Connector, f: F) -> Result<T>
where
    F: for<'s> FnOnce(&'s mut dyn Store) -> BoxFuture<'s, Result<T>>,
{
    let mut store = connector.connect().await?;
    let result = f(store.as_mut()).await;
    let closed = store.close().await;

    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!("Closing store after failure also failed: {}", close_err);
            Err(e)
        }
    }
}
