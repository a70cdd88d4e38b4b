//! Row sources.
//!
//! A [`Source`] yields the rows of one resolved schema as a lazy stream of
//! [`Record`]s. The caller drains the stream and, only when every row arrived
//! without error, calls [`Source::finish`].

mod database;
mod memory;

pub use database::DatabaseSource;
pub use memory::MemorySource;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::stream::BoxStream;

use crate::config::{DatabaseConfig, SourceConfig};
use crate::core::{Record, ResolvedSchema};
use crate::error::{LoadError, Result};
use crate::store::mysql::MysqlConnector;

/// Lazy, finite sequence of fetched records.
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Where the rows of a table come from.
#[async_trait]
pub trait Source: Send + Sync {
    /// Start fetching rows of `schema` changed since `since` (all rows when `None`).
    ///
    /// Every call starts a fresh sequence.
    async fn select(
        &self,
        schema: &Arc<ResolvedSchema>,
        since: Option<NaiveDateTime>,
    ) -> Result<RecordStream>;

    /// Called once after a fetch completed without error.
    async fn finish(&self, _schema: &ResolvedSchema) -> Result<()> {
        Ok(())
    }

    /// Human-readable description, for logs.
    fn name(&self) -> String;
}

/// Build the source a table declaration points at.
pub fn from_config(
    config: &SourceConfig,
    databases: &BTreeMap<String, DatabaseConfig>,
) -> Result<Arc<dyn Source>> {
    match config {
        SourceConfig::Database { database, query } => {
            let db = databases.get(database).ok_or_else(|| {
                LoadError::Config(format!("source refers to unknown database '{}'", database))
            })?;
            let connector = Arc::new(MysqlConnector::new(db.clone()));
            Ok(Arc::new(DatabaseSource::new(connector, query.clone())))
        }
    }
}
