//! Source that runs a SQL query against a database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::{RecordStream, Source};
use crate::core::{Record, ResolvedSchema, SqlValue};
use crate::error::{LoadError, Result};
use crate::store::{Connector, QueryResult, Store};

/// Placeholder replaced by the literal of the `since` timestamp.
pub const SINCE_PLACEHOLDER: &str = "{since}";

/// Rows of a query result, matched to schema columns by name.
///
/// Result columns the schema does not declare are ignored; schema columns
/// missing from the result stay NULL.
#[derive(Clone)]
pub struct DatabaseSource {
    connector: Arc<dyn Connector>,
    query: String,
}

impl DatabaseSource {
    pub fn new(connector: Arc<dyn Connector>, query: impl Into<String>) -> Self {
        Self {
            connector,
            query: query.into(),
        }
    }

    /// The query with `{since}` substituted. The epoch stands in for `None`.
    pub fn render_query(&self, store: &dyn Store, since: Option<NaiveDateTime>) -> String {
        let literal = store.escape_literal(&SqlValue::DateTime(since.unwrap_or_default()));
        self.query.replace(SINCE_PLACEHOLDER, &literal)
    }

    async fn read_impl(
        self,
        schema: Arc<ResolvedSchema>,
        since: Option<NaiveDateTime>,
        tx: mpsc::Sender<Result<Record>>,
    ) -> Result<()> {
        let mut store = self.connector.connect().await?;
        let sql = self.render_query(store.as_ref(), since);
        debug!(
            "{}: running source query on {}",
            schema.table_name,
            self.connector.describe()
        );

        let result = store.query(&sql).await;
        let closed = store.close().await;
        let result = result?;
        closed?;

        for record in records(&schema, result) {
            if tx.send(record).await.is_err() {
                // Receiver dropped.
                break;
            }
        }
        Ok(())
    }
}

/// Map every result row onto a fresh record of `schema`.
fn records(schema: &Arc<ResolvedSchema>, result: QueryResult) -> Vec<Result<Record>> {
    let mapping: Vec<Option<String>> = result
        .columns
        .iter()
        .map(|c| schema.column(&c.name).map(|col| col.name.clone()))
        .collect();
    let ignored: Vec<&str> = result
        .columns
        .iter()
        .zip(&mapping)
        .filter(|(_, m)| m.is_none())
        .map(|(c, _)| c.name.as_str())
        .collect();
    if !ignored.is_empty() {
        debug!("{}: ignoring result columns {:?}", schema.table_name, ignored);
    }

    result
        .rows
        .into_iter()
        .map(|row| {
            let mut record = Record::new(Arc::clone(schema));
            for (value, column) in row.into_iter().zip(&mapping) {
                if let Some(column) = column {
                    record.set(column, value)?;
                }
            }
            Ok(record)
        })
        .collect()
}

#[async_trait]
impl Source for DatabaseSource {
    async fn select(
        &self,
        schema: &Arc<ResolvedSchema>,
        since: Option<NaiveDateTime>,
    ) -> Result<RecordStream> {
        let (tx, rx) = mpsc::channel(16);
        let this = self.clone();
        let schema = Arc::clone(schema);

        tokio::spawn(async move {
            let table = schema.table_name.clone();
            let result = this.read_impl(schema, since, tx.clone()).await;
            if let Err(e) = result {
                let _ = tx.send(Err(LoadError::source_fetch(table, e))).await;
            }
        });

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    fn name(&self) -> String {
        format!("query on {}", self.connector.describe())
    }
}
