//! In-process source over fixed rows.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::stream::{self, StreamExt};

use super::{RecordStream, Source};
use crate::core::{Record, ResolvedSchema, SqlValue};
use crate::error::{LoadError, Result};

type Row = Vec<(String, SqlValue<'static>)>;

/// Serves a fixed list of rows, optionally failing part way through.
///
/// Clones share the `finish` counter.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    rows: Vec<Row>,
    fail_after: Option<(usize, String)>,
    finished: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row given as `(column, value)` pairs.
    #[must_use]
    pub fn row<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlValue<'static>>,
    {
        self.rows
            .push(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Yield `count` rows, then an error instead of the rest.
    #[must_use]
    pub fn fail_after(mut self, count: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((count, message.into()));
        self
    }

    /// How many times `finish` was called.
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn select(
        &self,
        schema: &Arc<ResolvedSchema>,
        _since: Option<NaiveDateTime>,
    ) -> Result<RecordStream> {
        let limit = self.fail_after.as_ref().map_or(self.rows.len(), |(n, _)| *n);
        let mut items: Vec<Result<Record>> = self
            .rows
            .iter()
            .take(limit)
            .map(|row| Record::from_pairs(Arc::clone(schema), row.iter().cloned()))
            .collect();
        if let Some((_, message)) = &self.fail_after {
            items.push(Err(LoadError::source_fetch(&schema.table_name, message)));
        }
        Ok(stream::iter(items).boxed())
    }

    async fn finish(&self, _schema: &ResolvedSchema) -> Result<()> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> String {
        format!("memory ({} rows)", self.rows.len())
    }
}
