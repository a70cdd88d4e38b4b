//! One warehouse table: its resolved schema, its sources and the operations
//! that move rows from the sources into the store.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDateTime, Utc};
use futures::StreamExt;
use tracing::{debug, error, info};

use crate::core::{Record, ResolvedSchema, SqlValue};
use crate::error::{LoadError, Result};
use crate::loader::{BatchLoader, RowInsertError};
use crate::source::Source;
use crate::sql::SqlGenerator;
use crate::store::{Store, ER_TABLE_EXISTS};

/// Stage of an update, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    Fetching,
    Finishing,
    Inserting,
    Failed,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdatePhase::Idle => "idle",
            UpdatePhase::Fetching => "fetching",
            UpdatePhase::Finishing => "finishing",
            UpdatePhase::Inserting => "inserting",
            UpdatePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of [`Table::update`].
#[derive(Debug)]
pub struct UpdateReport {
    pub table: String,
    /// Records fetched from the source.
    pub fetched: usize,
    /// Rows the loader could not insert.
    pub failed: Vec<RowInsertError>,
}

impl UpdateReport {
    pub fn inserted(&self) -> usize {
        self.fetched - self.failed.len()
    }
}

/// A resolved schema bound to its sources.
#[derive(Clone)]
pub struct Table {
    schema: Arc<ResolvedSchema>,
    source: Option<Arc<dyn Source>>,
    historical_source: Option<Arc<dyn Source>>,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("schema", &self.schema.name)
            .field("source", &self.source.as_ref().map(|s| s.name()))
            .field(
                "historical_source",
                &self.historical_source.as_ref().map(|s| s.name()),
            )
            .finish()
    }
}

impl Table {
    pub fn new(schema: Arc<ResolvedSchema>) -> Self {
        Self {
            schema,
            source: None,
            historical_source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn with_historical_source(mut self, source: Arc<dyn Source>) -> Self {
        self.historical_source = Some(source);
        self
    }

    pub fn schema(&self) -> &Arc<ResolvedSchema> {
        &self.schema
    }

    /// Table name in the store.
    pub fn name(&self) -> &str {
        &self.schema.table_name
    }

    pub fn sql(&self) -> SqlGenerator<'_> {
        SqlGenerator::new(&self.schema)
    }

    /// Create the table unless it already exists.
    pub async fn build(&self, store: &mut dyn Store) -> Result<()> {
        self.create_table(store, true).await
    }

    /// # Errors
    ///
    /// `LoadError::TableExists` when `if_not_exists` is false and the table is present.
    pub async fn create_table(&self, store: &mut dyn Store, if_not_exists: bool) -> Result<()> {
        let sql = self.sql().create_table(if_not_exists)?;
        debug!("{}: {}", self.name(), sql);
        match store.execute(&sql, &[]).await {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(ER_TABLE_EXISTS) => {
                Err(LoadError::TableExists(self.name().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn drop_table(&self, store: &mut dyn Store, if_exists: bool) -> Result<()> {
        let sql = self.sql().drop_table(if_exists)?;
        debug!("{}: {}", self.name(), sql);
        store.execute(&sql, &[]).await?;
        Ok(())
    }

    pub async fn table_exists(&self, store: &mut dyn Store) -> Result<bool> {
        let names = store.table_names().await?;
        Ok(names.iter().any(|n| n.eq_ignore_ascii_case(self.name())))
    }

    /// Fetch every record from the regular or the historical source.
    ///
    /// The whole sequence is drained before anything else happens. The
    /// source's `finish` hook runs only if no row failed.
    ///
    /// # Errors
    ///
    /// `LoadError::NoSource` if the requested source is not configured,
    /// `LoadError::SourceFetch` for anything the source raised.
    pub async fn fetch(&self, since: Option<NaiveDateTime>, historical: bool) -> Result<Vec<Record>> {
        let source = if historical {
            &self.historical_source
        } else {
            &self.source
        };
        let source = source
            .as_ref()
            .ok_or_else(|| LoadError::NoSource(self.name().to_string()))?;

        self.transition(UpdatePhase::Idle, UpdatePhase::Fetching);
        let mut stream = match source.select(&self.schema, since).await {
            Ok(stream) => stream,
            Err(e) => return Err(self.fetch_failed(UpdatePhase::Fetching, e)),
        };

        let mut records = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(record) => records.push(record),
                Err(e) => return Err(self.fetch_failed(UpdatePhase::Fetching, e)),
            }
        }

        self.transition(UpdatePhase::Fetching, UpdatePhase::Finishing);
        if let Err(e) = source.finish(&self.schema).await {
            return Err(self.fetch_failed(UpdatePhase::Finishing, e));
        }
        info!("{}: Fetched {} record(s) from {}", self.name(), records.len(), source.name());
        Ok(records)
    }

    /// Render `records` and hand them to the loader in one call.
    ///
    /// Dimension lookups resolve against rows applicable at `as_of`.
    pub async fn insert(
        &self,
        store: &mut dyn Store,
        loader: &BatchLoader,
        records: &[Record],
        as_of: NaiveDateTime,
    ) -> Result<Vec<RowInsertError>> {
        if records.is_empty() {
            debug!("{}: no records to insert", self.name());
            return Ok(Vec::new());
        }
        let generator = self.sql();
        let template = generator.insert_template()?;
        let rows = generator.render_rows(
            records,
            &|v: &SqlValue<'_>| store.escape_literal(v),
            as_of,
        )?;
        loader.load(store, self.name(), &template, &rows).await
    }

    /// Fetch from the source, then insert everything fetched.
    pub async fn update(
        &self,
        store: &mut dyn Store,
        loader: &BatchLoader,
        since: Option<NaiveDateTime>,
        historical: bool,
    ) -> Result<UpdateReport> {
        let start = Instant::now();
        let records = self.fetch(since, historical).await?;
        let fetched = records.len();

        self.transition(UpdatePhase::Finishing, UpdatePhase::Inserting);
        let failed = self
            .insert(store, loader, &records, Utc::now().naive_utc())
            .await?;
        self.transition(UpdatePhase::Inserting, UpdatePhase::Idle);

        info!(
            "{}: update done, {} fetched, {} failed in {:?}",
            self.name(),
            fetched,
            failed.len(),
            start.elapsed()
        );
        Ok(UpdateReport {
            table: self.name().to_string(),
            fetched,
            failed,
        })
    }

    fn transition(&self, from: UpdatePhase, to: UpdatePhase) {
        debug!("{}: {} -> {}", self.name(), from, to);
    }

    fn fetch_failed(&self, phase: UpdatePhase, err: LoadError) -> LoadError {
        self.transition(phase, UpdatePhase::Failed);
        error!("{}: fetch failed: {}", self.name(), err);
        match err {
            e @ LoadError::SourceFetch { .. } => e,
            other => LoadError::source_fetch(self.name(), other),
        }
    }
}
