//! In-process store shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use starload::config::ClientConfig;
use starload::core::{Column, ColumnType, ResolvedSchema, SchemaDef, SchemaRole};
use starload::store::{QueryResult, StoreResult};
use starload::{BatchLoader, Connector, LoadError, SqlValue, Store, StoreError};

/// Statements containing this marker are rejected.
pub const POISON: &str = "<poison>";

/// What the store saw, shared between connections.
#[derive(Debug, Default)]
pub struct StoreState {
    pub tables: BTreeSet<String>,
    /// Tables created with a `UNIQUE KEY`.
    pub unique: BTreeSet<String>,
    /// Committed row tuples of unique tables.
    pub stored: BTreeMap<String, BTreeSet<String>>,
    pending_rows: Vec<(String, String)>,
    pub executed: Vec<String>,
    pub pending: Vec<String>,
    pub committed: Vec<String>,
    pub connections: usize,
    pub closed: usize,
}

impl StoreState {
    /// Row tuples of every committed insert, in commit order.
    pub fn committed_rows(&self) -> Vec<String> {
        self.committed.iter().flat_map(|sql| row_tuples(sql)).collect()
    }

    /// Rows a unique table holds, in tuple order.
    pub fn stored_rows(&self, table: &str) -> Vec<String> {
        self.stored
            .get(table)
            .map(|rows| rows.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn inserts_executed(&self) -> usize {
        self.executed
            .iter()
            .filter(|sql| sql.starts_with("INSERT"))
            .count()
    }
}

/// Store rejecting statements over `ceiling` bytes or containing [`POISON`].
pub struct RecordingStore {
    state: Arc<Mutex<StoreState>>,
    ceiling: usize,
    packet: String,
    open: bool,
}

impl RecordingStore {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }
}

fn row_tuples(sql: &str) -> Vec<String> {
    match sql.split_once(" VALUES ") {
        Some((_, values)) => {
            let inner = values.trim_start_matches('(').trim_end_matches(')');
            inner.split("), (").map(|row| format!("({})", row)).collect()
        }
        None => Vec::new(),
    }
}

fn table_name(sql: &str) -> Option<String> {
    let start = sql.find('`')? + 1;
    let end = start + sql[start..].find('`')?;
    Some(sql[start..end].to_string())
}

#[async_trait]
impl Store for RecordingStore {
    async fn query(&mut self, _sql: &str) -> StoreResult<QueryResult> {
        Ok(QueryResult::default())
    }

    async fn execute(&mut self, sql: &str, _params: &[SqlValue<'_>]) -> StoreResult<u64> {
        if !self.open {
            return Err(StoreError::Closed);
        }
        let ceiling = self.ceiling;
        let mut state = self.state();
        state.executed.push(sql.to_string());

        if sql.len() > ceiling {
            return Err(StoreError::statement(
                Some(1153),
                "Got a packet bigger than 'max_allowed_packet' bytes",
            ));
        }
        if sql.contains(POISON) {
            return Err(StoreError::statement(Some(1366), "Incorrect string value"));
        }

        if sql.starts_with("CREATE TABLE") {
            let name = table_name(sql).unwrap_or_default();
            let exists = state.tables.contains(&name);
            if exists && !sql.contains("IF NOT EXISTS") {
                return Err(StoreError::statement(
                    Some(1050),
                    format!("Table '{}' already exists", name),
                ));
            }
            if sql.contains("UNIQUE KEY") {
                state.unique.insert(name.clone());
            }
            state.tables.insert(name);
            return Ok(0);
        }
        if sql.starts_with("DROP TABLE") {
            let name = table_name(sql).unwrap_or_default();
            state.unique.remove(&name);
            state.stored.remove(&name);
            if !state.tables.remove(&name) && !sql.contains("IF EXISTS") {
                return Err(StoreError::statement(
                    Some(1051),
                    format!("Unknown table '{}'", name),
                ));
            }
            return Ok(0);
        }

        let name = table_name(sql).unwrap_or_default();
        if state.unique.contains(&name) {
            // Whole tuples stand in for the natural key.
            let rows = row_tuples(sql);
            let stored = state.stored.get(&name).cloned().unwrap_or_default();
            let fresh: Vec<String> = rows
                .iter()
                .filter(|row| !stored.contains(*row))
                .cloned()
                .collect();
            if fresh.len() < rows.len() && !sql.starts_with("INSERT IGNORE") {
                return Err(StoreError::statement(
                    Some(1062),
                    format!("Duplicate entry for key '{}.natural_key'", name),
                ));
            }
            let inserted = fresh.len() as u64;
            state
                .pending_rows
                .extend(fresh.into_iter().map(|row| (name.clone(), row)));
            state.pending.push(sql.to_string());
            return Ok(inserted);
        }

        state.pending.push(sql.to_string());
        Ok(1)
    }

    async fn execute_many(&mut self, sql: &str, params: &[Vec<SqlValue<'_>>]) -> StoreResult<u64> {
        let mut total = 0;
        for set in params {
            total += self.execute(sql, set).await?;
        }
        Ok(total)
    }

    async fn session_variable(&mut self, name: &str) -> StoreResult<Option<String>> {
        Ok((name == "max_allowed_packet").then(|| self.packet.clone()))
    }

    async fn table_names(&mut self) -> StoreResult<Vec<String>> {
        Ok(self.state().tables.iter().cloned().collect())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let mut state = self.state();
        let pending = std::mem::take(&mut state.pending);
        state.committed.extend(pending);
        for (table, row) in std::mem::take(&mut state.pending_rows) {
            state.stored.entry(table).or_default().insert(row);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        let mut state = self.state();
        state.pending.clear();
        state.pending_rows.clear();
        Ok(())
    }

    async fn close(&mut self) -> StoreResult<()> {
        if self.open {
            self.commit().await?;
            self.open = false;
            self.state().closed += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Opens [`RecordingStore`]s over one shared state.
#[derive(Clone)]
pub struct RecordingConnector {
    pub state: Arc<Mutex<StoreState>>,
    pub ceiling: usize,
    pub packet: String,
    pub refuse: bool,
}

impl RecordingConnector {
    /// Server packet limit and statement ceiling both `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            ceiling: limit,
            packet: limit.to_string(),
            refuse: false,
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::with_limit(16_000_000)
        }
    }

    pub fn open(&self) -> RecordingStore {
        self.state.lock().unwrap().connections += 1;
        RecordingStore {
            state: Arc::clone(&self.state),
            ceiling: self.ceiling,
            packet: self.packet.clone(),
            open: true,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn connect(&self) -> starload::Result<Box<dyn Store>> {
        if self.refuse {
            return Err(LoadError::Connection("connection refused".to_string()));
        }
        Ok(Box::new(self.open()))
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

/// Loader whose client limit is `client` (a size string such as `1K`).
pub fn loader(client: &str) -> BatchLoader {
    BatchLoader::inline(ClientConfig::from_pairs([("max_allowed_packet", client)]))
}

/// `{name: natural key}` dimension.
pub fn ring_dimension_schema() -> Arc<ResolvedSchema> {
    Arc::new(
        SchemaDef::new("RingDimension", SchemaRole::Dimension)
            .column(Column::natural_key("name", ColumnType::Varchar(40)))
            .resolve()
            .unwrap(),
    )
}

/// `{id: auto primary key, ring, checkpoint, fellowship_count: metric}`
pub fn journey_schema() -> Arc<ResolvedSchema> {
    Arc::new(
        SchemaDef::new("Journey", SchemaRole::Table)
            .column(Column::primary_key("id"))
            .column(Column::new("ring", ColumnType::Text))
            .column(Column::new("checkpoint", ColumnType::Text))
            .column(Column::metric("fellowship_count", ColumnType::Integer))
            .resolve()
            .unwrap(),
    )
}
