//! Multi-table command runner.
//!
//! Resolves the tables a command names, orders referenced dimensions ahead of
//! the facts that use them, and runs every table over one warehouse
//! connection held for the whole run.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, Config, TableConfig};
use crate::core::{SchemaCatalog, SchemaRole};
use crate::error::{LoadError, Result};
use crate::loader::{BatchLoader, PacketLimits};
use crate::source;
use crate::store::mysql::MysqlConnector;
use crate::store::{with_store, Connector};
use crate::table::Table;

/// Name that expands to every fact.
pub const ALL: &str = "all";

/// What a run does to each table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Create missing tables.
    Build,
    /// Load rows from each table's source.
    Update,
    /// Load rows from each fact's historical source.
    Historical,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Build => "build",
            Command::Update => "update",
            Command::Historical => "historical",
        };
        f.write_str(name)
    }
}

/// Result for one table of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableOutcome {
    pub table: String,
    pub role: SchemaRole,
    /// Records fetched from the source.
    pub fetched: usize,
    /// Rows the loader could not insert.
    pub failed_rows: usize,
    /// Why the table failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of an orchestrated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,
    pub command: Command,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Total duration in seconds.
    pub duration_seconds: f64,
    /// One entry per table touched, in processing order.
    pub outcomes: Vec<TableOutcome>,
}

impl RunSummary {
    /// No table failed. Row-level failures do not count.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_none())
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .map(|o| o.table.as_str())
            .collect()
    }

    pub fn rows_fetched(&self) -> usize {
        self.outcomes.iter().map(|o| o.fetched).sum()
    }

    pub fn rows_failed(&self) -> usize {
        self.outcomes.iter().map(|o| o.failed_rows).sum()
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of [`Orchestrator::health_check`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub warehouse: String,
    pub warehouse_connected: bool,
    pub warehouse_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warehouse_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_limits: Option<PacketLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_limit_error: Option<String>,
}

/// Runs commands over the declared tables.
#[derive(Clone)]
pub struct Orchestrator {
    tables: Arc<Vec<Table>>,
    connector: Arc<dyn Connector>,
    loader: Arc<BatchLoader>,
}

impl Orchestrator {
    /// `tables` in declaration order.
    pub fn new(tables: Vec<Table>, connector: Arc<dyn Connector>, loader: BatchLoader) -> Self {
        Self {
            tables: Arc::new(tables),
            connector,
            loader: Arc::new(loader),
        }
    }

    /// Resolve every declared table and wire up its sources.
    ///
    /// Nothing connects yet; the warehouse connection is opened per run.
    pub fn from_config(config: &Config) -> Result<Self> {
        let catalog = SchemaCatalog::from_config(&config.tables)?;
        let warehouse = config.warehouse_database().ok_or_else(|| {
            LoadError::Config(format!("unknown warehouse database '{}'", config.warehouse))
        })?;
        let decls: HashMap<&str, &TableConfig> = config
            .tables
            .iter()
            .map(|t| (t.name.as_str(), t))
            .collect();

        let mut tables = Vec::with_capacity(catalog.len());
        for schema in catalog.iter() {
            let mut table = Table::new(Arc::clone(&schema));
            if let Some(decl) = decls.get(schema.name.as_str()) {
                if let Some(src) = &decl.source {
                    table = table.with_source(source::from_config(src, &config.databases)?);
                }
                if let Some(src) = &decl.historical_source {
                    table =
                        table.with_historical_source(source::from_config(src, &config.databases)?);
                }
            }
            tables.push(table);
        }

        let loader = match &config.client_config_file {
            Some(path) => BatchLoader::from_file(path.clone()),
            // Loads fail with a configuration error until a file is configured.
            None => BatchLoader::inline(ClientConfig::default()),
        };

        debug!("Resolved {} table(s) for warehouse {}", tables.len(), config.warehouse);
        Ok(Self::new(
            tables,
            Arc::new(MysqlConnector::new(warehouse.clone())),
            loader,
        ))
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Look up by schema name, falling back to table name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.schema().name == name)
            .or_else(|| self.tables.iter().find(|t| t.name() == name))
    }

    /// Tables named on the command line.
    ///
    /// `all` expands to every fact in declaration order. Unknown names are
    /// skipped; duplicates keep their first position.
    pub fn resolve_names<S: AsRef<str>>(&self, names: &[S]) -> Vec<&Table> {
        let mut out: Vec<&Table> = Vec::new();
        for name in names {
            let name = name.as_ref();
            if name == ALL {
                for table in self.tables.iter().filter(|t| t.schema().role == SchemaRole::Fact) {
                    push_unique(&mut out, table);
                }
                continue;
            }
            match self.table(name) {
                Some(table) => push_unique(&mut out, table),
                None => debug!("Unrecognised table {}", name),
            }
        }
        out
    }

    /// Processing order: each target preceded by the dimensions it references,
    /// every table once.
    pub fn plan<'a>(&'a self, targets: &[&'a Table]) -> Vec<&'a Table> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();
        for &target in targets {
            for dim in target.schema().referenced_dimensions() {
                match self.table(&dim.name) {
                    Some(table) if seen.insert(table.schema().name.as_str()) => out.push(table),
                    Some(_) => {}
                    None => debug!("{}: dimension {} is not declared", target.name(), dim.name),
                }
            }
            if seen.insert(target.schema().name.as_str()) {
                out.push(target);
            }
        }
        out
    }

    /// Run `command` over the named tables on one warehouse connection.
    ///
    /// A failing table is recorded and the run moves on. A connection failure
    /// ends the run with an error once the connection has been released.
    pub async fn run<S: AsRef<str>>(
        &self,
        command: Command,
        names: &[S],
        since: Option<NaiveDateTime>,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        let targets = self.resolve_names(names);
        let explicit: HashSet<String> = targets.iter().map(|t| t.schema().name.clone()).collect();
        let plan: Vec<Table> = self.plan(&targets).into_iter().cloned().collect();
        info!(
            "Run {}: {} on {} table(s) via {}",
            run_id,
            command,
            plan.len(),
            self.connector.describe()
        );

        let loader = Arc::clone(&self.loader);
        let outcomes = with_store(self.connector.as_ref(), move |store| {
            async move {
                let mut outcomes = Vec::with_capacity(plan.len());
                for table in &plan {
                    let name = table.schema().name.clone();
                    let is_target = explicit.contains(&name);
                    let result = match command {
                        Command::Build => table.build(store).await.map(|()| (0, 0)),
                        Command::Update | Command::Historical => {
                            let historical = command == Command::Historical && is_target;
                            table
                                .update(store, &loader, since, historical)
                                .await
                                .map(|r| (r.fetched, r.failed.len()))
                        }
                    };

                    let (fetched, failed_rows, error) = match result {
                        Ok((fetched, failed)) => (fetched, failed, None),
                        Err(LoadError::NoSource(_)) if !is_target => {
                            debug!("{}: no source, skipping dimension", table.name());
                            continue;
                        }
                        Err(e) if e.is_connection() => {
                            error!("{}: {}", table.name(), e);
                            return Err(e);
                        }
                        Err(e) => {
                            error!("{}: {} failed: {}", table.name(), command, e);
                            (0, 0, Some(e.to_string()))
                        }
                    };
                    outcomes.push(TableOutcome {
                        table: table.name().to_string(),
                        role: table.schema().role,
                        fetched,
                        failed_rows,
                        error,
                    });
                }
                Ok(outcomes)
            }
            .boxed()
        })
        .await?;

        let summary = RunSummary {
            run_id,
            command,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: start.elapsed().as_secs_f64(),
            outcomes,
        };

        let failed = summary.failed_tables();
        if failed.is_empty() {
            info!(
                "Run {}: {} complete, {} table(s), {} row(s) fetched, {} row(s) failed",
                summary.run_id,
                command,
                summary.outcomes.len(),
                summary.rows_fetched(),
                summary.rows_failed()
            );
        } else {
            warn!(
                "Run {}: {} table(s) failed: {}",
                summary.run_id,
                failed.len(),
                failed.join(", ")
            );
        }
        Ok(summary)
    }

    /// Check the warehouse connection and both packet limits.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let mut result = HealthCheckResult {
            healthy: false,
            warehouse: self.connector.describe(),
            warehouse_connected: false,
            warehouse_latency_ms: 0,
            warehouse_error: None,
            packet_limits: None,
            packet_limit_error: None,
        };

        let start = Instant::now();
        match self.connector.connect().await {
            Ok(mut store) => {
                result.warehouse_connected = true;
                result.warehouse_latency_ms = start.elapsed().as_millis() as u64;
                match self.loader.packet_limits(store.as_mut()).await {
                    Ok(limits) => result.packet_limits = Some(limits),
                    Err(e) => result.packet_limit_error = Some(e.to_string()),
                }
                if let Err(e) = store.close().await {
                    warn!("Closing health check connection failed: {}", e);
                }
            }
            Err(e) => result.warehouse_error = Some(e.to_string()),
        }

        result.healthy = result.warehouse_connected && result.packet_limits.is_some();
        Ok(result)
    }
}

fn push_unique<'a>(out: &mut Vec<&'a Table>, table: &'a Table) {
    if !out.iter().any(|t| t.schema().name == table.schema().name) {
        out.push(table);
    }
}
