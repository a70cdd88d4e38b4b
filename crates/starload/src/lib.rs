//! # starload
//!
//! Star-schema warehouse loader for MySQL.
//!
//! Fact and dimension tables are declared in YAML, resolved into immutable
//! schemas, and filled from pluggable sources through generated SQL:
//!
//! - **Schema resolution** merging columns across parent declarations
//! - **Dimension lookups** rendered as subqueries on natural keys
//! - **Adaptive batch inserts** sized to the server and client packet limits
//! - **Row-level failure isolation**: a bad row never aborts a load
//!
//! ## Example
//!
//! ```rust,no_run
//! use starload::{Command, Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> starload::Result<()> {
//!     let config = Config::load("warehouse.yaml")?;
//!     let orchestrator = Orchestrator::from_config(&config)?;
//!     let summary = orchestrator.run(Command::Update, &["all"], None).await?;
//!     println!("Fetched {} rows", summary.rows_fetched());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod loader;
pub mod orchestrator;
pub mod source;
pub mod sql;
pub mod store;
pub mod table;

// Re-exports for convenient access
pub use config::{ClientConfig, Config, DatabaseConfig, SourceConfig, TableConfig};
pub use core::{Column, ColumnType, Record, ResolvedSchema, SchemaCatalog, SchemaDef, SchemaRole, SqlValue};
pub use error::{LoadError, Result};
pub use loader::{BatchLoader, RowInsertError};
pub use orchestrator::{Command, HealthCheckResult, Orchestrator, RunSummary, TableOutcome};
pub use source::{DatabaseSource, MemorySource, Source};
pub use sql::{InsertTemplate, SqlGenerator};
pub use store::{Connector, Store, StoreError};
pub use table::{Table, UpdateReport};
