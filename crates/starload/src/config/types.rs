//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::SchemaRole;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name of the `databases` entry holding the warehouse.
    pub warehouse: String,

    /// Named database connections (the warehouse and any source databases).
    pub databases: BTreeMap<String, DatabaseConfig>,

    /// MySQL option file holding the client `max_allowed_packet`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_config_file: Option<PathBuf>,

    /// Table declarations, in declaration order.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl Config {
    /// Connection settings of the warehouse database.
    pub fn warehouse_database(&self) -> Option<&DatabaseConfig> {
        self.databases.get(&self.warehouse)
    }
}

/// MySQL connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode: disable, prefer, require, verify-ca, verify-full (default: prefer).
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Declaration of one warehouse table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Schema name; the table name defaults to its snake_case form.
    pub name: String,

    /// Explicit table name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,

    /// fact, dimension or table (default: table).
    #[serde(default)]
    pub role: SchemaRole,

    /// Parent declarations, most general first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,

    /// Local column declarations.
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,

    /// Table option overrides (ENGINE, CHARSET, COLLATE, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub table_options: BTreeMap<String, String>,

    /// Where regular updates read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceConfig>,

    /// Where historical loads read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_source: Option<SourceConfig>,
}

/// How a declared column participates in the schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    #[default]
    Column,
    PrimaryKey,
    NaturalKey,
    DimensionKey,
    Metric,
    Auto,
}

/// Declaration of one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,

    /// Column type spelling, e.g. `varchar(40)`. Required except for
    /// primary and dimension keys.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub column_type: Option<String>,

    #[serde(default)]
    pub kind: ColumnKind,

    /// Dimension looked up by a dimension key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,

    #[serde(default)]
    pub nullable: bool,

    /// Raw SQL default expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Where a table's rows come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Run `query` against the named database. The query may contain a
    /// `{since}` placeholder.
    Database { database: String, query: String },
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_ssl_mode() -> String {
    "prefer".to_string()
}
