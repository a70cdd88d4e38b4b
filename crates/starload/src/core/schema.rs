//! Schema declarations and their resolution into one immutable table schema.
//!
//! A [`SchemaDef`] names its parents (already resolved schemas, most general
//! first) and its own column declarations. [`SchemaDef::resolve`] merges the
//! role's base columns, then each parent, then the local columns into a single
//! [`ResolvedSchema`]. A name declared again later replaces the earlier column
//! in place, so merge order is stable.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::column::{Column, ColumnType};
use super::identifier::{camel_to_snake, quote_ident, validate_identifier};
use crate::error::{LoadError, Result};

/// Name of the dimension column holding the start of a row's validity.
pub const APPLICABLE_FROM: &str = "applicable_from";

/// Ordered, name-unique collection of columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSet {
    columns: Vec<Column>,
}

impl ColumnSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column. An existing column of the same name is replaced at its
    /// current position; a new name goes to the end.
    pub fn insert(&mut self, column: Column) {
        match self.position(&column.name) {
            Some(idx) => self.columns[idx] = column,
            None => self.columns.push(column),
        }
    }

    /// Apply every column of `columns` in order.
    pub fn extend<I: IntoIterator<Item = Column>>(&mut self, columns: I) {
        for column in columns {
            self.insert(column);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Column> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn into_vec(self) -> Vec<Column> {
        self.columns
    }
}

impl FromIterator<Column> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = Column>>(iter: I) -> Self {
        let mut set = ColumnSet::new();
        set.extend(iter);
        set
    }
}

/// Which derived column lists a schema exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracking {
    #[serde(default)]
    pub dimension_keys: bool,
    #[serde(default)]
    pub natural_keys: bool,
    #[serde(default)]
    pub metrics: bool,
}

/// Role of a table in the star schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaRole {
    Fact,
    Dimension,
    #[default]
    Table,
}

impl SchemaRole {
    /// Columns every schema of this role starts from.
    pub fn base_columns(self) -> Vec<Column> {
        match self {
            SchemaRole::Fact => vec![
                Column::primary_key("id"),
                Column::auto("created", ColumnType::Timestamp, "CURRENT_TIMESTAMP"),
            ],
            SchemaRole::Dimension => vec![
                Column::primary_key("id"),
                Column::auto(APPLICABLE_FROM, ColumnType::DateTime, "CURRENT_TIMESTAMP"),
                Column::auto("created", ColumnType::Timestamp, "CURRENT_TIMESTAMP"),
            ],
            SchemaRole::Table => Vec::new(),
        }
    }

    /// Default derived lists for this role.
    pub fn tracking(self) -> Tracking {
        match self {
            SchemaRole::Fact => Tracking {
                dimension_keys: true,
                natural_keys: false,
                metrics: true,
            },
            SchemaRole::Dimension => Tracking {
                dimension_keys: false,
                natural_keys: true,
                metrics: false,
            },
            SchemaRole::Table => Tracking::default(),
        }
    }

    /// Statement verb used for inserts. Dimensions skip rows that collide
    /// with an existing key.
    pub fn insert_verb(self) -> &'static str {
        match self {
            SchemaRole::Dimension => "INSERT IGNORE",
            SchemaRole::Fact | SchemaRole::Table => "INSERT",
        }
    }
}

impl std::fmt::Display for SchemaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SchemaRole::Fact => "fact",
            SchemaRole::Dimension => "dimension",
            SchemaRole::Table => "table",
        };
        f.write_str(s)
    }
}

/// Table-level options (engine, charset, collation and anything else the
/// store understands), kept in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOptions(Vec<(String, String)>);

impl Default for TableOptions {
    fn default() -> Self {
        Self(vec![
            ("ENGINE".to_string(), "InnoDB".to_string()),
            ("CHARSET".to_string(), "utf8".to_string()),
            ("COLLATE".to_string(), "utf8_bin".to_string()),
        ])
    }
}

impl TableOptions {
    /// Set an option. Keys are case-insensitive; overriding keeps position.
    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = key.as_ref().to_ascii_uppercase();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_uppercase();
        self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as the trailing clause of CREATE TABLE, e.g. ` ENGINE=InnoDB CHARSET=utf8`.
    pub fn to_sql(&self) -> String {
        self.0.iter().map(|(k, v)| format!(" {}={}", k, v)).collect()
    }
}

/// A schema declaration prior to resolution.
#[derive(Debug, Clone)]
pub struct SchemaDef {
    pub name: String,
    pub table_name: Option<String>,
    pub role: SchemaRole,
    pub parents: Vec<Arc<ResolvedSchema>>,
    pub columns: Vec<Column>,
    pub options: Vec<(String, String)>,
    pub tracking: Option<Tracking>,
}

impl SchemaDef {
    pub fn new(name: impl Into<String>, role: SchemaRole) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            role,
            parents: Vec::new(),
            columns: Vec::new(),
            options: Vec::new(),
            tracking: None,
        }
    }

    /// Override the table name derived from the schema name.
    #[must_use]
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Append a parent; parents are merged in the order given.
    #[must_use]
    pub fn extends(mut self, parent: Arc<ResolvedSchema>) -> Self {
        self.parents.push(parent);
        self
    }

    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    /// Override which derived lists the role exposes.
    #[must_use]
    pub fn tracking(mut self, tracking: Tracking) -> Self {
        self.tracking = Some(tracking);
        self
    }

    /// Merge the declaration hierarchy into a resolved schema.
    ///
    /// # Errors
    ///
    /// `LoadError::Schema` when more than one primary key survives the merge,
    /// when an identifier is invalid, or when a primary key has to be
    /// synthesized but a non-key `id` column is already declared.
    pub fn resolve(&self) -> Result<ResolvedSchema> {
        let table_name = self
            .table_name
            .clone()
            .unwrap_or_else(|| camel_to_snake(&self.name));
        validate_identifier(&table_name)?;

        let mut set = ColumnSet::new();
        set.extend(self.role.base_columns());
        for parent in &self.parents {
            set.extend(parent.columns.iter().cloned());
        }
        set.extend(self.columns.iter().cloned());

        let primary_keys: Vec<String> = set
            .iter()
            .filter(|c| c.is_primary_key())
            .map(|c| c.name.clone())
            .collect();
        let primary_key = match primary_keys.as_slice() {
            [pk] => pk.clone(),
            [] => {
                if set.get("id").is_some() {
                    return Err(LoadError::Schema(format!(
                        "{}: no primary key declared and column 'id' is not a key",
                        self.name
                    )));
                }
                let mut columns = vec![Column::primary_key("id")];
                columns.extend(set.into_vec());
                set = columns.into_iter().collect();
                "id".to_string()
            }
            many => {
                return Err(LoadError::Schema(format!(
                    "{}: multiple primary keys declared ({})",
                    self.name,
                    many.join(", ")
                )));
            }
        };

        for column in set.iter() {
            validate_identifier(&column.name)?;
            if column.flags.dimension_key && column.references.is_none() {
                return Err(LoadError::Schema(format!(
                    "{}: dimension key '{}' does not reference a dimension",
                    self.name, column.name
                )));
            }
        }

        let mut options = TableOptions::default();
        for parent in &self.parents {
            for (key, value) in parent.options.iter() {
                options.set(key, value);
            }
        }
        for (key, value) in &self.options {
            options.set(key, value.as_str());
        }

        let tracking = self.tracking.unwrap_or_else(|| self.role.tracking());
        let names_where = |pred: fn(&Column) -> bool| -> Vec<String> {
            set.iter().filter(|c| pred(c)).map(|c| c.name.clone()).collect()
        };

        Ok(ResolvedSchema {
            name: self.name.clone(),
            table_name,
            role: self.role,
            primary_key,
            options,
            dimension_keys: tracking
                .dimension_keys
                .then(|| names_where(|c| c.flags.dimension_key)),
            natural_keys: tracking
                .natural_keys
                .then(|| names_where(|c| c.flags.natural_key)),
            metrics: tracking.metrics.then(|| names_where(|c| c.flags.metric)),
            columns: set.into_vec(),
        })
    }
}

/// A fully merged schema. Immutable after resolution.
///
/// Derived lists are `None` when the role does not track them, and
/// `Some(vec![])` when it does but no such column is declared.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSchema {
    pub name: String,
    pub table_name: String,
    pub role: SchemaRole,
    pub columns: Vec<Column>,
    pub primary_key: String,
    pub options: TableOptions,
    pub dimension_keys: Option<Vec<String>>,
    pub natural_keys: Option<Vec<String>>,
    pub metrics: Option<Vec<String>>,
}

impl ResolvedSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Columns that appear in insert statements: everything not auto-generated.
    pub fn insert_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_auto_generated())
    }

    /// Backtick-quoted table name.
    pub fn quoted_table(&self) -> Result<String> {
        quote_ident(&self.table_name)
    }

    /// Dimension schemas referenced by this schema's dimension keys, in column order.
    pub fn referenced_dimensions(&self) -> Vec<Arc<ResolvedSchema>> {
        let mut out: Vec<Arc<ResolvedSchema>> = Vec::new();
        for dim in self.columns.iter().filter_map(|c| c.references.as_ref()) {
            if !out.iter().any(|d| d.name == dim.name) {
                out.push(Arc::clone(dim));
            }
        }
        out
    }
}
