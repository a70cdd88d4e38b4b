//! Error types for the warehouse loader.

use thiserror::Error;

use crate::store::StoreError;

/// Process exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Process exit code for connection failures.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Process exit code for schema resolution errors.
pub const EXIT_SCHEMA_ERROR: u8 = 3;
/// Process exit code for source fetch failures.
pub const EXIT_SOURCE_ERROR: u8 = 4;
/// Process exit code for statement failures.
pub const EXIT_STATEMENT_ERROR: u8 = 5;
/// Process exit code for anything not covered above.
pub const EXIT_OTHER_ERROR: u8 = 6;
/// Process exit code for file errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for load operations.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Configuration error (invalid YAML, missing fields, unreadable packet limits, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Conflicting or invalid column declarations found while resolving a schema.
    #[error("Schema error: {0}")]
    Schema(String),

    /// The store connection could not be acquired or used.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The store rejected a statement.
    #[error("Statement failed: {0}")]
    Statement(StoreError),

    /// A source raised while rows were being fetched.
    #[error("Fetch failed for table {table}: {message}")]
    SourceFetch { table: String, message: String },

    /// Table has no source for the requested fetch.
    #[error("No data source defined for table {0}")]
    NoSource(String),

    /// Record access by an unknown column name.
    #[error("No such column '{column}' in table {table}")]
    KeyNotFound { table: String, column: String },

    /// CREATE TABLE issued for a table that is already present.
    #[error("Table {0} already exists")]
    TableExists(String),

    /// A record value cannot be rendered for its column.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoadError {
    /// Create a SourceFetch error
    pub fn source_fetch(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        LoadError::SourceFetch {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a KeyNotFound error
    pub fn key_not_found(table: impl Into<String>, column: impl Into<String>) -> Self {
        LoadError::KeyNotFound {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Whether the error leaves the current run without a usable connection.
    pub fn is_connection(&self) -> bool {
        matches!(self, LoadError::Connection(_))
    }

    /// Exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoadError::Config(_) | LoadError::Yaml(_) => EXIT_CONFIG_ERROR,
            LoadError::Connection(_) => EXIT_CONNECTION_ERROR,
            LoadError::Schema(_) => EXIT_SCHEMA_ERROR,
            LoadError::SourceFetch { .. } | LoadError::NoSource(_) => EXIT_SOURCE_ERROR,
            LoadError::Statement(_) | LoadError::TableExists(_) => EXIT_STATEMENT_ERROR,
            LoadError::Io(_) => EXIT_IO_ERROR,
            LoadError::KeyNotFound { .. } | LoadError::InvalidValue(_) | LoadError::Json(_) => {
                EXIT_OTHER_ERROR
            }
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

impl From<StoreError> for LoadError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(message) => LoadError::Connection(message),
            lost @ (StoreError::Lost(_) | StoreError::Closed) => {
                LoadError::Connection(lost.to_string())
            }
            other => LoadError::Statement(other),
        }
    }
}

/// Result type alias for load operations.
pub type Result<T> = std::result::Result<T, LoadError>;
