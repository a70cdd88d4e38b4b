//! Column declarations: the atomic unit of a table schema.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::identifier::quote_ident;
use super::schema::ResolvedSchema;
use super::value::{quote_string, SqlValue};
use crate::error::{LoadError, Result};

/// SQL column type in the MySQL dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    TinyInt,
    Integer,
    UnsignedInteger,
    BigInt,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Char(u32),
    Varchar(u32),
    Text,
    Date,
    Time,
    DateTime,
    Timestamp,
    Enum(Vec<String>),
    /// Anything not recognized, emitted verbatim.
    Custom(String),
}

impl ColumnType {
    /// Render the type as it appears in a column definition.
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Boolean => "TINYINT(1)".to_string(),
            ColumnType::TinyInt => "TINYINT".to_string(),
            ColumnType::Integer => "INT".to_string(),
            ColumnType::UnsignedInteger => "INT UNSIGNED".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
            ColumnType::Char(n) => format!("CHAR({})", n),
            ColumnType::Varchar(n) => format!("VARCHAR({})", n),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Enum(values) => {
                let quoted: Vec<String> = values.iter().map(|v| quote_string(v)).collect();
                format!("ENUM({})", quoted.join(","))
            }
            ColumnType::Custom(sql) => sql.clone(),
        }
    }

    /// Whether a value belongs to this type's semantic family.
    ///
    /// Used to pick which natural keys of a dimension a lookup value can be
    /// compared against. NULL is accepted by nothing.
    pub fn accepts(&self, value: &SqlValue<'_>) -> bool {
        use ColumnType as T;
        match value {
            SqlValue::Null => false,
            SqlValue::Bool(_) | SqlValue::I64(_) => matches!(
                self,
                T::Boolean
                    | T::TinyInt
                    | T::Integer
                    | T::UnsignedInteger
                    | T::BigInt
                    | T::Float
                    | T::Double
                    | T::Decimal { .. }
                    | T::Custom(_)
            ),
            SqlValue::F64(_) | SqlValue::Decimal(_) => matches!(
                self,
                T::Float | T::Double | T::Decimal { .. } | T::Custom(_)
            ),
            SqlValue::Text(_) => matches!(
                self,
                T::Char(_) | T::Varchar(_) | T::Text | T::Enum(_) | T::Custom(_)
            ),
            SqlValue::Bytes(_) => matches!(self, T::Custom(_)),
            SqlValue::Date(_) => {
                matches!(self, T::Date | T::DateTime | T::Timestamp | T::Custom(_))
            }
            SqlValue::DateTime(_) => {
                matches!(self, T::DateTime | T::Timestamp | T::Custom(_))
            }
            SqlValue::Time(_) => matches!(self, T::Time | T::Custom(_)),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

impl FromStr for ColumnType {
    type Err = LoadError;

    /// Parse the common type spellings used in warehouse definitions.
    ///
    /// `int`, `varchar(40)`, `decimal(10,2)`, `enum('Q1','Q2')` and friends map
    /// to their variant; unknown spellings become [`ColumnType::Custom`].
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        let (base, args) = match (lower.find('('), trimmed.rfind(')')) {
            (Some(open), Some(close)) if close > open => {
                (lower[..open].trim().to_string(), Some(&trimmed[open + 1..close]))
            }
            _ => (lower.clone(), None),
        };

        let ty = match (base.as_str(), args) {
            ("bool" | "boolean", None) => ColumnType::Boolean,
            ("tinyint", None) => ColumnType::TinyInt,
            ("int" | "integer", None) => ColumnType::Integer,
            ("int unsigned" | "integer unsigned" | "unsigned", None) => {
                ColumnType::UnsignedInteger
            }
            ("bigint", None) => ColumnType::BigInt,
            ("float", None) => ColumnType::Float,
            ("double" | "real", None) => ColumnType::Double,
            ("decimal" | "numeric", None) => ColumnType::Decimal {
                precision: 10,
                scale: 0,
            },
            ("decimal" | "numeric", Some(args)) => {
                let mut parts = args.split(',').map(str::trim);
                let precision = parse_arg(s, parts.next())?;
                let scale = match parts.next() {
                    Some(p) => parse_arg(s, Some(p))?,
                    None => 0,
                };
                ColumnType::Decimal { precision, scale }
            }
            ("char", Some(args)) => ColumnType::Char(parse_arg(s, Some(args.trim()))?),
            ("char", None) => ColumnType::Char(1),
            ("varchar", Some(args)) => ColumnType::Varchar(parse_arg(s, Some(args.trim()))?),
            ("string", None) => ColumnType::Varchar(255),
            ("text", None) => ColumnType::Text,
            ("date", None) => ColumnType::Date,
            ("time", None) => ColumnType::Time,
            ("datetime", None) => ColumnType::DateTime,
            ("timestamp", None) => ColumnType::Timestamp,
            ("enum", Some(args)) => ColumnType::Enum(
                args.split(',')
                    .map(|v| v.trim().trim_matches('\'').to_string())
                    .filter(|v| !v.is_empty())
                    .collect(),
            ),
            _ => ColumnType::Custom(trimmed.to_string()),
        };
        Ok(ty)
    }
}

fn parse_arg<T: FromStr>(spelling: &str, arg: Option<&str>) -> Result<T> {
    arg.and_then(|a| a.parse().ok()).ok_or_else(|| {
        LoadError::Schema(format!("Invalid size in column type '{}'", spelling))
    })
}

/// Role flags carried by a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnFlags {
    pub primary_key: bool,
    pub auto_generated: bool,
    pub natural_key: bool,
    pub dimension_key: bool,
    pub metric: bool,
}

/// A single column declaration.
///
/// Columns are immutable once declared; builder methods consume and return `self`.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub flags: ColumnFlags,
    pub nullable: bool,
    /// Raw SQL default expression, e.g. `CURRENT_TIMESTAMP`.
    pub default: Option<String>,
    /// Dimension looked up through this column's natural keys.
    pub references: Option<Arc<ResolvedSchema>>,
}

impl Column {
    /// Plain data column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            flags: ColumnFlags::default(),
            nullable: false,
            default: None,
            references: None,
        }
    }

    /// Auto-incrementing unsigned integer primary key.
    pub fn primary_key(name: impl Into<String>) -> Self {
        let mut col = Self::new(name, ColumnType::UnsignedInteger);
        col.flags.primary_key = true;
        col.flags.auto_generated = true;
        col
    }

    /// Source-system business key of a dimension.
    pub fn natural_key(name: impl Into<String>, column_type: ColumnType) -> Self {
        let mut col = Self::new(name, column_type);
        col.flags.natural_key = true;
        col
    }

    /// Fact column holding the primary key of a row in `dimension`.
    pub fn dimension_key(name: impl Into<String>, dimension: &Arc<ResolvedSchema>) -> Self {
        let mut col = Self::new(name, ColumnType::UnsignedInteger);
        col.flags.dimension_key = true;
        col.nullable = true;
        col.references = Some(Arc::clone(dimension));
        col
    }

    /// Measured value of a fact.
    pub fn metric(name: impl Into<String>, column_type: ColumnType) -> Self {
        let mut col = Self::new(name, column_type);
        col.flags.metric = true;
        col
    }

    /// Column populated by the store, never by inserts.
    pub fn auto(name: impl Into<String>, column_type: ColumnType, default: impl Into<String>) -> Self {
        let mut col = Self::new(name, column_type);
        col.flags.auto_generated = true;
        col.default = Some(default.into());
        col
    }

    /// Allow NULL values.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the SQL default expression.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.flags.primary_key
    }

    pub fn is_auto_generated(&self) -> bool {
        self.flags.auto_generated
    }

    /// Column definition as used in CREATE TABLE.
    pub fn expression(&self) -> Result<String> {
        let mut sql = format!("{} {}", quote_ident(&self.name)?, self.column_type.sql());
        if !self.nullable || self.flags.primary_key {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        if self.flags.primary_key {
            if self.flags.auto_generated {
                sql.push_str(" AUTO_INCREMENT");
            }
            sql.push_str(" PRIMARY KEY");
        }
        Ok(sql)
    }
}
