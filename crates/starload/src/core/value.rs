//! SQL value types carried by records, sources and the store.
//!
//! Values are rendered into MySQL literals when insert statements are built;
//! see [`SqlValue::to_sql_literal`].

use std::borrow::Cow;
use std::fmt::Write as _;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

/// Literal format for DATE values.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Literal format for DATETIME values. Fractional seconds are only printed when present.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Literal format for TIME values.
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// SQL value enum for type-safe row handling.
///
/// Uses `Cow` for string and byte data so values read out of a source buffer
/// can be borrowed until they need to outlive it.
///
/// # Example
///
/// ```rust
/// use std::borrow::Cow;
/// use starload::core::SqlValue;
///
/// let borrowed: SqlValue<'_> = SqlValue::Text(Cow::Borrowed("Rivendell"));
/// let owned: SqlValue<'static> = borrowed.into_owned();
/// assert_eq!(owned.to_sql_literal(), "'Rivendell'");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    /// Missing value.
    Null,

    /// Boolean value, stored by MySQL as TINYINT(1).
    Bool(bool),

    /// Any signed integer.
    I64(i64),

    /// Double precision floating point.
    F64(f64),

    /// Exact decimal.
    Decimal(Decimal),

    /// Text with zero-copy support.
    Text(Cow<'a, str>),

    /// Binary data with zero-copy support.
    Bytes(Cow<'a, [u8]>),

    /// Date without time component.
    Date(NaiveDate),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Time without date component.
    Time(NaiveTime),
}

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null => SqlValue::Null,
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Owned(v.into_owned())),
            SqlValue::Date(v) => SqlValue::Date(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::Time(v) => SqlValue::Time(v),
        }
    }

    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short name of the value's semantic type, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::I64(_) => "integer",
            SqlValue::F64(_) => "float",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Date(_) => "date",
            SqlValue::DateTime(_) => "datetime",
            SqlValue::Time(_) => "time",
        }
    }

    /// Render the value as a MySQL literal.
    ///
    /// Strings are single-quoted and escaped, numbers are emitted bare and
    /// NULL (including non-finite floats, which MySQL cannot store) becomes `NULL`.
    #[must_use]
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F64(v) if v.is_finite() => v.to_string(),
            SqlValue::F64(_) => "NULL".to_string(),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Text(v) => quote_string(v),
            SqlValue::Bytes(v) => {
                let mut out = String::with_capacity(v.len() * 2 + 3);
                out.push_str("X'");
                for b in v.iter() {
                    let _ = write!(out, "{:02X}", b);
                }
                out.push('\'');
                out
            }
            SqlValue::Date(v) => format!("'{}'", v.format(DATE_FORMAT)),
            SqlValue::DateTime(v) => format!("'{}'", v.format(DATETIME_FORMAT)),
            SqlValue::Time(v) => format!("'{}'", v.format(TIME_FORMAT)),
        }
    }
}

/// Quote and escape a string literal the way `mysql_real_escape_string` does.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("''"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

impl std::fmt::Display for SqlValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_sql_literal())
    }
}

// Convenience constructors
impl<'a> SqlValue<'a> {
    /// Create a text value from an owned String.
    #[must_use]
    pub fn text_owned(s: String) -> SqlValue<'static> {
        SqlValue::Text(Cow::Owned(s))
    }

    /// Create a bytes value from an owned Vec<u8>.
    #[must_use]
    pub fn bytes_owned(b: Vec<u8>) -> SqlValue<'static> {
        SqlValue::Bytes(Cow::Owned(b))
    }
}

impl From<bool> for SqlValue<'static> {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue<'static> {
    fn from(v: i32) -> Self {
        SqlValue::I64(i64::from(v))
    }
}

impl From<i64> for SqlValue<'static> {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<u32> for SqlValue<'static> {
    fn from(v: u32) -> Self {
        SqlValue::I64(i64::from(v))
    }
}

impl From<f64> for SqlValue<'static> {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<Decimal> for SqlValue<'static> {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<String> for SqlValue<'static> {
    fn from(v: String) -> Self {
        SqlValue::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a str> for SqlValue<'a> {
    fn from(v: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(v))
    }
}

impl From<Vec<u8>> for SqlValue<'static> {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(Cow::Owned(v))
    }
}

impl From<NaiveDate> for SqlValue<'static> {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue<'static> {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<NaiveTime> for SqlValue<'static> {
    fn from(v: NaiveTime) -> Self {
        SqlValue::Time(v)
    }
}

impl<'a, T> From<Option<T>> for SqlValue<'a>
where
    T: Into<SqlValue<'a>>,
{
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_into_owned() {
        let borrowed: SqlValue<'_> = SqlValue::Text(Cow::Borrowed("hello"));
        let owned: SqlValue<'static> = borrowed.into_owned();
        assert_eq!(owned, SqlValue::Text(Cow::Owned("hello".to_string())));
    }

    #[test]
    fn test_literal_strings_are_escaped() {
        assert_eq!(SqlValue::from("Bag End").to_sql_literal(), "'Bag End'");
        assert_eq!(SqlValue::from("Mordor's gate").to_sql_literal(), "'Mordor''s gate'");
        assert_eq!(SqlValue::from("a\\b").to_sql_literal(), "'a\\\\b'");
        assert_eq!(SqlValue::from("line\nbreak").to_sql_literal(), "'line\\nbreak'");
    }

    #[test]
    fn test_literal_numbers_are_bare() {
        assert_eq!(SqlValue::from(9).to_sql_literal(), "9");
        assert_eq!(SqlValue::from(-3i64).to_sql_literal(), "-3");
        assert_eq!(SqlValue::from(2.5).to_sql_literal(), "2.5");
        assert_eq!(SqlValue::from(true).to_sql_literal(), "1");
        let d = Decimal::new(12345, 2);
        assert_eq!(SqlValue::from(d).to_sql_literal(), "123.45");
    }

    #[test]
    fn test_literal_null_and_non_finite() {
        assert_eq!(SqlValue::Null.to_sql_literal(), "NULL");
        assert_eq!(SqlValue::from(f64::NAN).to_sql_literal(), "NULL");
        let missing: Option<i64> = None;
        assert!(SqlValue::from(missing).is_null());
    }

    #[test]
    fn test_literal_temporal_and_bytes() {
        let date = NaiveDate::from_ymd_opt(3019, 3, 25).unwrap();
        assert_eq!(SqlValue::from(date).to_sql_literal(), "'3019-03-25'");

        let dt = date.and_hms_opt(12, 30, 0).unwrap();
        assert_eq!(SqlValue::from(dt).to_sql_literal(), "'3019-03-25 12:30:00'");

        assert_eq!(SqlValue::from(vec![0xde, 0xad]).to_sql_literal(), "X'DEAD'");
    }
}
