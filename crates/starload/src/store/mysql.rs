//! MySQL/MariaDB store backed by a single mysql_async connection.
//!
//! The session runs with `autocommit = 0`; work is made durable by
//! [`Store::commit`]. A connection that drops mid-statement is discarded and
//! reopened transparently before the next statement, so a load can carry on
//! past a payload the server refused by closing the socket.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::consts::ColumnType as MyType;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Row, SslOpts, Value};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::{ColumnInfo, Connector, QueryResult, Store, StoreError, StoreResult};
use crate::config::DatabaseConfig;
use crate::core::value::{quote_string, DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT};
use crate::core::SqlValue;
use crate::error::{LoadError, Result};

/// Map the configured `ssl_mode` to mysql_async TLS options.
fn ssl_opts(ssl_mode: &str) -> Option<SslOpts> {
    match ssl_mode.to_lowercase().as_str() {
        "disable" => {
            warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
            None
        }
        "prefer" | "require" => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
        "verify-ca" | "verify_ca" | "verify-full" | "verify_identity" => Some(SslOpts::default()),
        other => {
            warn!("Unknown ssl_mode '{}', defaulting to prefer", other);
            Some(SslOpts::default().with_danger_accept_invalid_certs(true))
        }
    }
}

fn build_opts(config: &DatabaseConfig) -> Opts {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(&config.host)
        .tcp_port(config.port)
        .db_name(Some(&config.database))
        .user(Some(&config.user))
        .pass(Some(&config.password))
        .init(vec!["SET NAMES utf8mb4", "SET autocommit = 0"]);

    if let Some(ssl) = ssl_opts(&config.ssl_mode) {
        builder = builder.ssl_opts(ssl);
    }
    builder.into()
}

/// One MySQL session.
pub struct MysqlStore {
    opts: Opts,
    target: String,
    conn: Option<Conn>,
    closed: bool,
}

impl MysqlStore {
    /// Open a connection described by `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let opts = build_opts(config);
        let target = format!("{}:{}/{}", config.host, config.port, config.database);
        let conn = Conn::new(opts.clone())
            .await
            .map_err(|e| LoadError::Connection(format!("connecting to {}: {}", target, e)))?;

        info!("Connected to MySQL: {}", target);
        Ok(Self {
            opts,
            target,
            conn: Some(conn),
            closed: false,
        })
    }

    /// The live connection, reopening it if the last statement dropped it.
    async fn conn(&mut self) -> StoreResult<&mut Conn> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if self.conn.is_none() {
            warn!("Reconnecting to {}", self.target);
            let conn = Conn::new(self.opts.clone()).await.map_err(|e| {
                StoreError::Connection(format!("reconnecting to {}: {}", self.target, e))
            })?;
            self.conn = Some(conn);
        }
        self.conn.as_mut().ok_or(StoreError::Closed)
    }

    /// Map a driver result, forgetting the connection when it was lost.
    fn settle<T>(&mut self, result: std::result::Result<T, mysql_async::Error>) -> StoreResult<T> {
        result.map_err(|e| {
            let err = map_error(e);
            if matches!(err, StoreError::Lost(_)) {
                self.conn = None;
            }
            err
        })
    }
}

fn map_error(err: mysql_async::Error) -> StoreError {
    match err {
        mysql_async::Error::Server(e) => StoreError::Statement {
            code: Some(e.code),
            message: e.message,
        },
        mysql_async::Error::Io(e) => StoreError::Lost(e.to_string()),
        other => StoreError::statement(None, other.to_string()),
    }
}

#[async_trait]
impl Store for MysqlStore {
    async fn query(&mut self, sql: &str) -> StoreResult<QueryResult> {
        let conn = self.conn().await?;
        let outcome = async {
            let mut result = conn.query_iter(sql).await?;
            let types: Vec<MyType> = result
                .columns()
                .map(|cols| cols.iter().map(|c| c.column_type()).collect())
                .unwrap_or_default();
            let columns: Vec<ColumnInfo> = result
                .columns()
                .map(|cols| {
                    cols.iter()
                        .map(|c| ColumnInfo {
                            name: c.name_str().into_owned(),
                            type_name: type_name(c.column_type()).to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            let rows: Vec<Row> = result.collect().await?;
            Ok::<_, mysql_async::Error>((columns, types, rows))
        }
        .await;
        let (columns, types, rows) = self.settle(outcome)?;

        let rows = rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| match row.as_ref(i) {
                        Some(v) => decode_value(v, types.get(i).copied()),
                        None => SqlValue::Null,
                    })
                    .collect()
            })
            .collect();

        Ok(QueryResult { columns, rows })
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue<'_>]) -> StoreResult<u64> {
        let values: Vec<Value> = params.iter().map(encode_value).collect();
        let conn = self.conn().await?;
        let outcome = if values.is_empty() {
            conn.query_drop(sql).await
        } else {
            conn.exec_drop(sql, values).await
        };
        let affected = conn.affected_rows();
        self.settle(outcome)?;
        Ok(affected)
    }

    /// Affected rows are counted per parameter set executed.
    async fn execute_many(&mut self, sql: &str, params: &[Vec<SqlValue<'_>>]) -> StoreResult<u64> {
        let sets: Vec<Vec<Value>> = params
            .iter()
            .map(|set| set.iter().map(encode_value).collect())
            .collect();
        let count = sets.len() as u64;
        let conn = self.conn().await?;
        let outcome = conn.exec_batch(sql, sets).await;
        self.settle(outcome)?;
        Ok(count)
    }

    async fn session_variable(&mut self, name: &str) -> StoreResult<Option<String>> {
        let sql = format!("SHOW SESSION VARIABLES LIKE {}", quote_string(name));
        let conn = self.conn().await?;
        let outcome = conn.query_first::<(String, String), _>(sql.as_str()).await;
        Ok(self.settle(outcome)?.map(|(_, value)| value))
    }

    async fn table_names(&mut self) -> StoreResult<Vec<String>> {
        let conn = self.conn().await?;
        let outcome = conn.query::<String, _>("SHOW TABLES").await;
        self.settle(outcome)
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let conn = self.conn().await?;
        let outcome = conn.query_drop("COMMIT").await;
        self.settle(outcome)
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        let conn = self.conn().await?;
        let outcome = conn.query_drop("ROLLBACK").await;
        self.settle(outcome)
    }

    async fn close(&mut self) -> StoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let committed = conn.query_drop("COMMIT").await.map_err(map_error);
        if let Err(e) = conn.disconnect().await {
            debug!("Disconnect from {} failed: {}", self.target, e);
        }
        debug!("Closed connection to {}", self.target);
        committed
    }

    fn is_open(&self) -> bool {
        !self.closed
    }
}

/// Opens [`MysqlStore`]s from a database entry.
#[derive(Debug, Clone)]
pub struct MysqlConnector {
    config: DatabaseConfig,
}

impl MysqlConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    async fn connect(&self) -> Result<Box<dyn Store>> {
        Ok(Box::new(MysqlStore::connect(&self.config).await?))
    }

    fn describe(&self) -> String {
        format!(
            "{}:{}/{}",
            self.config.host, self.config.port, self.config.database
        )
    }
}

fn type_name(ty: MyType) -> &'static str {
    match ty {
        MyType::MYSQL_TYPE_TINY => "TINYINT",
        MyType::MYSQL_TYPE_SHORT => "SMALLINT",
        MyType::MYSQL_TYPE_INT24 => "MEDIUMINT",
        MyType::MYSQL_TYPE_LONG => "INT",
        MyType::MYSQL_TYPE_LONGLONG => "BIGINT",
        MyType::MYSQL_TYPE_YEAR => "YEAR",
        MyType::MYSQL_TYPE_FLOAT => "FLOAT",
        MyType::MYSQL_TYPE_DOUBLE => "DOUBLE",
        MyType::MYSQL_TYPE_DECIMAL | MyType::MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
        MyType::MYSQL_TYPE_DATE => "DATE",
        MyType::MYSQL_TYPE_DATETIME => "DATETIME",
        MyType::MYSQL_TYPE_TIMESTAMP => "TIMESTAMP",
        MyType::MYSQL_TYPE_TIME => "TIME",
        MyType::MYSQL_TYPE_TINY_BLOB
        | MyType::MYSQL_TYPE_MEDIUM_BLOB
        | MyType::MYSQL_TYPE_LONG_BLOB
        | MyType::MYSQL_TYPE_BLOB => "BLOB",
        MyType::MYSQL_TYPE_NULL => "NULL",
        _ => "VARCHAR",
    }
}

/// Convert a bound parameter.
fn encode_value(value: &SqlValue<'_>) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Bool(b) => Value::Int(i64::from(*b)),
        SqlValue::I64(i) => Value::Int(*i),
        SqlValue::F64(f) => Value::Double(*f),
        SqlValue::Decimal(d) => Value::Bytes(d.to_string().into_bytes()),
        SqlValue::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
        SqlValue::Bytes(b) => Value::Bytes(b.to_vec()),
        SqlValue::Date(d) => Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        SqlValue::DateTime(dt) => Value::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1_000,
        ),
        SqlValue::Time(t) => Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
    }
}

/// Convert a result value. The text protocol delivers everything as bytes,
/// so the column type decides the parse; unparseable values stay text.
fn decode_value(value: &Value, ty: Option<MyType>) -> SqlValue<'static> {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(i) => SqlValue::I64(*i),
        Value::UInt(u) => i64::try_from(*u)
            .map(SqlValue::I64)
            .unwrap_or_else(|_| SqlValue::Decimal(Decimal::from(*u))),
        Value::Float(f) => SqlValue::F64(f64::from(*f)),
        Value::Double(f) => SqlValue::F64(*f),
        Value::Date(y, mo, d, h, mi, s, us) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*mo), u32::from(*d));
            let time = NaiveTime::from_hms_micro_opt(u32::from(*h), u32::from(*mi), u32::from(*s), *us);
            match (date, time, ty) {
                (Some(date), _, Some(MyType::MYSQL_TYPE_DATE)) => SqlValue::Date(date),
                (Some(date), Some(time), _) => SqlValue::DateTime(NaiveDateTime::new(date, time)),
                _ => SqlValue::Null,
            }
        }
        Value::Time(neg, days, h, mi, s, us) => {
            match (*neg, *days, NaiveTime::from_hms_micro_opt(u32::from(*h), u32::from(*mi), u32::from(*s), *us)) {
                (false, 0, Some(t)) => SqlValue::Time(t),
                _ => {
                    let sign = if *neg { "-" } else { "" };
                    let hours = u32::from(*h) + *days * 24;
                    SqlValue::text_owned(format!("{}{:02}:{:02}:{:02}", sign, hours, mi, s))
                }
            }
        }
        Value::Bytes(bytes) => decode_bytes(bytes, ty),
    }
}

fn decode_bytes(bytes: &[u8], ty: Option<MyType>) -> SqlValue<'static> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return SqlValue::bytes_owned(bytes.to_vec());
    };
    let parsed = match ty {
        Some(
            MyType::MYSQL_TYPE_TINY
            | MyType::MYSQL_TYPE_SHORT
            | MyType::MYSQL_TYPE_INT24
            | MyType::MYSQL_TYPE_LONG
            | MyType::MYSQL_TYPE_LONGLONG
            | MyType::MYSQL_TYPE_YEAR,
        ) => text
            .parse::<i64>()
            .ok()
            .map(SqlValue::I64)
            .or_else(|| Decimal::from_str(text).ok().map(SqlValue::Decimal)),
        Some(MyType::MYSQL_TYPE_FLOAT | MyType::MYSQL_TYPE_DOUBLE) => {
            text.parse::<f64>().ok().map(SqlValue::F64)
        }
        Some(MyType::MYSQL_TYPE_DECIMAL | MyType::MYSQL_TYPE_NEWDECIMAL) => {
            Decimal::from_str(text).ok().map(SqlValue::Decimal)
        }
        Some(MyType::MYSQL_TYPE_DATE) => NaiveDate::parse_from_str(text, DATE_FORMAT)
            .ok()
            .map(SqlValue::Date),
        Some(MyType::MYSQL_TYPE_DATETIME | MyType::MYSQL_TYPE_TIMESTAMP) => {
            NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
                .ok()
                .map(SqlValue::DateTime)
        }
        Some(MyType::MYSQL_TYPE_TIME) => NaiveTime::parse_from_str(text, TIME_FORMAT)
            .ok()
            .map(SqlValue::Time),
        _ => None,
    };
    parsed.unwrap_or_else(|| SqlValue::text_owned(text.to_string()))
}
