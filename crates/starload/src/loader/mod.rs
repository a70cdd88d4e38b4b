//! Adaptive batch loader.
//!
//! Inserts an ordered sequence of rendered row tuples through one
//! [`InsertTemplate`], sizing batches so each multi-row statement fits the
//! smaller of the server's and the client's packet ceiling. A batch the store
//! rejects is rolled back and retried one row at a time; rows that still fail
//! are returned as [`RowInsertError`]s instead of aborting the load.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{parse_size, ClientConfig};
use crate::error::{LoadError, Result};
use crate::sql::InsertTemplate;
use crate::store::{Store, StoreError};

/// Session variable holding the server's packet ceiling.
pub const MAX_ALLOWED_PACKET: &str = "max_allowed_packet";

/// Where the client-side packet ceiling is read from.
#[derive(Debug, Clone)]
pub enum ClientConfigSource {
    /// MySQL option file, re-read for every load.
    File(PathBuf),
    /// Already parsed options.
    Inline(ClientConfig),
}

/// Server and client packet ceilings, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketLimits {
    pub server: u64,
    pub client: u64,
}

impl PacketLimits {
    pub fn effective(&self) -> u64 {
        self.server.min(self.client)
    }
}

/// A row that could not be inserted on its own.
#[derive(Debug, Clone)]
pub struct RowInsertError {
    /// Position of the row in the loaded sequence.
    pub index: usize,
    /// Rendered row tuple.
    pub row: String,
    pub error: StoreError,
}

impl fmt::Display for RowInsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {} failed: {}", self.index, self.error)
    }
}

impl std::error::Error for RowInsertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Number of rows per batch.
///
/// `packets = ceil(estimate / limit)` and the batch size is
/// `total / (packets + 1)`; a result of zero collapses to a single batch of
/// all rows. Never zero while rows remain.
pub fn plan_batch_size(total_rows: usize, estimated_size: u64, limit: u64) -> usize {
    if total_rows == 0 {
        return 0;
    }
    let packets = estimated_size.div_ceil(limit.max(1));
    let divisor = usize::try_from(packets.saturating_add(1)).unwrap_or(usize::MAX);
    match total_rows / divisor {
        0 => total_rows,
        size => size,
    }
}

/// Inserts row sequences within the effective packet ceiling.
#[derive(Debug, Clone)]
pub struct BatchLoader {
    client: ClientConfigSource,
}

impl BatchLoader {
    pub fn new(client: ClientConfigSource) -> Self {
        Self { client }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(ClientConfigSource::File(path.into()))
    }

    pub fn inline(client: ClientConfig) -> Self {
        Self::new(ClientConfigSource::Inline(client))
    }

    /// Read both packet ceilings.
    ///
    /// # Errors
    ///
    /// `LoadError::Config` if either ceiling is missing or unparseable,
    /// `LoadError::Connection` if the store is unusable.
    pub async fn packet_limits(&self, store: &mut dyn Store) -> Result<PacketLimits> {
        let server = match store.session_variable(MAX_ALLOWED_PACKET).await {
            Ok(Some(raw)) => parse_size(&raw)?,
            Ok(None) => {
                return Err(LoadError::Config(format!(
                    "server variable {} is not set",
                    MAX_ALLOWED_PACKET
                )))
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                return Err(LoadError::Config(format!(
                    "cannot read server variable {}: {}",
                    MAX_ALLOWED_PACKET, e
                )))
            }
        };

        let client = match &self.client {
            ClientConfigSource::File(path) => ClientConfig::load(path)?.max_allowed_packet()?,
            ClientConfigSource::Inline(config) => config.max_allowed_packet()?,
        };

        let limits = PacketLimits { server, client };
        if limits.effective() == 0 {
            return Err(LoadError::Config(format!(
                "{} must be greater than zero",
                MAX_ALLOWED_PACKET
            )));
        }
        Ok(limits)
    }

    /// Insert `rows` in order and return the rows that failed.
    ///
    /// Every row not in the returned list has been committed.
    ///
    /// # Errors
    ///
    /// Only when no row can be attempted at all: packet limits unreadable
    /// (`LoadError::Config`) or the store unusable (`LoadError::Connection`).
    pub async fn load<S: AsRef<str>>(
        &self,
        store: &mut dyn Store,
        table: &str,
        template: &InsertTemplate,
        rows: &[S],
    ) -> Result<Vec<RowInsertError>> {
        if rows.is_empty() {
            debug!("{}: nothing to insert", table);
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let limits = self.packet_limits(store).await?;
        let limit = limits.effective();
        let estimate = template.estimate(rows) as u64;
        let batch_size = plan_batch_size(rows.len(), estimate, limit);
        debug!(
            "{}: packet limit {} (server {}, client {}), estimated {} bytes, {} batch(es) of {} row(s)",
            table,
            limit,
            limits.server,
            limits.client,
            estimate,
            rows.len().div_ceil(batch_size),
            batch_size
        );

        let mut failed = Vec::new();
        for (n, batch) in rows.chunks(batch_size).enumerate() {
            let offset = n * batch_size;
            let Err(e) = attempt(store, &template.statement(batch)).await else {
                continue;
            };
            if e.is_fatal() {
                return Err(e.into());
            }
            warn!(
                "{}: batch {} ({} row(s)) failed, retrying row by row: {}",
                table,
                n + 1,
                batch.len(),
                e
            );
            release(store, table).await?;

            for (i, row) in batch.iter().enumerate() {
                let row = row.as_ref();
                let Err(e) = attempt(store, &template.statement(&[row])).await else {
                    continue;
                };
                if e.is_fatal() {
                    return Err(e.into());
                }
                let index = offset + i;
                error!("{}: row {} failed: {}", table, index, e);
                release(store, table).await?;
                failed.push(RowInsertError {
                    index,
                    row: row.to_string(),
                    error: e,
                });
            }
        }

        info!(
            "{}: inserted {} of {} row(s) in {:?}",
            table,
            rows.len() - failed.len(),
            rows.len(),
            start.elapsed()
        );
        Ok(failed)
    }
}

/// Run one insert and commit it.
async fn attempt(store: &mut dyn Store, sql: &str) -> std::result::Result<(), StoreError> {
    store.execute(sql, &[]).await?;
    store.commit().await
}

/// Roll back after a failed attempt. Only an unusable store is an error.
async fn release(store: &mut dyn Store, table: &str) -> Result<()> {
    match store.rollback().await {
        Err(e) if e.is_fatal() => Err(e.into()),
        Err(e) => {
            warn!("{}: rollback failed: {}", table, e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}
