//! Backend capabilities used by the reconciliation engine.
//!
//! - [`Connector`]: opens a [`Database`] for a configured pair
//! - [`Database`]: one database pair (a source and a target connection pool)
//! - [`TableSource`]: one table of that pair, able to stream digests from
//!   either side and answer direct lookups by key
//!
//! # Streaming
//!
//! [`TableSource::pull_rows`] pushes [`RowDigest`]s into a bounded channel in
//! strictly ascending key order. The producer must check its stop token at
//! every send (see [`push_digest`]) so it never blocks once the comparator has
//! given up on the table.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{CheckOptions, DbPair};
use crate::error::Result;

use super::digest::{RowDigest, Side};

/// One row returned by a direct lookup: compared column name to value text.
pub type RowImage = BTreeMap<String, Option<String>>;

/// Repair statement flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairKind {
    /// Row exists only on the target.
    Delete,
    /// Row differs; take the source's values.
    Update,
    /// Row exists only on the source.
    Insert,
}

impl RepairKind {
    /// File extension suffix for scripts of this kind.
    pub fn suffix(&self) -> &'static str {
        match self {
            RepairKind::Delete => "delete.sql",
            RepairKind::Update => "update.sql",
            RepairKind::Insert => "insert.sql",
        }
    }
}

/// A connected database pair.
#[async_trait]
pub trait Database: Send + Sync {
    /// Source database name.
    fn source_name(&self) -> &str;

    /// Target database name. Results and reports are filed under it.
    fn target_name(&self) -> &str;

    /// List base tables on one side.
    async fn list_tables(&self, side: Side) -> Result<Vec<String>>;

    /// Build a table handle. No I/O happens until [`TableSource::precheck`].
    fn table(&self, name: &str, options: &CheckOptions) -> Box<dyn TableSource>;

    /// Close both connection pools.
    async fn close(&self);
}

/// Opens database pairs.
///
/// The orchestrator asks for one pair at a time and closes it before the next.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, pair: &DbPair) -> Result<Box<dyn Database>>;
}

/// One table of a database pair.
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Target database name.
    fn db_name(&self) -> &str;

    /// Table name.
    fn table_name(&self) -> &str;

    /// Resolve keys, compared columns and the digest query.
    ///
    /// Must be called once before any other method that touches data.
    async fn precheck(&mut self) -> Result<()>;

    /// Stream digests from one side into `out`, ascending by key.
    ///
    /// Returns the number of digests delivered. Stops early, without error,
    /// when `stop` fires or the receiver is dropped.
    async fn pull_rows(
        &self,
        side: Side,
        out: mpsc::Sender<RowDigest>,
        stop: CancellationToken,
    ) -> Result<u64>;

    /// Count rows on one side, honoring the row filter.
    async fn row_count(&self, side: Side) -> Result<u64>;

    /// Fetch the compared columns of every row matching `key` on one side.
    async fn fetch_rows(&self, side: Side, key: &str) -> Result<Vec<RowImage>>;

    /// Render one repair statement for `key`.
    async fn repair_statement(&self, key: &str, kind: RepairKind) -> Result<String>;

    /// Re-query one key on both sides.
    ///
    /// Passes when neither side has the row, or both have exactly one row
    /// with equal values.
    async fn recheck_key(&self, key: &str) -> Result<bool> {
        let (source, target) = tokio::join!(
            self.fetch_rows(Side::Source, key),
            self.fetch_rows(Side::Target, key)
        );
        let (source, target) = (source?, target?);

        let passed = match (source.as_slice(), target.as_slice()) {
            ([], []) => true,
            ([s], [t]) => s == t,
            _ => false,
        };
        debug!(
            "[{}.{}] recheck key [{}]: {} (rows {} vs {})",
            self.db_name(),
            self.table_name(),
            key,
            if passed { "pass" } else { "fail" },
            source.len(),
            target.len()
        );
        Ok(passed)
    }

    /// Re-query every key, returning the ones that pass.
    ///
    /// Lookup errors are logged and the key stays unresolved.
    async fn recheck(&self, keys: &[String]) -> Vec<String> {
        let mut passed = Vec::new();
        for key in keys {
            match self.recheck_key(key).await {
                Ok(true) => passed.push(key.clone()),
                Ok(false) => {}
                Err(e) => warn!(
                    "[{}.{}] recheck of key [{}] failed: {}",
                    self.db_name(),
                    self.table_name(),
                    key,
                    e
                ),
            }
        }
        passed
    }
}

/// Send one digest unless the stop token fires first.
///
/// Returns `false` when the producer should stop: the token fired or the
/// receiver is gone. Both are normal shutdown paths, not errors.
pub async fn push_digest(
    out: &mpsc::Sender<RowDigest>,
    stop: &CancellationToken,
    digest: RowDigest,
) -> bool {
    tokio::select! {
        biased;
        _ = stop.cancelled() => false,
        sent = out.send(digest) => sent.is_ok(),
    }
}
