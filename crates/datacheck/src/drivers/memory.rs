//! In-memory database pair.
//!
//! Every table has a key column `id` and one compared column `v`. Rows live
//! in sorted maps per side, so digests stream in ascending key order exactly
//! like an `ORDER BY` query would deliver them. Row filters are ignored.
//!
//! Faults can be injected per table to exercise the failure paths of a
//! check, and a "catch-up" write can be queued to land after one side has
//! been streamed, which is how replication lag looks to the comparator.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{CheckOptions, DbPair};
use crate::core::{push_digest, Connector, Database, RepairKind, RowDigest, RowImage, Side, TableSource};
use crate::error::{CheckError, Result};

use super::common::sql::{text_digest, SqlDialect, TableShape};

const KEY_COLUMN: &str = "id";
const VALUE_COLUMN: &str = "v";

type Rows = BTreeMap<String, RowImage>;

/// Injected failure for one table.
#[derive(Debug, Clone)]
pub enum Fault {
    /// `precheck` fails with this message.
    Precheck(String),
    /// Streaming `side` fails after this many digests were delivered.
    StreamAfter(Side, u64),
    /// Every delivered digest is preceded by this pause.
    SlowStream(Duration),
    /// `precheck` panics, taking the check task down.
    Panic,
}

#[derive(Clone)]
struct TableData {
    source: Arc<RwLock<Option<Rows>>>,
    target: Arc<RwLock<Option<Rows>>>,
    fault: Option<Fault>,
    catch_up: Arc<Mutex<Option<(Side, Rows)>>>,
}

impl TableData {
    fn new(source: Option<Rows>, target: Option<Rows>) -> Self {
        Self {
            source: Arc::new(RwLock::new(source)),
            target: Arc::new(RwLock::new(target)),
            fault: None,
            catch_up: Arc::new(Mutex::new(None)),
        }
    }

    fn side(&self, side: Side) -> &RwLock<Option<Rows>> {
        match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        }
    }

    async fn snapshot(&self, side: Side) -> Option<Rows> {
        self.side(side).read().await.clone()
    }
}

fn to_rows(pairs: &[(&str, &str)]) -> Rows {
    pairs
        .iter()
        .map(|(k, v)| {
            let mut image = RowImage::new();
            image.insert(VALUE_COLUMN.to_string(), Some(v.to_string()));
            (k.to_string(), image)
        })
        .collect()
}

/// A database pair held in memory.
pub struct MemoryDatabase {
    source_name: String,
    target_name: String,
    tables: BTreeMap<String, TableData>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::with_names(name.clone(), name)
    }

    pub fn with_names(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_name: source.into(),
            target_name: target.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Add a table present on both sides, as `(id, v)` pairs.
    pub fn table_rows(
        mut self,
        name: &str,
        source: &[(&str, &str)],
        target: &[(&str, &str)],
    ) -> Self {
        let data = TableData::new(Some(to_rows(source)), Some(to_rows(target)));
        self.tables.insert(name.to_string(), data);
        self
    }

    /// Add a table that exists on one side only.
    pub fn one_sided_table(mut self, name: &str, side: Side, rows: &[(&str, &str)]) -> Self {
        let rows = Some(to_rows(rows));
        let data = match side {
            Side::Source => TableData::new(rows, None),
            Side::Target => TableData::new(None, rows),
        };
        self.tables.insert(name.to_string(), data);
        self
    }

    /// Inject a fault into an existing table.
    pub fn fault(mut self, name: &str, fault: Fault) -> Self {
        if let Some(data) = self.tables.get_mut(name) {
            data.fault = Some(fault);
        }
        self
    }

    /// Replace `side`'s rows once that side has been streamed.
    pub fn catch_up(mut self, name: &str, side: Side, rows: &[(&str, &str)]) -> Self {
        if let Some(data) = self.tables.get_mut(name) {
            data.catch_up = Arc::new(Mutex::new(Some((side, to_rows(rows)))));
        }
        self
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn target_name(&self) -> &str {
        &self.target_name
    }

    async fn list_tables(&self, side: Side) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for (name, data) in &self.tables {
            if data.side(side).read().await.is_some() {
                names.push(name.clone());
            }
        }
        Ok(names)
    }

    fn table(&self, name: &str, _options: &CheckOptions) -> Box<dyn TableSource> {
        Box::new(MemoryTable {
            db_name: self.target_name.clone(),
            name: name.to_string(),
            data: self.tables.get(name).cloned(),
            shape: None,
        })
    }

    async fn close(&self) {
        debug!("Memory database {} closed", self.target_name);
    }
}

/// Hands out in-memory pairs by source database name.
///
/// Each pair can be connected once; a second connect fails like an
/// unreachable server would.
#[derive(Default)]
pub struct MemoryConnector {
    databases: Mutex<BTreeMap<String, MemoryDatabase>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(self, db: MemoryDatabase) -> Self {
        let mut databases = self.databases.into_inner();
        databases.insert(db.source_name.clone(), db);
        Self {
            databases: Mutex::new(databases),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, pair: &DbPair) -> Result<Box<dyn Database>> {
        let db = self.databases.lock().await.remove(&pair.source).ok_or_else(|| {
            CheckError::pool(
                format!("unknown database '{}'", pair.source),
                "connecting to memory source",
            )
        })?;
        Ok(Box::new(db))
    }
}

/// One in-memory table.
pub struct MemoryTable {
    db_name: String,
    name: String,
    data: Option<TableData>,
    shape: Option<TableShape>,
}

impl MemoryTable {
    fn label(&self) -> String {
        format!("{}.{}", self.db_name, self.name)
    }

    fn data(&self) -> Result<&TableData> {
        self.data
            .as_ref()
            .ok_or_else(|| CheckError::precheck(self.label(), "table does not exist"))
    }

    fn shape(&self) -> Result<&TableShape> {
        self.shape
            .as_ref()
            .ok_or_else(|| CheckError::precheck(self.label(), "precheck has not run"))
    }

    async fn rows(&self, side: Side) -> Result<Rows> {
        self.data()?.snapshot(side).await.ok_or_else(|| {
            CheckError::stream(self.label(), format!("table missing on {} side", side))
        })
    }
}

#[async_trait]
impl TableSource for MemoryTable {
    fn db_name(&self) -> &str {
        &self.db_name
    }

    fn table_name(&self) -> &str {
        &self.name
    }

    async fn precheck(&mut self) -> Result<()> {
        let data = self.data()?;
        match &data.fault {
            Some(Fault::Precheck(message)) => {
                return Err(CheckError::precheck(self.label(), message.clone()));
            }
            Some(Fault::Panic) => panic!("{}: injected panic", self.label()),
            _ => {}
        }
        for side in [Side::Source, Side::Target] {
            if data.side(side).read().await.is_none() {
                return Err(CheckError::precheck(
                    self.label(),
                    format!("table does not exist on {} side", side),
                ));
            }
        }
        self.shape = Some(TableShape::new(
            SqlDialect::Postgres,
            &self.name,
            vec![KEY_COLUMN.to_string()],
            vec![VALUE_COLUMN.to_string()],
            None,
        )?);
        Ok(())
    }

    async fn pull_rows(
        &self,
        side: Side,
        out: mpsc::Sender<RowDigest>,
        stop: CancellationToken,
    ) -> Result<u64> {
        let data = self.data()?;
        let rows = self.rows(side).await?;
        let mut delivered = 0u64;

        for (key, image) in rows {
            match &data.fault {
                Some(Fault::StreamAfter(fault_side, after))
                    if *fault_side == side && delivered == *after =>
                {
                    return Err(CheckError::stream(
                        self.label(),
                        format!("{} connection lost after {} rows", side, delivered),
                    ));
                }
                Some(Fault::SlowStream(pause)) => {
                    tokio::select! {
                        _ = stop.cancelled() => return Ok(delivered),
                        _ = tokio::time::sleep(*pause) => {}
                    }
                }
                _ => {}
            }

            let digest = text_digest(key, image.values().map(|v| v.as_deref()));
            if !push_digest(&out, &stop, digest).await {
                return Ok(delivered);
            }
            delivered += 1;
        }

        let mut catch_up = data.catch_up.lock().await;
        if matches!(&*catch_up, Some((s, _)) if *s == side) {
            if let Some((_, rows)) = catch_up.take() {
                *data.side(side).write().await = Some(rows);
                debug!("[{}] {} side caught up", self.label(), side);
            }
        }
        Ok(delivered)
    }

    async fn row_count(&self, side: Side) -> Result<u64> {
        Ok(self.rows(side).await?.len() as u64)
    }

    async fn fetch_rows(&self, side: Side, key: &str) -> Result<Vec<RowImage>> {
        Ok(self.rows(side).await?.remove(key).into_iter().collect())
    }

    async fn repair_statement(&self, key: &str, kind: RepairKind) -> Result<String> {
        let source = match kind {
            RepairKind::Delete => None,
            RepairKind::Update | RepairKind::Insert => {
                self.fetch_rows(Side::Source, key).await?.into_iter().next()
            }
        };
        self.shape()?.repair(kind, key, source.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> MemoryDatabase {
        MemoryDatabase::new("shop")
            .table_rows("orders", &[("1", "a"), ("2", "b")], &[("1", "a")])
            .one_sided_table("audit", Side::Target, &[("1", "x")])
    }

    #[tokio::test]
    async fn test_list_tables_per_side() {
        let db = db();
        assert_eq!(db.list_tables(Side::Source).await.unwrap(), vec!["orders"]);
        assert_eq!(
            db.list_tables(Side::Target).await.unwrap(),
            vec!["audit", "orders"]
        );
    }

    #[tokio::test]
    async fn test_precheck_rejects_missing_tables() {
        let db = db();
        let options = CheckOptions::default();
        assert!(db.table("audit", &options).precheck().await.is_err());
        assert!(db.table("nope", &options).precheck().await.is_err());
        assert!(db.table("orders", &options).precheck().await.is_ok());
    }

    #[tokio::test]
    async fn test_pull_rows_in_key_order() {
        let db = db();
        let mut table = db.table("orders", &CheckOptions::default());
        table.precheck().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let n = table
            .pull_rows(Side::Source, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(rx.recv().await.unwrap().key, "1");
        assert_eq!(rx.recv().await.unwrap().key, "2");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_fault() {
        let db = db().fault("orders", Fault::StreamAfter(Side::Source, 1));
        let table = db.table("orders", &CheckOptions::default());
        let (tx, _rx) = mpsc::channel(8);
        let err = table
            .pull_rows(Side::Source, tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after 1 rows"));
    }

    #[tokio::test]
    async fn test_catch_up_lands_after_pull() {
        let db = db().catch_up("orders", Side::Target, &[("1", "a"), ("2", "b")]);
        let table = db.table("orders", &CheckOptions::default());
        assert!(table.fetch_rows(Side::Target, "2").await.unwrap().is_empty());

        let (tx, _rx) = mpsc::channel(8);
        table
            .pull_rows(Side::Target, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(table.fetch_rows(Side::Target, "2").await.unwrap().len(), 1);
        assert!(table.recheck_key("2").await.unwrap());
    }

    #[tokio::test]
    async fn test_repair_statements() {
        let db = db();
        let mut table = db.table("orders", &CheckOptions::default());
        table.precheck().await.unwrap();
        assert_eq!(
            table.repair_statement("2", RepairKind::Insert).await.unwrap(),
            "INSERT INTO \"orders\" (\"id\", \"v\") VALUES ('2', 'b');"
        );
        assert!(table.repair_statement("9", RepairKind::Update).await.is_err());
    }
}
