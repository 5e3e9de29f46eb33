//! One MySQL table of a database pair.

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::Row;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{CheckOptions, CompareMode};
use crate::core::{push_digest, RepairKind, RowDigest, RowImage, Side, TableSource};
use crate::drivers::common::sql::{join_key, pick_columns, text_digest, SqlDialect, TableShape};
use crate::error::{CheckError, Result};

// CAST to CHAR to sidestep collation differences
const LOAD_COLUMNS: &str = r#"
    SELECT CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

const LOAD_PRIMARY_KEY: &str = r#"
    SELECT CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME
    FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
    ORDER BY ORDINAL_POSITION
"#;

/// A MySQL table, compared across the two pools of its pair.
pub struct MysqlTable {
    db_name: String,
    name: String,
    source: MySqlPool,
    target: MySqlPool,
    mode: CompareMode,
    key_override: Vec<String>,
    skip_cols: Vec<String>,
    filter: Option<String>,
    shape: Option<TableShape>,
}

impl MysqlTable {
    pub fn new(
        db_name: &str,
        name: &str,
        source: MySqlPool,
        target: MySqlPool,
        options: &CheckOptions,
    ) -> Self {
        Self {
            db_name: db_name.to_string(),
            name: name.to_string(),
            source,
            target,
            mode: options.mode,
            key_override: options.keys.clone(),
            skip_cols: options.skip_cols.clone(),
            filter: options.where_clause.clone(),
            shape: None,
        }
    }

    fn label(&self) -> String {
        format!("{}.{}", self.db_name, self.name)
    }

    fn pool(&self, side: Side) -> &MySqlPool {
        match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        }
    }

    fn shape(&self) -> Result<&TableShape> {
        self.shape
            .as_ref()
            .ok_or_else(|| CheckError::precheck(self.label(), "precheck has not run"))
    }

    async fn load_names(&self, query: &str, side: Side) -> Result<Vec<String>> {
        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.name)
            .fetch_all(self.pool(side))
            .await
            .map_err(|e| CheckError::pool(e, format!("loading {} catalog", self.label())))?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("COLUMN_NAME").map_err(CheckError::from))
            .collect()
    }
}

/// Every column of a row as optional text.
fn text_values(row: &MySqlRow) -> Result<Vec<Option<String>>> {
    (0..row.len())
        .map(|i| row.try_get::<Option<String>, _>(i).map_err(CheckError::from))
        .collect()
}

#[async_trait]
impl TableSource for MysqlTable {
    fn db_name(&self) -> &str {
        &self.db_name
    }

    fn table_name(&self) -> &str {
        &self.name
    }

    async fn precheck(&mut self) -> Result<()> {
        let label = self.label();
        let (source_cols, target_cols, primary_key) = tokio::join!(
            self.load_names(LOAD_COLUMNS, Side::Source),
            self.load_names(LOAD_COLUMNS, Side::Target),
            self.load_names(LOAD_PRIMARY_KEY, Side::Source)
        );
        let (source_cols, target_cols) = (source_cols?, target_cols?);

        let (keys, columns) = pick_columns(
            &label,
            primary_key?,
            &source_cols,
            &self.key_override,
            &self.skip_cols,
        )?;
        if let Some(missing) = keys
            .iter()
            .chain(&columns)
            .find(|c| !target_cols.contains(c))
        {
            return Err(CheckError::precheck(
                label,
                format!("column '{}' does not exist on target", missing),
            ));
        }

        debug!("[{}] keys {:?}, compared columns {:?}", label, keys, columns);
        self.shape = Some(TableShape::new(
            SqlDialect::Mysql,
            &self.name,
            keys,
            columns,
            self.filter.clone(),
        )?);
        Ok(())
    }

    async fn pull_rows(
        &self,
        side: Side,
        out: mpsc::Sender<RowDigest>,
        stop: CancellationToken,
    ) -> Result<u64> {
        let label = self.label();
        let shape = self.shape()?;
        let sql = match self.mode {
            CompareMode::Slow => shape.slow_sql(),
            _ => shape.fast_sql(),
        };
        debug!("[{}] {} query: {}", label, side, sql);

        let mut rows = sqlx::query(&sql).fetch(self.pool(side));
        let key_count = shape.keys().len();
        let mut delivered = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                next = rows.try_next() => next,
            };
            let row = match next {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => {
                    return Err(CheckError::stream(
                        &label,
                        format!("{} read after {} rows: {}", side, delivered, e),
                    ))
                }
            };

            let digest = match self.mode {
                CompareMode::Slow => {
                    let values = text_values(&row)?;
                    let (key, cols) = values.split_at(key_count);
                    text_digest(
                        join_key(key.iter().map(|v| v.as_deref())),
                        cols.iter().map(|v| v.as_deref()),
                    )
                }
                _ => {
                    let key: String = row.try_get("pk")?;
                    let checksum: i64 = row.try_get("chksum")?;
                    RowDigest::new(key, checksum as u32)
                }
            };
            if !push_digest(&out, &stop, digest).await {
                break;
            }
            delivered += 1;
        }
        Ok(delivered)
    }

    async fn row_count(&self, side: Side) -> Result<u64> {
        let sql = self.shape()?.count_sql();
        let count: i64 = sqlx::query(&sql)
            .fetch_one(self.pool(side))
            .await?
            .try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_rows(&self, side: Side, key: &str) -> Result<Vec<RowImage>> {
        let shape = self.shape()?;
        let sql = shape.lookup_sql(key)?;
        let rows = sqlx::query(&sql).fetch_all(self.pool(side)).await?;
        rows.iter()
            .map(|row| Ok(shape.row_image(text_values(row)?)))
            .collect()
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
