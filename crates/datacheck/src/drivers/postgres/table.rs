//! One PostgreSQL table of a database pair.

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use futures::TryStreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{CheckOptions, CompareMode};
use crate::core::{push_digest, RepairKind, RowDigest, RowImage, Side, TableSource};
use crate::drivers::common::sql::{join_key, pick_columns, text_digest, SqlDialect, TableShape};
use crate::error::{CheckError, Result};

const LOAD_COLUMNS: &str = r#"
    SELECT column_name::text
    FROM information_schema.columns
    WHERE table_schema = $1 AND table_name = $2
    ORDER BY ordinal_position
"#;

const LOAD_PRIMARY_KEY: &str = r#"
    SELECT a.attname::text
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
    WHERE n.nspname = $1
      AND t.relname = $2
      AND c.contype = 'p'
      AND a.attnum = ANY(c.conkey)
    ORDER BY array_position(c.conkey, a.attnum)
"#;

/// A PostgreSQL table, compared across the two pools of its pair.
pub struct PostgresTable {
    db_name: String,
    name: String,
    source: Pool,
    target: Pool,
    mode: CompareMode,
    key_override: Vec<String>,
    skip_cols: Vec<String>,
    filter: Option<String>,
    shape: Option<TableShape>,
}

impl PostgresTable {
    pub fn new(db_name: &str, name: &str, source: Pool, target: Pool, options: &CheckOptions) -> Self {
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

    fn schema_and_table(&self) -> (&str, &str) {
        self.name.split_once('.').unwrap_or(("public", self.name.as_str()))
    }

    async fn client(&self, side: Side) -> Result<Object> {
        let pool = match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        };
        pool.get()
            .await
            .map_err(|e| CheckError::pool(e, format!("{} {} connection", self.label(), side)))
    }

    fn shape(&self) -> Result<&TableShape> {
        self.shape
            .as_ref()
            .ok_or_else(|| CheckError::precheck(self.label(), "precheck has not run"))
    }

    async fn load_columns(&self, side: Side) -> Result<Vec<String>> {
        let (schema, table) = self.schema_and_table();
        let client = self.client(side).await?;
        let rows = client.query(LOAD_COLUMNS, &[&schema, &table]).await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn load_primary_key(&self) -> Result<Vec<String>> {
        let (schema, table) = self.schema_and_table();
        let client = self.client(Side::Source).await?;
        let rows = client.query(LOAD_PRIMARY_KEY, &[&schema, &table]).await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }
}

#[async_trait]
impl TableSource for PostgresTable {
    fn db_name(&self) -> &str {
        &self.db_name
    }

    fn table_name(&self) -> &str {
        &self.name
    }

    async fn precheck(&mut self) -> Result<()> {
        let label = self.label();
        let (source_cols, target_cols) =
            tokio::join!(self.load_columns(Side::Source), self.load_columns(Side::Target));
        let (source_cols, target_cols) = (source_cols?, target_cols?);
        let primary_key = self.load_primary_key().await?;

        let (keys, columns) = pick_columns(
            &label,
            primary_key,
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
            SqlDialect::Postgres,
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

        let client = self.client(side).await?;
        let rows = client
            .query_raw(sql.as_str(), Vec::<String>::new())
            .await
            .map_err(|e| CheckError::stream(&label, format!("{} query: {}", side, e)))?;
        tokio::pin!(rows);

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
                    let values = (0..row.len())
                        .map(|i| row.try_get::<_, Option<String>>(i))
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    let (key, cols) = values.split_at(key_count);
                    text_digest(
                        join_key(key.iter().map(|v| v.as_deref())),
                        cols.iter().map(|v| v.as_deref()),
                    )
                }
                _ => {
                    let key: String = row.try_get(0)?;
                    let checksum: i64 = row.try_get(1)?;
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
        let client = self.client(side).await?;
        let count: i64 = client.query_one(sql.as_str(), &[]).await?.get(0);
        Ok(count.max(0) as u64)
    }

    async fn fetch_rows(&self, side: Side, key: &str) -> Result<Vec<RowImage>> {
        let shape = self.shape()?;
        let sql = shape.lookup_sql(key)?;
        let client = self.client(side).await?;
        let rows = client.query(sql.as_str(), &[]).await?;
        rows.iter()
            .map(|row| {
                let values = (0..row.len())
                    .map(|i| row.try_get::<_, Option<String>>(i))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(shape.row_image(values))
            })
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
