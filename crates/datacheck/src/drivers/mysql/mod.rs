//! MySQL/MariaDB database pairs.
//!
//! Uses SQLx with one pool per side, each bound to its database.

mod table;

pub use table::MysqlTable;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use tracing::info;

use crate::config::{CheckOptions, EndpointConfig};
use crate::core::{Database, Side, TableSource};
use crate::drivers::common::SslMode;
use crate::error::{CheckError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

const LIST_TABLES: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_NAME
"#;

/// Build a pool for one side and check it can connect.
pub(crate) async fn connect_pool(
    endpoint: &EndpointConfig,
    database: &str,
    max_size: usize,
    side: Side,
) -> Result<MySqlPool> {
    let address = endpoint.address()?;
    let options = MySqlConnectOptions::new()
        .host(&address.host)
        .port(address.port)
        .database(database)
        .username(endpoint.user())
        .password(endpoint.password())
        .ssl_mode(SslMode::parse(&endpoint.ssl_mode)?.mysql_mode());

    let pool = MySqlPoolOptions::new()
        .max_connections(max_size as u32)
        .acquire_timeout(POOL_CONNECTION_TIMEOUT)
        .connect_with(options)
        .await
        .map_err(|e| CheckError::pool(e, format!("creating MySQL {} pool", side)))?;

    sqlx::query("SELECT 1")
        .fetch_one(&pool)
        .await
        .map_err(|e| CheckError::pool(e, format!("testing MySQL {} connection", side)))?;

    info!("Connected to MySQL {}: {}/{}", side, address, database);
    Ok(pool)
}

/// A MySQL source/target database pair.
pub struct MysqlDatabase {
    source_name: String,
    target_name: String,
    source: MySqlPool,
    target: MySqlPool,
}

impl MysqlDatabase {
    /// Connect both sides. `max_size` bounds each pool.
    pub async fn connect(
        source: &EndpointConfig,
        target: &EndpointConfig,
        source_db: &str,
        target_db: &str,
        max_size: usize,
    ) -> Result<Self> {
        let (source_pool, target_pool) = tokio::join!(
            connect_pool(source, source_db, max_size, Side::Source),
            connect_pool(target, target_db, max_size, Side::Target)
        );
        Ok(Self {
            source_name: source_db.to_string(),
            target_name: target_db.to_string(),
            source: source_pool?,
            target: target_pool?,
        })
    }
}

#[async_trait]
impl Database for MysqlDatabase {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn target_name(&self) -> &str {
        &self.target_name
    }

    async fn list_tables(&self, side: Side) -> Result<Vec<String>> {
        let pool = match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        };
        let rows = sqlx::query(LIST_TABLES).fetch_all(pool).await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("TABLE_NAME").map_err(CheckError::from))
            .collect()
    }

    fn table(&self, name: &str, options: &CheckOptions) -> Box<dyn TableSource> {
        Box::new(MysqlTable::new(
            &self.target_name,
            name,
            self.source.clone(),
            self.target.clone(),
            options,
        ))
    }

    async fn close(&self) {
        tokio::join!(self.source.close(), self.target.close());
        info!(
            "MySQL pools closed for {}:{}",
            self.source_name, self.target_name
        );
    }
}
