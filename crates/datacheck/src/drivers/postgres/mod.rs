//! PostgreSQL database pairs.
//!
//! Each side gets its own deadpool-postgres pool. Table names are
//! `schema.table`; every non-system schema is listed.

mod table;

pub use table::PostgresTable;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::Config as PgConfig;
use tracing::{info, warn};

use crate::config::{CheckOptions, EndpointConfig};
use crate::core::{Database, Side, TableSource};
use crate::drivers::common::SslMode;
use crate::error::{CheckError, Result};

const LIST_TABLES: &str = r#"
    SELECT table_schema || '.' || table_name
    FROM information_schema.tables
    WHERE table_type = 'BASE TABLE'
      AND table_schema NOT IN ('pg_catalog', 'information_schema')
      AND table_schema NOT LIKE 'pg_toast%'
    ORDER BY 1
"#;

/// Build a pool for one side and check it can connect.
pub(crate) async fn connect_pool(
    endpoint: &EndpointConfig,
    database: &str,
    max_size: usize,
    side: Side,
) -> Result<Pool> {
    let address = endpoint.address()?;
    let mut pg_config = PgConfig::new();
    pg_config.host(&address.host);
    pg_config.port(address.port);
    pg_config.dbname(database);
    pg_config.user(endpoint.user());
    pg_config.password(endpoint.password());

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let context = format!("creating PostgreSQL {} pool", side);
    let pool = match SslMode::parse(&endpoint.ssl_mode)?.postgres_connector()? {
        None => {
            warn!(
                "PostgreSQL {} TLS is disabled. Credentials will be transmitted in plaintext.",
                side
            );
            let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
            Pool::builder(mgr)
                .max_size(max_size)
                .build()
                .map_err(|e| CheckError::pool(e, context.as_str()))?
        }
        Some(tls) => {
            let mgr = Manager::from_config(pg_config, tls, mgr_config);
            Pool::builder(mgr)
                .max_size(max_size)
                .build()
                .map_err(|e| CheckError::pool(e, context.as_str()))?
        }
    };

    let client = pool
        .get()
        .await
        .map_err(|e| CheckError::pool(e, format!("connecting to PostgreSQL {}", side)))?;
    client.simple_query("SELECT 1").await?;

    info!(
        "Connected to PostgreSQL {}: {}/{}",
        side, address, database
    );
    Ok(pool)
}

/// A PostgreSQL source/target database pair.
pub struct PostgresDatabase {
    source_name: String,
    target_name: String,
    source: Pool,
    target: Pool,
}

impl PostgresDatabase {
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

    fn pool(&self, side: Side) -> &Pool {
        match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        }
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn target_name(&self) -> &str {
        &self.target_name
    }

    async fn list_tables(&self, side: Side) -> Result<Vec<String>> {
        let client = self
            .pool(side)
            .get()
            .await
            .map_err(|e| CheckError::pool(e, format!("listing {} tables", side)))?;
        let rows = client.query(LIST_TABLES, &[]).await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    fn table(&self, name: &str, options: &CheckOptions) -> Box<dyn TableSource> {
        Box::new(PostgresTable::new(
            &self.target_name,
            name,
            self.source.clone(),
            self.target.clone(),
            options,
        ))
    }

    async fn close(&self) {
        self.source.close();
        self.target.close();
        info!(
            "PostgreSQL pools closed for {}:{}",
            self.source_name, self.target_name
        );
    }
}
