//! Database backends.
//!
//! - [`postgres`]: PostgreSQL via deadpool-postgres / tokio-postgres
//! - [`mysql`]: MySQL and MariaDB via SQLx (feature `mysql`)
//! - [`memory`]: in-memory pairs with fault injection, used by tests
//! - [`common`]: SQL rendering and TLS shared by the SQL backends
//!
//! # Adding a backend
//!
//! 1. Create a module under `drivers/` implementing
//!    [`Database`](crate::core::Database) and
//!    [`TableSource`](crate::core::TableSource)
//! 2. Add a [`DbType`] variant and route it in [`ServerConnector`]
//! 3. Gate the backend with a feature flag in `Cargo.toml` if it pulls in a
//!    new client library

pub mod common;
pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod postgres;

pub use common::SslMode;
pub use memory::{Fault, MemoryConnector, MemoryDatabase};
#[cfg(feature = "mysql")]
pub use mysql::MysqlDatabase;
pub use postgres::PostgresDatabase;

use async_trait::async_trait;

use crate::config::{Config, DbPair, DbType};
use crate::core::{Connector, Database};
use crate::error::Result;

/// Connects to the servers named in a [`Config`].
pub struct ServerConnector {
    config: Config,
}

impl ServerConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Connections per side: one per worker plus one for catalog queries.
    fn pool_size(&self) -> usize {
        self.config.check.parallel.max(1) + 1
    }
}

#[async_trait]
impl Connector for ServerConnector {
    async fn connect(&self, pair: &DbPair) -> Result<Box<dyn Database>> {
        let (source, target) = (&self.config.source, &self.config.target);
        match self.config.db_type {
            DbType::Postgres => Ok(Box::new(
                PostgresDatabase::connect(source, target, &pair.source, &pair.target, self.pool_size())
                    .await?,
            )),
            #[cfg(feature = "mysql")]
            DbType::Mysql => Ok(Box::new(
                MysqlDatabase::connect(source, target, &pair.source, &pair.target, self.pool_size())
                    .await?,
            )),
            #[cfg(not(feature = "mysql"))]
            DbType::Mysql => Err(crate::error::CheckError::Config(
                "this build has no MySQL support; rebuild with the `mysql` feature".into(),
            )),
        }
    }
}
