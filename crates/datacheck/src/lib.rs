//! # datacheck
//!
//! Row-level reconciliation of a source and a target database.
//!
//! Each table is reduced, per side, to a stream of `(key, checksum)` digests
//! in key order. A merge-join classifies every key as same, different,
//! source-only or target-only; keys that are not proven equal are re-queried
//! directly a few times (replication may still be catching up) before a
//! verdict is written.
//!
//! - **Count, fast and slow modes**: row counts, server-side checksums, or
//!   row text hashed locally with CRC-32
//! - **Bounded memory**: the uncertain set per table is capped; overflow
//!   stops both producers and reports the table as inconsistent
//! - **Parallel tables** on a fixed worker pool with graceful shutdown
//! - **Reports**: per-table CSV, key lists, repair SQL and a summary
//! - **Backends**: PostgreSQL, MySQL (feature `mysql`) and an in-memory pair
//!
//! ## Example
//!
//! ```rust,no_run
//! use datacheck::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> datacheck::Result<()> {
//!     let config = Config::load("datacheck.yaml")?;
//!     let result = Orchestrator::new(config).run().await?;
//!     println!("Check {}: {} tables", result.status, result.tables_total());
//!     Ok(())
//! }
//! ```

pub mod checker;
pub mod compare;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod report;

// Re-exports for convenient access
pub use checker::{Checker, TableOutcome};
pub use compare::{Comparator, Comparison, Rechecker};
pub use config::{CheckOptions, CompareMode, Config, DbPair, DbType, EndpointConfig};
pub use crate::core::{CheckResult, CheckStatus, Database, RowDigest, Side, TableSource};
pub use error::{CheckError, Result};
pub use orchestrator::{DatabaseReport, Orchestrator, RunResult};
pub use pool::WorkerPool;
pub use report::{ResultAggregator, Summary};
