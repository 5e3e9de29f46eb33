//! Check orchestrator - main workflow coordinator.
//!
//! Database pairs are checked one after another. Within a pair every table
//! becomes one task on a [`WorkerPool`]; results are collected as tasks
//! finish and the summary is written once the pool has drained.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checker::Checker;
use crate::config::{Config, DbPair};
use crate::core::{CheckResult, Connector, Database, Side, TableSet};
use crate::drivers::ServerConnector;
use crate::error::{CheckError, Result};
use crate::pool::WorkerPool;
use crate::report::{CsvReport, ReportLayout, ResultAggregator, Summary, SummaryInfo};

/// Message for a table whose task ended without a result while no shutdown
/// was requested.
pub const TASK_ABORTED: &str = "check task aborted";

/// Check orchestrator.
pub struct Orchestrator {
    config: Config,
    connector: Arc<dyn Connector>,
    shutdown: CancellationToken,
}

/// Outcome of one database pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseReport {
    /// `source:target` database names.
    pub pair: String,

    /// Catalog comparison and the tables selected for checking.
    pub tables: TableSet,

    /// Verdict counts.
    pub summary: Summary,

    /// Per-table results, in completion order.
    pub results: Vec<CheckResult>,
}

/// Result of a check run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Unique run identifier.
    pub run_id: String,

    /// `consistent`, `inconsistent` or `cancelled`.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Directory holding the reports.
    pub output_dir: PathBuf,

    /// One entry per database pair checked.
    pub databases: Vec<DatabaseReport>,
}

impl RunResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == "cancelled"
    }

    pub fn tables_total(&self) -> usize {
        self.databases.iter().map(|d| d.summary.tables_checked).sum()
    }
}

impl Orchestrator {
    /// Create an orchestrator connecting to the configured servers.
    pub fn new(config: Config) -> Self {
        let connector = Arc::new(ServerConnector::new(config.clone()));
        Self::with_connector(config, connector)
    }

    /// Create an orchestrator with a custom way of opening database pairs.
    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an externally owned shutdown token (e.g. fired on SIGINT).
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Run the check over every configured database pair.
    ///
    /// Setup faults (connection, catalog, output directory) abort the run.
    /// Per-table faults only mark that table as unknown.
    pub async fn run(self) -> Result<RunResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let output_dir = self.config.output_dir()?;
        let config_hash = self.config.hash();

        info!(
            "Starting check run {} (config {}, mode {}, {} database pairs)",
            run_id,
            &config_hash[..12],
            self.config.check.mode,
            self.config.databases.len()
        );

        let mut databases = Vec::new();
        for pair in &self.config.databases {
            if self.shutdown.is_cancelled() {
                warn!("Shutdown requested, skipping database pair {}", pair);
                continue;
            }
            databases.push(self.check_pair(pair, &run_id, &output_dir).await?);
        }

        let completed_at = Utc::now();
        let status = if self.shutdown.is_cancelled() {
            "cancelled"
        } else if databases.iter().all(|d| d.summary.is_consistent()) {
            "consistent"
        } else {
            "inconsistent"
        };

        let result = RunResult {
            run_id,
            status: status.to_string(),
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            started_at,
            completed_at,
            output_dir,
            databases,
        };

        info!(
            "Check {}: {} tables in {:.1}s, reports in {}",
            result.status,
            result.tables_total(),
            result.duration_seconds,
            result.output_dir.display()
        );
        Ok(result)
    }

    async fn check_pair(&self, pair: &DbPair, run_id: &str, output_dir: &Path) -> Result<DatabaseReport> {
        info!("Checking database pair {}", pair);
        let db = self.connector.connect(pair).await?;
        let report = self.check_database(db.as_ref(), pair, run_id, output_dir).await;
        db.close().await;
        report
    }

    async fn check_database(
        &self,
        db: &dyn Database,
        pair: &DbPair,
        run_id: &str,
        output_dir: &Path,
    ) -> Result<DatabaseReport> {
        let options = Arc::new(self.config.check.clone());
        let tables = resolve_tables(db, &options.tables, &options.skip_tables).await?;
        info!(
            "[{}] {} tables to check ({} only on source, {} only on target, {} skipped)",
            db.target_name(),
            tables.to_check.len(),
            tables.source_more.len(),
            tables.target_more.len(),
            tables.skip.len()
        );

        let layout = Arc::new(ReportLayout::prepare(output_dir, db.target_name())?);
        let aggregator = Arc::new(ResultAggregator::with_csv(CsvReport::create(
            &layout.csv_path(),
        )?));

        let mut pool = WorkerPool::new(options.parallel, options.queue_size, self.shutdown.clone());
        pool.start();
        debug!("[{}] worker pool of {} started", db.target_name(), pool.size());
        for name in &tables.to_check {
            let checker = Checker::new(
                db.table(name, &options),
                options.clone(),
                self.shutdown.clone(),
            );
            let layout = layout.clone();
            let aggregator = aggregator.clone();
            let task = async move {
                let outcome = checker.run().await;
                if let Err(e) = layout.write_table(&outcome) {
                    error!(
                        "[{}.{}] writing key files failed: {}",
                        outcome.result.db_name, outcome.result.table_name, e
                    );
                }
                if let Err(e) = aggregator.push(outcome.result).await {
                    error!("Appending CSV row failed: {}", e);
                }
            };
            if let Err(e) = pool.submit(task).await {
                warn!("[{}] no more tables submitted: {}", db.target_name(), e);
                break;
            }
        }
        pool.join().await;
        drop(pool);

        // Tables that never ran, or whose task died, still get a row
        let finished: HashSet<String> = aggregator
            .results()
            .await
            .into_iter()
            .map(|r| r.table_name)
            .collect();
        for result in unfinished_results(
            db.target_name(),
            &tables.to_check,
            &finished,
            self.shutdown.is_cancelled(),
        ) {
            if let Err(e) = aggregator.push(result).await {
                error!("Appending CSV row failed: {}", e);
            }
        }

        let results = aggregator.results().await;
        let summary = Summary::from_results(&results);
        layout.write_summary(
            &SummaryInfo {
                pair,
                tables: &tables,
                mode: options.mode,
                run_id,
                finished_at: Utc::now(),
            },
            &summary,
        )?;

        info!(
            "[{}] {} consistent, {} inconsistent, {} failed",
            db.target_name(),
            summary.consistent.len(),
            summary.inconsistent.len(),
            summary.unknown.len()
        );

        Ok(DatabaseReport {
            pair: pair.to_string(),
            tables,
            summary,
            results,
        })
    }
}

/// Work out which tables to check.
///
/// An explicit list is taken as given; otherwise both catalogs are read and
/// diffed.
async fn resolve_tables(db: &dyn Database, requested: &[String], skip: &[String]) -> Result<TableSet> {
    if !requested.is_empty() {
        return Ok(TableSet::explicit(requested.to_vec(), skip.to_vec()));
    }
    let (source, target) = tokio::join!(db.list_tables(Side::Source), db.list_tables(Side::Target));
    Ok(TableSet::resolve(source?, target?, skip.to_vec()))
}

/// `Unknown` results for the tables of `to_check` missing from `finished`.
fn unfinished_results(
    db_name: &str,
    to_check: &[String],
    finished: &HashSet<String>,
    cancelled: bool,
) -> Vec<CheckResult> {
    let message = if cancelled {
        CheckError::Cancelled.to_string()
    } else {
        TASK_ABORTED.to_string()
    };
    to_check
        .iter()
        .filter(|t| !finished.contains(*t))
        .map(|name| {
            let mut result = CheckResult::new(db_name, name.as_str());
            result.fail(message.clone());
            result
        })
        .collect()
}
