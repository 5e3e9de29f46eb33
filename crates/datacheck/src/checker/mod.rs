//! Per-table check lifecycle.
//!
//! A [`Checker`] owns one table handle and drives it through
//! `precheck -> (row count | stream compare -> recheck) -> settle -> export`.
//! Faults in any step are contained here: the table ends up `Unknown` and the
//! rest of the run carries on.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::compare::{Comparator, Comparison, Rechecker};
use crate::config::CheckOptions;
use crate::core::{CheckResult, CheckStatus, RepairKind, RowDigest, Side, TableSource};
use crate::error::{CheckError, Result};

/// Message recorded when the uncertain set outgrew the capacity bound.
pub const CAPACITY_EXCEEDED: &str = "diff capacity exceeded";

/// Message recorded when every difference was resolved by recheck.
pub const RECHECK_PASSED: &str = "recheck passed";

/// Repair statements proposed for one table.
#[derive(Debug, Clone, Default)]
pub struct RepairScripts {
    /// Statements removing target-only rows.
    pub delete: Vec<String>,
    /// Statements overwriting differing target rows with source values.
    pub update: Vec<String>,
    /// Statements copying source-only rows to the target.
    pub insert: Vec<String>,
}

impl RepairScripts {
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.update.is_empty() && self.insert.is_empty()
    }

    /// Statements of one kind.
    pub fn get(&self, kind: RepairKind) -> &[String] {
        match kind {
            RepairKind::Delete => &self.delete,
            RepairKind::Update => &self.update,
            RepairKind::Insert => &self.insert,
        }
    }

    fn push(&mut self, kind: RepairKind, sql: String) {
        match kind {
            RepairKind::Delete => self.delete.push(sql),
            RepairKind::Update => self.update.push(sql),
            RepairKind::Insert => self.insert.push(sql),
        }
    }
}

/// Everything a finished check hands to the report writers.
#[derive(Debug, Clone, Default)]
pub struct TableOutcome {
    pub result: CheckResult,
    /// Keys still differing after recheck, in discovery order.
    pub diff_keys: Vec<String>,
    /// Keys only on the source (lost on the target), sorted.
    pub source_only_keys: Vec<String>,
    /// Keys only on the target, sorted.
    pub target_only_keys: Vec<String>,
    pub repairs: RepairScripts,
}

impl TableOutcome {
    fn new(result: CheckResult) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }
}

/// Checks one table. Consumed by [`Checker::run`].
pub struct Checker {
    table: Box<dyn TableSource>,
    options: Arc<CheckOptions>,
    shutdown: CancellationToken,
}

impl Checker {
    /// Create a checker. `shutdown` stops the producers and any recheck backoff.
    pub fn new(
        table: Box<dyn TableSource>,
        options: Arc<CheckOptions>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            table,
            options,
            shutdown,
        }
    }

    /// Run the whole lifecycle. Never fails; faults become `Unknown`.
    pub async fn run(self) -> TableOutcome {
        let Checker {
            mut table,
            options,
            shutdown,
        } = self;
        let started = Instant::now();
        let label = format!("{}.{}", table.db_name(), table.table_name());
        let mut result = CheckResult::new(table.db_name(), table.table_name());
        info!("[{}] starting check (mode: {})", label, options.mode);

        if let Err(e) = table.precheck().await {
            error!("[{}] precheck failed: {}", label, e);
            result.fail(e.to_string());
            result.execute_seconds = started.elapsed().as_secs();
            return TableOutcome::new(result);
        }

        let table: Arc<dyn TableSource> = Arc::from(table);

        if !options.mode.is_detail() {
            Self::check_count(table.as_ref(), &mut result).await;
            result.execute_seconds = started.elapsed().as_secs();
            info!("[{}] {}", label, result.summary_line());
            return TableOutcome::new(result);
        }

        let detail = check_detail(&table, &options, &shutdown, &label, &mut result).await;
        let mut cmp = match detail {
            Ok(cmp) => cmp,
            Err(e) => {
                error!("[{}] comparison failed: {}", label, e);
                result.fail(e.to_string());
                result.execute_seconds = started.elapsed().as_secs();
                return TableOutcome::new(result);
            }
        };

        result.same_rows = cmp.same_rows;
        result.status = CheckStatus::Mismatch;
        result.recheck_pass_rows = Rechecker::from_options(&options)
            .run(table.as_ref(), result.status, &mut cmp, &shutdown)
            .await;
        result.execute_seconds = started.elapsed().as_secs();

        settle(&mut result, &cmp);
        let repairs = export_repairs(table.as_ref(), &cmp, &result).await;

        info!(
            "[{}] check completed in {:.1}s {}",
            label,
            started.elapsed().as_secs_f64(),
            result.summary_line()
        );

        let mut source_only_keys: Vec<String> = cmp.source_only.into_keys().collect();
        let mut target_only_keys: Vec<String> = cmp.target_only.into_keys().collect();
        source_only_keys.sort();
        target_only_keys.sort();

        TableOutcome {
            result,
            diff_keys: cmp.diff,
            source_only_keys,
            target_only_keys,
            repairs,
        }
    }

    /// Compare row counts of both sides, queried concurrently.
    async fn check_count(table: &dyn TableSource, result: &mut CheckResult) {
        let (source, target) = tokio::join!(
            table.row_count(Side::Source),
            table.row_count(Side::Target)
        );
        match (source, target) {
            (Ok(source), Ok(target)) => {
                result.source_rows = source;
                result.target_rows = target;
                result.status = if source == target {
                    CheckStatus::Match
                } else {
                    CheckStatus::Mismatch
                };
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(
                    "[{}.{}] row count failed: {}",
                    result.db_name, result.table_name, e
                );
                result.fail(e.to_string());
            }
        }
    }
}

/// Stream both sides into the comparator.
async fn check_detail(
    table: &Arc<dyn TableSource>,
    options: &CheckOptions,
    shutdown: &CancellationToken,
    label: &str,
    result: &mut CheckResult,
) -> Result<Comparison> {
    let capacity = options.capacity.max(1);
    let (source_tx, mut source_rx) = mpsc::channel(capacity);
    let (target_tx, mut target_rx) = mpsc::channel(capacity);
    let source_stop = shutdown.child_token();
    let target_stop = shutdown.child_token();

    let source_task = spawn_producer(
        table.clone(),
        Side::Source,
        source_tx,
        source_stop.clone(),
        target_stop.clone(),
    );
    let target_task = spawn_producer(
        table.clone(),
        Side::Target,
        target_tx,
        target_stop.clone(),
        source_stop.clone(),
    );

    let compared = Comparator::new(label, capacity, source_stop, target_stop)
        .run(&mut source_rx, &mut target_rx)
        .await;

    // Producers blocked on a full channel see it closed and return
    drop(source_rx);
    drop(target_rx);
    let (source_rows, target_rows) = tokio::join!(
        harvest(label, Side::Source, source_task),
        harvest(label, Side::Target, target_task)
    );
    result.source_rows = source_rows?;
    result.target_rows = target_rows?;

    let cmp = compared?;
    if shutdown.is_cancelled() {
        return Err(CheckError::Cancelled);
    }
    Ok(cmp)
}

/// Start one side's producer. On failure it stops the other side.
fn spawn_producer(
    table: Arc<dyn TableSource>,
    side: Side,
    out: mpsc::Sender<RowDigest>,
    stop: CancellationToken,
    sibling_stop: CancellationToken,
) -> JoinHandle<Result<u64>> {
    tokio::spawn(async move {
        let started = Instant::now();
        let pulled = table.pull_rows(side, out, stop).await;
        match &pulled {
            Ok(rows) => info!(
                "[{}.{}] {} pull finished: {} rows in {:.1}s",
                table.db_name(),
                table.table_name(),
                side,
                rows,
                started.elapsed().as_secs_f64()
            ),
            Err(e) => {
                error!(
                    "[{}.{}] {} pull failed: {}",
                    table.db_name(),
                    table.table_name(),
                    side,
                    e
                );
                sibling_stop.cancel();
            }
        }
        pulled
    })
}

/// Join a producer, turning a panic into an error.
async fn harvest(label: &str, side: Side, task: JoinHandle<Result<u64>>) -> Result<u64> {
    match task.await {
        Ok(pulled) => pulled,
        Err(e) => Err(CheckError::stream(
            label,
            format!("{} producer panicked: {}", side, e),
        )),
    }
}

/// Turn the residual uncertain set into a final status.
pub fn settle(result: &mut CheckResult, cmp: &Comparison) {
    result.diff_rows = cmp.diff.len() as u64;
    result.source_more_rows = cmp.source_only.len() as u64;
    result.target_more_rows = cmp.target_only.len() as u64;

    if result.status == CheckStatus::Unknown {
        return;
    }
    if cmp.is_truncated() {
        result.status = CheckStatus::Mismatch;
        result.message = CAPACITY_EXCEEDED.to_string();
        return;
    }
    if result.residual_rows() > 0 {
        result.status = CheckStatus::Mismatch;
        return;
    }

    result.status = CheckStatus::Match;
    if result.recheck_pass_rows.unwrap_or(0) > 0 {
        result.message = RECHECK_PASSED.to_string();
    }
}

/// Ask the table for one repair statement per residual key.
///
/// Only tables whose residue went through a recheck get statements; a
/// truncated or oversized residue would cost one lookup per key.
/// Statement errors are logged and the key is left out.
async fn export_repairs(
    table: &dyn TableSource,
    cmp: &Comparison,
    result: &CheckResult,
) -> RepairScripts {
    let mut scripts = RepairScripts::default();
    if result.status == CheckStatus::Unknown || result.recheck_pass_rows.is_none() {
        return scripts;
    }

    let mut target_only: Vec<&String> = cmp.target_only.keys().collect();
    let mut source_only: Vec<&String> = cmp.source_only.keys().collect();
    target_only.sort();
    source_only.sort();

    let work = target_only
        .into_iter()
        .map(|k| (k, RepairKind::Delete))
        .chain(cmp.diff.iter().map(|k| (k, RepairKind::Update)))
        .chain(source_only.into_iter().map(|k| (k, RepairKind::Insert)));

    for (key, kind) in work {
        match table.repair_statement(key, kind).await {
            Ok(sql) => scripts.push(kind, sql),
            Err(e) => warn!(
                "[{}.{}] could not build {} for key [{}]: {}",
                result.db_name,
                result.table_name,
                kind.suffix(),
                key,
                e
            ),
        }
    }
    scripts
}
