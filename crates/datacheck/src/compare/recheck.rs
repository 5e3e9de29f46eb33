//! Direct re-verification of uncertain keys.
//!
//! Rows can look different only because they were read while replication
//! was still catching up. Each pass re-queries the still-unresolved keys on
//! both sides; keys that now agree are dropped from the uncertain set.

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CheckOptions;
use crate::core::{CheckStatus, TableSource};

use super::comparator::Comparison;

/// Why a recheck did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The table is already Unknown.
    Unknown,
    /// Nothing to recheck.
    NothingUncertain,
    /// Recheck disabled by configuration.
    Disabled,
    /// More uncertain rows than the configured limit.
    TooManyRows,
    /// The comparison hit the capacity bound, so the uncertain set is partial.
    Truncated,
}

/// Retry policy for uncertain keys.
#[derive(Debug, Clone)]
pub struct Rechecker {
    max_times: i64,
    max_rows: i64,
    interval: Duration,
}

impl Rechecker {
    pub fn new(max_times: i64, max_rows: i64, interval: Duration) -> Self {
        Self {
            max_times,
            max_rows,
            interval,
        }
    }

    pub fn from_options(options: &CheckOptions) -> Self {
        Self::new(
            options.max_recheck_times,
            options.max_recheck_rows,
            options.recheck_interval(),
        )
    }

    /// Decide whether a recheck applies to this comparison.
    pub fn skip_reason(&self, status: CheckStatus, cmp: &Comparison) -> Option<SkipReason> {
        let uncertain = cmp.uncertain_count() as i64;
        if status == CheckStatus::Unknown {
            Some(SkipReason::Unknown)
        } else if uncertain == 0 {
            Some(SkipReason::NothingUncertain)
        } else if self.max_times <= 0 || self.max_rows <= 0 {
            Some(SkipReason::Disabled)
        } else if uncertain > self.max_rows {
            Some(SkipReason::TooManyRows)
        } else if cmp.is_truncated() {
            Some(SkipReason::Truncated)
        } else {
            None
        }
    }

    /// Recheck the uncertain keys of `cmp`, removing the ones that pass.
    ///
    /// Returns the number of resolved keys, or `None` when skipped. A shutdown
    /// during the backoff ends the recheck with what has been resolved so far.
    pub async fn run(
        &self,
        table: &dyn TableSource,
        status: CheckStatus,
        cmp: &mut Comparison,
        shutdown: &CancellationToken,
    ) -> Option<u64> {
        let label = format!("{}.{}", table.db_name(), table.table_name());
        if let Some(reason) = self.skip_reason(status, cmp) {
            debug!("[{}] recheck skipped: {:?}", label, reason);
            return None;
        }

        let mut pending = cmp.uncertain_keys();
        let mut resolved: Vec<String> = Vec::new();

        for pass in 1..=self.max_times {
            if pending.is_empty() {
                break;
            }
            if pass > 1 {
                info!(
                    "[{}] waiting {}s before recheck pass {}",
                    label,
                    self.interval.as_secs(),
                    pass
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }

            let passed = table.recheck(&pending).await;
            let passed_set: HashSet<&str> = passed.iter().map(String::as_str).collect();
            let still: Vec<String> = pending
                .iter()
                .filter(|k| !passed_set.contains(k.as_str()))
                .cloned()
                .collect();

            info!(
                "[{}] recheck pass {}/{}: {} of {} keys passed",
                label,
                pass,
                self.max_times,
                passed.len(),
                pending.len()
            );
            resolved.extend(passed);
            pending = still;
        }

        cmp.remove_resolved(&resolved);
        Some(resolved.len() as u64)
    }
}
