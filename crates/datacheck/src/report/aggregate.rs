//! Run-wide result collection.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::{CheckResult, CheckStatus};
use crate::error::Result;

use super::files::CsvReport;

/// Collects per-table results from concurrently running checks.
///
/// Results keep completion order. The results lock is held only for the
/// append; CSV rows are written under a lock of their own.
pub struct ResultAggregator {
    results: Mutex<Vec<CheckResult>>,
    csv: Option<Mutex<CsvReport>>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            csv: None,
        }
    }

    /// Stream every pushed result into `csv` as well.
    pub fn with_csv(csv: CsvReport) -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            csv: Some(Mutex::new(csv)),
        }
    }

    /// Record one finished table.
    ///
    /// The result is kept even if the CSV append fails.
    pub async fn push(&self, result: CheckResult) -> Result<()> {
        self.results.lock().await.push(result.clone());
        match &self.csv {
            Some(csv) => csv.lock().await.append(&result),
            None => Ok(()),
        }
    }

    pub async fn len(&self) -> usize {
        self.results.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copy of the results collected so far, in completion order.
    pub async fn results(&self) -> Vec<CheckResult> {
        self.results.lock().await.clone()
    }
}

/// Table verdict counts for one database pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Tables checked.
    pub tables_checked: usize,
    /// Tables whose rows all match, sorted.
    pub consistent: Vec<String>,
    /// Tables with differences, sorted.
    pub inconsistent: Vec<String>,
    /// Tables that could not be checked, sorted.
    pub unknown: Vec<String>,
    /// Residual differing rows across all tables.
    pub total_diff_rows: u64,
    /// Residual source-only rows across all tables.
    pub total_source_more_rows: u64,
    /// Residual target-only rows across all tables.
    pub total_target_more_rows: u64,
}

impl Summary {
    /// Fold results into counts. The order of `results` does not matter.
    pub fn from_results(results: &[CheckResult]) -> Self {
        let mut summary = Summary::default();
        for r in results {
            summary.add_table(r);
        }
        summary.consistent.sort();
        summary.inconsistent.sort();
        summary.unknown.sort();
        summary
    }

    fn add_table(&mut self, result: &CheckResult) {
        self.tables_checked += 1;
        let name = result.table_name.clone();
        match result.status {
            CheckStatus::Match => self.consistent.push(name),
            CheckStatus::Mismatch => self.inconsistent.push(name),
            CheckStatus::Unknown => self.unknown.push(name),
        }
        self.total_diff_rows += result.diff_rows;
        self.total_source_more_rows += result.source_more_rows;
        self.total_target_more_rows += result.target_more_rows;
    }

    /// True when every checked table matched.
    pub fn is_consistent(&self) -> bool {
        self.inconsistent.is_empty() && self.unknown.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: CheckStatus, diff: u64) -> CheckResult {
        let mut r = CheckResult::new("db", name);
        r.status = status;
        r.diff_rows = diff;
        r
    }

    #[tokio::test]
    async fn test_aggregator_keeps_completion_order() {
        let agg = ResultAggregator::new();
        agg.push(result("b", CheckStatus::Match, 0)).await.unwrap();
        agg.push(result("a", CheckStatus::Mismatch, 1)).await.unwrap();
        assert_eq!(agg.len().await, 2);
        let names: Vec<String> = agg
            .results()
            .await
            .into_iter()
            .map(|r| r.table_name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_concurrent_pushes_are_all_kept() {
        let agg = std::sync::Arc::new(ResultAggregator::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let agg = agg.clone();
            handles.push(tokio::spawn(async move {
                agg.push(result(&format!("t{}", i), CheckStatus::Match, 0))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(agg.len().await, 32);
    }

    #[tokio::test]
    async fn test_results_readable_while_csv_row_is_written() {
        use std::sync::Arc;
        use std::time::Duration;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db.csv");
        let agg = Arc::new(ResultAggregator::with_csv(CsvReport::create(&path).unwrap()));

        // Hold the CSV writer so the push stalls on its row
        let writer = agg.csv.as_ref().unwrap().lock().await;
        let pushing = tokio::spawn({
            let agg = agg.clone();
            async move { agg.push(result("a", CheckStatus::Match, 0)).await }
        });

        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if agg.len().await == 1 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(seen.is_ok(), "result not visible while the CSV row was pending");
        assert!(!pushing.is_finished());

        drop(writer);
        pushing.await.unwrap().unwrap();
        let csv = std::fs::read_to_string(&path).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.lines().nth(1).unwrap().starts_with("db,a,1,"));
    }

    #[tokio::test]
    async fn test_concurrent_pushes_write_one_csv_row_each() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db.csv");
        let agg = std::sync::Arc::new(ResultAggregator::with_csv(
            CsvReport::create(&path).unwrap(),
        ));
        let mut handles = Vec::new();
        for i in 0..16 {
            let agg = agg.clone();
            handles.push(tokio::spawn(async move {
                agg.push(result(&format!("t{}", i), CheckStatus::Mismatch, 1))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(agg.len().await, 16);
        let csv = std::fs::read_to_string(&path).unwrap();
        assert_eq!(csv.lines().count(), 17);
    }

    #[test]
    fn test_summary_is_order_independent() {
        let mut results = vec![
            result("a", CheckStatus::Match, 0),
            result("b", CheckStatus::Mismatch, 3),
            result("c", CheckStatus::Unknown, 0),
            result("d", CheckStatus::Mismatch, 2),
            result("e", CheckStatus::Match, 0),
        ];
        let forward = Summary::from_results(&results);
        results.reverse();
        let backward = Summary::from_results(&results);
        results.swap(0, 3);
        let shuffled = Summary::from_results(&results);

        assert_eq!(forward, backward);
        assert_eq!(forward, shuffled);
        assert_eq!(forward.consistent, vec!["a", "e"]);
        assert_eq!(forward.inconsistent, vec!["b", "d"]);
        assert_eq!(forward.unknown, vec!["c"]);
        assert_eq!(forward.total_diff_rows, 5);
        assert!(!forward.is_consistent());
    }

    #[test]
    fn test_empty_summary_is_consistent() {
        let summary = Summary::from_results(&[]);
        assert_eq!(summary.tables_checked, 0);
        assert!(summary.is_consistent());
    }
}
