//! Per-table verdicts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Final verdict for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// The table could not be checked (precheck or stream failure).
    #[default]
    Unknown,
    /// At least one row differs or is missing on one side.
    Mismatch,
    /// Both sides hold the same rows.
    Match,
}

impl CheckStatus {
    /// Numeric code used in the CSV report: -1, 0 or 1.
    pub fn code(&self) -> i8 {
        match self {
            CheckStatus::Unknown => -1,
            CheckStatus::Mismatch => 0,
            CheckStatus::Match => 1,
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Outcome of checking one table.
///
/// Owned and mutated by its checker only; immutable once handed to the
/// aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckResult {
    /// Target database name.
    pub db_name: String,
    /// Table name.
    pub table_name: String,
    /// Final verdict.
    pub status: CheckStatus,
    /// Failure or informational message.
    pub message: String,
    /// Rows read (detail mode) or counted (count mode) on the source.
    pub source_rows: u64,
    /// Rows read or counted on the target.
    pub target_rows: u64,
    /// Rows with equal key and checksum.
    pub same_rows: u64,
    /// Rows present on both sides with different content.
    pub diff_rows: u64,
    /// Rows present only on the source.
    pub source_more_rows: u64,
    /// Rows present only on the target.
    pub target_more_rows: u64,
    /// Rows resolved by recheck; `None` when recheck did not run.
    pub recheck_pass_rows: Option<u64>,
    /// Wall-clock seconds spent on the table, recheck included.
    pub execute_seconds: u64,
}

impl CheckResult {
    /// Create an empty result for a table.
    pub fn new(db_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    /// Mark the table as not checkable.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = CheckStatus::Unknown;
        self.message = message.into();
    }

    /// Rows still unresolved after comparison and recheck.
    pub fn residual_rows(&self) -> u64 {
        self.diff_rows + self.source_more_rows + self.target_more_rows
    }

    /// Recheck count as reported: -1 when recheck was skipped.
    pub fn recheck_pass_code(&self) -> i64 {
        self.recheck_pass_rows.map_or(-1, |n| n as i64)
    }

    /// One-line log form.
    pub fn summary_line(&self) -> String {
        format!(
            "[{}.{}] [Status:{} SourceRows:{} TargetRows:{} SameRows:{} DiffRows:{} \
             SourceMoreRows:{} TargetMoreRows:{} RecheckPassRows:{}]",
            self.db_name,
            self.table_name,
            self.status,
            self.source_rows,
            self.target_rows,
            self.same_rows,
            self.diff_rows,
            self.source_more_rows,
            self.target_more_rows,
            self.recheck_pass_code()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(CheckStatus::Unknown.code(), -1);
        assert_eq!(CheckStatus::Mismatch.code(), 0);
        assert_eq!(CheckStatus::Match.code(), 1);
        assert_eq!(CheckStatus::default(), CheckStatus::Unknown);
    }

    #[test]
    fn test_recheck_pass_code() {
        let mut result = CheckResult::new("db", "t");
        assert_eq!(result.recheck_pass_code(), -1);
        result.recheck_pass_rows = Some(4);
        assert_eq!(result.recheck_pass_code(), 4);
    }

    #[test]
    fn test_summary_line() {
        let mut result = CheckResult::new("shop", "orders");
        result.status = CheckStatus::Mismatch;
        result.diff_rows = 2;
        let line = result.summary_line();
        assert!(line.starts_with("[shop.orders] [Status:0"));
        assert!(line.contains("DiffRows:2"));
        assert!(line.ends_with("RecheckPassRows:-1]"));
    }
}
