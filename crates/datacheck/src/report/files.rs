//! On-disk report artifacts for one database pair.
//!
//! ```text
//! <out>/<db>.csv                 one row per table
//! <out>/<db>.rpt                 summary
//! <out>/<db>/<table>.diff        differing keys
//! <out>/<db>/<table>.tlost       keys missing on the target
//! <out>/<db>/<table>.tmore       keys only on the target
//! <out>/<db>/<table>.<kind>.sql  repair statements
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::checker::TableOutcome;
use crate::config::{CompareMode, DbPair};
use crate::core::{CheckResult, RepairKind, TableSet};
use crate::error::{CheckError, Result};

use super::aggregate::Summary;

/// CSV column order.
pub const CSV_HEADER: [&str; 12] = [
    "DbName",
    "TableName",
    "Status",
    "ExecuteSeconds",
    "SourceRows",
    "TargetRows",
    "SameRows",
    "DiffRows",
    "SourceMoreRows",
    "TargetMoreRows",
    "RecheckPassRows",
    "Message",
];

/// Per-table CSV sink. Each row is flushed as soon as it is written.
pub struct CsvReport {
    writer: csv::Writer<File>,
}

impl CsvReport {
    /// Create (or truncate) `path` and write the header.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            CheckError::Report(format!("cannot create {}: {}", path.display(), e))
        })?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    pub fn append(&mut self, r: &CheckResult) -> Result<()> {
        self.writer.write_record([
            r.db_name.clone(),
            r.table_name.clone(),
            r.status.code().to_string(),
            r.execute_seconds.to_string(),
            r.source_rows.to_string(),
            r.target_rows.to_string(),
            r.same_rows.to_string(),
            r.diff_rows.to_string(),
            r.source_more_rows.to_string(),
            r.target_more_rows.to_string(),
            r.recheck_pass_code().to_string(),
            r.message.clone(),
        ])?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Paths of every artifact produced for one database pair.
#[derive(Debug, Clone)]
pub struct ReportLayout {
    base: PathBuf,
    db: String,
}

impl ReportLayout {
    /// Create `<base>` and `<base>/<db>`.
    pub fn prepare(base: &Path, db: &str) -> Result<Self> {
        let layout = Self {
            base: base.to_path_buf(),
            db: db.to_string(),
        };
        fs::create_dir_all(layout.table_dir()).map_err(|e| {
            CheckError::Config(format!(
                "cannot create output directory {}: {}",
                layout.table_dir().display(),
                e
            ))
        })?;
        Ok(layout)
    }

    pub fn csv_path(&self) -> PathBuf {
        self.base.join(format!("{}.csv", self.db))
    }

    pub fn rpt_path(&self) -> PathBuf {
        self.base.join(format!("{}.rpt", self.db))
    }

    pub fn table_dir(&self) -> PathBuf {
        self.base.join(&self.db)
    }

    pub fn table_file(&self, table: &str, suffix: &str) -> PathBuf {
        self.table_dir().join(format!("{}.{}", table, suffix))
    }

    /// Write the key lists and repair scripts of one table.
    ///
    /// Empty lists produce no file.
    pub fn write_table(&self, outcome: &TableOutcome) -> Result<()> {
        let table = &outcome.result.table_name;
        write_lines(&self.table_file(table, "diff"), &outcome.diff_keys)?;
        write_lines(&self.table_file(table, "tlost"), &outcome.source_only_keys)?;
        write_lines(&self.table_file(table, "tmore"), &outcome.target_only_keys)?;
        if outcome.repairs.is_empty() {
            return Ok(());
        }
        for kind in [RepairKind::Delete, RepairKind::Update, RepairKind::Insert] {
            write_lines(
                &self.table_file(table, kind.suffix()),
                outcome.repairs.get(kind),
            )?;
        }
        Ok(())
    }

    /// Write the `<db>.rpt` summary.
    pub fn write_summary(&self, info: &SummaryInfo<'_>, summary: &Summary) -> Result<()> {
        let text = render_summary(&self.db, info, summary);
        fs::write(self.rpt_path(), text).map_err(|e| {
            CheckError::Report(format!("cannot write {}: {}", self.rpt_path().display(), e))
        })?;
        debug!("Summary written to {}", self.rpt_path().display());
        Ok(())
    }
}

/// Run context printed in the summary header.
pub struct SummaryInfo<'a> {
    pub pair: &'a DbPair,
    pub tables: &'a TableSet,
    pub mode: CompareMode,
    pub run_id: &'a str,
    pub finished_at: DateTime<Utc>,
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut out = BufWriter::new(File::create(path)?);
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(())
}

fn join_or_dash(names: &[String]) -> String {
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(",")
    }
}

fn field(out: &mut String, label: &str, value: impl std::fmt::Display) {
    out.push_str(&format!("{:<28}: {}\n", label, value));
}

fn render_summary(db: &str, info: &SummaryInfo<'_>, summary: &Summary) -> String {
    let rule = "#".repeat(100);
    let tables = info.tables;
    let mut out = String::new();

    out.push_str(&rule);
    out.push('\n');
    out.push_str("Report files\n");
    field(&mut out, &format!("  {}.rpt", db), "this summary");
    field(&mut out, &format!("  {}.csv", db), "per-table results");
    field(&mut out, &format!("  {}/<table>.diff", db), "keys whose rows differ");
    field(&mut out, &format!("  {}/<table>.tlost", db), "keys missing on the target");
    field(&mut out, &format!("  {}/<table>.tmore", db), "keys only on the target");
    field(&mut out, &format!("  {}/<table>.*.sql", db), "repair statements for the target");
    field(&mut out, "RecheckPassRows", "-1 when no recheck ran");
    out.push_str(&rule);
    out.push('\n');

    field(&mut out, "Databases", info.pair);
    field(&mut out, "Run id", info.run_id);
    field(
        &mut out,
        "Finished at",
        info.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    field(&mut out, "Mode", info.mode);
    field(&mut out, "Source tables", tables.source.len());
    field(&mut out, "Target tables", tables.target.len());
    field(&mut out, "Tables to check", tables.to_check.len());
    field(&mut out, "Consistent tables", summary.consistent.len());
    field(&mut out, "Inconsistent tables", summary.inconsistent.len());
    field(&mut out, "Failed tables", summary.unknown.len());
    field(&mut out, "Missing on target", join_or_dash(&tables.source_more));
    field(&mut out, "Missing on source", join_or_dash(&tables.target_more));
    field(&mut out, "Inconsistent table names", join_or_dash(&summary.inconsistent));
    field(&mut out, "Failed table names", join_or_dash(&summary.unknown));
    out.push_str(&rule);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CheckStatus;
    use tempfile::TempDir;

    fn outcome(table: &str) -> TableOutcome {
        let mut result = CheckResult::new("shop", table);
        result.status = CheckStatus::Mismatch;
        TableOutcome {
            result,
            diff_keys: vec!["2".into()],
            source_only_keys: vec!["7".into(), "8".into()],
            target_only_keys: Vec::new(),
            ..Default::default()
        }
    }

    #[test]
    fn test_prepare_creates_table_dir() {
        let dir = TempDir::new().unwrap();
        let layout = ReportLayout::prepare(&dir.path().join("out"), "shop").unwrap();
        assert!(layout.table_dir().is_dir());
        assert_eq!(layout.csv_path(), dir.path().join("out").join("shop.csv"));
    }

    #[test]
    fn test_csv_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shop.csv");
        let mut csv = CsvReport::create(&path).unwrap();

        let mut r = CheckResult::new("shop", "orders");
        r.status = CheckStatus::Match;
        r.source_rows = 3;
        r.target_rows = 3;
        r.same_rows = 3;
        r.message = "recheck passed, twice".into();
        csv.append(&r).unwrap();
        csv.append(&CheckResult::new("shop", "broken")).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], CSV_HEADER.join(","));
        assert_eq!(
            lines[1],
            "shop,orders,1,0,3,3,3,0,0,0,-1,\"recheck passed, twice\""
        );
        assert_eq!(lines[2], "shop,broken,-1,0,0,0,0,0,0,0,-1,");
    }

    #[test]
    fn test_write_table_skips_empty_lists() {
        let dir = TempDir::new().unwrap();
        let layout = ReportLayout::prepare(dir.path(), "shop").unwrap();
        let mut outcome = outcome("orders");
        outcome.repairs.insert.push("INSERT INTO orders VALUES (7);".into());
        layout.write_table(&outcome).unwrap();

        let diff = fs::read_to_string(layout.table_file("orders", "diff")).unwrap();
        assert_eq!(diff, "2\n");
        let lost = fs::read_to_string(layout.table_file("orders", "tlost")).unwrap();
        assert_eq!(lost, "7\n8\n");
        assert!(!layout.table_file("orders", "tmore").exists());
        assert!(layout.table_file("orders", "insert.sql").exists());
        assert!(!layout.table_file("orders", "delete.sql").exists());
    }

    #[test]
    fn test_summary_report() {
        let dir = TempDir::new().unwrap();
        let layout = ReportLayout::prepare(dir.path(), "shop").unwrap();
        let tables = TableSet::resolve(
            vec!["a".into(), "b".into(), "c".into()],
            vec!["a".into(), "b".into(), "z".into()],
            Vec::new(),
        );
        let pair = DbPair::parse("shop").unwrap();
        let mut a = CheckResult::new("shop", "a");
        a.status = CheckStatus::Match;
        let b = CheckResult::new("shop", "b");
        let summary = Summary::from_results(&[a, b]);

        let info = SummaryInfo {
            pair: &pair,
            tables: &tables,
            mode: CompareMode::Fast,
            run_id: "run-1",
            finished_at: Utc::now(),
        };
        layout.write_summary(&info, &summary).unwrap();

        let text = fs::read_to_string(layout.rpt_path()).unwrap();
        assert!(text.contains("Tables to check             : 2"));
        assert!(text.contains("Consistent tables           : 1"));
        assert!(text.contains("Failed tables               : 1"));
        assert!(text.contains("Missing on target           : c"));
        assert!(text.contains("Missing on source           : z"));
        assert!(text.contains("Failed table names          : b"));
        assert!(text.contains("Run id                      : run-1"));
    }
}
