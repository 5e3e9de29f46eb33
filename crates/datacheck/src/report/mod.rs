//! Result collection and report files.

mod aggregate;
mod files;

pub use aggregate::{ResultAggregator, Summary};
pub use files::{CsvReport, ReportLayout, SummaryInfo, CSV_HEADER};
