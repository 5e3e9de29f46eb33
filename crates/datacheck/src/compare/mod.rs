//! Row classification and recheck.
//!
//! [`Comparator`] merge-joins the two digest streams of a table and leaves
//! behind the keys it could not prove equal. [`Rechecker`] then re-queries
//! those keys directly, with retries, before a verdict is settled.

mod comparator;
mod recheck;

pub use comparator::{Comparator, CompareOutcome, Comparison};
pub use recheck::{Rechecker, SkipReason};
