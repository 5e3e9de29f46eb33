//! Core abstractions for backend-agnostic reconciliation.
//!
//! - [`digest`]: the `(key, checksum)` unit a row is reduced to
//! - [`result`]: per-table verdicts and counters
//! - [`tables`]: catalog bookkeeping between the two sides
//! - [`traits`]: capabilities every database backend implements
//!
//! The comparison engine only talks to [`traits::Database`] and
//! [`traits::TableSource`], so new backends are added under `drivers/`
//! without touching the engine.

pub mod digest;
pub mod result;
pub mod tables;
pub mod traits;

pub use digest::{RowDigest, Side};
pub use result::{CheckResult, CheckStatus};
pub use tables::TableSet;
pub use traits::{push_digest, Connector, Database, RepairKind, RowImage, TableSource};
