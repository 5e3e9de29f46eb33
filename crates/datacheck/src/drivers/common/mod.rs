//! Helpers shared by the SQL backends.
//!
//! - [`sql`]: identifier quoting, key text and statement rendering
//! - [`tls`]: `ssl_mode` handling for both servers

pub mod sql;
pub mod tls;

pub use sql::{SqlDialect, TableShape};
pub use tls::SslMode;
