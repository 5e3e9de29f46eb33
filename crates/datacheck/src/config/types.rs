//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CheckError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database technology of both sides.
    #[serde(rename = "type")]
    pub db_type: DbType,

    /// Source endpoint and credentials.
    pub source: EndpointConfig,

    /// Target endpoint. Credentials default to the source ones.
    pub target: EndpointConfig,

    /// Databases to check, either `name` or `source_name:target_name`.
    pub databases: Vec<DbPair>,

    /// Comparison behavior.
    #[serde(default)]
    pub check: CheckOptions,
}

/// Supported database technologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// MySQL or MariaDB (and MySQL-compatible engines).
    Mysql,
    /// PostgreSQL.
    #[serde(alias = "pgsql")]
    Postgres,
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbType::Mysql => write!(f, "mysql"),
            DbType::Postgres => write!(f, "postgres"),
        }
    }
}

/// One side's connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Address in `host:port` form.
    pub endpoint: String,

    /// Username. Optional on the target side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Password. Optional on the target side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// TLS mode for PostgreSQL: disable, require, verify-ca or verify-full.
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl EndpointConfig {
    /// Create an endpoint with credentials and TLS disabled.
    pub fn new(endpoint: impl Into<String>, user: Option<String>, password: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            user,
            password,
            ssl_mode: default_ssl_mode(),
        }
    }

    /// Parse the `host:port` address.
    pub fn address(&self) -> Result<Endpoint> {
        Endpoint::parse(&self.endpoint)
    }

    /// Username, empty when unset.
    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or_default()
    }

    /// Password, empty when unset.
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }
}

/// A parsed `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse `host:port`. The port is split off the last colon.
    pub fn parse(s: &str) -> Result<Self> {
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(|| {
            CheckError::Config(format!("endpoint '{}' must be in host:port format", s))
        })?;
        if host.is_empty() {
            return Err(CheckError::Config(format!(
                "endpoint '{}' is missing a host",
                s
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| CheckError::Config(format!("endpoint '{}' has an invalid port", s)))?;
        if port == 0 {
            return Err(CheckError::Config(format!(
                "endpoint '{}' has an invalid port",
                s
            )));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A source database and the target database it is compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DbPair {
    pub source: String,
    pub target: String,
}

impl DbPair {
    /// Parse `name` or `source_name:target_name`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (source, target) = match s.split_once(':') {
            Some((src, dst)) => (src.trim(), dst.trim()),
            None => (s, s),
        };
        if source.is_empty() || target.is_empty() || target.contains(':') {
            return Err(CheckError::Config(format!(
                "invalid database '{}': expected name or source:target",
                s
            )));
        }
        Ok(Self {
            source: source.to_string(),
            target: target.to_string(),
        })
    }

    /// Parse a comma-separated list of pairs.
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(Self::parse)
            .collect()
    }
}

impl TryFrom<String> for DbPair {
    type Error = CheckError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<DbPair> for String {
    fn from(pair: DbPair) -> String {
        if pair.source == pair.target {
            pair.source
        } else {
            format!("{}:{}", pair.source, pair.target)
        }
    }
}

impl fmt::Display for DbPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.target)
    }
}

/// How rows are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    /// Compare row counts only.
    Count,
    /// Checksums computed by the database.
    #[default]
    Fast,
    /// Row text fetched and checksummed locally.
    Slow,
}

impl CompareMode {
    /// Whether rows are compared one by one.
    pub fn is_detail(&self) -> bool {
        !matches!(self, CompareMode::Count)
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareMode::Count => write!(f, "count"),
            CompareMode::Fast => write!(f, "fast"),
            CompareMode::Slow => write!(f, "slow"),
        }
    }
}

/// Run-wide comparison options. Read-only once a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOptions {
    /// Comparison mode (default: fast).
    #[serde(default)]
    pub mode: CompareMode,

    /// Tables checked concurrently (default: 2).
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    /// Maximum uncertain rows per table before the comparison stops (default: 10000).
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Recheck passes; 0 or less disables rechecking (default: 3).
    #[serde(default = "default_max_recheck_times")]
    pub max_recheck_times: i64,

    /// Tables with more uncertain rows than this are not rechecked (default: 1000).
    #[serde(default = "default_max_recheck_rows")]
    pub max_recheck_rows: i64,

    /// Pause before every recheck pass after the first, in seconds (default: 10).
    #[serde(default = "default_recheck_interval_secs")]
    pub recheck_interval_secs: u64,

    /// Pending table tasks the worker pool buffers (default: 1000).
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Tables to check. Empty means every table present on both sides.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Tables never checked.
    #[serde(default)]
    pub skip_tables: Vec<String>,

    /// Columns excluded from checksums.
    #[serde(default)]
    pub skip_cols: Vec<String>,

    /// Key columns overriding the primary key.
    #[serde(default)]
    pub keys: Vec<String>,

    /// Row filter applied on both sides.
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,

    /// Output directory. Defaults to `<target_host>_<target_port>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_dir: Option<PathBuf>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            mode: CompareMode::default(),
            parallel: default_parallel(),
            capacity: default_capacity(),
            max_recheck_times: default_max_recheck_times(),
            max_recheck_rows: default_max_recheck_rows(),
            recheck_interval_secs: default_recheck_interval_secs(),
            queue_size: default_queue_size(),
            tables: Vec::new(),
            skip_tables: Vec::new(),
            skip_cols: Vec::new(),
            keys: Vec::new(),
            where_clause: None,
            out_dir: None,
        }
    }
}

impl CheckOptions {
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_secs)
    }
}

/// Split a comma-separated flag value, dropping empty items.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

// Default value functions for serde
fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_parallel() -> usize {
    2
}

fn default_capacity() -> usize {
    10_000
}

fn default_max_recheck_times() -> i64 {
    3
}

fn default_max_recheck_rows() -> i64 {
    1_000
}

fn default_recheck_interval_secs() -> u64 {
    10
}

fn default_queue_size() -> usize {
    1_000
}
