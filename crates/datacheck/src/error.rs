//! Error types for the reconciliation library.

use thiserror::Error;

/// Main error type for check operations.
#[derive(Error, Debug)]
pub enum CheckError {
    /// Configuration error (invalid YAML, bad endpoint, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// PostgreSQL connection or query error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL connection or query error
    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    Mysql(#[from] sqlx::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Table could not be prepared for comparison
    #[error("Precheck failed for table {table}: {message}")]
    Precheck { table: String, message: String },

    /// Row stream failed while pulling digests
    #[error("Row stream failed for table {table}: {message}")]
    Stream { table: String, message: String },

    /// The same key was produced twice by one side
    #[error("Duplicate key '{key}' on {side} side")]
    DuplicateKey { key: String, side: String },

    /// Report or output directory error
    #[error("Report error: {0}")]
    Report(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV report writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Check was cancelled (SIGINT, etc.)
    #[error("Check cancelled")]
    Cancelled,
}

impl CheckError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        CheckError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Precheck error
    pub fn precheck(table: impl Into<String>, message: impl Into<String>) -> Self {
        CheckError::Precheck {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Stream error
    pub fn stream(table: impl Into<String>, message: impl ToString) -> Self {
        CheckError::Stream {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for the launcher.
    pub fn exit_code(&self) -> u8 {
        match self {
            CheckError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for check operations.
pub type Result<T> = std::result::Result<T, CheckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CheckError::Config("bad".into()).exit_code(), 1);
        assert_eq!(CheckError::pool("refused", "connecting").exit_code(), 1);
        assert_eq!(CheckError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.yaml");
        let err = CheckError::from(io);
        let text = err.format_detailed();
        assert!(text.starts_with("Error: IO error: missing.yaml"));
    }

    #[test]
    fn test_duplicate_key_message() {
        let err = CheckError::DuplicateKey {
            key: "7".into(),
            side: "source".into(),
        };
        assert_eq!(err.to_string(), "Duplicate key '7' on source side");
    }
}
