//! Configuration validation.

use super::Config;
use crate::drivers::common::SslMode;
use crate::error::{CheckError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let source = config.source.address()?;
    let target = config.target.address()?;

    if config.source.user().is_empty() {
        return Err(CheckError::Config("source.user is required".into()));
    }
    if config.target.user().is_empty() {
        return Err(CheckError::Config("target.user is required".into()));
    }
    SslMode::parse(&config.source.ssl_mode)?;
    SslMode::parse(&config.target.ssl_mode)?;

    if config.databases.is_empty() {
        return Err(CheckError::Config(
            "at least one database is required".into(),
        ));
    }

    // Comparing a database against itself proves nothing
    for pair in &config.databases {
        if source == target && pair.source == pair.target {
            return Err(CheckError::Config(format!(
                "source and target cannot be the same database ({} on {})",
                pair.source, source
            )));
        }
    }

    let check = &config.check;
    if check.parallel == 0 {
        return Err(CheckError::Config("check.parallel must be at least 1".into()));
    }
    if check.capacity == 0 {
        return Err(CheckError::Config("check.capacity must be at least 1".into()));
    }
    if check.queue_size == 0 {
        return Err(CheckError::Config(
            "check.queue_size must be at least 1".into(),
        ));
    }
    if check.where_clause.as_deref().is_some_and(|w| w.contains(';')) {
        return Err(CheckError::Config(
            "check.where must be a single condition".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CheckOptions, DbPair, DbType, EndpointConfig};

    fn valid_config() -> Config {
        Config {
            db_type: DbType::Postgres,
            source: EndpointConfig::new(
                "db-a:5432",
                Some("postgres".into()),
                Some("password".into()),
            ),
            target: EndpointConfig::new(
                "db-b:5432",
                Some("postgres".into()),
                Some("password".into()),
            ),
            databases: vec![DbPair::parse("app").unwrap()],
            check: CheckOptions::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_bad_endpoint_format() {
        let mut config = valid_config();
        config.source.endpoint = "db-a".into();
        assert!(validate(&config).is_err());

        config.source.endpoint = "db-a:port".into();
        assert!(validate(&config).is_err());

        config.source.endpoint = ":5432".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_source_user() {
        let mut config = valid_config();
        config.source.user = None;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_database_rejected() {
        let mut config = valid_config();
        config.target.endpoint = "db-a:5432".into();
        assert!(validate(&config).is_err());

        config.databases = vec![DbPair::parse("app:app_copy").unwrap()];
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_parallel_rejected() {
        let mut config = valid_config();
        config.check.parallel = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = valid_config();
        config.check.capacity = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let mut config = valid_config();
        config.target.ssl_mode = "sometimes".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_endpoint_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = Some("super_secret_password_123".to_string());
        let debug_output = format!("{:?}", config.source);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_db_pair_parsing() {
        let pair = DbPair::parse("sales").unwrap();
        assert_eq!(pair.source, "sales");
        assert_eq!(pair.target, "sales");

        let pairs = DbPair::parse_list("a, b:c").unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].target, "c");

        assert!(DbPair::parse(":c").is_err());
    }
}
