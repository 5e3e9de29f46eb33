//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.prepare()
    }

    /// Fill target credentials from the source ones and validate.
    pub fn prepare(mut self) -> Result<Self> {
        if self.target.user.as_deref().map_or(true, str::is_empty) {
            self.target.user = self.source.user.clone();
        }
        if self.target.password.is_none() {
            self.target.password = self.source.password.clone();
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Directory receiving reports. Defaults to `<target_host>_<target_port>`.
    pub fn output_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.check.out_dir {
            return Ok(dir.clone());
        }
        let target = self.target.address()?;
        Ok(PathBuf::from(format!("{}_{}", target.host, target.port)))
    }

    /// Compute a SHA256 hash of the configuration, used to tag a run in logs.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
type: mysql
source:
  endpoint: "10.0.0.1:3306"
  user: checker
  password: secret
target:
  endpoint: "10.0.0.2:3307"
databases: ["orders", "crm:crm_copy"]
check:
  mode: slow
  parallel: 4
  where: "id > 100"
"#;

    #[test]
    fn test_from_yaml_fills_target_credentials() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.target.user(), "checker");
        assert_eq!(config.target.password(), "secret");
        assert_eq!(config.db_type, DbType::Mysql);
        assert_eq!(config.check.mode, CompareMode::Slow);
        assert_eq!(config.check.parallel, 4);
        assert_eq!(config.check.capacity, 10_000);
        assert_eq!(config.check.max_recheck_times, 3);
        assert_eq!(config.check.max_recheck_rows, 1_000);
        assert_eq!(config.check.where_clause.as_deref(), Some("id > 100"));
        assert_eq!(
            config.databases[1],
            DbPair {
                source: "crm".into(),
                target: "crm_copy".into()
            }
        );
    }

    #[test]
    fn test_output_dir_defaults_to_target_address() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.output_dir().unwrap(), PathBuf::from("10.0.0.2_3307"));
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Config::from_yaml(YAML).unwrap();
        let b = Config::from_yaml(YAML).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn test_bad_database_entry_rejected() {
        let yaml = YAML.replace("\"crm:crm_copy\"", "\"a:b:c\"");
        assert!(Config::from_yaml(&yaml).is_err());
    }
}
