//! Run configuration for the consistency checker.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::checks::{CheckId, CHECK_CONNECTIONS};
use crate::error::{FsckError, FsckResult};

/// Settings for one fsck run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsckConfig {
    /// Database file holding gathered entities and violations.
    pub db_path: PathBuf,
    /// Maximum number of pooled connections. Every open cursor holds one and
    /// storing results needs one more than the largest check uses. Checks
    /// run concurrently up to `pool_size / 5` at a time.
    pub pool_size: usize,
    /// Rows fetched per cursor page.
    pub page_size: usize,
    /// Rows per transaction when draining a check into the store.
    pub batch_size: usize,
    /// Storage targets present in the live target map.
    pub live_targets: Vec<u16>,
    /// Buddy groups present in the live target map.
    pub live_buddy_groups: Vec<u16>,
    /// Checks to run; empty means all.
    pub checks: Vec<CheckId>,
}

impl Default for FsckConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/var/tmp/parafs-fsck/fsck.db"),
            pool_size: 32,
            page_size: 4096,
            batch_size: 1024,
            live_targets: Vec::new(),
            live_buddy_groups: Vec::new(),
            checks: Vec::new(),
        }
    }
}

impl FsckConfig {
    /// Loads a configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

        let config: FsckConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that cannot work.
    pub fn validate(&self) -> FsckResult<()> {
        if self.pool_size < CHECK_CONNECTIONS {
            return Err(FsckError::Config(format!(
                "pool_size must be at least {}, got {}",
                CHECK_CONNECTIONS, self.pool_size
            )));
        }
        if self.page_size == 0 {
            return Err(FsckError::Config("page_size must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(FsckError::Config("batch_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Checks selected by this configuration, in run order.
    pub fn selected_checks(&self) -> Vec<CheckId> {
        if self.checks.is_empty() {
            return CheckId::ALL.to_vec();
        }
        CheckId::ALL.iter().copied().filter(|c| self.checks.contains(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = FsckConfig::default();
        assert_eq!(config.pool_size, 32);
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.batch_size, 1024);
        assert!(config.live_targets.is_empty());
        assert!(config.validate().is_ok());
        assert_eq!(config.selected_checks().len(), CheckId::ALL.len());
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
db_path = "/tmp/fsck-test.db"
pool_size = 8
live_targets = [1, 2, 3]
live_buddy_groups = [10]
checks = ["missing-targets", "dangling-dentries"]
            "#
        )
        .unwrap();

        let config = FsckConfig::from_file(file.path()).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/fsck-test.db"));
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.live_targets, vec![1, 2, 3]);
        assert_eq!(config.live_buddy_groups, vec![10]);
        assert_eq!(
            config.selected_checks(),
            vec![CheckId::DanglingDentries, CheckId::MissingTargets]
        );
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(file, r#"{{ "db_path": "/tmp/x.db", "batch_size": 10 }}"#).unwrap();
        let config = FsckConfig::from_file(file.path()).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.pool_size, 32);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(FsckConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_tiny_pool() {
        let config = FsckConfig { pool_size: 1, ..FsckConfig::default() };
        assert!(matches!(config.validate(), Err(FsckError::Config(_))));
        let config = FsckConfig { pool_size: CHECK_CONNECTIONS - 1, ..FsckConfig::default() };
        assert!(config.validate().is_err());
        let config = FsckConfig { pool_size: CHECK_CONNECTIONS, ..FsckConfig::default() };
        assert!(config.validate().is_ok());
    }
}
