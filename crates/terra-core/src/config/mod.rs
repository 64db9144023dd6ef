//! Configuration parsing and management.
//!
//! The `terra` binary reads a single TOML file naming the ledger database,
//! the data roots of each operation and the deletion policy:
//!
//! ```toml
//! [database]
//! path = "/var/lib/terra/ledger.db"
//!
//! [write]
//! dest_dir = "/autofs/nas/neurobooth/data"
//!
//! [copy]
//! src_dir = "/autofs/nas/neurobooth/data"
//! dest_dirs = ["/space/neo/neurobooth", "/space/drwho/neurobooth"]
//!
//! [delete]
//! target_dir = "/autofs/nas/neurobooth/data"
//! durable_dests = ["/space/neo/neurobooth", "/space/drwho/neurobooth"]
//! threshold = 0.9
//! ```
//!
//! Every section is optional; an operation whose section is missing
//! required directories fails with [`ConfigError::Validation`] when it is
//! requested.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataflow::{DEFAULT_OLDER_THAN_SECS, DEFAULT_THRESHOLD, DeletePolicy, Rsync};
use crate::ledger::{LEDGER_TABLE, MANIFEST_TABLE, timestamp};
use crate::store::types::is_identifier;

/// Top-level configuration of the `terra` binary.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TerraConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub tables: TablesConfig,

    #[serde(default)]
    pub mirror: MirrorConfig,

    #[serde(default)]
    pub write: WriteConfig,

    #[serde(default)]
    pub copy: CopyConfig,

    #[serde(default)]
    pub delete: DeleteConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TerraConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, contains unknown keys, or
    /// fails [`TerraConfig::validate`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Checks values serde cannot check on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for table names that are not
    /// plain identifiers, a threshold outside `0.0..=1.0`, deletion ages
    /// beyond [`timestamp::MAX_AGE_SECS`], or an empty mirror program.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in [&self.tables.ledger, &self.tables.manifest] {
            if !is_identifier(name) {
                return Err(ConfigError::Validation(format!(
                    "invalid table name {name:?} in [tables]"
                )));
            }
        }
        if self.tables.ledger == self.tables.manifest {
            return Err(ConfigError::Validation(
                "[tables] ledger and manifest must be different tables".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.delete.threshold) {
            return Err(ConfigError::Validation(format!(
                "[delete] threshold must be between 0 and 1, got {}",
                self.delete.threshold
            )));
        }
        for (key, secs) in [
            ("record_older_than_secs", self.delete.record_older_than_secs),
            ("copied_older_than_secs", self.delete.copied_older_than_secs),
        ] {
            if !(-timestamp::MAX_AGE_SECS..=timestamp::MAX_AGE_SECS).contains(&secs) {
                return Err(ConfigError::Validation(format!(
                    "[delete] {key} must be within {max} seconds either way, got {secs}",
                    max = timestamp::MAX_AGE_SECS
                )));
            }
        }
        if self.mirror.program.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "[mirror] program must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured mirror tool.
    pub fn rsync(&self) -> Rsync {
        Rsync::new()
            .with_program(&self.mirror.program)
            .with_args(self.mirror.extra_args.clone())
    }

    /// Deletion policy of the `[delete]` section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `target_dir` is not set.
    pub fn delete_policy(&self) -> Result<DeletePolicy, ConfigError> {
        let target_dir = required(self.delete.target_dir.as_deref(), "[delete] target_dir")?;
        Ok(DeletePolicy::new(target_dir, self.delete.durable_dests.clone())
            .with_threshold(self.delete.threshold)
            .with_ages(
                self.delete.record_older_than_secs,
                self.delete.copied_older_than_secs,
            ))
    }
}

/// Returns a path the requested operation cannot run without.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] naming `key` if `path` is `None`.
pub fn required<'a>(path: Option<&'a Path>, key: &str) -> Result<&'a Path, ConfigError> {
    path.ok_or_else(|| ConfigError::Validation(format!("{key} is not set")))
}

/// Ledger database location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("terra.db")
}

/// Names of the ledger and manifest tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TablesConfig {
    #[serde(default = "default_ledger_table")]
    pub ledger: String,

    #[serde(default = "default_manifest_table")]
    pub manifest: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            ledger: default_ledger_table(),
            manifest: default_manifest_table(),
        }
    }
}

fn default_ledger_table() -> String {
    LEDGER_TABLE.to_string()
}

fn default_manifest_table() -> String {
    MANIFEST_TABLE.to_string()
}

/// Mirror tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MirrorConfig {
    /// Program to run; looked up on `PATH` unless absolute.
    #[serde(default = "default_mirror_program")]
    pub program: PathBuf,

    /// Arguments appended after the ones the ledger relies on.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            program: default_mirror_program(),
            extra_args: Vec::new(),
        }
    }
}

fn default_mirror_program() -> PathBuf {
    PathBuf::from("rsync")
}

/// Discovery.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WriteConfig {
    /// Primary location files are written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_dir: Option<PathBuf>,

    /// Only record files whose name starts with this prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

/// Copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CopyConfig {
    /// Root holding one folder per session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_dir: Option<PathBuf>,

    /// Destination roots sessions are spread across by subject id.
    #[serde(default)]
    pub dest_dirs: Vec<PathBuf>,

    /// Folder names under `src_dir` that are not sessions.
    #[serde(default = "default_exclude_sessions")]
    pub exclude_sessions: Vec<String>,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            src_dir: None,
            dest_dirs: Vec::new(),
            exclude_sessions: default_exclude_sessions(),
        }
    }
}

fn default_exclude_sessions() -> Vec<String> {
    vec!["old".to_string()]
}

/// Deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeleteConfig {
    /// Volume to free space on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<PathBuf>,

    /// Destinations whose verified copies make a file safe to delete.
    #[serde(default)]
    pub durable_dests: Vec<PathBuf>,

    /// Fraction of the volume in use at which deletion starts.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default = "default_older_than_secs")]
    pub record_older_than_secs: i64,

    #[serde(default = "default_older_than_secs")]
    pub copied_older_than_secs: i64,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            target_dir: None,
            durable_dests: Vec::new(),
            threshold: default_threshold(),
            record_older_than_secs: default_older_than_secs(),
            copied_older_than_secs: default_older_than_secs(),
        }
    }
}

const fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

const fn default_older_than_secs() -> i64 {
    DEFAULT_OLDER_THAN_SECS
}

/// Log output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `terra_core=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append logs to this file instead of stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let config = TerraConfig::from_toml("").unwrap();
        assert_eq!(config, TerraConfig::default());
        assert_eq!(config.database.path, PathBuf::from("terra.db"));
        assert_eq!(config.tables.ledger, "log_file");
        assert_eq!(config.tables.manifest, "log_sensor_file");
        assert_eq!(config.mirror.program, PathBuf::from("rsync"));
        assert_eq!(config.copy.exclude_sessions, vec!["old"]);
        assert!((config.delete.threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.delete.record_older_than_secs, 30 * 24 * 60 * 60);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [database]
            path = "/var/lib/terra/ledger.db"

            [tables]
            ledger = "log_file_test"
            manifest = "log_sensor_file_test"

            [mirror]
            program = "/usr/bin/rsync"
            extra_args = ["--partial"]

            [write]
            dest_dir = "/nas/data"
            session = "100001_"

            [copy]
            src_dir = "/nas/data"
            dest_dirs = ["/neo", "/drwho"]
            exclude_sessions = ["old", "tmp"]

            [delete]
            target_dir = "/nas/data"
            durable_dests = ["/neo", "/drwho"]
            threshold = 0.8
            record_older_than_secs = 3600
            copied_older_than_secs = 7200

            [logging]
            level = "terra_core=debug"
            file = "/var/log/terra.log"
        "#;

        let config = TerraConfig::from_toml(toml).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/var/lib/terra/ledger.db"));
        assert_eq!(config.tables.ledger, "log_file_test");
        assert_eq!(config.mirror.extra_args, vec!["--partial"]);
        assert_eq!(config.write.session.as_deref(), Some("100001_"));
        assert_eq!(config.copy.dest_dirs.len(), 2);
        assert_eq!(config.copy.exclude_sessions, vec!["old", "tmp"]);
        assert_eq!(config.logging.file, Some(PathBuf::from("/var/log/terra.log")));

        let policy = config.delete_policy().unwrap();
        assert_eq!(policy.target_dir, PathBuf::from("/nas/data"));
        assert_eq!(policy.durable_dests, vec![PathBuf::from("/neo"), PathBuf::from("/drwho")]);
        assert!((policy.threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(policy.record_older_than_secs, 3600);
        assert_eq!(policy.copied_older_than_secs, 7200);
    }

    #[test]
    fn test_reject_unknown_keys() {
        let err = TerraConfig::from_toml("[delete]\ntreshold = 0.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_reject_threshold_out_of_range() {
        let err = TerraConfig::from_toml("[delete]\nthreshold = 1.5\n").unwrap_err();
        match err {
            ConfigError::Validation(msg) => assert!(msg.contains("threshold")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_reject_age_out_of_range() {
        let err = TerraConfig::from_toml("[delete]\ncopied_older_than_secs = 9000000000000\n")
            .unwrap_err();
        match err {
            ConfigError::Validation(msg) => assert!(msg.contains("copied_older_than_secs")),
            other => panic!("expected validation error, got {other:?}"),
        }

        let err = TerraConfig::from_toml("[delete]\nrecord_older_than_secs = -9000000000000\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let config = TerraConfig::from_toml("[delete]\nrecord_older_than_secs = -1\n").unwrap();
        assert_eq!(config.delete.record_older_than_secs, -1);
    }

    #[test]
    fn test_reject_bad_table_names() {
        let err = TerraConfig::from_toml("[tables]\nledger = \"log file\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = TerraConfig::from_toml("[tables]\nledger = \"same\"\nmanifest = \"same\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_delete_policy_requires_target() {
        let err = TerraConfig::default().delete_policy().unwrap_err();
        match err {
            ConfigError::Validation(msg) => assert!(msg.contains("target_dir")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = TerraConfig::default();
        config.copy.src_dir = Some(PathBuf::from("/nas/data"));
        config.copy.dest_dirs = vec![PathBuf::from("/neo")];

        let text = config.to_toml().unwrap();
        assert_eq!(TerraConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("terra.toml");
        std::fs::write(&path, "[write]\ndest_dir = \"/nas/data\"\n").unwrap();

        let config = TerraConfig::from_file(&path).unwrap();
        assert_eq!(config.write.dest_dir, Some(PathBuf::from("/nas/data")));

        let err = TerraConfig::from_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
