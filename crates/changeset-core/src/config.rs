use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ChangesetError, Result};
use crate::ledger::TableWait;
use crate::lock::LockPolicy;
use crate::store::redb_store::METADATA_TABLE;

pub const DEFAULT_TABLE_NAME: &str = "changelog";

// ---------------------------------------------------------------------------
// RunnerConfig
// ---------------------------------------------------------------------------

/// Settings for one runner, fixed before the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Catalog location to load units from. Required.
    #[serde(default)]
    pub changelog_source: Option<String>,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// Prepended to `table_name`, and to tables of a synthesized mapper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_prefix: Option<String>,
    #[serde(default)]
    pub wait_for_lock: bool,
    #[serde(
        default = "default_lock_wait",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub lock_wait: Duration,
    #[serde(
        default = "default_lock_poll_interval",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub lock_poll_interval: Duration,
    #[serde(default)]
    pub throw_on_lock_failure: bool,
    /// Lock owner name; defaults to the hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(
        default = "default_table_wait",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub table_wait: Duration,
}

fn default_enabled() -> bool {
    true
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_lock_wait() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_lock_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_table_wait() -> Duration {
    Duration::from_secs(10 * 60)
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            changelog_source: None,
            table_name: default_table_name(),
            table_prefix: None,
            wait_for_lock: false,
            lock_wait: default_lock_wait(),
            lock_poll_interval: default_lock_poll_interval(),
            throw_on_lock_failure: false,
            owner: None,
            table_wait: default_table_wait(),
        }
    }
}

static TABLE_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn table_name_re() -> &'static Regex {
    TABLE_NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]{3,255}$").unwrap())
}

impl RunnerConfig {
    pub fn new(changelog_source: impl Into<String>) -> Self {
        Self {
            changelog_source: Some(changelog_source.into()),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ChangesetError::Configuration(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: RunnerConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// The table actually used, with the prefix applied.
    ///
    /// Changing the name or prefix of an existing deployment points the
    /// runner at an empty ledger, so every change set runs again.
    pub fn effective_table_name(&self) -> String {
        match &self.table_prefix {
            Some(prefix) => format!("{prefix}{}", self.table_name),
            None => self.table_name.clone(),
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.changelog_source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            wait_for_lock: self.wait_for_lock,
            max_wait: self.lock_wait,
            poll_interval: self.lock_poll_interval,
            throw_on_failure: self.throw_on_lock_failure,
        }
    }

    pub fn table_wait(&self) -> TableWait {
        TableWait {
            timeout: self.table_wait,
            ..TableWait::default()
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Checks everything that must hold before the store is touched.
    pub fn validate(&self) -> Result<()> {
        if self.source().is_none() {
            return Err(ChangesetError::Configuration(
                "changelog source is not set".to_string(),
            ));
        }
        let table = self.effective_table_name();
        if !table_name_re().is_match(&table) {
            return Err(ChangesetError::Configuration(format!(
                "invalid table name '{table}': use 3-255 characters from [A-Za-z0-9_.-]"
            )));
        }
        if table == METADATA_TABLE {
            return Err(ChangesetError::Configuration(format!(
                "table name '{table}' is reserved"
            )));
        }
        if self.wait_for_lock && self.lock_poll_interval.is_zero() {
            return Err(ChangesetError::Configuration(
                "lock_poll_interval must be greater than zero when wait_for_lock is set"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Serde helpers for Duration (serialized as seconds: u64)
// ---------------------------------------------------------------------------

fn serialize_secs<S>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_u64(d.as_secs())
}

fn deserialize_secs<'de, D>(d: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Duration::from_secs(u64::deserialize(d)?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RunnerConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.table_name, "changelog");
        assert!(!cfg.wait_for_lock);
        assert_eq!(cfg.lock_wait, Duration::from_secs(300));
        assert_eq!(cfg.lock_poll_interval, Duration::from_secs(10));
        assert!(!cfg.throw_on_lock_failure);
    }

    #[test]
    fn minimal_yaml_uses_defaults() {
        let cfg: RunnerConfig = serde_yaml::from_str("changelog_source: app::migrations\n").unwrap();
        assert_eq!(cfg.source(), Some("app::migrations"));
        assert_eq!(cfg.lock_wait, Duration::from_secs(300));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn durations_are_whole_seconds() {
        let yaml = "changelog_source: app\nwait_for_lock: true\nlock_wait: 30\nlock_poll_interval: 2\n";
        let cfg: RunnerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.lock_policy().max_wait, Duration::from_secs(30));
        assert_eq!(cfg.lock_policy().poll_interval, Duration::from_secs(2));
        assert!(cfg.lock_policy().wait_for_lock);

        let out = serde_yaml::to_string(&cfg).unwrap();
        assert!(out.contains("lock_wait: 30"));
        assert!(!out.contains("table_prefix"));
    }

    #[test]
    fn missing_or_blank_source_is_configuration_error() {
        let cfg = RunnerConfig::default();
        assert!(matches!(cfg.validate(), Err(ChangesetError::Configuration(_))));
        let cfg = RunnerConfig::new("   ");
        assert!(matches!(cfg.validate(), Err(ChangesetError::Configuration(_))));
    }

    #[test]
    fn table_prefix_is_applied_and_validated() {
        let mut cfg = RunnerConfig::new("app");
        cfg.table_prefix = Some("staging_".into());
        assert_eq!(cfg.effective_table_name(), "staging_changelog");
        assert!(cfg.validate().is_ok());

        cfg.table_name = "bad name!".into();
        assert!(matches!(cfg.validate(), Err(ChangesetError::Configuration(m)) if m.contains("invalid table name")));
    }

    #[test]
    fn metadata_table_name_is_reserved() {
        let mut cfg = RunnerConfig::new("app");
        cfg.table_name = "__tables".into();
        assert!(matches!(cfg.validate(), Err(ChangesetError::Configuration(m)) if m.contains("reserved")));

        cfg.table_name = "tables".into();
        cfg.table_prefix = Some("__".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_poll_interval_is_rejected_only_when_waiting() {
        let mut cfg = RunnerConfig::new("app");
        cfg.lock_poll_interval = Duration::ZERO;
        assert!(cfg.validate().is_ok());
        cfg.wait_for_lock = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("changeset.yaml");
        std::fs::write(&path, "changelog_source: app\nenabled: false\nowner: ci-runner\n").unwrap();
        let cfg = RunnerConfig::load(&path).unwrap();
        assert!(!cfg.enabled);
        assert_eq!(cfg.owner.as_deref(), Some("ci-runner"));
    }

    #[test]
    fn load_missing_file_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let err = RunnerConfig::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ChangesetError::Configuration(_)));
    }
}
